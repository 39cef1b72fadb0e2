//! Cart commands.
//!
//! Every invocation starts in local mode, so each command first resumes any
//! stored session.

use plantorium_client::CartReconciler;
use plantorium_core::{CartLineId, Product, ProductId};
use rust_decimal::Decimal;
use tracing::debug;

use super::{CliError, emit, emit_outcome};

/// Pick up a stored session, migrating any local lines.
///
/// # Errors
///
/// Returns an error if the account cart cannot be fetched or migrated.
pub async fn resume(cart: &CartReconciler) -> Result<(), CliError> {
    let snapshot = cart.resume_session().await?;
    debug!(mode = %snapshot.mode, lines = snapshot.item_count(), "Cart resumed");
    Ok(())
}

/// Print the active cart.
///
/// # Errors
///
/// Returns an error if the output cannot be encoded.
pub fn show(cart: &CartReconciler) -> Result<(), CliError> {
    emit(&cart.snapshot())
}

/// Add a product to the active cart.
///
/// # Errors
///
/// Returns an error if the account cart rejects the request.
pub async fn add(
    cart: &CartReconciler,
    product: String,
    price: Decimal,
    discount: Decimal,
    quantity: u32,
) -> Result<(), CliError> {
    let product = Product::new(product, price, discount);
    emit_outcome(&cart.add(&product, quantity).await?)
}

/// Set the quantity of a cart line.
///
/// # Errors
///
/// Returns an error if the account cart rejects the request.
pub async fn set(cart: &CartReconciler, line: &CartLineId, quantity: u32) -> Result<(), CliError> {
    emit_outcome(&cart.update_quantity(line, quantity).await?)
}

/// Remove a cart line.
///
/// # Errors
///
/// Returns an error if the account cart rejects the request.
pub async fn remove(cart: &CartReconciler, line: &CartLineId) -> Result<(), CliError> {
    emit_outcome(&cart.remove(line).await?)
}

/// Re-fetch the active cart.
///
/// # Errors
///
/// Returns an error if the fetch fails.
pub async fn sync(cart: &CartReconciler) -> Result<(), CliError> {
    emit_outcome(&cart.refresh().await?)
}

/// Drop ordered products from the cart after payment.
///
/// # Errors
///
/// Returns an error if the order token cannot be removed.
pub fn complete_order(cart: &CartReconciler, products: Vec<String>) -> Result<(), CliError> {
    let products: Vec<ProductId> = products.into_iter().map(ProductId::from).collect();
    emit(&cart.complete_order(&products)?)
}
