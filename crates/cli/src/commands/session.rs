//! Session commands.

use plantorium_client::CartReconciler;
use plantorium_core::{CartMode, CredentialPair};
use secrecy::SecretString;
use serde_json::json;
use tracing::info;

use super::{CliError, emit};

/// Store a token pair and move the local cart onto the account.
///
/// # Errors
///
/// Returns an error if the tokens are empty, cannot be stored, or the cart
/// migration stops part-way. The session stays stored in the last case so
/// a later `cart sync` retries the migration.
pub async fn login(
    cart: &CartReconciler,
    access_token: &str,
    refresh_token: &str,
) -> Result<(), CliError> {
    let pair = CredentialPair::new(access_token, refresh_token)?;
    let report = cart.sign_in(&pair).await?;
    info!(migrated = report.migrated, "Signed in");
    emit(&report)
}

/// Forget the session and print the local cart.
///
/// # Errors
///
/// Returns an error if stored credentials cannot be removed.
pub fn logout(cart: &CartReconciler) -> Result<(), CliError> {
    let snapshot = cart.sign_out()?;
    emit(&snapshot)
}

/// Print whether a session is stored.
///
/// # Errors
///
/// Returns an error if storage cannot be read.
pub fn status(cart: &CartReconciler) -> Result<(), CliError> {
    let coordinator = cart.coordinator();
    let signed_in = coordinator.session()?.is_some();
    let order_token = coordinator.order_token()?.is_some();

    let active = if signed_in { CartMode::Remote } else { CartMode::Local };

    emit(&json!({
        "signedIn": signed_in,
        "orderToken": order_token,
        "cart": active,
    }))
}

/// Store the order-scoped checkout token.
///
/// # Errors
///
/// Returns an error if the token cannot be stored.
pub fn order_token(cart: &CartReconciler, token: String) -> Result<(), CliError> {
    cart.coordinator().set_order_token(&SecretString::from(token))?;
    emit(&json!({ "orderToken": true }))
}
