//! Command implementations and the shared JSON output helper.

pub mod cart;
pub mod session;

use plantorium_client::{AuthError, CartError, CartOutcome, ClientError, DomainError};
use plantorium_core::CredentialError;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The client stack could not be built or a request failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Stored credentials could not be read or written.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The supplied token pair was rejected.
    #[error("Invalid credentials: {0}")]
    Credentials(#[from] CredentialError),

    /// The result could not be printed.
    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Rejection<'a> {
    code: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct RejectionOutput<'a> {
    rejected: Rejection<'a>,
}

/// Print `value` to stdout as pretty JSON.
#[allow(clippy::print_stdout)]
pub fn emit<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a cart outcome: the snapshot, or the rejection as `{ "rejected": .. }`.
pub fn emit_outcome(outcome: &CartOutcome) -> Result<(), CliError> {
    match outcome {
        CartOutcome::Applied(snapshot) => emit(snapshot),
        CartOutcome::Rejected(DomainError { code, message }) => emit(&RejectionOutput {
            rejected: Rejection { code, message },
        }),
    }
}
