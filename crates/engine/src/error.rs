//! The module contains the errors the ledger can throw.
//!
//! The errors a caller sees are:
//!
//! - [`Validation`] thrown when a draft misses a required field. It never
//!   reaches the remote store.
//! - [`Auth`] thrown when signing in fails.
//! - [`RemoteWrite`] thrown when the remote store rejects a create/delete.
//! - [`Subscription`] reported when a live subscription fails mid-stream.
//! - [`NotSignedIn`] thrown by writes issued before an owner is known.
//!
//! [`RemoteError`] is what a remote store or identity provider reports; the
//! ledger maps it to the variant matching the call site.
//!
//!  [`Validation`]: LedgerError::Validation
//!  [`Auth`]: LedgerError::Auth
//!  [`RemoteWrite`]: LedgerError::RemoteWrite
//!  [`Subscription`]: LedgerError::Subscription
//!  [`NotSignedIn`]: LedgerError::NotSignedIn
use thiserror::Error;

/// Ledger custom errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid field: {0}")]
    Validation(String),
    #[error("Sign-in failed: {0}")]
    Auth(String),
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),
    #[error("Subscription failed: {0}")]
    Subscription(String),
    #[error("Not signed in")]
    NotSignedIn,
}

/// Failures reported by a remote collection store or identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("\"{0}\" not found")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl LedgerError {
    pub(crate) fn auth(err: RemoteError) -> Self {
        Self::Auth(err.to_string())
    }

    pub(crate) fn write(err: RemoteError) -> Self {
        Self::RemoteWrite(err.to_string())
    }

    pub(crate) fn subscription(err: RemoteError) -> Self {
        Self::Subscription(err.to_string())
    }
}
