//! Error taxonomy shared by the codec, relay, and dispatcher.
//!
//! Nothing here is recovered locally: every variant surfaces to the host runtime.

use crate::host::StoreError;
use crate::transport::TransportError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Envelope (outbound, inbound, or response) does not match its schema.
    #[error("schema violation in {envelope}: {reason}")]
    SchemaViolation { envelope: String, reason: String },

    /// Inbound (method, path) pair is not one of the known webhook routes.
    #[error("route not found: {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// Transport-level failure or non-2xx answer from the external service.
    #[error("remote call {operation} failed: {source}")]
    RemoteCallFailed {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    /// Creating the remote ticket failed (transport or response schema).
    #[error("remote ticket creation failed: {0}")]
    RemoteCreateFailed(#[source] Box<Error>),

    /// Closing the remote ticket failed (transport or response schema).
    #[error("remote ticket close failed: {0}")]
    RemoteCloseFailed(#[source] Box<Error>),

    /// Host store lookup-or-create (or create) keyed by a remote id failed.
    #[error("identity resolution failed for {remote_id}: {source}")]
    IdentityResolutionFailed {
        remote_id: String,
        #[source]
        source: StoreError,
    },

    /// A local entity has no bound remote id; the caller should have created it first.
    #[error("{entity} {id} has no remote id bound")]
    MissingRemoteTag { entity: &'static str, id: String },

    /// Host store message/event creation failed.
    #[error("host store {operation} failed: {source}")]
    HostStore {
        operation: &'static str,
        #[source]
        source: StoreError,
    },
}

impl Error {
    pub fn schema(envelope: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SchemaViolation {
            envelope: envelope.into(),
            reason: reason.to_string(),
        }
    }

    pub fn route_not_found(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self::RouteNotFound {
            method: method.into(),
            path: path.into(),
        }
    }

    /// True for `SchemaViolation`, including one wrapped by a create/close failure.
    pub fn is_schema_violation(&self) -> bool {
        match self {
            Self::SchemaViolation { .. } => true,
            Self::RemoteCreateFailed(inner) | Self::RemoteCloseFailed(inner) => {
                inner.is_schema_violation()
            }
            _ => false,
        }
    }
}
