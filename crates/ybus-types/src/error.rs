//! Error taxonomy for the ybus runtime.
//!
//! Two layers of error live here:
//!
//! - [`Error`] — what the runtime APIs return. Every fallible operation
//!   surfaces one of these; nothing panics across the API boundary.
//! - [`MgmtError`] — the structured management error record that crosses
//!   the bus. On the wire it travels under an error name prefixed with
//!   [`RPC_ERROR_PREFIX`] and a JSON body with NETCONF-shaped fields.
//!
//! Handler failures that are not already structured are wrapped into an
//! `application`/`operation-failed` record before they leave the process,
//! so a caller on the far side of the bus always sees a decodable error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire name prefix for structured management errors.
///
/// A bus-level error whose name starts with this prefix carries a JSON
/// body decodable into [`MgmtError`].
pub const RPC_ERROR_PREFIX: &str = "com.vyatta.rpcerror.";

/// Structured management error record.
///
/// Field names follow the NETCONF error conventions so the record can be
/// surfaced to management clients unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{error_tag}: {error_message}")]
pub struct MgmtError {
    /// Layer the error belongs to: `application` or `protocol`.
    #[serde(rename = "error-type")]
    pub error_type: String,
    /// Well-known error tag, e.g. `operation-failed`.
    #[serde(rename = "error-tag")]
    pub error_tag: String,
    /// Always `error` for errors (warnings are not transported).
    #[serde(rename = "severity")]
    pub severity: String,
    #[serde(rename = "error-app-tag", default, skip_serializing_if = "String::is_empty")]
    pub error_app_tag: String,
    #[serde(rename = "error-path", default, skip_serializing_if = "String::is_empty")]
    pub error_path: String,
    #[serde(rename = "error-message", default)]
    pub error_message: String,
    #[serde(rename = "error-info", default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<serde_json::Value>,
}

impl MgmtError {
    /// An application-layer error with the given tag and message.
    #[must_use]
    pub fn application(tag: &str, message: &str) -> Self {
        Self {
            error_type: "application".into(),
            error_tag: tag.into(),
            severity: "error".into(),
            error_app_tag: String::new(),
            error_path: String::new(),
            error_message: message.into(),
            error_info: None,
        }
    }

    /// The generic wrapper for a failed user handler.
    #[must_use]
    pub fn operation_failed(message: &str) -> Self {
        Self::application("operation-failed", message)
    }

    /// A payload that could not be encoded or decoded.
    #[must_use]
    pub fn malformed_message() -> Self {
        Self::application("malformed-message", "malformed message")
    }

    /// The name this record travels under on the bus.
    #[must_use]
    pub fn wire_name(&self) -> String {
        format!("{RPC_ERROR_PREFIX}{}", self.error_tag)
    }
}

/// Runtime error taxonomy.
///
/// | Variant | Meaning |
/// |---------|---------|
/// | `TransportUnavailable` | not connected, or the connection failed |
/// | `Unauthorized` | an identity claim was refused |
/// | `NoSuchObject` | the addressed object does not exist on the bus |
/// | `NoSuchMethod` | the remote object does not advertise the method |
/// | `MalformedMessage` | a payload failed to encode or decode at the client boundary |
/// | `OperationNotSupported` | the remote model does not expose the operation |
/// | `Handler` | user-supplied handler code returned an error |
/// | `Shape` | a handler value failed bind-time checks |
/// | `Encode` / `Decode` | marshalling failed inside the binder |
/// | `Subscriber` | a subscription sink could not take a delivery |
/// | `Cancelled` | the subscription was cancelled |
/// | `Mgmt` | a structured management error decoded off the bus |
/// | `Bus` | an unrecognized bus-level error, passed through |
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    #[error("malformed message")]
    MalformedMessage,
    #[error("operation not supported")]
    OperationNotSupported,
    #[error("handler failed: {0}")]
    Handler(String),
    #[error("invalid handler shape: {0}")]
    Shape(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("invalid subscriber: {0}")]
    Subscriber(String),
    #[error("subscription cancelled")]
    Cancelled,
    #[error(transparent)]
    Mgmt(#[from] MgmtError),
    #[error("bus error {name}: {message}")]
    Bus { name: String, message: String },
}

impl Error {
    /// Wraps a handler failure so it can cross the bus as a structured
    /// record. Errors that are already structured pass through unchanged.
    #[must_use]
    pub fn into_mgmt(self) -> MgmtError {
        match self {
            Error::Mgmt(m) => m,
            other => MgmtError::operation_failed(&other.to_string()),
        }
    }
}
