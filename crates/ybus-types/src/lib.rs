//! Foundation types for the ybus component interconnect.
//!
//! This crate carries the pieces every other ybus crate depends on:
//!
//! - [`Error`] — the runtime error taxonomy, and [`MgmtError`], the
//!   structured management error record that crosses the bus.
//! - [`naming`] — transliteration between model-layer names
//!   (`foo-bar-v1`) and bus-layer names (`FooBarV1`).
//! - [`Marshaller`] — the RFC 7951 JSON encoder/decoder used for every
//!   payload on the wire.
//!
//! Nothing in here talks to a bus; it is pure data and string handling.

mod error;
mod marshal;
pub mod naming;

pub use error::{Error, MgmtError, RPC_ERROR_PREFIX};
pub use marshal::Marshaller;
