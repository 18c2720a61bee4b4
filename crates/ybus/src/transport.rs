//! The transport contract and the default-transport registry.
//!
//! A [`Transport`] is the runtime's view of the message bus: claim an
//! identity, export bound objects, invoke remote methods, publish and
//! subscribe to notifications. The concrete wiring to a bus lives behind
//! the [`Bus`](crate::Bus) contract; [`BusTransport`](crate::BusTransport)
//! is the stock implementation over it.
//!
//! The process-wide default transport is an explicit registry:
//! [`install_default_transport`] supplies a factory (one transport per
//! client/component), [`teardown_default_transport`] clears it. With no
//! factory installed every operation fails with `TransportUnavailable`,
//! never a panic.

use crate::object::BoundObject;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use ybus_types::Error;

/// Bus identity of the peer directory.
pub const YANGD_NAME: &str = "net.vyatta.vci.config.yangd.v1";
/// Module under which the peer directory exposes its RPCs.
pub const YANGD_MODULE: &str = "yangd-v1";

/// Delivery hook for an inbound notification.
///
/// The transport calls [`deliver`](Subscriber::deliver) once per matching
/// signal; the implementation enqueues into its subscription queue and may
/// suspend when the queue's policy blocks producers.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    async fn deliver(&self, encoded: String) -> Result<(), Error>;
}

/// Compares two subscribers by identity (the shared allocation, not the
/// vtable). Used to deduplicate subscribe and to match unsubscribe.
pub(crate) fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// One-shot handle for the result of an RPC invocation.
///
/// Resolves exactly once to the encoded output payload or an error, and is
/// consumed by a single waiter. The core imposes no timeout; a promise
/// that never resolves blocks its waiter indefinitely.
pub struct RpcPromise {
    fut: Pin<Box<dyn Future<Output = Result<String, Error>> + Send>>,
}

impl std::fmt::Debug for RpcPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcPromise").finish_non_exhaustive()
    }
}

impl RpcPromise {
    /// Wraps a future that resolves to the encoded output.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<String, Error>> + Send + 'static,
    {
        Self { fut: Box::pin(fut) }
    }

    /// A promise that is already resolved.
    #[must_use]
    pub fn ready(result: Result<String, Error>) -> Self {
        Self::from_future(std::future::ready(result))
    }

    /// Waits for resolution and yields the encoded output.
    pub async fn output(self) -> Result<String, Error> {
        self.fut.await
    }
}

/// The transport contract.
///
/// Semantics any implementation must honor (the `transport_semantics`
/// integration suite asserts them):
///
/// - `dial` is idempotent once connected.
/// - `export` publishes a bound object at the path derived from its
///   name and kind; exporting an invalid object fails with its held error.
/// - `call` resolves the destination through the peer directory, verifies
///   the remote advertises the method, and fails synchronously otherwise.
/// - `subscribe` deduplicates on subscriber identity; the unsubscribe that
///   removes the last subscriber for a name also removes the underlying
///   signal match.
/// - `emit` reaches every registered subscriber, local and remote.
/// - bus-level "no such object" is reported as `OperationNotSupported` on
///   read paths and ignored on config write paths, so models without a
///   config writer are tolerated.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects to the bus. Idempotent once connected.
    async fn dial(&self) -> Result<(), Error>;

    /// Claims `name` on the bus; fails if another connection owns it.
    async fn request_identity(&self, name: &str) -> Result<(), Error>;

    /// Publishes a bound object on the bus.
    async fn export(&self, object: BoundObject) -> Result<(), Error>;

    /// Starts an RPC and returns its promise.
    async fn call(&self, module: &str, rpc: &str, input: String) -> Result<RpcPromise, Error>;

    /// Attaches a delivery hook for (module, notification).
    async fn subscribe(
        &self,
        module: &str,
        notification: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), Error>;

    /// Detaches a previously attached delivery hook.
    async fn unsubscribe(
        &self,
        module: &str,
        notification: &str,
        subscriber: &Arc<dyn Subscriber>,
    ) -> Result<(), Error>;

    /// Broadcasts a notification to all subscribers of (module, name).
    async fn emit(&self, module: &str, notification: &str, input: String) -> Result<(), Error>;

    /// Applies configuration through the model's registered writer.
    async fn set_config_for(&self, model: &str, input: String) -> Result<(), Error>;

    /// Validates configuration through the model's registered checker.
    async fn check_config_for(&self, model: &str, input: String) -> Result<(), Error>;

    /// Reads the model's running configuration.
    async fn read_config_for(&self, model: &str) -> Result<String, Error>;

    /// Reads the model's operational state.
    async fn read_state_for(&self, model: &str) -> Result<String, Error>;

    /// Removes subscribers and drops the connection.
    async fn close(&self) -> Result<(), Error>;
}

type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

static DEFAULT_TRANSPORT: RwLock<Option<TransportFactory>> = RwLock::new(None);

/// Installs the process-wide default transport factory.
///
/// Each [`Client::dial`](crate::Client::dial) and
/// [`Component::new`](crate::Component::new) invokes the factory once to
/// obtain its own transport instance.
pub fn install_default_transport<F>(factory: F)
where
    F: Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
{
    *DEFAULT_TRANSPORT.write() = Some(Arc::new(factory));
}

/// Clears the default transport factory.
pub fn teardown_default_transport() {
    *DEFAULT_TRANSPORT.write() = None;
}

/// Resolves a fresh transport from the registry. With nothing installed,
/// returns a transport whose every operation fails with
/// `TransportUnavailable`.
pub(crate) fn default_transport() -> Arc<dyn Transport> {
    match DEFAULT_TRANSPORT.read().as_ref() {
        Some(factory) => factory(),
        None => Arc::new(UnconfiguredTransport),
    }
}

/// A transport on which every operation fails; for code paths that need a
/// transport value but no connection.
#[cfg(test)]
pub(crate) fn unconfigured_transport() -> Arc<dyn Transport> {
    Arc::new(UnconfiguredTransport)
}

/// Stand-in transport used when no default factory is installed.
struct UnconfiguredTransport;

impl UnconfiguredTransport {
    fn err(&self) -> Error {
        Error::TransportUnavailable("no default transport installed".into())
    }
}

#[async_trait]
impl Transport for UnconfiguredTransport {
    async fn dial(&self) -> Result<(), Error> {
        Err(self.err())
    }
    async fn request_identity(&self, _name: &str) -> Result<(), Error> {
        Err(self.err())
    }
    async fn export(&self, _object: BoundObject) -> Result<(), Error> {
        Err(self.err())
    }
    async fn call(&self, _module: &str, _rpc: &str, _input: String) -> Result<RpcPromise, Error> {
        Err(self.err())
    }
    async fn subscribe(
        &self,
        _module: &str,
        _notification: &str,
        _subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), Error> {
        Err(self.err())
    }
    async fn unsubscribe(
        &self,
        _module: &str,
        _notification: &str,
        _subscriber: &Arc<dyn Subscriber>,
    ) -> Result<(), Error> {
        Err(self.err())
    }
    async fn emit(&self, _module: &str, _notification: &str, _input: String) -> Result<(), Error> {
        Err(self.err())
    }
    async fn set_config_for(&self, _model: &str, _input: String) -> Result<(), Error> {
        Err(self.err())
    }
    async fn check_config_for(&self, _model: &str, _input: String) -> Result<(), Error> {
        Err(self.err())
    }
    async fn read_config_for(&self, _model: &str) -> Result<String, Error> {
        Err(self.err())
    }
    async fn read_state_for(&self, _model: &str) -> Result<String, Error> {
        Err(self.err())
    }
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn promise_resolves_once() {
        let promise = RpcPromise::ready(Ok("{}".into()));
        assert_eq!(promise.output().await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn unconfigured_registry_fails_cleanly() {
        teardown_default_transport();
        let transport = default_transport();
        let err = transport.dial().await.unwrap_err();
        assert!(matches!(err, Error::TransportUnavailable(_)));
    }
}
