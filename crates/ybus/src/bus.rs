//! The object-bus contract and the transport built on it.
//!
//! The concrete wire bus is an external collaborator; the runtime sees it
//! through the narrow [`Bus`]/[`BusConnection`] contract: connect, own
//! names, export method tables at (path, interface), invoke
//! (destination, path, interface, member), match and emit signals, and
//! introspect. [`crate::testing::MemoryBus`] implements the contract in
//! process.
//!
//! [`BusTransport`] layers the interconnect semantics on top:
//!
//! - **naming** — model-layer names become bus spelling on export and
//!   call; object paths follow `/<module>/rpc` and
//!   `/<module>/notification` with hyphens mapped to underscores, configs
//!   live at `/running` and state at `/state`.
//! - **routing** — RPC destinations are resolved through the peer
//!   directory, then checked against the remote's introspection before
//!   the call is issued.
//! - **signal fan-in** — one handler per connection demultiplexes inbound
//!   signals to subscribers keyed `<interface>/<member>`, deduplicated by
//!   subscriber identity.
//! - **error normalization** — bus "no such object" becomes
//!   `OperationNotSupported` on read paths and is ignored on config write
//!   paths (models without a writer are tolerated); errors under the
//!   management prefix decode back into structured records.

use crate::directory::{DestinationReply, DestinationRequest};
use crate::object::{BoundMethod, BoundObject, ObjectKind};
use crate::transport::{same_subscriber, RpcPromise, Subscriber, Transport, YANGD_MODULE, YANGD_NAME};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;
use ybus_types::{naming, Error, Marshaller, MgmtError, RPC_ERROR_PREFIX};

/// Read interface for config and state objects.
pub(crate) const CONFIG_READ_INTERFACE: &str = "net.vyatta.vci.config.read";
/// Write interface for config objects.
pub(crate) const CONFIG_WRITE_INTERFACE: &str = "net.vyatta.vci.config.write";
/// Interface prefix for module RPC and notification surfaces.
const YANG_MODULE_PREFIX: &str = "yang.module";
/// RPC object path of the peer directory.
const YANGD_RPC_PATH: &str = "/yangd_v1/rpc";

/// Well-known bus error names, in the spelling of the reference bus.
pub mod errnames {
    /// The destination name is not owned by any connection.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// The destination owns no object at the path.
    pub const NO_SUCH_OBJECT: &str = "org.freedesktop.DBus.Error.NoSuchObject";
    /// The object does not implement the member.
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// A name claim was refused.
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    /// The connection is gone.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
    /// An object is already exported at the path.
    pub const OBJECT_PATH_IN_USE: &str = "org.freedesktop.DBus.Error.ObjectPathInUse";
}

/// A bus-level error: a wire name plus a message body. Errors under the
/// management prefix carry an encoded [`MgmtError`] as their body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub name: String,
    pub message: String,
}

impl BusError {
    #[must_use]
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// Encodes a runtime error for transmission: structured records keep
    /// their identity, anything else is wrapped as `operation-failed`.
    #[must_use]
    pub fn from_error(err: Error) -> Self {
        let record = err.into_mgmt();
        Self {
            name: record.wire_name(),
            message: serde_json::to_string(&record).unwrap_or_else(|_| record.to_string()),
        }
    }
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// One-shot reply to a bus method call.
pub type BusReply = oneshot::Receiver<Result<String, BusError>>;

/// An interface of string-in/string-out methods exported at a path.
pub struct ExportedInterface {
    pub name: String,
    pub methods: HashMap<String, BoundMethod>,
}

/// Introspection data for one interface of a remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub methods: Vec<String>,
}

/// Receives signals delivered to a connection, in emission order.
#[async_trait]
pub trait SignalHandler: Send + Sync + 'static {
    async fn deliver_signal(&self, interface: &str, member: &str, body: String);
}

/// A connectable object bus.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn BusConnection>, BusError>;
}

/// One connection to the bus.
#[async_trait]
pub trait BusConnection: Send + Sync + 'static {
    /// Installs the handler inbound signals are delivered to.
    fn set_signal_handler(&self, handler: Arc<dyn SignalHandler>);

    /// Claims a name for this connection.
    async fn request_name(&self, name: &str) -> Result<(), BusError>;

    /// Exposes an object at `path` implementing the given interfaces.
    async fn export(&self, path: &str, interfaces: Vec<ExportedInterface>) -> Result<(), BusError>;

    /// Invokes `interface.member` on the object at `(destination, path)`.
    /// Fails synchronously if the target does not exist; the reply
    /// resolves when the handler completes.
    async fn call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        body: String,
    ) -> Result<BusReply, BusError>;

    /// Lists the interfaces of the object at `(destination, path)`.
    async fn introspect(&self, destination: &str, path: &str)
        -> Result<Vec<InterfaceInfo>, BusError>;

    /// Asks the bus to deliver signals matching `(interface, member)`.
    async fn add_match(&self, interface: &str, member: &str) -> Result<(), BusError>;

    /// Removes a previously added signal match.
    async fn remove_match(&self, interface: &str, member: &str) -> Result<(), BusError>;

    /// Broadcasts a signal from the object at `path`.
    async fn emit(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        body: String,
    ) -> Result<(), BusError>;

    /// Releases names and tears the connection down.
    async fn close(&self) -> Result<(), BusError>;
}

pub(crate) fn rpc_interface(module: &str) -> String {
    format!("{YANG_MODULE_PREFIX}.{}.RPC", naming::bus_name(module))
}

pub(crate) fn notification_interface(module: &str) -> String {
    format!("{YANG_MODULE_PREFIX}.{}.Notification", naming::bus_name(module))
}

pub(crate) fn rpc_path(module: &str) -> String {
    format!("/{}/rpc", naming::path_segment(module))
}

pub(crate) fn notification_path(module: &str) -> String {
    format!("/{}/notification", naming::path_segment(module))
}

/// Demultiplexes inbound signals to transport subscribers.
#[derive(Default)]
struct SignalRouter {
    table: RwLock<HashMap<String, Vec<Arc<dyn Subscriber>>>>,
}

impl SignalRouter {
    /// Adds a subscriber under `key`, ignoring re-subscription of the
    /// same subscriber.
    fn add(&self, key: String, subscriber: Arc<dyn Subscriber>) {
        let mut table = self.table.write();
        let entry = table.entry(key).or_default();
        if entry.iter().any(|existing| same_subscriber(existing, &subscriber)) {
            return;
        }
        entry.push(subscriber);
    }

    /// Removes a subscriber; returns how many remain under `key`.
    fn remove(&self, key: &str, subscriber: &Arc<dyn Subscriber>) -> usize {
        let mut table = self.table.write();
        let Some(entry) = table.get_mut(key) else {
            return 0;
        };
        entry.retain(|existing| !same_subscriber(existing, subscriber));
        let remaining = entry.len();
        if remaining == 0 {
            table.remove(key);
        }
        remaining
    }

    fn clear(&self) {
        self.table.write().clear();
    }
}

#[async_trait]
impl SignalHandler for SignalRouter {
    async fn deliver_signal(&self, interface: &str, member: &str, body: String) {
        let key = format!("{interface}/{member}");
        let subscribers: Vec<Arc<dyn Subscriber>> =
            self.table.read().get(&key).cloned().unwrap_or_default();
        for subscriber in subscribers {
            // Delivery failures are the subscriber's concern (a cancelled
            // subscription refuses deliveries); the signal keeps fanning
            // out.
            if let Err(err) = subscriber.deliver(body.clone()).await {
                debug!(signal = %key, error = %err, "subscriber refused delivery");
            }
        }
    }
}

/// The stock [`Transport`] over an object bus.
pub struct BusTransport {
    bus: Arc<dyn Bus>,
    conn: Mutex<Option<Arc<dyn BusConnection>>>,
    router: Arc<SignalRouter>,
}

impl BusTransport {
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            conn: Mutex::new(None),
            router: Arc::new(SignalRouter::default()),
        }
    }

    fn connection(&self) -> Result<Arc<dyn BusConnection>, Error> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| Error::TransportUnavailable("not connected".into()))
    }

    /// Translates a bus error into the runtime taxonomy.
    fn process_error(err: BusError) -> Error {
        if err.name == errnames::NO_SUCH_OBJECT {
            return Error::OperationNotSupported;
        }
        if let Some(record) = decode_mgmt_error(&err) {
            return Error::Mgmt(record);
        }
        match err.name.as_str() {
            errnames::SERVICE_UNKNOWN => Error::NoSuchObject(err.message),
            errnames::UNKNOWN_METHOD => Error::NoSuchMethod(err.message),
            errnames::ACCESS_DENIED => Error::Unauthorized(err.message),
            errnames::DISCONNECTED => Error::TransportUnavailable(err.message),
            _ => Error::Bus {
                name: err.name,
                message: err.message,
            },
        }
    }

    /// Like [`process_error`](Self::process_error), except a missing
    /// object is success: config writers are optional on the remote model.
    fn process_write_error(err: BusError) -> Result<(), Error> {
        if err.name == errnames::NO_SUCH_OBJECT {
            return Ok(());
        }
        Err(Self::process_error(err))
    }

    async fn wait_reply(reply: BusReply) -> Result<String, Error> {
        match reply.await {
            Ok(result) => result.map_err(Self::process_error),
            Err(_) => Err(Error::TransportUnavailable(
                "call abandoned by the bus".into(),
            )),
        }
    }

    async fn lookup_destination(
        &self,
        conn: &Arc<dyn BusConnection>,
        module: &str,
    ) -> Result<String, Error> {
        let marshaller = Marshaller::new();
        let body = marshaller.encode(&DestinationRequest { module_name: module })?;
        let reply = conn
            .call(
                YANGD_NAME,
                YANGD_RPC_PATH,
                &rpc_interface(YANGD_MODULE),
                &naming::bus_name("lookup-rpc-destination-by-module-name"),
                body,
            )
            .await
            .map_err(Self::process_error)?;
        let output = Self::wait_reply(reply).await?;
        let decoded: DestinationReply = marshaller.decode(&output)?;
        Ok(decoded.destination)
    }

    async fn advertises_rpc(
        conn: &Arc<dyn BusConnection>,
        destination: &str,
        module: &str,
        member: &str,
    ) -> bool {
        let interface = rpc_interface(module);
        match conn.introspect(destination, &rpc_path(module)).await {
            Ok(interfaces) => interfaces
                .iter()
                .any(|info| info.name == interface && info.methods.iter().any(|m| m == member)),
            Err(_) => false,
        }
    }

    /// Maps a bound object's method names to bus spelling, keeping only
    /// `wanted` entries.
    fn bus_methods(object: &BoundObject, wanted: &[&str]) -> HashMap<String, BoundMethod> {
        object
            .methods()
            .iter()
            .filter(|(name, _)| wanted.is_empty() || wanted.contains(&name.as_str()))
            .map(|(name, method)| (naming::bus_name(name), method.clone()))
            .collect()
    }

    async fn call_config_method(
        &self,
        model: &str,
        path: &str,
        interface: &str,
        member: &str,
        body: String,
        optional_writer: bool,
    ) -> Result<String, Error> {
        let conn = self.connection()?;
        let reply = match conn.call(model, path, interface, member, body).await {
            Ok(reply) => reply,
            Err(err) if optional_writer => return Self::process_write_error(err).map(|()| String::new()),
            Err(err) => return Err(Self::process_error(err)),
        };
        match reply.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) if optional_writer => {
                Self::process_write_error(err).map(|()| String::new())
            }
            Ok(Err(err)) => Err(Self::process_error(err)),
            Err(_) => Err(Error::TransportUnavailable(
                "call abandoned by the bus".into(),
            )),
        }
    }
}

#[async_trait]
impl Transport for BusTransport {
    async fn dial(&self) -> Result<(), Error> {
        if self.conn.lock().is_some() {
            return Ok(());
        }
        let conn = self
            .bus
            .connect()
            .await
            .map_err(|err| Error::TransportUnavailable(err.message))?;
        conn.set_signal_handler(Arc::clone(&self.router) as Arc<dyn SignalHandler>);
        *self.conn.lock() = Some(conn);
        Ok(())
    }

    async fn request_identity(&self, name: &str) -> Result<(), Error> {
        let conn = self.connection()?;
        conn.request_name(name).await.map_err(Self::process_error)
    }

    async fn export(&self, object: BoundObject) -> Result<(), Error> {
        if let Some(err) = object.error() {
            return Err(err.clone());
        }
        let conn = self.connection()?;
        let (path, interfaces) = match object.kind() {
            ObjectKind::Config => (
                "/running".to_string(),
                vec![
                    ExportedInterface {
                        name: CONFIG_READ_INTERFACE.into(),
                        methods: Self::bus_methods(&object, &["get"]),
                    },
                    ExportedInterface {
                        name: CONFIG_WRITE_INTERFACE.into(),
                        methods: Self::bus_methods(&object, &["set", "check"]),
                    },
                ],
            ),
            ObjectKind::State => (
                "/state".to_string(),
                vec![ExportedInterface {
                    name: CONFIG_READ_INTERFACE.into(),
                    methods: Self::bus_methods(&object, &["get"]),
                }],
            ),
            ObjectKind::Rpc => (
                rpc_path(object.name()),
                vec![ExportedInterface {
                    name: rpc_interface(object.name()),
                    methods: Self::bus_methods(&object, &[]),
                }],
            ),
        };
        conn.export(&path, interfaces)
            .await
            .map_err(Self::process_error)
    }

    async fn call(&self, module: &str, rpc: &str, input: String) -> Result<RpcPromise, Error> {
        let conn = self.connection()?;
        let destination = self.lookup_destination(&conn, module).await.map_err(|err| {
            debug!(module, rpc, error = %err, "destination lookup failed");
            Error::NoSuchObject(format!(
                "unable to locate RPC on bus (no model): {module}:{rpc}"
            ))
        })?;
        let member = naming::bus_name(rpc);
        if !Self::advertises_rpc(&conn, &destination, module, &member).await {
            return Err(Error::NoSuchMethod(format!(
                "unable to locate RPC on bus: {destination}:{module}:{rpc}"
            )));
        }
        let reply = conn
            .call(&destination, &rpc_path(module), &rpc_interface(module), &member, input)
            .await
            .map_err(Self::process_error)?;
        Ok(RpcPromise::from_future(Self::wait_reply(reply)))
    }

    async fn subscribe(
        &self,
        module: &str,
        notification: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), Error> {
        let conn = self.connection()?;
        let interface = notification_interface(module);
        let member = naming::bus_name(notification);
        conn.add_match(&interface, &member)
            .await
            .map_err(Self::process_error)?;
        self.router.add(format!("{interface}/{member}"), subscriber);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        module: &str,
        notification: &str,
        subscriber: &Arc<dyn Subscriber>,
    ) -> Result<(), Error> {
        let conn = self.connection()?;
        let interface = notification_interface(module);
        let member = naming::bus_name(notification);
        let remaining = self
            .router
            .remove(&format!("{interface}/{member}"), subscriber);
        if remaining != 0 {
            return Ok(());
        }
        conn.remove_match(&interface, &member)
            .await
            .map_err(Self::process_error)
    }

    async fn emit(&self, module: &str, notification: &str, input: String) -> Result<(), Error> {
        let conn = self.connection()?;
        conn.emit(
            &notification_path(module),
            &notification_interface(module),
            &naming::bus_name(notification),
            input,
        )
        .await
        .map_err(Self::process_error)
    }

    async fn set_config_for(&self, model: &str, input: String) -> Result<(), Error> {
        self.call_config_method(model, "/running", CONFIG_WRITE_INTERFACE, "Set", input, true)
            .await
            .map(|_| ())
    }

    async fn check_config_for(&self, model: &str, input: String) -> Result<(), Error> {
        self.call_config_method(model, "/running", CONFIG_WRITE_INTERFACE, "Check", input, true)
            .await
            .map(|_| ())
    }

    async fn read_config_for(&self, model: &str) -> Result<String, Error> {
        self.call_config_method(
            model,
            "/running",
            CONFIG_READ_INTERFACE,
            "Get",
            String::new(),
            false,
        )
        .await
    }

    async fn read_state_for(&self, model: &str) -> Result<String, Error> {
        self.call_config_method(
            model,
            "/state",
            CONFIG_READ_INTERFACE,
            "Get",
            String::new(),
            false,
        )
        .await
    }

    async fn close(&self) -> Result<(), Error> {
        self.router.clear();
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => conn.close().await.map_err(Self::process_error),
            None => Ok(()),
        }
    }
}

/// Decodes a structured management record out of a bus error carrying the
/// well-known prefix. Malformed bodies are passed through as plain bus
/// errors.
fn decode_mgmt_error(err: &BusError) -> Option<MgmtError> {
    if !err.name.starts_with(RPC_ERROR_PREFIX) {
        return None;
    }
    serde_json::from_str(&err.message).ok()
}
