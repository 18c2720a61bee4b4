//! Test harnesses: an in-process bus and a stand-in peer directory.
//!
//! [`MemoryBus`] implements the [`Bus`] contract entirely in process:
//! name ownership, object export and dispatch (serialized per object),
//! introspection, and signal matching with ordered per-connection
//! delivery. It is what the integration suite runs against, and it is the
//! session-bus analog for local experimentation.
//!
//! [`DirectoryService`] is a minimal peer directory: a module→destination
//! table exposed through the directory's RPC surface. Launch one with
//! [`launch_directory`] before exercising typed RPCs or subscriptions —
//! both consult the directory.
//!
//! ```ignore
//! let bus = MemoryBus::new();
//! let (directory, _dir_comp) =
//!     launch_directory(&bus, &[("foo-v1", "com.vyatta.test.foo.v1")]).await?;
//!
//! let comp = Component::with_transport("com.vyatta.test.foo", bus.transport());
//! comp.model("com.vyatta.test.foo.v1")
//!     .rpcs(RpcGroup::new("foo-v1").rpc("call-me", |input: Echo| Ok(input)));
//! comp.run().await?;
//! ```

use crate::bus::{
    errnames, Bus, BusConnection, BusError, BusReply, BusTransport, ExportedInterface,
    InterfaceInfo, SignalHandler,
};
use crate::component::Component;
use crate::object::{BoundMethod, RpcGroup};
use crate::transport::{Transport, YANGD_MODULE, YANGD_NAME};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use ybus_types::Error;

/// Component identity the stand-in directory runs under.
pub const DIRECTORY_COMPONENT: &str = "net.vyatta.vci.config.yangd";

#[derive(Default)]
struct BusState {
    names: HashMap<String, u64>,
    connections: HashMap<u64, Arc<MemoryConnection>>,
}

struct BusCore {
    state: Mutex<BusState>,
    fail_dial: AtomicBool,
    next_id: AtomicU64,
}

/// An in-process object bus.
///
/// Clones share the bus; every connection made through any clone sees the
/// same names, objects, and signals.
#[derive(Clone)]
pub struct MemoryBus {
    core: Arc<BusCore>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(BusCore {
                state: Mutex::new(BusState::default()),
                fail_dial: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Makes subsequent connection attempts fail, for exercising dial
    /// failure paths.
    pub fn set_dial_failure(&self, fail: bool) {
        self.core.fail_dial.store(fail, Ordering::SeqCst);
    }

    /// A fresh transport over this bus.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(BusTransport::new(Arc::new(self.clone()) as Arc<dyn Bus>))
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn connect(&self) -> Result<Arc<dyn BusConnection>, BusError> {
        if self.core.fail_dial.load(Ordering::SeqCst) {
            return Err(BusError::new(
                errnames::DISCONNECTED,
                "failed to connect to bus",
            ));
        }
        let id = self.core.next_id.fetch_add(1, Ordering::SeqCst);
        let (deliveries, mut inbox) = mpsc::unbounded_channel::<SignalMessage>();
        let conn = Arc::new(MemoryConnection {
            core: Arc::clone(&self.core),
            id,
            closed: AtomicBool::new(false),
            objects: Mutex::new(HashMap::new()),
            matches: Mutex::new(HashSet::new()),
            handler: Mutex::new(None),
            deliveries,
        });
        self.core
            .state
            .lock()
            .connections
            .insert(id, Arc::clone(&conn));

        // One pump per connection keeps signal delivery ordered even when
        // a subscriber's queue policy suspends it.
        let pump = Arc::downgrade(&conn);
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                let Some(conn) = pump.upgrade() else { break };
                let handler = conn.handler.lock().clone();
                drop(conn);
                if let Some(handler) = handler {
                    handler
                        .deliver_signal(&msg.interface, &msg.member, msg.body)
                        .await;
                }
            }
        });
        Ok(conn)
    }
}

struct SignalMessage {
    interface: String,
    member: String,
    body: String,
}

struct ExportedObject {
    interfaces: HashMap<String, HashMap<String, BoundMethod>>,
    /// Serializes dispatch per exported object.
    dispatch: tokio::sync::Mutex<()>,
}

struct MemoryConnection {
    core: Arc<BusCore>,
    id: u64,
    closed: AtomicBool,
    objects: Mutex<HashMap<String, Arc<ExportedObject>>>,
    matches: Mutex<HashSet<String>>,
    handler: Mutex<Option<Arc<dyn SignalHandler>>>,
    deliveries: mpsc::UnboundedSender<SignalMessage>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::new(errnames::DISCONNECTED, "connection closed"));
        }
        Ok(())
    }

    fn resolve(&self, destination: &str) -> Result<Arc<MemoryConnection>, BusError> {
        let state = self.core.state.lock();
        let id = state.names.get(destination).copied().ok_or_else(|| {
            BusError::new(
                errnames::SERVICE_UNKNOWN,
                &format!("no connection owns {destination}"),
            )
        })?;
        state.connections.get(&id).cloned().ok_or_else(|| {
            BusError::new(
                errnames::SERVICE_UNKNOWN,
                &format!("owner of {destination} is gone"),
            )
        })
    }

    fn object_at(
        target: &MemoryConnection,
        path: &str,
    ) -> Result<Arc<ExportedObject>, BusError> {
        target.objects.lock().get(path).cloned().ok_or_else(|| {
            BusError::new(errnames::NO_SUCH_OBJECT, &format!("no object at {path}"))
        })
    }
}

#[async_trait]
impl BusConnection for MemoryConnection {
    fn set_signal_handler(&self, handler: Arc<dyn SignalHandler>) {
        *self.handler.lock() = Some(handler);
    }

    async fn request_name(&self, name: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut state = self.core.state.lock();
        match state.names.get(name) {
            Some(owner) if *owner == self.id => Ok(()),
            Some(_) => Err(BusError::new(
                errnames::ACCESS_DENIED,
                &format!("name already owned: {name}"),
            )),
            None => {
                state.names.insert(name.to_string(), self.id);
                Ok(())
            }
        }
    }

    async fn export(&self, path: &str, interfaces: Vec<ExportedInterface>) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut objects = self.objects.lock();
        if objects.contains_key(path) {
            return Err(BusError::new(
                errnames::OBJECT_PATH_IN_USE,
                &format!("object already exported at {path}"),
            ));
        }
        let mut table = HashMap::new();
        for interface in interfaces {
            table.insert(interface.name, interface.methods);
        }
        objects.insert(
            path.to_string(),
            Arc::new(ExportedObject {
                interfaces: table,
                dispatch: tokio::sync::Mutex::new(()),
            }),
        );
        Ok(())
    }

    async fn call(
        &self,
        destination: &str,
        path: &str,
        interface: &str,
        member: &str,
        body: String,
    ) -> Result<BusReply, BusError> {
        self.ensure_open()?;
        let target = self.resolve(destination)?;
        let object = Self::object_at(&target, path)?;
        let method = object
            .interfaces
            .get(interface)
            .and_then(|methods| methods.get(member))
            .cloned()
            .ok_or_else(|| {
                BusError::new(
                    errnames::UNKNOWN_METHOD,
                    &format!("{interface}.{member} on {path}"),
                )
            })?;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _serialized = object.dispatch.lock().await;
            let result = match method {
                BoundMethod::Read(f) => f(),
                BoundMethod::Write(f) => f(body).map(|()| String::new()),
                BoundMethod::Call(f) => f(body).await,
            };
            let _ = tx.send(result.map_err(BusError::from_error));
        });
        Ok(rx)
    }

    async fn introspect(
        &self,
        destination: &str,
        path: &str,
    ) -> Result<Vec<InterfaceInfo>, BusError> {
        self.ensure_open()?;
        let target = self.resolve(destination)?;
        let object = Self::object_at(&target, path)?;
        Ok(object
            .interfaces
            .iter()
            .map(|(name, methods)| InterfaceInfo {
                name: name.clone(),
                methods: methods.keys().cloned().collect(),
            })
            .collect())
    }

    async fn add_match(&self, interface: &str, member: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        self.matches.lock().insert(format!("{interface}/{member}"));
        Ok(())
    }

    async fn remove_match(&self, interface: &str, member: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        self.matches.lock().remove(&format!("{interface}/{member}"));
        Ok(())
    }

    async fn emit(
        &self,
        _path: &str,
        interface: &str,
        member: &str,
        body: String,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        let key = format!("{interface}/{member}");
        let receivers: Vec<Arc<MemoryConnection>> = {
            let state = self.core.state.lock();
            state
                .connections
                .values()
                .filter(|conn| conn.matches.lock().contains(&key))
                .cloned()
                .collect()
        };
        for receiver in receivers {
            let _ = receiver.deliveries.send(SignalMessage {
                interface: interface.to_string(),
                member: member.to_string(),
                body: body.clone(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.core.state.lock();
        state.connections.remove(&self.id);
        state.names.retain(|_, owner| *owner != self.id);
        Ok(())
    }
}

/// A stand-in peer directory: module→destination mappings behind the
/// directory RPC surface.
///
/// All handlers are raw (they see encoded payloads), as a real directory's
/// must be: they are consulted from inside the RPC wrappers, and decoding
/// through a validating wrapper would recurse.
#[derive(Clone)]
pub struct DirectoryService {
    mappings: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for DirectoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryService {
    /// A directory that already knows itself.
    #[must_use]
    pub fn new() -> Self {
        let service = Self {
            mappings: Arc::new(RwLock::new(HashMap::new())),
        };
        service.register(YANGD_MODULE, YANGD_NAME);
        service
    }

    /// Maps `module` to the bus identity serving its RPCs.
    pub fn register(&self, module: &str, destination: &str) {
        self.mappings
            .write()
            .insert(module.to_string(), destination.to_string());
    }

    /// The directory's RPC surface: `register-module` plus the three RPCs
    /// the runtime consumes.
    #[must_use]
    pub fn rpc_group(&self) -> RpcGroup {
        let register = self.clone();
        let lookup = self.clone();
        RpcGroup::new(YANGD_MODULE)
            .rpc_raw("register-module", move |payload| {
                let request: Value = serde_json::from_str(&payload)
                    .map_err(|e| Error::Decode(e.to_string()))?;
                let name = request["name"]
                    .as_str()
                    .ok_or_else(|| Error::Handler("register-module: missing name".into()))?;
                let destination = request["destination"].as_str().ok_or_else(|| {
                    Error::Handler("register-module: missing destination".into())
                })?;
                register.register(name, destination);
                Ok("{}".to_string())
            })
            .rpc_raw("lookup-rpc-destination-by-module-name", move |payload| {
                let request: Value = serde_json::from_str(&payload)
                    .map_err(|e| Error::Decode(e.to_string()))?;
                let module = request["yangd-v1:module-name"]
                    .as_str()
                    .ok_or_else(|| Error::Handler("lookup: missing module name".into()))?;
                let destination = lookup
                    .mappings
                    .read()
                    .get(module)
                    .cloned()
                    .ok_or_else(|| Error::Handler(format!("unknown module name: {module}")))?;
                Ok(json!({ "yangd-v1:destination": destination }).to_string())
            })
            .rpc_raw("validate-rpc-input", move |payload| {
                let request: Value = serde_json::from_str(&payload)
                    .map_err(|e| Error::Decode(e.to_string()))?;
                let input = request["yangd-v1:rpc-input"].as_str().unwrap_or("");
                let valid = serde_json::from_str::<Value>(input)
                    .map(|parsed| parsed.is_object())
                    .unwrap_or(false);
                Ok(json!({ "yangd-v1:valid": valid }).to_string())
            })
            .rpc_raw("validate-notification", move |payload| {
                let request: Value = serde_json::from_str(&payload)
                    .map_err(|e| Error::Decode(e.to_string()))?;
                let input = request["yangd-v1:input"]
                    .as_str()
                    .ok_or_else(|| Error::Handler("validate-notification: missing input".into()))?;
                Ok(json!({ "yangd-v1:output": input }).to_string())
            })
    }
}

/// Runs a directory component on `bus`, pre-registered with `modules`.
/// Keep the returned component alive for the duration of the test.
pub async fn launch_directory(
    bus: &MemoryBus,
    modules: &[(&str, &str)],
) -> Result<(DirectoryService, Component), Error> {
    let directory = DirectoryService::new();
    for (module, destination) in modules {
        directory.register(module, destination);
    }
    let component = Component::with_transport(DIRECTORY_COMPONENT, bus.transport());
    component.model(YANGD_NAME).rpcs(directory.rpc_group());
    component.run().await?;
    Ok((directory, component))
}
