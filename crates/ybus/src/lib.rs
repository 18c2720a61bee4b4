//! Component interconnect runtime over a message bus.
//!
//! ybus lets cooperating processes expose YANG-modeled configuration,
//! operational state, RPCs, and notifications to one another. The API is
//! symmetric: a process may act as a **component** (publishing models and
//! RPCs), a **client** (calling RPCs, reading and writing config,
//! subscribing to notifications), or both at once over one shared
//! connection.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Component                                              │
//! │   ├── Model "….foo.v1"                                 │
//! │   │     ├── config handler   → /running  (read+write)  │
//! │   │     ├── state handler    → /state    (read)        │
//! │   │     └── RpcGroup "foo-v1"→ /foo_v1/rpc             │
//! │   ├── Subscriptions (policy queue + worker each)       │
//! │   └── Client ──────────────┐                           │
//! └─────────────│──────────────│───────────────────────────┘
//!               ▼              ▼
//!         Transport (naming, marshalling, error mapping)
//!               │
//!               ▼
//!          object bus (signals, method calls, name ownership)
//! ```
//!
//! Inbound RPC: the bus delivers (method, payload) → the exported method
//! table resolves a bound callable → the binder decodes the input → the
//! handler runs → the binder encodes the output or error → the bus
//! replies. Inbound notification: the bus delivers to each registered
//! subscription → the subscription enqueues under its flow-control policy
//! → the worker validates, optionally caches, decodes, and hands the value
//! to the sink.
//!
//! # A component
//!
//! ```ignore
//! let comp = Component::new("com.vyatta.test.foo");
//! comp.model("com.vyatta.test.foo.v1")
//!     .config(MyConfig::default())
//!     .rpcs(RpcGroup::new("foo-v1").rpc("call-me", |input: Echo| Ok(input)));
//! comp.run().await?;
//! comp.wait().await;
//! ```
//!
//! # A client
//!
//! ```ignore
//! let client = Client::dial().await;
//! let out: Echo = client
//!     .call("foo-v1", "call-me", &Echo { value: "foobar".into() })
//!     .await
//!     .output()
//!     .await?;
//! ```
//!
//! Schema knowledge lives elsewhere: RPC inputs and notifications are
//! validated by calling a well-known peer directory ("yangd") over the
//! bus; this crate never parses YANG itself.

mod bus;
mod client;
mod component;
mod directory;
mod object;
mod queue;
mod subscription;
pub mod testing;
mod transport;

pub use bus::{
    errnames, Bus, BusConnection, BusError, BusReply, BusTransport, ExportedInterface,
    InterfaceInfo, SignalHandler,
};
pub use client::{call_rpc, emit_notification, Client, RpcCall};
pub use component::{Component, Model};
pub use object::{BoundMethod, BoundObject, ConfigCheck, ConfigGet, ConfigSet, ObjectKind,
    RpcGroup, StateGet};
pub use subscription::{Sink, Subscription};
pub use transport::{
    install_default_transport, teardown_default_transport, RpcPromise, Subscriber, Transport,
    YANGD_MODULE, YANGD_NAME,
};

pub use ybus_types::{naming, Error, Marshaller, MgmtError, RPC_ERROR_PREFIX};
