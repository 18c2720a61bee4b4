//! Handler binding: user handler values become uniform method tables.
//!
//! A model registers three kinds of handler:
//!
//! - **config** — [`ConfigSet`] (+ [`ConfigCheck`]) and optionally
//!   [`ConfigGet`];
//! - **state** — [`StateGet`];
//! - **RPC group** — an [`RpcGroup`] of named functions for one module.
//!
//! Binding wraps every handler into a string-in/string-out callable: the
//! wrapper decodes the payload into a fresh input value (with the
//! empty-object nullability rule), invokes the handler, propagates a
//! returned error, and otherwise encodes the output. The wrapped callables
//! are collected into a [`BoundObject`], the unit the transport exports.
//!
//! Handler shapes are checked by the type system; what remains checkable
//! only at bind time (wire-name legality, duplicate names) is held as a
//! `Shape` error inside the bound object and surfaced when the component
//! runs — exporting an invalid object fails.
//!
//! Before a typed RPC decodes its input, the wrapper asks the peer
//! directory to validate it (`validate-rpc-input` through the shared
//! client). Validation is skipped for raw handlers and when the module
//! name is empty, the escape hatch the wrapper tests use.

use crate::client::Client;
use crate::directory;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use ybus_types::{naming, Error, Marshaller, MgmtError};

/// Validates configuration against constraints the schema cannot express.
pub trait ConfigCheck: Send + Sync + 'static {
    type Config: DeserializeOwned + Send;

    fn check(&self, config: Self::Config) -> Result<(), Error>;
}

/// Applies configuration to the underlying service.
pub trait ConfigSet: ConfigCheck {
    fn set(&self, config: Self::Config) -> Result<(), Error>;
}

/// Reports the running configuration in data-model form.
pub trait ConfigGet: Send + Sync + 'static {
    type Config: Serialize;

    fn get(&self) -> Self::Config;
}

/// Reports operational state in data-model form.
pub trait StateGet: Send + Sync + 'static {
    type State: Serialize;

    fn get(&self) -> Self::State;
}

/// `() -> string` callable (config/state reads).
pub type ReadFn = Arc<dyn Fn() -> Result<String, Error> + Send + Sync>;
/// `string -> ()` callable (config writes).
pub type WriteFn = Arc<dyn Fn(String) -> Result<(), Error> + Send + Sync>;
/// Future returned by a bound RPC.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<String, Error>> + Send>>;
/// `string -> string` callable (RPCs; asynchronous because input
/// validation is itself an RPC).
pub type CallFn = Arc<dyn Fn(String) -> CallFuture + Send + Sync>;

/// A bound callable, named by its wire name.
#[derive(Clone)]
pub enum BoundMethod {
    Read(ReadFn),
    Write(WriteFn),
    Call(CallFn),
}

/// The kind of object a method table is exported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Read and write interfaces at `/running`.
    Config,
    /// Read interface at `/state`.
    State,
    /// Module method table at `/<module>/rpc`.
    Rpc,
}

/// A named method table ready for export on the transport.
///
/// Method names are model-layer names; the transport maps them to bus
/// spelling when it exports the object.
#[derive(Clone)]
pub struct BoundObject {
    name: String,
    kind: ObjectKind,
    methods: HashMap<String, BoundMethod>,
    err: Option<Error>,
}

impl BoundObject {
    /// Binds a config handler with a reader. Exposes `get`, `set`, and
    /// `check`.
    pub fn config<H>(handler: H) -> Self
    where
        H: ConfigSet + ConfigGet<Config = <H as ConfigCheck>::Config>,
        <H as ConfigCheck>::Config: Serialize,
    {
        let handler = Arc::new(handler);
        let mut object = Self::config_write_only_shared(Arc::clone(&handler));
        let get_handler = handler;
        object.methods.insert(
            "get".into(),
            BoundMethod::Read(Arc::new(move || Marshaller::new().encode(&get_handler.get()))),
        );
        object
    }

    /// Binds a config handler without a reader. Exposes `set` and `check`
    /// only; reads of this model's config fail as unsupported.
    pub fn config_write_only<H: ConfigSet>(handler: H) -> Self {
        Self::config_write_only_shared(Arc::new(handler))
    }

    fn config_write_only_shared<H: ConfigSet>(handler: Arc<H>) -> Self {
        let mut methods = HashMap::new();
        let set_handler = Arc::clone(&handler);
        methods.insert(
            "set".into(),
            BoundMethod::Write(Arc::new(move |encoded: String| {
                let config = Marshaller::new().decode_input(&encoded)?;
                set_handler.set(config).map_err(user_error)
            })),
        );
        let check_handler = handler;
        methods.insert(
            "check".into(),
            BoundMethod::Write(Arc::new(move |encoded: String| {
                let config = Marshaller::new().decode_input(&encoded)?;
                check_handler.check(config).map_err(user_error)
            })),
        );
        Self {
            name: "running".into(),
            kind: ObjectKind::Config,
            methods,
            err: None,
        }
    }

    /// Binds a state handler. Exposes `get`.
    pub fn state<H: StateGet>(handler: H) -> Self {
        let mut methods = HashMap::new();
        methods.insert(
            "get".into(),
            BoundMethod::Read(Arc::new(move || Marshaller::new().encode(&handler.get()))),
        );
        Self {
            name: "state".into(),
            kind: ObjectKind::State,
            methods,
            err: None,
        }
    }

    /// Binds an RPC group. The shared client performs input validation
    /// against the peer directory.
    pub fn rpc(group: RpcGroup, client: &Client) -> Self {
        let mut methods = HashMap::new();
        let module = group.module.clone();
        for (name, spec) in &group.methods {
            methods.insert(name.clone(), BoundMethod::Call(spec.bind(client, &module, name)));
        }
        Self {
            name: group.module,
            kind: ObjectKind::Rpc,
            methods,
            err: group.err,
        }
    }

    /// The name the object is exported under: the module name for RPC
    /// objects, `running`/`state` otherwise.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The bind-time error, if this object failed its shape checks.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// The bound callables, keyed by model-layer name.
    #[must_use]
    pub fn methods(&self) -> &HashMap<String, BoundMethod> {
        &self.methods
    }
}

fn user_error(err: Error) -> Error {
    match err {
        Error::Mgmt(_) => err,
        other => Error::Handler(other.to_string()),
    }
}

/// A set of RPCs for one module, built method by method.
///
/// ```ignore
/// RpcGroup::new("foo-v1")
///     .rpc("call-me", |input: Echo| Ok(input))
///     .rpc_raw("passthrough", |payload| Ok(payload))
/// ```
///
/// Typed methods decode their input and encode their output through the
/// marshaller; raw methods see the encoded payload verbatim and skip
/// input validation.
pub struct RpcGroup {
    module: String,
    methods: Vec<(String, RpcSpec)>,
    err: Option<Error>,
}

impl RpcGroup {
    /// Starts a group for `module`. The empty module name disables input
    /// validation (used to exercise wrappers without a directory).
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            methods: Vec::new(),
            err: None,
        }
    }

    /// Registers a typed RPC under its wire name.
    #[must_use]
    pub fn rpc<F, I, O>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(I) -> Result<O, Error> + Send + Sync + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + 'static,
    {
        if self.accept_name(name) {
            self.methods
                .push((name.into(), RpcSpec::Typed(Arc::new(TypedRpc::new(handler)))));
        }
        self
    }

    /// Registers a passthrough RPC: the handler sees the encoded payload
    /// verbatim and its output is returned verbatim.
    #[must_use]
    pub fn rpc_raw<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(String) -> Result<String, Error> + Send + Sync + 'static,
    {
        if self.accept_name(name) {
            self.methods.push((name.into(), RpcSpec::Raw(Arc::new(handler))));
        }
        self
    }

    fn accept_name(&mut self, name: &str) -> bool {
        if self.err.is_some() {
            return false;
        }
        if !naming::is_model_name(name) {
            self.err = Some(Error::Shape(format!("invalid RPC name {name:?}")));
            return false;
        }
        if self.methods.iter().any(|(existing, _)| existing == name) {
            self.err = Some(Error::Shape(format!("duplicate RPC name {name:?}")));
            return false;
        }
        true
    }
}

enum RpcSpec {
    Typed(Arc<dyn ErasedRpc>),
    Raw(Arc<dyn Fn(String) -> Result<String, Error> + Send + Sync>),
}

impl RpcSpec {
    fn bind(&self, client: &Client, module: &str, name: &str) -> CallFn {
        match self {
            RpcSpec::Typed(erased) => erased.bind(client, module, name),
            RpcSpec::Raw(handler) => {
                let handler = Arc::clone(handler);
                Arc::new(move |encoded: String| {
                    let result = handler(encoded).map_err(user_error);
                    Box::pin(std::future::ready(result)) as CallFuture
                })
            }
        }
    }
}

trait ErasedRpc: Send + Sync {
    fn bind(&self, client: &Client, module: &str, name: &str) -> CallFn;
}

struct TypedRpc<F, I, O> {
    handler: Arc<F>,
    _shape: std::marker::PhantomData<fn(I) -> O>,
}

impl<F, I, O> TypedRpc<F, I, O> {
    fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _shape: std::marker::PhantomData,
        }
    }
}

impl<F, I, O> ErasedRpc for TypedRpc<F, I, O>
where
    F: Fn(I) -> Result<O, Error> + Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + 'static,
{
    fn bind(&self, client: &Client, module: &str, name: &str) -> CallFn {
        let handler = Arc::clone(&self.handler);
        let client = client.clone();
        let module = module.to_string();
        let name = name.to_string();
        Arc::new(move |encoded: String| {
            let handler = Arc::clone(&handler);
            let client = client.clone();
            let module = module.clone();
            let name = name.clone();
            Box::pin(async move {
                if !module.is_empty() {
                    let valid =
                        directory::validate_rpc_input(&client, &module, &name, &encoded).await?;
                    if !valid {
                        return Err(Error::Mgmt(MgmtError::application(
                            "invalid-value",
                            &format!("input for {module}:{name} failed validation"),
                        )));
                    }
                }
                let input: I = Marshaller::new().decode_input(&encoded)?;
                let output = handler(input).map_err(user_error)?;
                Marshaller::new().encode(&output)
            }) as CallFuture
        })
    }
}

/// Builds an [`RpcGroup`] from an object's methods, mapping each method
/// name to its wire name automatically (`call_me` → `call-me`).
///
/// Every listed method must have the shape
/// `fn name(&self, input: I) -> Result<O, Error>`.
///
/// ```ignore
/// struct Rpcs;
/// impl Rpcs {
///     fn call_me(&self, input: Echo) -> Result<Echo, Error> { Ok(input) }
/// }
/// let group = rpc_group!("foo-v1", Rpcs, { call_me });
/// ```
#[macro_export]
macro_rules! rpc_group {
    ($module:expr, $handler:expr, { $($method:ident),+ $(,)? }) => {{
        let handler = ::std::sync::Arc::new($handler);
        let mut group = $crate::RpcGroup::new($module);
        $(
            let bound = ::std::sync::Arc::clone(&handler);
            group = group.rpc(
                &$crate::naming::model_name(stringify!($method)),
                move |input| bound.$method(input),
            );
        )+
        group
    }};
}
