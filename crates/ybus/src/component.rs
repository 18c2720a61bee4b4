//! Components and models: the registry side of the runtime.
//!
//! A [`Component`] is a named bus participant. It aggregates [`Model`]s,
//! each of which may carry a config handler, a state handler, and RPC
//! groups. [`Component::run`] dials the shared transport, exports every
//! model, claims identities (one per model plus the component's own), and
//! starts any subscriptions registered before the run; subscriptions
//! registered afterwards start immediately.
//!
//! ```ignore
//! let comp = Component::new("com.vyatta.test.foo");
//! comp.model("com.vyatta.test.foo.v1")
//!     .config(store)
//!     .state(stats)
//!     .rpcs(RpcGroup::new("foo-v1").rpc("call-me", echo));
//! comp.run().await?;
//! comp.wait().await;
//! ```

use crate::client::Client;
use crate::object::{BoundObject, ConfigCheck, ConfigGet, ConfigSet, RpcGroup, StateGet};
use crate::subscription::{Sink, Subscription};
use crate::transport::{default_transport, Transport};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use ybus_types::Error;

#[derive(Default)]
struct SubscriptionTable {
    /// Set once the component runs; later subscriptions start immediately.
    run_on_subscribe: bool,
    entries: HashMap<String, Subscription>,
}

struct ComponentInner {
    name: String,
    transport: Arc<dyn Transport>,
    client: Client,
    models: Mutex<Vec<Model>>,
    subscriptions: RwLock<SubscriptionTable>,
    stop_tx: watch::Sender<bool>,
}

/// A named aggregate of models sharing one transport connection.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Creates a component on the process-default transport.
    #[must_use]
    pub fn new(name: &str) -> Component {
        Self::with_transport(name, default_transport())
    }

    /// Creates a component on the given transport. This is how tests
    /// inject a bus.
    #[must_use]
    pub fn with_transport(name: &str, transport: Arc<dyn Transport>) -> Component {
        let (stop_tx, _) = watch::channel(false);
        Component {
            inner: Arc::new(ComponentInner {
                name: name.to_string(),
                client: Client::with_transport(Arc::clone(&transport)),
                transport,
                models: Mutex::new(Vec::new()),
                subscriptions: RwLock::new(SubscriptionTable::default()),
                stop_tx,
            }),
        }
    }

    /// The component's bus identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Creates a new model attached to this component.
    pub fn model(&self, name: &str) -> Model {
        let model = Model::new(name, self.inner.client.clone());
        self.inner.models.lock().push(model.clone());
        model
    }

    /// The client sharing this component's connection. Use it to call
    /// RPCs or emit notifications from handler code without opening a
    /// second connection.
    pub async fn client(&self) -> Client {
        // Best effort: the connection may already be up, or run() will
        // surface the failure.
        let _ = self.inner.transport.dial().await;
        self.inner.client.clone()
    }

    /// Begins listening to `(module, notification)`. Registered before
    /// [`run`](Self::run), the subscription starts with the component;
    /// afterwards it starts now.
    pub async fn subscribe<T>(
        &self,
        module: &str,
        notification: &str,
        sink: Sink<T>,
    ) -> Result<(), Error>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let subscription = self.inner.client.subscribe(module, notification, sink);
        let run_now = {
            let mut table = self.inner.subscriptions.write();
            table
                .entries
                .insert(subscription_key(module, notification), subscription.clone());
            table.run_on_subscribe
        };
        if run_now {
            subscription.run().await
        } else {
            Ok(())
        }
    }

    /// Cancels and forgets the listener for `(module, notification)`.
    /// Unknown listeners are ignored.
    pub async fn unsubscribe(&self, module: &str, notification: &str) -> Result<(), Error> {
        let removed = self
            .inner
            .subscriptions
            .write()
            .entries
            .remove(&subscription_key(module, notification));
        match removed {
            Some(subscription) => subscription.cancel().await,
            None => Ok(()),
        }
    }

    /// The registered subscription for `(module, notification)`, for
    /// adjusting its queuing policy.
    #[must_use]
    pub fn lookup_subscription(&self, module: &str, notification: &str) -> Option<Subscription> {
        self.inner
            .subscriptions
            .read()
            .entries
            .get(&subscription_key(module, notification))
            .cloned()
    }

    /// Attaches the component to the transport and starts processing:
    /// exports every model, claims the model and component identities, and
    /// starts pre-registered subscriptions.
    pub async fn run(&self) -> Result<(), Error> {
        let transport = &self.inner.transport;
        transport.dial().await?;
        let models: Vec<Model> = self.inner.models.lock().clone();
        for model in &models {
            model.export_to(transport.as_ref()).await?;
            transport.request_identity(model.name()).await?;
        }
        let pending: Vec<Subscription> = {
            let mut table = self.inner.subscriptions.write();
            table.run_on_subscribe = true;
            table.entries.values().cloned().collect()
        };
        for subscription in pending {
            subscription.run().await?;
        }
        transport.request_identity(&self.inner.name).await?;
        debug!(component = %self.inner.name, models = models.len(), "component running");
        Ok(())
    }

    /// Blocks until [`stop`](Self::stop).
    pub async fn wait(&self) {
        let mut stopped = self.inner.stop_tx.subscribe();
        while !*stopped.borrow_and_update() {
            if stopped.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stops the component: releases waiters and closes the transport.
    /// Active subscriptions are not cancelled; cancel them first.
    pub async fn stop(&self) -> Result<(), Error> {
        let _ = self.inner.stop_tx.send(true);
        self.inner.transport.close().await
    }
}

fn subscription_key(module: &str, notification: &str) -> String {
    format!("{module}/{notification}")
}

#[derive(Default)]
struct ModelObjects {
    config: Option<BoundObject>,
    state: Option<BoundObject>,
    rpcs: Vec<BoundObject>,
}

struct ModelInner {
    name: String,
    client: Client,
    objects: Mutex<ModelObjects>,
}

/// A named, self-consistent set of data models exported by a component.
///
/// Builder methods are chainable; at most one config handler and one
/// state handler are kept (registration replaces).
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    fn new(name: &str, client: Client) -> Model {
        Model {
            inner: Arc::new(ModelInner {
                name: name.to_string(),
                client,
                objects: Mutex::new(ModelObjects::default()),
            }),
        }
    }

    /// The model's bus identity.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attaches a configuration handler with a reader: `set` and `check`
    /// from [`ConfigSet`], `get` from [`ConfigGet`].
    #[must_use]
    pub fn config<H>(self, handler: H) -> Self
    where
        H: ConfigSet + ConfigGet<Config = <H as ConfigCheck>::Config>,
        <H as ConfigCheck>::Config: serde::Serialize,
    {
        self.inner.objects.lock().config = Some(BoundObject::config(handler));
        self
    }

    /// Attaches a configuration handler without a reader; reads of this
    /// model's config report it as unsupported.
    #[must_use]
    pub fn config_write_only<H: ConfigSet>(self, handler: H) -> Self {
        self.inner.objects.lock().config = Some(BoundObject::config_write_only(handler));
        self
    }

    /// Attaches an operational state handler.
    #[must_use]
    pub fn state<H: StateGet>(self, handler: H) -> Self {
        self.inner.objects.lock().state = Some(BoundObject::state(handler));
        self
    }

    /// Attaches a set of RPCs for the group's module. Registering the same
    /// module again replaces the earlier group.
    #[must_use]
    pub fn rpcs(self, group: RpcGroup) -> Self {
        let object = BoundObject::rpc(group, &self.inner.client);
        let mut objects = self.inner.objects.lock();
        objects.rpcs.retain(|existing| existing.name() != object.name());
        objects.rpcs.push(object);
        drop(objects);
        self
    }

    pub(crate) async fn export_to(&self, transport: &dyn Transport) -> Result<(), Error> {
        let (config, state, rpcs) = {
            let objects = self.inner.objects.lock();
            (
                objects.config.clone(),
                objects.state.clone(),
                objects.rpcs.clone(),
            )
        };
        if let Some(object) = config {
            transport.export(object).await?;
        }
        if let Some(object) = state {
            transport.export(object).await?;
        }
        for object in rpcs {
            transport.export(object).await?;
        }
        Ok(())
    }
}
