//! The client facade: RPC calls, notifications, config and state access.
//!
//! A [`Client`] encapsulates one transport connection. Values are encoded
//! through the marshaller on the way out and decoded on the way in; the
//! `_raw` method variants bypass both for payloads that are already in
//! wire form.
//!
//! A client whose dial failed is still usable as a value: every operation
//! on it fails with the original dial error, and a subscription created
//! from it carries that error until [`Subscription::run`] surfaces it.

use crate::subscription::{Sink, Subscription};
use crate::transport::{default_transport, RpcPromise, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use ybus_types::{Error, Marshaller};

struct ClientInner {
    transport: Arc<dyn Transport>,
    marshaller: Marshaller,
    /// Dial failure, pinned for the life of the client.
    err: Option<Error>,
}

/// A handle for performing operations on the bus.
///
/// Cloning is cheap and clones share the underlying connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connects a client over the process-default transport.
    pub async fn dial() -> Client {
        Self::dial_with(default_transport()).await
    }

    /// Connects a client over the given transport.
    pub async fn dial_with(transport: Arc<dyn Transport>) -> Client {
        let err = transport.dial().await.err();
        Self::assemble(transport, err)
    }

    /// Wraps a transport without dialing it. Used where the connection is
    /// managed elsewhere, e.g. the client a component shares with its
    /// models.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Client {
        Self::assemble(transport, None)
    }

    /// A client bound to no usable transport; every operation fails.
    #[cfg(test)]
    pub(crate) fn detached() -> Client {
        Self::assemble(crate::transport::unconfigured_transport(), None)
    }

    fn assemble(transport: Arc<dyn Transport>, err: Option<Error>) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                transport,
                marshaller: Marshaller::new(),
                err,
            }),
        }
    }

    /// The dial failure, if connecting this client failed.
    pub fn check_connection(&self) -> Result<(), Error> {
        match &self.inner.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Closes the connection. Active subscriptions are not cancelled by
    /// this; cancel them first.
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.transport.close().await
    }

    /// Starts the RPC `(module, rpc)` with `input` encoded through the
    /// marshaller. The returned [`RpcCall`] resolves to the output.
    pub async fn call<T: Serialize>(&self, module: &str, rpc: &str, input: &T) -> RpcCall {
        match self.encode_value(input) {
            Ok(encoded) => self.call_raw(module, rpc, encoded).await,
            Err(err) => RpcCall::failed(self.clone(), err),
        }
    }

    /// Starts an RPC whose input is already encoded.
    pub async fn call_raw(&self, module: &str, rpc: &str, input: impl Into<String>) -> RpcCall {
        if let Err(err) = self.check_connection() {
            return RpcCall::failed(self.clone(), err);
        }
        match self.inner.transport.call(module, rpc, input.into()).await {
            Ok(promise) => RpcCall::resolved_by(self.clone(), promise),
            Err(err) => RpcCall::failed(self.clone(), err),
        }
    }

    /// Broadcasts the notification `(module, name)` with an encoded value.
    pub async fn emit<T: Serialize>(&self, module: &str, name: &str, value: &T) -> Result<(), Error> {
        let encoded = self.encode_value(value)?;
        self.emit_raw(module, name, encoded).await
    }

    /// Broadcasts a notification whose payload is already encoded.
    pub async fn emit_raw(
        &self,
        module: &str,
        name: &str,
        encoded: impl Into<String>,
    ) -> Result<(), Error> {
        self.check_connection()?;
        self.inner.transport.emit(module, name, encoded.into()).await
    }

    /// Registers interest in the notification `(module, name)`.
    ///
    /// Nothing is delivered until [`Subscription::run`]; errors detected
    /// now (a failed dial) are carried in the subscription and surface
    /// there.
    pub fn subscribe<T>(&self, module: &str, notification: &str, sink: Sink<T>) -> Subscription
    where
        T: DeserializeOwned + Send + 'static,
    {
        Subscription::new(
            self.clone(),
            module,
            notification,
            sink,
            self.inner.err.clone(),
        )
    }

    /// Applies configuration to `model` through its registered writer.
    /// Models without a writer accept and ignore this.
    pub async fn set_config<T: Serialize>(&self, model: &str, config: &T) -> Result<(), Error> {
        self.check_connection()?;
        let encoded = self.encode_value(config)?;
        self.inner.transport.set_config_for(model, encoded).await
    }

    /// Validates configuration against `model`'s registered checker.
    pub async fn check_config<T: Serialize>(&self, model: &str, config: &T) -> Result<(), Error> {
        self.check_connection()?;
        let encoded = self.encode_value(config)?;
        self.inner.transport.check_config_for(model, encoded).await
    }

    /// Reads and decodes `model`'s running configuration.
    pub async fn read_config<T: DeserializeOwned>(&self, model: &str) -> Result<T, Error> {
        self.decode_value(&self.read_config_raw(model).await?)
    }

    /// Reads `model`'s running configuration in encoded form.
    pub async fn read_config_raw(&self, model: &str) -> Result<String, Error> {
        self.check_connection()?;
        self.inner.transport.read_config_for(model).await
    }

    /// Reads and decodes `model`'s operational state.
    pub async fn read_state<T: DeserializeOwned>(&self, model: &str) -> Result<T, Error> {
        self.decode_value(&self.read_state_raw(model).await?)
    }

    /// Reads `model`'s operational state in encoded form.
    pub async fn read_state_raw(&self, model: &str) -> Result<String, Error> {
        self.check_connection()?;
        self.inner.transport.read_state_for(model).await
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    fn encode_value<T: Serialize>(&self, value: &T) -> Result<String, Error> {
        self.inner
            .marshaller
            .encode(value)
            .map_err(|_| Error::MalformedMessage)
    }

    fn decode_value<T: DeserializeOwned>(&self, encoded: &str) -> Result<T, Error> {
        self.inner
            .marshaller
            .decode(encoded)
            .map_err(|_| Error::MalformedMessage)
    }
}

/// The pending result of an RPC invocation.
///
/// The call proceeds whether or not anyone waits; [`output`](Self::output)
/// resolves it once, decoding into the requested type.
pub struct RpcCall {
    client: Client,
    promise: Result<RpcPromise, Error>,
}

impl RpcCall {
    fn resolved_by(client: Client, promise: RpcPromise) -> Self {
        Self {
            client,
            promise: Ok(promise),
        }
    }

    fn failed(client: Client, err: Error) -> Self {
        Self {
            client,
            promise: Err(err),
        }
    }

    /// Waits for the result and decodes the output tree.
    pub async fn output<T: DeserializeOwned>(self) -> Result<T, Error> {
        let RpcCall { client, promise } = self;
        let encoded = promise?.output().await?;
        client.decode_value(&encoded)
    }

    /// Waits for the result and yields the output in encoded form.
    pub async fn output_raw(self) -> Result<String, Error> {
        self.promise?.output().await
    }
}

/// Calls one RPC over a throwaway client on the default transport.
///
/// Dials, starts the call, and closes the connection; the returned
/// [`RpcCall`] resolves independently. A retained [`Client`] is cheaper
/// when calling more than once.
pub async fn call_rpc<T: Serialize>(module: &str, rpc: &str, input: &T) -> RpcCall {
    let client = Client::dial().await;
    let call = client.call(module, rpc, input).await;
    let _ = client.close().await;
    call
}

/// Emits one notification over a throwaway client on the default
/// transport. A retained [`Client`] is cheaper when emitting repeatedly.
pub async fn emit_notification<T: Serialize>(
    module: &str,
    name: &str,
    value: &T,
) -> Result<(), Error> {
    let client = Client::dial().await;
    let result = match client.check_connection() {
        Ok(()) => client.emit(module, name, value).await,
        Err(err) => Err(err),
    };
    let _ = client.close().await;
    result
}
