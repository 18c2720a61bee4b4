//! Subscriptions: policy-queued delivery of notifications to a sink.
//!
//! A [`Subscription`] is created by [`Client::subscribe`](crate::Client)
//! and does nothing until [`run`](Subscription::run) attaches it to the
//! transport and starts its worker. The worker drains the subscription's
//! queue; for each item it asks the peer directory to validate and
//! normalize the notification, caches it when caching is on, decodes it,
//! and hands the value to the sink. Processing errors are logged and the
//! item dropped; they never stop the worker.
//!
//! Flow control is live: [`coalesce`](Subscription::coalesce),
//! [`drop_after_limit`](Subscription::drop_after_limit),
//! [`block_after_limit`](Subscription::block_after_limit) and
//! [`remove_limit`](Subscription::remove_limit) swap the queue under a
//! write lock, moving the undelivered backlog into the new queue in
//! order, so no notification is lost across a policy change except as the
//! new policy prescribes.

use crate::client::Client;
use crate::directory;
use crate::queue::PolicyQueue;
use crate::transport::Subscriber;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use ybus_types::{Error, Marshaller};

type SinkFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
type DeliverFn = Box<dyn FnMut(String) -> SinkFuture + Send>;

/// Where a subscription delivers decoded notifications.
///
/// Either a unary callable invoked with each value, or the send end of a
/// channel the value is pushed into (a full bounded channel suspends the
/// subscription worker, not the emitter).
pub enum Sink<T> {
    Call(Box<dyn FnMut(T) + Send>),
    Send(mpsc::Sender<T>),
    /// Receives the encoded payload verbatim, no decode.
    Raw(Box<dyn FnMut(String) + Send>),
}

impl<T> Sink<T> {
    /// A callable sink.
    pub fn call(f: impl FnMut(T) + Send + 'static) -> Self {
        Sink::Call(Box::new(f))
    }

    /// A channel sink.
    #[must_use]
    pub fn sender(tx: mpsc::Sender<T>) -> Self {
        Sink::Send(tx)
    }
}

impl Sink<String> {
    /// A callable sink taking the payload in wire form, bypassing the
    /// decoder entirely.
    pub fn raw(f: impl FnMut(String) + Send + 'static) -> Self {
        Sink::Raw(Box::new(f))
    }
}

struct SubscriptionInner {
    client: Client,
    module: String,
    notification: String,
    /// Construction error, surfaced by `run`.
    err: Option<Error>,

    sink: Mutex<DeliverFn>,
    queue: RwLock<Arc<PolicyQueue>>,
    running: AtomicBool,
    done: AtomicBool,
    caching: AtomicBool,
    /// Last validated notification in encoded form; empty when none.
    last: Mutex<String>,
    /// Serializes compound updates of the control fields above.
    ctl: Mutex<()>,
}

impl SubscriptionInner {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn load_queue(&self) -> Arc<PolicyQueue> {
        Arc::clone(&self.queue.read())
    }
}

#[async_trait]
impl Subscriber for SubscriptionInner {
    async fn deliver(&self, encoded: String) -> Result<(), Error> {
        loop {
            if self.is_done() {
                return Err(Error::Cancelled);
            }
            let queue = self.load_queue();
            match queue.enqueue(encoded.clone()).await {
                Ok(()) => return Ok(()),
                // The queue was swapped underneath us; retry against the
                // replacement so the delivery is not lost.
                Err(_closed) => continue,
            }
        }
    }
}

/// A listener for one (module, notification) pair.
///
/// Cloning yields another handle to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub(crate) fn new<T>(
        client: Client,
        module: &str,
        notification: &str,
        sink: Sink<T>,
        err: Option<Error>,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
    {
        Self {
            inner: Arc::new(SubscriptionInner {
                client,
                module: module.to_string(),
                notification: notification.to_string(),
                err,
                sink: Mutex::new(erase_sink(sink)),
                queue: RwLock::new(Arc::new(PolicyQueue::unbounded())),
                running: AtomicBool::new(false),
                done: AtomicBool::new(false),
                caching: AtomicBool::new(false),
                last: Mutex::new(String::new()),
                ctl: Mutex::new(()),
            }),
        }
    }

    /// Attaches to the transport and starts the worker.
    ///
    /// A construction error held since `subscribe` is returned here. On a
    /// subscription that is already running this is a no-op, and on a
    /// cancelled one it returns the stored error without restarting
    /// anything.
    pub async fn run(&self) -> Result<(), Error> {
        if let Some(err) = &self.inner.err {
            return Err(err.clone());
        }
        if self.inner.is_done() || self.is_running() {
            return Ok(());
        }
        self.inner
            .client
            .transport()
            .subscribe(
                &self.inner.module,
                &self.inner.notification,
                Arc::clone(&self.inner) as Arc<dyn Subscriber>,
            )
            .await?;
        self.inner.running.store(true, Ordering::SeqCst);
        spawn_worker(Arc::clone(&self.inner));
        Ok(())
    }

    /// Cancels the subscription. Idempotent; once cancelled the sink is
    /// never invoked again, even for items still queued.
    pub async fn cancel(&self) -> Result<(), Error> {
        if !self.is_running() {
            return Ok(());
        }
        self.inner
            .client
            .transport()
            .unsubscribe(
                &self.inner.module,
                &self.inner.notification,
                &(Arc::clone(&self.inner) as Arc<dyn Subscriber>),
            )
            .await?;
        let _ctl = self.inner.ctl.lock();
        self.inner.done.store(true, Ordering::SeqCst);
        self.inner.load_queue().close();
        Ok(())
    }

    /// Collapses queued notifications so the sink always observes the most
    /// recent one when the emitter overruns it.
    pub fn coalesce(&self) -> &Self {
        self.swap_queue(PolicyQueue::coalesced())
    }

    /// Bounds the backlog to `limit`; overrunning notifications are
    /// dropped.
    pub fn drop_after_limit(&self, limit: usize) -> &Self {
        self.swap_queue(PolicyQueue::drop_after(limit))
    }

    /// Bounds the backlog to `limit`; an overrunning emitter is blocked
    /// until the sink catches up.
    pub fn block_after_limit(&self, limit: usize) -> &Self {
        self.swap_queue(PolicyQueue::block_after(limit))
    }

    /// Lifts any limit set by the other policies; the backlog grows
    /// without bound again.
    pub fn remove_limit(&self) -> &Self {
        self.swap_queue(PolicyQueue::unbounded())
    }

    /// Toggles caching of the last notification. Turning caching off
    /// discards the cached value; turning it on starts caching from the
    /// next delivery.
    pub fn toggle_caching(&self) -> &Self {
        let _ctl = self.inner.ctl.lock();
        let was = self.inner.caching.load(Ordering::SeqCst);
        if was {
            self.inner.last.lock().clear();
        }
        self.inner.caching.store(!was, Ordering::SeqCst);
        self
    }

    /// Decodes the last cached notification, if caching is enabled and one
    /// has been delivered.
    pub fn last_notification<T: DeserializeOwned>(&self) -> Result<T, Error> {
        Marshaller::new().decode(&self.last_notification_raw()?)
    }

    /// The last cached notification in encoded form.
    pub fn last_notification_raw(&self) -> Result<String, Error> {
        let last = self.inner.last.lock().clone();
        if last.is_empty() {
            return Err(Error::NoSuchObject("no notification cached".into()));
        }
        Ok(last)
    }

    /// Places a notification on the subscription's queue. This is the
    /// transport's delivery hook; it is public so deliveries can be
    /// injected without a bus.
    pub async fn deliver(&self, encoded: impl Into<String>) -> Result<(), Error> {
        self.inner.deliver(encoded.into()).await
    }

    /// Whether the worker is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the subscription has been cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    fn swap_queue(&self, replacement: PolicyQueue) -> &Self {
        let replacement = Arc::new(replacement);
        let mut slot = self.inner.queue.write();
        let old = Arc::clone(&slot);
        // Wake any blocked producer out of the old queue, then carry the
        // undelivered backlog across in order. The worker re-reads the
        // pointer on its next pass.
        old.close();
        replacement.absorb(old.drain());
        *slot = replacement;
        self
    }
}

fn erase_sink<T>(sink: Sink<T>) -> DeliverFn
where
    T: DeserializeOwned + Send + 'static,
{
    let marshaller = Marshaller::new();
    match sink {
        Sink::Call(mut f) => Box::new(move |encoded: String| {
            let result = marshaller.decode_input::<T>(&encoded).map(&mut f);
            Box::pin(std::future::ready(result)) as SinkFuture
        }),
        Sink::Send(tx) => Box::new(move |encoded: String| {
            let decoded = marshaller.decode_input::<T>(&encoded);
            let tx = tx.clone();
            Box::pin(async move {
                let value = decoded?;
                tx.send(value)
                    .await
                    .map_err(|_| Error::Subscriber("subscriber channel closed".into()))
            }) as SinkFuture
        }),
        Sink::Raw(mut f) => Box::new(move |encoded: String| {
            f(encoded);
            Box::pin(std::future::ready(Ok(()))) as SinkFuture
        }),
    }
}

fn spawn_worker(inner: Arc<SubscriptionInner>) {
    tokio::spawn(async move {
        while !inner.is_done() {
            let queue = inner.load_queue();
            while let Some(encoded) = queue.dequeue().await {
                if inner.is_done() {
                    break;
                }
                let normalized = match directory::validate_notification(
                    &inner.client,
                    &inner.module,
                    &inner.notification,
                    &encoded,
                )
                .await
                {
                    Ok(output) => output,
                    Err(err) => {
                        debug!(
                            module = %inner.module,
                            notification = %inner.notification,
                            error = %err,
                            "dropping notification that failed validation"
                        );
                        continue;
                    }
                };
                if inner.caching.load(Ordering::SeqCst) {
                    *inner.last.lock() = normalized.clone();
                }
                if inner.is_done() {
                    break;
                }
                let delivery = {
                    let mut sink = inner.sink.lock();
                    (&mut *sink)(normalized)
                };
                if let Err(err) = delivery.await {
                    match err {
                        Error::Decode(_) => debug!(
                            module = %inner.module,
                            notification = %inner.notification,
                            error = %err,
                            "dropping notification the sink cannot decode"
                        ),
                        other => warn!(
                            module = %inner.module,
                            notification = %inner.notification,
                            error = %other,
                            "dropping notification the sink did not take"
                        ),
                    }
                }
            }
        }
        inner.running.store(false, Ordering::SeqCst);
    });
}
