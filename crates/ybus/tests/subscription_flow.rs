//! Subscription engine scenarios: delivery, flow-control policies, policy
//! swaps, caching, and cancellation.
//!
//! Policy cases queue deliveries before the worker starts (deliveries are
//! injected through the subscription's transport hook), which makes the
//! queue behavior deterministic: the worker then drains whatever the
//! policy kept.

mod common;

use common::{test_bus, BarPayload, TestBus};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use ybus::{Client, Error, Sink, Subscription};

const DELIVERY_WINDOW: Duration = Duration::from_millis(100);

async fn harness() -> (TestBus, Client) {
    let fixture = test_bus(&[]).await;
    let client = Client::dial_with(fixture.bus.transport()).await;
    client.check_connection().unwrap();
    (fixture, client)
}

/// A subscription whose sink forwards into a channel the test reads.
fn channel_subscription(client: &Client) -> (Subscription, mpsc::UnboundedReceiver<BarPayload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = client.subscribe(
        "foo-v1",
        "bar",
        Sink::call(move |value: BarPayload| {
            let _ = tx.send(value);
        }),
    );
    (subscription, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<BarPayload>) -> BarPayload {
    timeout(DELIVERY_WINDOW, rx.recv())
        .await
        .expect("notification should arrive")
        .expect("sink channel should stay open")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<BarPayload>) {
    assert!(
        timeout(DELIVERY_WINDOW, rx.recv()).await.is_err(),
        "unexpected notification"
    );
}

#[tokio::test]
async fn callable_sink_receives_an_emitted_notification() {
    let (fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.run().await.unwrap();

    let emitter = Client::dial_with(fixture.bus.transport()).await;
    emitter
        .emit("foo-v1", "bar", &BarPayload::new("quux"))
        .await
        .unwrap();

    assert_eq!(next(&mut rx).await, BarPayload::new("quux"));
}

#[tokio::test]
async fn sender_sink_receives_an_emitted_notification() {
    let (fixture, client) = harness().await;
    let (tx, mut rx) = mpsc::channel::<BarPayload>(4);
    let subscription = client.subscribe("foo-v1", "bar", Sink::sender(tx));
    subscription.run().await.unwrap();

    let emitter = Client::dial_with(fixture.bus.transport()).await;
    emitter
        .emit("foo-v1", "bar", &BarPayload::new("quux"))
        .await
        .unwrap();

    let got = timeout(DELIVERY_WINDOW, rx.recv())
        .await
        .expect("notification should arrive")
        .unwrap();
    assert_eq!(got, BarPayload::new("quux"));
}

#[tokio::test]
async fn notifications_arrive_in_emission_order() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    for i in 0..20 {
        subscription
            .deliver(format!(r#"{{"baz":"{i}"}}"#))
            .await
            .unwrap();
    }
    subscription.run().await.unwrap();

    for i in 0..20 {
        assert_eq!(next(&mut rx).await, BarPayload::new(&i.to_string()));
    }
}

#[tokio::test]
async fn coalescing_delivers_only_the_newest() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.coalesce();
    for v in ["a", "b", "c", "d", "e"] {
        subscription
            .deliver(format!(r#"{{"baz":"{v}"}}"#))
            .await
            .unwrap();
    }
    subscription.run().await.unwrap();

    assert_eq!(next(&mut rx).await, BarPayload::new("e"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn drop_after_limit_keeps_exactly_the_limit() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.drop_after_limit(2);
    for v in ["a", "b", "c", "d", "e"] {
        subscription
            .deliver(format!(r#"{{"baz":"{v}"}}"#))
            .await
            .unwrap();
    }
    subscription.run().await.unwrap();

    assert_eq!(next(&mut rx).await, BarPayload::new("a"));
    assert_eq!(next(&mut rx).await, BarPayload::new("b"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn remove_limit_restores_unbounded_queueing() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.drop_after_limit(2);
    subscription.remove_limit();
    for v in ["a", "b", "c", "d", "e"] {
        subscription
            .deliver(format!(r#"{{"baz":"{v}"}}"#))
            .await
            .unwrap();
    }
    subscription.run().await.unwrap();

    for v in ["a", "b", "c", "d", "e"] {
        assert_eq!(next(&mut rx).await, BarPayload::new(v));
    }
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn policy_swap_preserves_the_queued_backlog_in_order() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    for v in ["a", "b", "c"] {
        subscription
            .deliver(format!(r#"{{"baz":"{v}"}}"#))
            .await
            .unwrap();
    }
    subscription.block_after_limit(10);
    subscription.deliver(r#"{"baz":"d"}"#).await.unwrap();
    subscription.run().await.unwrap();

    for v in ["a", "b", "c", "d"] {
        assert_eq!(next(&mut rx).await, BarPayload::new(v));
    }
}

#[tokio::test]
async fn swapping_to_a_tighter_policy_trims_per_that_policy() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    for v in ["a", "b", "c"] {
        subscription
            .deliver(format!(r#"{{"baz":"{v}"}}"#))
            .await
            .unwrap();
    }
    subscription.drop_after_limit(2);
    subscription.run().await.unwrap();

    assert_eq!(next(&mut rx).await, BarPayload::new("a"));
    assert_eq!(next(&mut rx).await, BarPayload::new("b"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn caching_stores_the_last_validated_notification() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.toggle_caching();
    subscription.run().await.unwrap();

    subscription.deliver(r#"{"baz":"quux"}"#).await.unwrap();
    assert_eq!(next(&mut rx).await, BarPayload::new("quux"));

    let cached: BarPayload = subscription.last_notification().unwrap();
    assert_eq!(cached, BarPayload::new("quux"));

    // Toggling caching off clears the stored value.
    subscription.toggle_caching();
    subscription.deliver(r#"{"baz":"later"}"#).await.unwrap();
    assert_eq!(next(&mut rx).await, BarPayload::new("later"));
    assert!(subscription.last_notification::<BarPayload>().is_err());
}

#[tokio::test]
async fn raw_sink_sees_the_payload_verbatim() {
    let (fixture, client) = harness().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let subscription = client.subscribe(
        "foo-v1",
        "bar",
        Sink::raw(move |encoded| {
            let _ = tx.send(encoded);
        }),
    );
    subscription.run().await.unwrap();

    let emitter = Client::dial_with(fixture.bus.transport()).await;
    emitter
        .emit_raw("foo-v1", "bar", r#"{"baz":"quux"}"#)
        .await
        .unwrap();

    let got = timeout(DELIVERY_WINDOW, rx.recv())
        .await
        .expect("notification should arrive")
        .unwrap();
    assert_eq!(got, r#"{"baz":"quux"}"#);
}

#[tokio::test]
async fn undecodable_notifications_are_dropped_not_fatal() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.run().await.unwrap();

    // baz must be a string; this one is a number.
    subscription.deliver(r#"{"baz":42}"#).await.unwrap();
    subscription.deliver(r#"{"baz":"ok"}"#).await.unwrap();

    assert_eq!(next(&mut rx).await, BarPayload::new("ok"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn cancel_is_idempotent_and_stops_the_worker() {
    let (_fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.run().await.unwrap();
    assert!(subscription.is_running());

    subscription.cancel().await.unwrap();
    assert!(subscription.is_done());

    // The worker notices shortly after.
    for _ in 0..20 {
        if !subscription.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!subscription.is_running());

    subscription.cancel().await.unwrap();

    // No deliveries after cancellation, and the hook reports it.
    assert_eq!(
        subscription.deliver(r#"{"baz":"x"}"#).await.unwrap_err(),
        Error::Cancelled
    );
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn run_after_cancel_does_not_restart() {
    let (_fixture, client) = harness().await;
    let (subscription, _rx) = channel_subscription(&client);
    subscription.run().await.unwrap();
    subscription.cancel().await.unwrap();

    subscription.run().await.unwrap();
    assert!(subscription.is_done());
}

#[tokio::test]
async fn run_twice_is_a_no_op() {
    let (fixture, client) = harness().await;
    let (subscription, mut rx) = channel_subscription(&client);
    subscription.run().await.unwrap();
    subscription.run().await.unwrap();

    let emitter = Client::dial_with(fixture.bus.transport()).await;
    emitter
        .emit("foo-v1", "bar", &BarPayload::new("once"))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, BarPayload::new("once"));
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn subscribing_on_a_broken_client_fails_at_run() {
    let fixture = test_bus(&[]).await;
    fixture.bus.set_dial_failure(true);
    let client = Client::dial_with(fixture.bus.transport()).await;

    let (subscription, _rx) = {
        let (tx, rx) = mpsc::unbounded_channel::<BarPayload>();
        let sub = client.subscribe(
            "foo-v1",
            "bar",
            Sink::call(move |value: BarPayload| {
                let _ = tx.send(value);
            }),
        );
        (sub, rx)
    };
    let err = subscription.run().await.unwrap_err();
    assert!(matches!(err, Error::TransportUnavailable(_)));
    assert!(!subscription.is_running());
}

#[tokio::test]
async fn component_subscriptions_start_with_run_and_cancel_on_unsubscribe() {
    let fixture = test_bus(&[]).await;
    let component =
        ybus::Component::with_transport("com.vyatta.test.watcher", fixture.bus.transport());

    let (tx, mut rx) = mpsc::unbounded_channel::<BarPayload>();
    component
        .subscribe(
            "foo-v1",
            "bar",
            Sink::call(move |value: BarPayload| {
                let _ = tx.send(value);
            }),
        )
        .await
        .unwrap();

    let registered = component
        .lookup_subscription("foo-v1", "bar")
        .expect("subscription should be registered");
    assert!(!registered.is_running(), "must not start before run");

    component.run().await.unwrap();
    assert!(registered.is_running());

    let emitter = Client::dial_with(fixture.bus.transport()).await;
    emitter
        .emit("foo-v1", "bar", &BarPayload::new("quux"))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await, BarPayload::new("quux"));

    component.unsubscribe("foo-v1", "bar").await.unwrap();
    assert!(component.lookup_subscription("foo-v1", "bar").is_none());
    emitter
        .emit("foo-v1", "bar", &BarPayload::new("gone"))
        .await
        .unwrap();
    assert_quiet(&mut rx).await;

    // A subscription added after run starts immediately.
    let (late_tx, mut late_rx) = mpsc::unbounded_channel::<BarPayload>();
    component
        .subscribe(
            "foo-v1",
            "late",
            Sink::call(move |value: BarPayload| {
                let _ = late_tx.send(value);
            }),
        )
        .await
        .unwrap();
    emitter
        .emit("foo-v1", "late", &BarPayload::new("now"))
        .await
        .unwrap();
    assert_eq!(next(&mut late_rx).await, BarPayload::new("now"));
}
