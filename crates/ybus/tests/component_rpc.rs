//! End-to-end RPC and config scenarios through components and clients.

mod common;

use common::{
    launch_echo, test_bus, ConfigStore, EchoPayload, StaticState, Unserializable, FOO_MODEL,
    FOO_MODULE,
};
use std::time::Duration;
use tokio::time::timeout;
use ybus::{Client, Component, Error, RpcGroup};

#[tokio::test]
async fn rpc_round_trip() {
    let fixture = test_bus(&[(FOO_MODULE, FOO_MODEL)]).await;
    let _echo = launch_echo(&fixture.bus).await;

    let client = Client::dial_with(fixture.bus.transport()).await;
    client.check_connection().unwrap();

    let output: EchoPayload = client
        .call(FOO_MODULE, "call-me", &EchoPayload::new("foobar"))
        .await
        .output()
        .await
        .unwrap();
    assert_eq!(output, EchoPayload::new("foobar"));
}

#[tokio::test]
async fn rpc_handler_failure_propagates_to_the_caller() {
    let fixture = test_bus(&[(FOO_MODULE, FOO_MODEL)]).await;
    let _echo = launch_echo(&fixture.bus).await;

    let client = Client::dial_with(fixture.bus.transport()).await;
    let err = client
        .call(FOO_MODULE, "call-me-fail", &EchoPayload::new("foobar"))
        .await
        .output::<EchoPayload>()
        .await
        .unwrap_err();
    match err {
        Error::Mgmt(record) => assert!(record.error_message.contains("call-me-fail")),
        other => panic!("expected a structured error, got {other}"),
    }
}

#[tokio::test]
async fn unserializable_input_fails_at_call_time() {
    let fixture = test_bus(&[(FOO_MODULE, FOO_MODEL)]).await;
    let _echo = launch_echo(&fixture.bus).await;

    let client = Client::dial_with(fixture.bus.transport()).await;
    let err = client
        .call(FOO_MODULE, "call-me", &Unserializable)
        .await
        .output::<EchoPayload>()
        .await
        .unwrap_err();
    assert_eq!(err, Error::MalformedMessage);
}

#[tokio::test]
async fn rpc_input_rejected_by_the_directory_never_reaches_the_handler() {
    let fixture = test_bus(&[(FOO_MODULE, FOO_MODEL)]).await;
    let _echo = launch_echo(&fixture.bus).await;

    // A JSON string is well-formed but not an object; the directory's
    // input validation refuses it before the handler runs.
    let client = Client::dial_with(fixture.bus.transport()).await;
    let err = client
        .call_raw(FOO_MODULE, "call-me", r#""just a string""#)
        .await
        .output::<EchoPayload>()
        .await
        .unwrap_err();
    match err {
        Error::Mgmt(record) => assert_eq!(record.error_tag, "invalid-value"),
        other => panic!("expected a validation error, got {other}"),
    }
}

#[tokio::test]
async fn config_read_round_trip() {
    let fixture = test_bus(&[]).await;
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component
        .model(FOO_MODEL)
        .config(ConfigStore::with_value("foo bar"));
    component.run().await.unwrap();

    let client = Client::dial_with(fixture.bus.transport()).await;
    let config: EchoPayload = client.read_config(FOO_MODEL).await.unwrap();
    assert_eq!(config, EchoPayload::new("foo bar"));

    let raw = client.read_config_raw(FOO_MODEL).await.unwrap();
    assert_eq!(raw, r#"{"value":"foo bar"}"#);
}

#[tokio::test]
async fn config_set_then_get_returns_the_written_value() {
    let fixture = test_bus(&[]).await;
    let store = ConfigStore::default();
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component.model(FOO_MODEL).config(store.clone());
    component.run().await.unwrap();

    let client = Client::dial_with(fixture.bus.transport()).await;
    client
        .set_config(FOO_MODEL, &EchoPayload::new("v"))
        .await
        .unwrap();
    let read_back: EchoPayload = client.read_config(FOO_MODEL).await.unwrap();
    assert_eq!(read_back, EchoPayload::new("v"));

    // Check consults the handler without applying anything.
    client
        .check_config(FOO_MODEL, &EchoPayload::new("other"))
        .await
        .unwrap();
    assert_eq!(store.value(), "v");
    assert!(client
        .check_config(FOO_MODEL, &EchoPayload::new(""))
        .await
        .is_err());
}

#[tokio::test]
async fn config_writes_to_a_writerless_model_are_tolerated() {
    let fixture = test_bus(&[]).await;
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component.model(FOO_MODEL).state(StaticState::new("up"));
    component.run().await.unwrap();

    let client = Client::dial_with(fixture.bus.transport()).await;
    client
        .set_config(FOO_MODEL, &EchoPayload::new("ignored"))
        .await
        .unwrap();

    // Reads are not optional: no config object means unsupported.
    let err = client.read_config_raw(FOO_MODEL).await.unwrap_err();
    assert_eq!(err, Error::OperationNotSupported);

    let state: EchoPayload = client.read_state(FOO_MODEL).await.unwrap();
    assert_eq!(state, EchoPayload::new("up"));
}

#[tokio::test]
async fn running_with_an_invalid_rpc_group_fails() {
    let fixture = test_bus(&[]).await;
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component
        .model(FOO_MODEL)
        .rpcs(RpcGroup::new(FOO_MODULE).rpc("Illegal_Name", |input: EchoPayload| Ok(input)));
    let err = component.run().await.unwrap_err();
    assert!(matches!(err, Error::Shape(_)));
}

#[tokio::test]
async fn run_surfaces_a_dial_failure() {
    let fixture = test_bus(&[]).await;
    fixture.bus.set_dial_failure(true);
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component.model(FOO_MODEL).state(StaticState::new("up"));
    let err = component.run().await.unwrap_err();
    assert!(matches!(err, Error::TransportUnavailable(_)));
}

#[tokio::test]
async fn a_failed_dial_pins_the_client_error() {
    let fixture = test_bus(&[]).await;
    fixture.bus.set_dial_failure(true);
    let client = Client::dial_with(fixture.bus.transport()).await;

    let dial_err = client.check_connection().unwrap_err();
    assert!(matches!(dial_err, Error::TransportUnavailable(_)));

    // Every subsequent operation fails the same way; nothing retries.
    let err = client
        .call(FOO_MODULE, "call-me", &EchoPayload::new("x"))
        .await
        .output::<EchoPayload>()
        .await
        .unwrap_err();
    assert_eq!(err, dial_err);
    assert_eq!(
        client
            .emit(FOO_MODULE, "bar", &EchoPayload::new("x"))
            .await
            .unwrap_err(),
        dial_err
    );
}

#[tokio::test]
async fn wait_blocks_until_stop() {
    let fixture = test_bus(&[]).await;
    let component = Component::with_transport("com.vyatta.test.foo", fixture.bus.transport());
    component.model(FOO_MODEL).state(StaticState::new("up"));
    component.run().await.unwrap();

    let waiter = {
        let component = component.clone();
        tokio::spawn(async move { component.wait().await })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    component.stop().await.unwrap();
    timeout(Duration::from_millis(100), waiter)
        .await
        .expect("wait should release after stop")
        .unwrap();
}

#[tokio::test]
async fn register_module_is_callable_over_the_bus() {
    let fixture = test_bus(&[]).await;
    let _echo = launch_echo(&fixture.bus).await;

    // The echo module is unknown until something registers it.
    let client = Client::dial_with(fixture.bus.transport()).await;
    let err = client
        .call(FOO_MODULE, "call-me", &EchoPayload::new("x"))
        .await
        .output::<EchoPayload>()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSuchObject(_)));

    client
        .call(
            "yangd-v1",
            "register-module",
            &serde_json::json!({ "name": FOO_MODULE, "destination": FOO_MODEL }),
        )
        .await
        .output::<serde_json::Value>()
        .await
        .unwrap();

    let output: EchoPayload = client
        .call(FOO_MODULE, "call-me", &EchoPayload::new("x"))
        .await
        .output()
        .await
        .unwrap();
    assert_eq!(output, EchoPayload::new("x"));
}
