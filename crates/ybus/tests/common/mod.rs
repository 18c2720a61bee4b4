//! Shared fixtures for the integration suite: an in-process bus with a
//! directory, an echo component, and config/state handler stand-ins.
#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use ybus::testing::{launch_directory, DirectoryService, MemoryBus};
use ybus::{rpc_group, Component, ConfigCheck, ConfigGet, ConfigSet, Error, StateGet};

pub const FOO_COMPONENT: &str = "com.vyatta.test.foo";
pub const FOO_MODEL: &str = "com.vyatta.test.foo.v1";
pub const FOO_MODULE: &str = "foo-v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoPayload {
    pub value: String,
}

impl EchoPayload {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPayload {
    pub baz: String,
}

impl BarPayload {
    pub fn new(baz: &str) -> Self {
        Self { baz: baz.into() }
    }
}

/// A bus with a running directory. Keep the handle alive for the test.
pub struct TestBus {
    pub bus: MemoryBus,
    pub directory: DirectoryService,
    directory_component: Component,
}

/// Brings up a bus and a directory knowing the given module→model
/// mappings.
pub async fn test_bus(modules: &[(&str, &str)]) -> TestBus {
    let bus = MemoryBus::new();
    let (directory, directory_component) = launch_directory(&bus, modules)
        .await
        .expect("directory should launch");
    TestBus {
        bus,
        directory,
        directory_component,
    }
}

/// RPC handlers for the `foo-v1` module.
pub struct EchoRpcs;

impl EchoRpcs {
    pub fn call_me(&self, input: EchoPayload) -> Result<EchoPayload, Error> {
        Ok(input)
    }

    pub fn call_me_fail(&self, _input: EchoPayload) -> Result<EchoPayload, Error> {
        Err(Error::Handler("call-me-fail".into()))
    }
}

/// Runs the echo component on `bus`.
pub async fn launch_echo(bus: &MemoryBus) -> Component {
    let component = Component::with_transport(FOO_COMPONENT, bus.transport());
    component
        .model(FOO_MODEL)
        .rpcs(rpc_group!(FOO_MODULE, EchoRpcs, { call_me, call_me_fail }));
    component.run().await.expect("echo component should run");
    component
}

/// A config handler backed by a shared string.
#[derive(Clone, Default)]
pub struct ConfigStore {
    current: Arc<Mutex<String>>,
}

impl ConfigStore {
    pub fn with_value(value: &str) -> Self {
        let store = Self::default();
        *store.current.lock().unwrap() = value.to_string();
        store
    }

    pub fn value(&self) -> String {
        self.current.lock().unwrap().clone()
    }
}

impl ConfigCheck for ConfigStore {
    type Config = EchoPayload;

    fn check(&self, config: EchoPayload) -> Result<(), Error> {
        if config.value.is_empty() {
            return Err(Error::Handler("value must not be empty".into()));
        }
        Ok(())
    }
}

impl ConfigSet for ConfigStore {
    fn set(&self, config: EchoPayload) -> Result<(), Error> {
        *self.current.lock().unwrap() = config.value;
        Ok(())
    }
}

impl ConfigGet for ConfigStore {
    type Config = EchoPayload;

    fn get(&self) -> EchoPayload {
        EchoPayload {
            value: self.value(),
        }
    }
}

/// A state handler reporting a fixed value.
#[derive(Clone)]
pub struct StaticState {
    pub value: String,
}

impl StaticState {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl StateGet for StaticState {
    type State = EchoPayload;

    fn get(&self) -> EchoPayload {
        EchoPayload {
            value: self.value.clone(),
        }
    }
}

/// A value whose serialization always fails.
pub struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("deliberately unserializable"))
    }
}
