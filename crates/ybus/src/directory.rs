//! Client side of the peer directory ("yangd").
//!
//! The directory is the one peer the runtime depends on for schema
//! knowledge: it maps modules to the bus identity serving them, and it
//! validates RPC inputs and notifications. The core consumes exactly
//! three of its RPCs; top-level payload keys are namespaced with the
//! directory's module name per RFC 7951.

use crate::client::Client;
use crate::transport::YANGD_MODULE;
use serde::{Deserialize, Serialize};
use ybus_types::Error;

#[derive(Serialize)]
pub(crate) struct DestinationRequest<'a> {
    #[serde(rename = "yangd-v1:module-name")]
    pub module_name: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct DestinationReply {
    #[serde(rename = "yangd-v1:destination")]
    pub destination: String,
}

#[derive(Serialize)]
struct RpcInputRequest<'a> {
    #[serde(rename = "yangd-v1:rpc-module-name")]
    rpc_module_name: &'a str,
    #[serde(rename = "yangd-v1:rpc-name")]
    rpc_name: &'a str,
    #[serde(rename = "yangd-v1:rpc-input")]
    rpc_input: &'a str,
}

#[derive(Deserialize)]
struct RpcInputReply {
    #[serde(rename = "yangd-v1:valid")]
    valid: bool,
}

#[derive(Serialize)]
struct NotificationRequest<'a> {
    #[serde(rename = "yangd-v1:module-name")]
    module_name: &'a str,
    #[serde(rename = "yangd-v1:name")]
    name: &'a str,
    #[serde(rename = "yangd-v1:input")]
    input: &'a str,
}

#[derive(Deserialize)]
struct NotificationReply {
    #[serde(rename = "yangd-v1:output")]
    output: String,
}

/// Asks the directory whether `input` is valid for `(module, rpc)`.
pub(crate) async fn validate_rpc_input(
    client: &Client,
    module: &str,
    rpc: &str,
    input: &str,
) -> Result<bool, Error> {
    let request = RpcInputRequest {
        rpc_module_name: module,
        rpc_name: rpc,
        rpc_input: input,
    };
    let reply: RpcInputReply = client
        .call(YANGD_MODULE, "validate-rpc-input", &request)
        .await
        .output()
        .await?;
    Ok(reply.valid)
}

/// Asks the directory to validate and normalize a notification for
/// delivery. The returned payload is what subscribers see.
pub(crate) async fn validate_notification(
    client: &Client,
    module: &str,
    name: &str,
    input: &str,
) -> Result<String, Error> {
    let request = NotificationRequest {
        module_name: module,
        name,
        input,
    };
    let reply: NotificationReply = client
        .call(YANGD_MODULE, "validate-notification", &request)
        .await
        .output()
        .await?;
    Ok(reply.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ybus_types::Marshaller;

    #[test]
    fn requests_namespace_their_keys() {
        let m = Marshaller::new();
        let encoded = m
            .encode(&DestinationRequest { module_name: "foo-v1" })
            .unwrap();
        assert_eq!(encoded, r#"{"yangd-v1:module-name":"foo-v1"}"#);

        let encoded = m
            .encode(&NotificationRequest {
                module_name: "foo-v1",
                name: "bar",
                input: "{}",
            })
            .unwrap();
        assert!(encoded.contains(r#""yangd-v1:name":"bar""#));
    }

    #[test]
    fn replies_decode_namespaced_keys() {
        let m = Marshaller::new();
        let reply: DestinationReply = m
            .decode(r#"{"yangd-v1:destination":"net.vyatta.test"}"#)
            .unwrap();
        assert_eq!(reply.destination, "net.vyatta.test");

        let reply: RpcInputReply = m.decode(r#"{"yangd-v1:valid":true}"#).unwrap();
        assert!(reply.valid);
    }
}
