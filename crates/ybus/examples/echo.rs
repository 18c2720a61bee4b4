//! A component and a client talking over the in-process bus.
//!
//! Run with: `cargo run --example echo`

use serde::{Deserialize, Serialize};
use ybus::testing::{launch_directory, MemoryBus};
use ybus::{Client, Component, Error, RpcGroup, Sink};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    value: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let bus = MemoryBus::new();
    let (_directory, _directory_component) =
        launch_directory(&bus, &[("echo-v1", "org.example.echo.v1")]).await?;

    let component = Component::with_transport("org.example.echo", bus.transport());
    component.model("org.example.echo.v1").rpcs(
        RpcGroup::new("echo-v1").rpc("say", |input: Message| {
            Ok(Message {
                value: format!("echo: {}", input.value),
            })
        }),
    );
    component
        .subscribe(
            "echo-v1",
            "heard",
            Sink::call(|m: Message| println!("notification: {}", m.value)),
        )
        .await?;
    component.run().await?;

    let client = Client::dial_with(bus.transport()).await;
    client.check_connection()?;

    let reply: Message = client
        .call("echo-v1", "say", &Message {
            value: "hello".into(),
        })
        .await
        .output()
        .await?;
    println!("rpc reply: {}", reply.value);

    client.emit("echo-v1", "heard", &reply).await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    component.stop().await?;
    Ok(())
}
