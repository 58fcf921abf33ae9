//! Monitor - prints mix-effect routing changes of a switcher.
//!
//! This demo shows:
//! - Binding a client, attaching feature modules, then starting the session
//! - Waiting for the handshake with `wait_connected()`
//! - Reading change notifications from an `EventStream`
//! - Issuing a command (`--cut`)
//!
//! # Running
//!
//! ```text
//! RUST_LOG=atem_client=debug cargo run --example monitor -- 192.168.10.240 --cut
//! ```

use atem_client::{Client, ConnectionEvent, DeviceInfo, MixEffect, MixEffectEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atem_client=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let address = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "192.168.10.240".to_string());
    let cut = args.iter().any(|a| a == "--cut");

    let mut client = Client::builder().bind(&address).await?;
    let mix_effect = MixEffect::attach(&client);
    let device = DeviceInfo::attach(&client);
    let mut routing = mix_effect.subscribe().for_instance(0);
    let mut lifecycle = client.events();

    client.start()?;
    client.wait_connected().await?;

    println!(
        "Connected to {} ({}), protocol {:?}",
        client.peer_addr(),
        device.product_name().unwrap_or_else(|| "unknown model".to_string()),
        device.protocol_version(),
    );
    if let Some(state) = mix_effect.state(0) {
        println!(
            "ME 1: program {}, preview {}",
            state.program_input, state.preview_input
        );
    }

    if cut {
        mix_effect.cut(0)?;
    }

    loop {
        tokio::select! {
            event = routing.recv() => match event {
                Some(MixEffectEvent::ProgramInput { source, .. }) => {
                    println!("program -> {}", source)
                }
                Some(MixEffectEvent::PreviewInput { source, .. }) => {
                    println!("preview -> {}", source)
                }
                Some(MixEffectEvent::Transition { state, .. }) if state.in_transition => {
                    println!("transition {:>3.0}%", state.position * 100.0)
                }
                Some(_) => {}
                None => break,
            },
            event = lifecycle.recv() => {
                if let Ok(ConnectionEvent::Disconnected { reason }) = event {
                    println!("Disconnected: {}", reason.as_deref().unwrap_or("closed"));
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                break;
            }
        }
    }

    Ok(())
}
