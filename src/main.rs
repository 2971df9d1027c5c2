mod coordinator;
mod directory;
mod transport;

use anyhow::{Context, Result};
use coordinator::{ConnectionCoordinator, CoordinatorConfig, LinkSignal, Mailbox, TransportMode};
use earlink_shared::{DeviceHandle, DeviceModel, LinkPhase, LinkStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = load_config()?;
    config.validate()?;

    info!("Earlink starting");
    info!("  Transport: {}", config.transport.mode);
    match &config.saved_device {
        Some(device) => info!("  Saved device: {}", device),
        None => warn!("  No saved device; connect requests will be refused"),
    }

    let mailbox = Mailbox::new(config.channel_capacity);
    let collaborators = transport::build_collaborators(&config, mailbox.signals())
        .await
        .context("Failed to set up transport")?;
    info!("Transport ready: {}", collaborators.transport.name());

    let coordinator = ConnectionCoordinator::spawn(config, mailbox, collaborators).await;

    // Radio already up at launch counts as the radio coming on
    match coordinator.check_radio_status().await {
        Ok(true) => {
            if let Err(e) = coordinator.signals().send(LinkSignal::RadioEnabled).await {
                error!("Failed to report radio state: {}", e);
            }
        }
        Ok(false) => warn!("Bluetooth radio is off; waiting for it to come on"),
        Err(e) => error!("Radio check failed: {}", e),
    }

    info!("Commands: c = connect, r = retry, s = status, q = quit");

    let mut status = coordinator.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    // Main event loop
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    error!("Coordinator stopped");
                    break;
                }
                let current = *status.borrow_and_update();
                report(&current);
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_input(line.trim(), &coordinator).await {
                            break;
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("stdin closed: {}", e);
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        warn!("Shutdown: {}", e);
    }
    Ok(())
}

/// Build the configuration from `earlink [ADDRESS] [CODENAME] [NAME]` and the
/// `EARLINK_TRANSPORT` environment variable
fn load_config() -> Result<CoordinatorConfig> {
    let mut args = std::env::args().skip(1);
    let mut config = CoordinatorConfig::default();

    if let Some(address) = args.next() {
        let model = args
            .next()
            .map(|codename| DeviceModel::from_codename(&codename))
            .unwrap_or_default();
        let mut device = DeviceHandle::new(address, model);
        if let Some(name) = args.next() {
            device = device.with_name(name);
        }
        config.saved_device = Some(device);
    }

    if let Ok(mode) = std::env::var("EARLINK_TRANSPORT") {
        config.transport.mode = mode.parse::<TransportMode>()?;
    }

    Ok(config)
}

/// Returns false when the user asked to quit
async fn handle_input(input: &str, coordinator: &ConnectionCoordinator) -> bool {
    let outcome = match input {
        "c" | "connect" => coordinator.connect().await,
        "r" | "retry" => coordinator.retry_connect().await,
        "s" | "status" => coordinator.status().await.map(|status| {
            info!(
                "Phase {:?}, retries {}, radio {}",
                status.phase,
                status.retry_count,
                if status.radio_on { "on" } else { "off" }
            );
        }),
        "q" | "quit" => return false,
        "" => Ok(()),
        other => {
            warn!("Unknown command: {}", other);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        error!("{}", e);
    }
    true
}

fn report(status: &LinkStatus) {
    match status.phase {
        LinkPhase::Idle => info!("Idle"),
        LinkPhase::Connecting => info!("Connecting (retry {})", status.retry_count),
        LinkPhase::Connected => info!("Connected"),
        LinkPhase::Failed => error!("Connection failed; enter 'r' to retry"),
    }
}
