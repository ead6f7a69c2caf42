//! Headless driver for the capture session controller.
//!
//! Runs one scripted scenario against the simulated host and logs every
//! published snapshot.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use capture_session::host::simulated::{stream_of, SimulatedHost, SimulatedTrack};
use capture_session::host::TrackCapabilities;
use capture_session::{
    CaptureConfig, CaptureController, CaptureRejection, CaptureStream, DisplaySink,
    DisplaySurface, RejectionKind,
};

static SCENARIOS: &[&str] = &[
    "--grant : The user picks a monitor; the session is stopped explicitly.",
    "--remote-end : The user picks a monitor; the host ends the track.",
    "--deny : The user refuses the permission.",
    "--cancel : The user dismisses the picker.",
    "--fail <message> : The request fails with the given message.",
    "--unsupported : The host cannot capture at all.",
];

struct LoggingSink;

impl DisplaySink for LoggingSink {
    fn attach_stream(&self, stream: &CaptureStream) {
        info!(?stream, "Display sink bound");
    }

    fn clear(&self) {
        info!("Display sink cleared");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(scenario) = args.next() else {
        print_usage();
        return Ok(());
    };

    let monitor = SimulatedTrack::video(
        "screen-0",
        TrackCapabilities {
            width: Some(1920),
            height: Some(1080),
            frame_rate: Some(30.0),
            display_surface: Some(DisplaySurface::Monitor),
            label: Some("Screen 1".to_string()),
        },
    );

    let host = match scenario.as_str() {
        "--unsupported" => SimulatedHost::unsupported(),
        _ => SimulatedHost::new(),
    };
    match scenario.as_str() {
        "--grant" | "--remote-end" => host.push_stream(stream_of(&[monitor.clone()])),
        "--deny" => host.push_rejection(CaptureRejection::new(RejectionKind::PermissionRefused)),
        "--cancel" => host.push_rejection(CaptureRejection::new(RejectionKind::Aborted)),
        "--fail" => {
            let message = args.next().unwrap_or_default();
            host.push_rejection(CaptureRejection::from_host("NotReadableError", message));
        }
        "--unsupported" => {}
        other => {
            print_usage();
            bail!("unknown scenario: {other}");
        }
    }

    let controller = CaptureController::new(Arc::new(host), CaptureConfig::load());
    controller.attach_display_sink(Arc::new(LoggingSink));

    let mut updates = controller.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            match &snapshot.metadata {
                Some(metadata) => info!(
                    state = %snapshot.state,
                    resolution = %metadata.resolution_label(),
                    frame_rate = %metadata.frame_rate_label(),
                    surface = metadata.display_surface.description(),
                    label = %metadata.label,
                    "Snapshot"
                ),
                None => info!(
                    state = %snapshot.state,
                    status = snapshot.state.label(),
                    error = ?snapshot.last_error,
                    "Snapshot"
                ),
            }
        }
    });

    controller.start().await;

    match scenario.as_str() {
        "--grant" => controller.stop(),
        "--remote-end" => {
            monitor.fire_ended();
        }
        _ => {}
    }

    info!(state = %controller.state(), "Scenario finished");
    drop(controller);
    watcher.await?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();
}

fn print_usage() {
    #[allow(clippy::disallowed_macros)]
    {
        println!("USAGE: capture-session <scenario>");
        println!();
        println!("Possible scenarios are:");
        for s in SCENARIOS {
            println!("\t{}", s);
        }
    }
}
