use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use scanner_channel::LoopbackScanner;
use scanner_core::{ScannerController, ScannerDevice};
use serde_json::json;
use shared::{domain::CameraFacing, protocol::RawDeviceEvent};
use tokio::time::timeout;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;

const RESULT_TIMEOUT: Duration = Duration::from_secs(2);
const QR_CODE_FORMAT: i64 = 256;
const TEXT_TYPE: i64 = 7;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "scanner.toml")]
    config: PathBuf,
    /// Camera to open first: `front` or `back`.
    #[arg(long)]
    facing: Option<String>,
    /// Payload injected as a scanned QR code; repeatable.
    #[arg(long = "payload")]
    payloads: Vec<String>,
    #[arg(long)]
    toggle_torch: bool,
    #[arg(long)]
    switch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config);
    if let Some(raw) = args.facing.as_deref() {
        settings.facing = config::parse_named::<CameraFacing>(raw)
            .with_context(|| format!("unknown facing '{raw}'"))?;
    }

    let scanner = Arc::new(LoopbackScanner::new().with_authorization(settings.authorization));
    let controller = ScannerController::attach(
        settings.controller_options(),
        ScannerDevice::loopback(Arc::clone(&scanner)),
    )
    .await;
    controller
        .start()
        .await
        .context("failed to start scanner session")?;

    let arguments = controller.arguments().borrow().clone();
    if let Some(arguments) = arguments {
        println!(
            "Session started: surface={:?} size={}x{} torch={}",
            arguments.surface, arguments.size.width, arguments.size.height, arguments.has_torch
        );
    }

    if !args.payloads.is_empty() {
        let mut results = controller.barcodes();
        for payload in &args.payloads {
            scanner.emit(RawDeviceEvent::barcode(json!({
                "rawValue": payload,
                "displayValue": payload,
                "format": QR_CODE_FORMAT,
                "type": TEXT_TYPE,
            })));
        }
        for _ in &args.payloads {
            match timeout(RESULT_TIMEOUT, results.recv()).await {
                Ok(Some(barcode)) => println!(
                    "Decoded {:?}: {}",
                    barcode.format,
                    barcode.raw_value.unwrap_or_default()
                ),
                Ok(None) => break,
                Err(_) => {
                    warn!("timed out waiting for a decoded barcode");
                    break;
                }
            }
        }
    }

    if args.toggle_torch {
        if controller.has_torch() {
            let mut torch = controller.torch_state();
            let target = torch.borrow_and_update().toggled();
            controller.toggle_torch();
            timeout(RESULT_TIMEOUT, torch.wait_for(|state| *state == target))
                .await
                .context("device did not confirm the torch change")?
                .context("torch state closed")?;
            println!("Torch is now {target:?}");
        } else {
            println!("Camera has no torch");
        }
    }

    if args.switch {
        controller
            .switch_camera()
            .await
            .context("failed to switch camera")?;
        println!("Switched to {:?} camera", controller.facing());
    }

    controller.dispose().await;
    println!("Event feed: {:?}", *controller.event_feed().borrow());
    println!("Device calls:");
    for call in scanner.calls().await {
        println!("  {call:?}");
    }

    Ok(())
}
