//! # Pad Emulator
//!
//! Demo host for the emulated controller port.
//!
//! Runs the emulator module against the simulated controller subsystem and
//! drives the host polling loop, sweeping the physical stick around the
//! compass so the emulated d-pad presses show up in the basic reads.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use pad_emulator::config::Config;
use pad_emulator::controller::sample::{Buttons, RawSample};
use pad_emulator::emulation::{EmulatorModule, ModuleStatus};
use pad_emulator::host::kernel::StdKernel;
use pad_emulator::host::sim::SimController;
use pad_emulator::logging;

/// Stick positions visited by the sweep: rest, then clockwise from right.
const SWEEP: [(u8, u8); 9] = [
    (128, 128),
    (255, 128),
    (255, 255),
    (128, 255),
    (0, 255),
    (0, 128),
    (0, 0),
    (128, 0),
    (255, 0),
];

/// Polls spent on each sweep position
const SWEEP_HOLD_TICKS: u64 = 30;

/// Counters reported when the polling loop ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct DemoStats {
    polls: u64,
    changes: u64,
    last_buttons: Option<Buttons>,
}

/// Stick position for poll number `tick`
fn sweep_position(tick: u64) -> (u8, u8) {
    let index = (tick / SWEEP_HOLD_TICKS) as usize % SWEEP.len();
    SWEEP[index]
}

/// Main entry point for the Pad Emulator demo
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or defaults)
///    - Set up logging
///    - Start the emulator module on the simulated host
///
/// 2. **Main Loop**
///    - Feed the next sweep position as the physical stick
///    - Run one host polling-loop iteration
///    - Log the basic read whenever its buttons change
///    - Handle Ctrl+C (or the configured run duration) for shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop the module (bounded wait, then terminate)
///    - Exit non-zero if the module could not be stopped
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO pad_emulator::emulation::module: pad-emulator v0.1.0 Module Start
/// INFO pad_emulator: Polling every 16 ms, press Ctrl+C to exit
/// INFO pad_emulator: Basic read buttons 0x00000020 (stick 255, 128)
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("failed to load config from {}", path))?
        }
        None => Config::default(),
    };

    // Keep the guard alive so the file appender flushes on exit
    let _log_guard = logging::init(&config.logging)?;

    info!("Pad Emulator v{} starting...", env!("CARGO_PKG_VERSION"));

    let kernel = Arc::new(StdKernel::new());
    let sim = Arc::new(SimController::new());
    let mut module = EmulatorModule::new(&config, sim.clone(), kernel.clone(), kernel);

    if module.start() != ModuleStatus::Ok {
        bail!("emulator module failed to start");
    }

    let poll_interval = Duration::from_millis(config.simulation.poll_interval_ms);
    let run_for = match config.simulation.run_duration_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    info!("Polling every {} ms, press Ctrl+C to exit", poll_interval.as_millis());
    let stats = drive(&sim, poll_interval, shutdown_signal(run_for)).await;
    info!("Total polls: {}, button changes: {}", stats.polls, stats.changes);

    // Stop blocks for up to the configured timeout
    let status = tokio::task::spawn_blocking(move || module.stop()).await?;
    if status != ModuleStatus::Ok {
        bail!("emulator module failed to stop cleanly");
    }

    Ok(())
}

/// Resolves on Ctrl+C, or once `run_for` has elapsed
async fn shutdown_signal(run_for: Option<Duration>) {
    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        },
        _ = deadline => info!("Run duration elapsed, shutting down..."),
    }
}

/// Runs the simulated host polling loop until `shutdown` resolves
async fn drive<F>(sim: &SimController, period: Duration, shutdown: F) -> DemoStats
where
    F: Future<Output = ()>,
{
    let mut ticker = interval(period);
    let mut stats = DemoStats::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (lx, ly) = sweep_position(stats.polls);
                sim.set_raw_sample(RawSample::with_stick(lx, ly));
                sim.poll();
                stats.polls += 1;

                match sim.read_buffer_positive() {
                    Ok(read) => {
                        let previous = stats.last_buttons.unwrap_or(Buttons::empty());
                        if read.buttons != previous {
                            info!(
                                "Basic read buttons 0x{:08x} (stick {}, {})",
                                read.buttons.bits(), lx, ly
                            );
                            stats.changes += 1;
                        }
                        stats.last_buttons = Some(read.buttons);
                    }
                    Err(e) => debug!("Basic read failed: {}", e),
                }
            }

            _ = &mut shutdown => break,
        }
    }

    stats
}
