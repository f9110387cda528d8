// Test harness entrypoint: weights are typed in on the console and posted to
// the cookie/CSRF protected backend. The polling loop runs on a worker
// thread; the main thread only waits for it to finish.

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use tracing::{error, info};
use weight_relay::{
    config::Settings,
    detector::ChangeDetector,
    harness::{CsrfClient, CsrfUploader},
    logging,
    poller::{Poller, Termination},
    shutdown,
    sleeper::ThreadSleeper,
    source::ManualSource,
    ui,
};

/// Posts manually entered weights to the CSRF-protected test backend.
#[derive(Parser, Debug)]
#[command(name = "weight-relay-harness", version)]
struct Args {}

fn main() -> anyhow::Result<()> {
    let _args = Args::parse();
    let _log_guard = logging::init(Path::new(logging::LOG_FILE))?;

    let settings = Settings::load().context("Failed to load configuration")?;
    let stop = shutdown::install().context("Failed to install Ctrl+C handler")?;
    let client = CsrfClient::new(&settings.api.url, &settings.harness.session_cookie)
        .context("Failed to build HTTP client")?;

    // Every differing entry is posted.
    let worker = Poller::new(
        ManualSource::new(ui::console_prompt()),
        CsrfUploader::new(client),
        ThreadSleeper,
    )
    .with_detector(ChangeDetector::new(0.0))
    .with_stop(stop)
    .spawn("weight-poller")
    .context("Failed to start polling thread")?;

    match worker.join() {
        Ok(Termination::Quit) => {
            info!("Exiting...");
            Ok(())
        }
        Ok(Termination::Interrupted) => {
            info!("Interrupted by user (Ctrl+C). Exiting...");
            Ok(())
        }
        Err(e) => {
            error!("Polling thread failed: {:?}", e);
            Err(e).context("Polling thread failed")
        }
    }
}
