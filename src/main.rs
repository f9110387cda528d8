// Entrypoint for the scale relay.
// - Keeps `main` small: load settings, log in, then hand the reading source
//   and uploader to the polling loop.
// - Returns `anyhow::Result` so startup failures carry their context.

use anyhow::Context;
use clap::Parser;
use std::path::Path;
use tracing::{error, info};
use weight_relay::{
    api::{ApiClient, AuthRequest},
    auth::{authenticate, PasswordLogin, RetryPolicy},
    config::Settings,
    logging,
    poller::{Poller, Termination},
    shutdown,
    sleeper::ThreadSleeper,
    source::{DeviceSource, ManualSource, ReadingSource, SerialOpener},
    ui,
    upload::BearerUploader,
    Error,
};

/// Reads weights from the scale and reports significant changes to the API.
#[derive(Parser, Debug)]
#[command(name = "weight-relay", version)]
struct Args {
    /// Test mode: enter weights manually instead of reading the scale
    #[arg(long)]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(Path::new(logging::LOG_FILE))?;

    let settings = Settings::load().context("Failed to load configuration")?;
    let stop = shutdown::install().context("Failed to install Ctrl+C handler")?;
    let api = ApiClient::new(&settings.api).context("Failed to build HTTP client")?;

    let login = PasswordLogin::new(&api, AuthRequest::from(&settings.api));
    let session = match authenticate(&login, &RetryPolicy::forever(), &ThreadSleeper, &stop) {
        Ok(session) => session,
        Err(Error::Interrupted) => {
            info!("Interrupted by user (Ctrl+C) while logging in. Shutting down...");
            return Ok(());
        }
        Err(e) => return Err(e).context("Login failed"),
    };

    let source: Box<dyn ReadingSource> = if args.test {
        info!("Test mode: reading weights from the console.");
        Box::new(ManualSource::new(ui::console_prompt()))
    } else {
        info!(
            "Reading weights from {} at {} baud.",
            settings.serial.port, settings.serial.baud_rate
        );
        Box::new(DeviceSource::new(SerialOpener::from_settings(&settings.serial)))
    };

    let uploader = BearerUploader::new(&api, &session);
    let mut poller = Poller::new(source, uploader, ThreadSleeper).with_stop(stop);
    let outcome = poller.run_guarded();
    report(outcome)
}

fn report(outcome: weight_relay::Result<Termination>) -> anyhow::Result<()> {
    match outcome {
        Ok(Termination::Quit) => {
            info!("Stopped by user. Shutting down...");
            Ok(())
        }
        Ok(Termination::Interrupted) => {
            info!("Interrupted by user (Ctrl+C). Shutting down...");
            Ok(())
        }
        Err(e) => {
            error!("Unexpected error in the main loop: {:?}", e);
            Err(e).context("Polling loop failed")
        }
    }
}
