// Ctrl+C handling. The first interrupt raises the stop flag the polling
// loop checks between steps; a second one exits immediately, for when the
// loop is blocked in a read that never returns.

use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit status used when a second interrupt forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

pub fn install() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            warn!("Interrupted again, exiting now.");
            std::process::exit(FORCED_EXIT_CODE);
        }
        info!("Interrupt received, stopping after the current step (Ctrl+C again to exit now).");
    })?;
    Ok(stop)
}
