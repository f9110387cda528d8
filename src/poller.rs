// The polling loop: read, validate, compare, maybe upload, sleep. It owns the
// change detector and runs until the operator quits or the stop flag is
// raised. `run_guarded` and `spawn` wrap it with the panic safety net.

use crate::detector::ChangeDetector;
use crate::error::{Error, Result};
use crate::sleeper::Sleeper;
use crate::source::{Reading, ReadingSource};
use crate::upload::Uploader;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollIntervals {
    /// Pause after every valid reading.
    pub poll: Duration,
    /// Pause after an invalid reading.
    pub invalid_backoff: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        PollIntervals {
            poll: Duration::from_secs(1),
            invalid_backoff: Duration::from_secs(5),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The operator typed the quit sentinel (or closed the console).
    Quit,
    /// The stop flag was raised, usually by Ctrl+C.
    Interrupted,
}

pub struct Poller<S, U, Z> {
    source: S,
    uploader: U,
    sleeper: Z,
    detector: ChangeDetector,
    intervals: PollIntervals,
    stop: Arc<AtomicBool>,
}

impl<S, U, Z> Poller<S, U, Z>
where
    S: ReadingSource,
    U: Uploader,
    Z: Sleeper,
{
    pub fn new(source: S, uploader: U, sleeper: Z) -> Self {
        Poller {
            source,
            uploader,
            sleeper,
            detector: ChangeDetector::default(),
            intervals: PollIntervals::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_detector(mut self, detector: ChangeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_intervals(mut self, intervals: PollIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Share a stop flag; the loop checks it before every read.
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Run one iteration. Returns `Some` when the loop must end.
    pub fn step(&mut self) -> Option<Termination> {
        if self.stop.load(Ordering::SeqCst) {
            return Some(Termination::Interrupted);
        }

        let weight = match self.source.next_reading() {
            Reading::Quit => return Some(Termination::Quit),
            Reading::Interrupted => return Some(Termination::Interrupted),
            Reading::Invalid => {
                warn!(
                    "Invalid data... waiting {}s.",
                    self.intervals.invalid_backoff.as_secs_f64()
                );
                self.sleeper.sleep(self.intervals.invalid_backoff);
                return None;
            }
            Reading::Weight(weight) => weight,
        };

        if self.detector.observe(weight) {
            info!("Weight change detected: {} kg", weight);
            self.uploader.upload(weight);
        }

        self.sleeper.sleep(self.intervals.poll);
        None
    }

    pub fn run(&mut self) -> Termination {
        loop {
            if let Some(termination) = self.step() {
                return termination;
            }
        }
    }

    /// Run the loop, turning a panic anywhere inside it into
    /// [`Error::Fatal`] carrying the payload and the panic location.
    pub fn run_guarded(&mut self) -> Result<Termination> {
        guarded(|| self.run())
    }
}

impl<S, U, Z> Poller<S, U, Z>
where
    S: ReadingSource + Send + 'static,
    U: Uploader + Send + 'static,
    Z: Sleeper + Send + 'static,
{
    /// Move the loop onto a named worker thread.
    pub fn spawn(mut self, name: &str) -> Result<Worker> {
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || guarded(|| self.run()))?;
        Ok(Worker { handle, stop })
    }
}

/// A polling loop running on its own thread.
pub struct Worker {
    handle: JoinHandle<Result<Termination>>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    /// Ask the loop to finish after its current step.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the loop to end. A panic on the worker becomes
    /// [`Error::Fatal`].
    pub fn join(self) -> Result<Termination> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => Err(Error::Fatal {
                message: panic_message(payload.as_ref()),
                location: UNKNOWN_LOCATION.to_string(),
            }),
        }
    }
}

const UNKNOWN_LOCATION: &str = "<unknown>";

thread_local! {
    // Set by the panic hook on the panicking thread, read back by `guarded`.
    static PANIC_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Log panics (payload, location, backtrace) through `tracing` so they reach
/// the log file, then defer to the previous hook.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| l.to_string())
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());
            error!(
                "Panic at {}: {}\n{}",
                location,
                panic_message(info.payload()),
                Backtrace::force_capture()
            );
            PANIC_LOCATION.with(|slot| *slot.borrow_mut() = Some(location));
            previous(info);
        }));
    });
}

fn guarded<F: FnOnce() -> Termination>(run: F) -> Result<Termination> {
    install_panic_hook();
    PANIC_LOCATION.with(|slot| slot.borrow_mut().take());

    panic::catch_unwind(AssertUnwindSafe(run)).map_err(|payload| Error::Fatal {
        message: panic_message(payload.as_ref()),
        location: PANIC_LOCATION
            .with(|slot| slot.borrow_mut().take())
            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DEFAULT_THRESHOLD;
    use crate::error::Error;
    use crate::source::{DeviceSource, PortOpener};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Replays readings, then quits.
    struct Script(VecDeque<Reading>);

    impl Script {
        fn new(readings: &[Reading]) -> Self {
            Script(readings.iter().copied().collect())
        }
    }

    impl ReadingSource for Script {
        fn next_reading(&mut self) -> Reading {
            self.0.pop_front().unwrap_or(Reading::Quit)
        }
    }

    #[derive(Default, Clone)]
    struct Uploads(Arc<Mutex<Vec<f64>>>);

    impl Uploader for Uploads {
        fn upload(&mut self, weight: f64) {
            self.0.lock().unwrap().push(weight);
        }
    }

    #[derive(Default, Clone)]
    struct Naps(Arc<Mutex<Vec<Duration>>>);

    impl Sleeper for Naps {
        fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(duration);
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn uploads_only_significant_changes() {
        let uploads = Uploads::default();
        let mut poller = Poller::new(
            Script::new(&[
                Reading::Weight(10.0),
                Reading::Weight(25.0),
                Reading::Weight(40.0),
            ]),
            uploads.clone(),
            Naps::default(),
        );

        assert_eq!(poller.run(), Termination::Quit);
        assert_eq!(*uploads.0.lock().unwrap(), vec![10.0, 40.0]);
        assert_eq!(poller.detector().last(), Some(40.0));
        assert_eq!(poller.detector().threshold(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn invalid_reading_backs_off_without_upload() {
        let uploads = Uploads::default();
        let naps = Naps::default();
        let mut poller = Poller::new(
            Script::new(&[Reading::Invalid, Reading::Weight(70.0)]),
            uploads.clone(),
            naps.clone(),
        );

        assert_eq!(poller.step(), None);
        assert!(uploads.0.lock().unwrap().is_empty());
        assert_eq!(*naps.0.lock().unwrap(), vec![secs(5)]);

        assert_eq!(poller.step(), None);
        assert_eq!(*uploads.0.lock().unwrap(), vec![70.0]);
        assert_eq!(*naps.0.lock().unwrap(), vec![secs(5), secs(1)]);
    }

    #[test]
    fn quit_stops_before_anything_else_is_sent() {
        let uploads = Uploads::default();
        let mut poller = Poller::new(
            Script::new(&[Reading::Weight(5.0), Reading::Quit, Reading::Weight(500.0)]),
            uploads.clone(),
            Naps::default(),
        );

        assert_eq!(poller.run(), Termination::Quit);
        assert_eq!(*uploads.0.lock().unwrap(), vec![5.0]);
    }

    #[test]
    fn raised_stop_flag_interrupts_before_reading() {
        let stop = Arc::new(AtomicBool::new(true));
        let uploads = Uploads::default();
        let mut poller = Poller::new(
            Script::new(&[Reading::Weight(5.0)]),
            uploads.clone(),
            Naps::default(),
        )
        .with_stop(stop);

        assert_eq!(poller.run(), Termination::Interrupted);
        assert!(uploads.0.lock().unwrap().is_empty());
    }

    #[test]
    fn interrupted_prompt_ends_the_loop_without_backoff() {
        let uploads = Uploads::default();
        let naps = Naps::default();
        let mut poller = Poller::new(
            Script::new(&[Reading::Interrupted, Reading::Weight(80.0)]),
            uploads.clone(),
            naps.clone(),
        );

        assert_eq!(poller.step(), Some(Termination::Interrupted));
        assert!(naps.0.lock().unwrap().is_empty());
        assert!(uploads.0.lock().unwrap().is_empty());
    }

    struct GarbledScale;

    impl PortOpener for GarbledScale {
        type Port = Cursor<Vec<u8>>;

        fn open(&self) -> crate::error::Result<Self::Port> {
            Ok(Cursor::new(vec![0xc3, 0x28, b'\n']))
        }
    }

    #[test]
    fn undecodable_device_data_waits_and_skips_upload() {
        let uploads = Uploads::default();
        let naps = Naps::default();
        let mut poller = Poller::new(DeviceSource::new(GarbledScale), uploads.clone(), naps.clone());

        assert_eq!(poller.step(), None);
        assert!(uploads.0.lock().unwrap().is_empty());
        assert_eq!(*naps.0.lock().unwrap(), vec![secs(5)]);
    }

    struct Exploding;

    impl ReadingSource for Exploding {
        fn next_reading(&mut self) -> Reading {
            panic!("scale on fire")
        }
    }

    #[test]
    fn panics_become_fatal_errors() {
        let mut poller = Poller::new(Exploding, Uploads::default(), Naps::default());
        let err = poller.run_guarded().unwrap_err();
        match err {
            Error::Fatal { message, location } => {
                assert_eq!(message, "scale on fire");
                assert!(location.contains("poller.rs"), "{location}");
            }
            other => panic!("expected a fatal error, got {other:?}"),
        }
    }

    #[test]
    fn worker_thread_reports_its_termination() {
        let uploads = Uploads::default();
        let worker = Poller::new(
            Script::new(&[Reading::Weight(1.0), Reading::Weight(2.0)]),
            uploads.clone(),
            Naps::default(),
        )
        .with_detector(ChangeDetector::new(0.0))
        .spawn("poller-test")
        .unwrap();

        assert_eq!(worker.join().unwrap(), Termination::Quit);
        assert_eq!(*uploads.0.lock().unwrap(), vec![1.0, 2.0]);
    }

    /// Never runs out of readings; only cancellation stops it.
    struct Endless;

    impl ReadingSource for Endless {
        fn next_reading(&mut self) -> Reading {
            Reading::Weight(1.0)
        }
    }

    #[test]
    fn cancelled_worker_is_interrupted() {
        let worker = Poller::new(Endless, Uploads::default(), Naps::default())
            .spawn("poller-cancel")
            .unwrap();

        worker.cancel();
        assert_eq!(worker.join().unwrap(), Termination::Interrupted);
    }

    #[test]
    fn worker_panic_is_fatal() {
        let worker = Poller::new(Exploding, Uploads::default(), Naps::default())
            .spawn("poller-panic")
            .unwrap();
        match worker.join() {
            Err(Error::Fatal { location, .. }) => assert!(location.contains("poller.rs"), "{location}"),
            other => panic!("expected a fatal error, got {other:?}"),
        }
    }
}
