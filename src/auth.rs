// Authentication: obtain the bearer token once at startup. The device runs
// unattended, so the production policy keeps retrying until the backend
// hands out a token or the process is stopped.

use crate::api::{ApiClient, AuthRequest};
use crate::error::{Error, Result};
use crate::sleeper::Sleeper;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Delay between failed login attempts.
pub const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(3);

/// One login attempt that either yields a token or fails.
pub trait TokenSource {
    fn fetch_token(&self) -> Result<String>;
}

/// Email/password login against `/auth/login`.
pub struct PasswordLogin<'a> {
    api: &'a ApiClient,
    request: AuthRequest,
}

impl<'a> PasswordLogin<'a> {
    pub fn new(api: &'a ApiClient, request: AuthRequest) -> Self {
        PasswordLogin { api, request }
    }
}

impl TokenSource for PasswordLogin<'_> {
    fn fetch_token(&self) -> Result<String> {
        self.api.login(&self.request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn forever() -> Self {
        RetryPolicy {
            delay: LOGIN_RETRY_DELAY,
            max_attempts: None,
        }
    }

    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            delay,
            max_attempts: Some(max_attempts),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever()
    }
}

/// Authentication context shared by the uploader for the whole run.
#[derive(Clone, PartialEq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Session {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token_len", &self.token.len())
            .finish()
    }
}

/// Log in until a token is obtained.
///
/// Every failure is logged and followed by `policy.delay`. With a bounded
/// policy the last failure is not followed by a sleep and the call returns
/// [`Error::RetriesExhausted`]. `stop` is checked before every attempt and
/// every sleep; once raised the call returns [`Error::Interrupted`].
pub fn authenticate<T, Z>(
    source: &T,
    policy: &RetryPolicy,
    sleeper: &Z,
    stop: &AtomicBool,
) -> Result<Session>
where
    T: TokenSource + ?Sized,
    Z: Sleeper + ?Sized,
{
    info!("Logging in to the API.");
    let mut attempts: u32 = 0;

    loop {
        if stop.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        attempts = attempts.saturating_add(1);
        match source.fetch_token() {
            Ok(token) => {
                info!("Logged in after {} attempt(s)", attempts);
                return Ok(Session::new(token));
            }
            Err(Error::MissingToken) => warn!("Token not found in the login response."),
            Err(Error::Status { status, .. }) => warn!("Login rejected: {}", status.as_u16()),
            Err(e) if e.is_transport() => error!("Error while logging in to the API: {}", e),
            Err(e) => warn!("Login attempt failed: {}", e),
        }

        if let Some(max) = policy.max_attempts {
            if attempts >= max {
                return Err(Error::RetriesExhausted { attempts });
            }
        }
        if stop.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        sleeper.sleep(policy.delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedLogin {
        answers: RefCell<VecDeque<Result<String>>>,
        calls: RefCell<u32>,
    }

    impl ScriptedLogin {
        fn new(answers: Vec<Result<String>>) -> Self {
            ScriptedLogin {
                answers: RefCell::new(answers.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl TokenSource for ScriptedLogin {
        fn fetch_token(&self) -> Result<String> {
            *self.calls.borrow_mut() += 1;
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(Error::MissingToken))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper(RefCell<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn refused() -> Error {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    #[test]
    fn first_success_returns_immediately() {
        let login = ScriptedLogin::new(vec![Ok("abc".into())]);
        let sleeper = RecordingSleeper::default();

        let stop = AtomicBool::new(false);
        let session = authenticate(&login, &RetryPolicy::forever(), &sleeper, &stop).unwrap();

        assert_eq!(session.token(), "abc");
        assert!(sleeper.0.borrow().is_empty());
    }

    #[test]
    fn keeps_retrying_until_a_token_arrives() {
        let login = ScriptedLogin::new(vec![
            Err(refused()),
            Err(Error::Status {
                status: StatusCode::UNAUTHORIZED,
                body: String::new(),
            }),
            Err(Error::MissingToken),
            Err(refused()),
            Ok("late-token".into()),
            Ok("never-used".into()),
        ]);
        let sleeper = RecordingSleeper::default();

        let stop = AtomicBool::new(false);
        let session = authenticate(&login, &RetryPolicy::forever(), &sleeper, &stop).unwrap();

        assert_eq!(session.token(), "late-token");
        assert_eq!(*login.calls.borrow(), 5);
        assert_eq!(*sleeper.0.borrow(), vec![LOGIN_RETRY_DELAY; 4]);
    }

    #[test]
    fn bounded_policy_gives_up() {
        let login = ScriptedLogin::new(vec![Err(refused()), Err(refused()), Err(refused())]);
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy::bounded(3, Duration::from_millis(10));

        let stop = AtomicBool::new(false);
        let err = authenticate(&login, &policy, &sleeper, &stop).unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 3 }));
        // no sleep after the final attempt
        assert_eq!(sleeper.0.borrow().len(), 2);
    }

    /// Sleeper that raises the stop flag, as Ctrl+C during a retry pause would.
    struct InterruptingSleeper<'a> {
        stop: &'a AtomicBool,
        naps: RefCell<u32>,
    }

    impl Sleeper for InterruptingSleeper<'_> {
        fn sleep(&self, _duration: Duration) {
            *self.naps.borrow_mut() += 1;
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_flag_ends_an_endless_login_outage() {
        let login = ScriptedLogin::new(vec![]);
        let stop = AtomicBool::new(false);
        let sleeper = InterruptingSleeper {
            stop: &stop,
            naps: RefCell::new(0),
        };

        let err = authenticate(&login, &RetryPolicy::forever(), &sleeper, &stop).unwrap_err();

        assert!(matches!(err, Error::Interrupted), "{err:?}");
        assert_eq!(*login.calls.borrow(), 1);
        assert_eq!(*sleeper.naps.borrow(), 1);
    }

    #[test]
    fn raised_stop_flag_skips_login() {
        let login = ScriptedLogin::new(vec![Ok("abc".into())]);
        let stop = AtomicBool::new(true);

        let err = authenticate(
            &login,
            &RetryPolicy::forever(),
            &RecordingSleeper::default(),
            &stop,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert_eq!(*login.calls.borrow(), 0);
    }

    #[test]
    fn session_debug_does_not_leak_token() {
        let session = Session::new("super-secret");
        assert!(!format!("{session:?}").contains("super-secret"));
    }
}
