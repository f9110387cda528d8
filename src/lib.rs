// Library root
// -----------
// This crate exposes the pieces of the weight relay. The binaries
// (`main.rs` for the scale, `bin/weight-relay-harness.rs` for the CSRF test
// backend) wire them together.
//
// Module responsibilities:
// - `config`: layered settings (defaults, config.ini, environment).
// - `api`: blocking HTTP client for login and bearer-token uploads.
// - `auth`: login retry loop producing the process-wide `Session`.
// - `ui`, `source`: manual console entry and serial scale readings.
// - `detector`: threshold comparison against the last accepted weight.
// - `upload`: fire-and-log uploaders.
// - `poller`: the read/compare/upload/sleep loop and its worker thread.
// - `harness`: cookie/CSRF client for the test backend.
// - `logging`, `shutdown`, `sleeper`: process plumbing.
pub mod api;
pub mod auth;
pub mod config;
pub mod detector;
pub mod error;
pub mod harness;
pub mod logging;
pub mod poller;
pub mod shutdown;
pub mod sleeper;
pub mod source;
pub mod ui;
pub mod upload;

pub use error::{Error, Result};
