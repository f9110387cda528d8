// Error types shared by every component of the relay.

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failures (connect, timeout, body decoding)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered, but not with the status we needed
    #[error("API answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("token not found in login response")]
    MissingToken,

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial data is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("not a weight: {0:?}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("CSRF handshake failed: {0}")]
    Csrf(String),

    #[error("login failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("could not install interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The polling loop panicked; carries the panic payload and location
    #[error("polling loop panicked at {location}: {message}")]
    Fatal { message: String, location: String },

    /// Ctrl+C arrived before the operation could finish
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// True for failures where the remote side (or the wire) never answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Serial(_) | Error::Io(_))
    }
}
