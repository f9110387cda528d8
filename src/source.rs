// Reading sources: where the next weight comes from. Manual entry is used in
// test mode, the serial scale otherwise. Both turn every failure into
// `Reading::Invalid` after logging it, so nothing escapes to the loop. Ctrl+C
// at the console prompt comes back as `Reading::Interrupted`.

use crate::config::SerialSettings;
use crate::error::{Error, Result};
use crate::ui::Prompt;
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::time::Duration;
use tracing::{error, info, warn};

pub const MANUAL_PROMPT: &str = "Enter weight in kg ('q' to quit)";

/// Outcome of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// A finite weight in kilograms.
    Weight(f64),
    /// Nothing usable was read.
    Invalid,
    /// The operator asked to stop.
    Quit,
    /// The read was cut short by Ctrl+C.
    Interrupted,
}

pub trait ReadingSource {
    fn next_reading(&mut self) -> Reading;
}

impl<S: ReadingSource + ?Sized> ReadingSource for Box<S> {
    fn next_reading(&mut self) -> Reading {
        (**self).next_reading()
    }
}

/// Weights typed in by the operator.
pub struct ManualSource<P> {
    prompt: P,
}

impl<P: Prompt> ManualSource<P> {
    pub fn new(prompt: P) -> Self {
        ManualSource { prompt }
    }
}

impl<P: Prompt> ReadingSource for ManualSource<P> {
    fn next_reading(&mut self) -> Reading {
        match self.prompt.ask(MANUAL_PROMPT) {
            Ok(Some(line)) => interpret_entry(&line),
            Ok(None) => {
                info!("Console input closed");
                Reading::Quit
            }
            // A raw-mode terminal swallows SIGINT and reports Ctrl+C this way.
            Err(e) if e.kind() == ErrorKind::Interrupted => Reading::Interrupted,
            Err(e) => {
                error!("Could not read console input: {}", e);
                Reading::Invalid
            }
        }
    }
}

/// Turn one line of operator input into a reading.
pub fn interpret_entry(input: &str) -> Reading {
    let value = input.trim();
    if value.eq_ignore_ascii_case("q") {
        return Reading::Quit;
    }
    match parse_number(value) {
        Ok(weight) => Reading::Weight(weight),
        Err(_) => {
            warn!("Invalid input from user: {:?}", value);
            Reading::Invalid
        }
    }
}

/// Opens a fresh handle to the scale for one read.
pub trait PortOpener {
    type Port: Read;

    fn open(&self) -> Result<Self::Port>;
}

/// Opens the configured serial port (8N1).
#[derive(Debug, Clone, PartialEq)]
pub struct SerialOpener {
    pub path: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl SerialOpener {
    pub fn from_settings(settings: &SerialSettings) -> Self {
        SerialOpener {
            path: settings.port.clone(),
            baud_rate: settings.baud_rate,
            timeout: settings.read_timeout(),
        }
    }
}

impl PortOpener for SerialOpener {
    type Port = Box<dyn SerialPort>;

    fn open(&self) -> Result<Self::Port> {
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .timeout(self.timeout)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open()?;
        Ok(port)
    }
}

/// Weights read from the scale, one newline-terminated number per read.
/// The port is opened for each read and dropped before returning.
pub struct DeviceSource<O> {
    opener: O,
}

impl<O: PortOpener> DeviceSource<O> {
    pub fn new(opener: O) -> Self {
        DeviceSource { opener }
    }

    pub fn read_weight(&self) -> Result<f64> {
        let port = self.opener.open()?;
        info!("Waiting for data from the scale...");

        let mut reader = BufReader::new(port);
        let mut buf = Vec::new();
        reader.read_until(b'\n', &mut buf)?;

        info!("Received raw data: {}", String::from_utf8_lossy(&buf).trim());
        parse_weight(&buf)
    }
}

impl<O: PortOpener> ReadingSource for DeviceSource<O> {
    fn next_reading(&mut self) -> Reading {
        match self.read_weight() {
            Ok(weight) => Reading::Weight(weight),
            Err(e) => {
                error!("Error from the serial port: {}", e);
                Reading::Invalid
            }
        }
    }
}

/// Decode and parse one raw line from the scale.
pub fn parse_weight(raw: &[u8]) -> Result<f64> {
    let line = String::from_utf8(raw.to_vec())?;
    parse_number(line.trim())
}

fn parse_number(value: &str) -> Result<f64> {
    match value.parse::<f64>() {
        Ok(weight) if weight.is_finite() => Ok(weight),
        _ => Err(Error::Parse(value.to_string())),
    }
}
