/*
  instrument-sim, a hardware-in-the-loop simulator for industrial instruments.
  Copyright (C) 2022 Rice Eclipse.

  instrument-sim is free software: you can redistribute it and/or modify
  it under the terms of the GNU General Public License as published by
  the Free Software Foundation, either version 3 of the License, or
  (at your option) any later version.

  instrument-sim is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

#![warn(clippy::pedantic)]

//! A hardware-in-the-loop simulator for industrial instruments (tanks, valves,
//! pumps, flow meters, regulating valves, and safety interlocks) used to
//! exercise programmable logic controllers under test.

pub mod adapter;
pub mod config;
pub mod console;
pub mod engine;
pub mod hardware;
pub mod instrument;
pub mod io_pin;

use std::fmt::Display;
use std::sync::PoisonError;

#[derive(Debug)]
/// The aggregate error type for this crate's top-level operations.
pub enum ControllerError {
    /// An I/O error, e.g. reading the configuration file or writing the log.
    Io(std::io::Error),
    /// The configuration document was malformed or inconsistent.
    Config(config::Error),
    /// The hardware abstraction layer failed in a way that is fatal at
    /// initialization (as opposed to a driver error, which is non-fatal).
    Hal(hardware::HalError),
    /// An internal lock was poisoned by a panicking thread.
    Poison,
    /// The process was invoked without the required command-line arguments.
    Args(&'static str),
}

impl Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Io(e) => write!(f, "I/O error: {e}"),
            ControllerError::Config(e) => write!(f, "configuration error: {e}"),
            ControllerError::Hal(e) => write!(f, "hardware error: {e}"),
            ControllerError::Poison => write!(f, "an internal lock was poisoned"),
            ControllerError::Args(msg) => write!(f, "bad arguments: {msg}"),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        ControllerError::Io(e)
    }
}

impl From<config::Error> for ControllerError {
    fn from(e: config::Error) -> Self {
        ControllerError::Config(e)
    }
}

impl From<hardware::HalError> for ControllerError {
    fn from(e: hardware::HalError) -> Self {
        ControllerError::Hal(e)
    }
}

impl<T> From<PoisonError<T>> for ControllerError {
    fn from(_: PoisonError<T>) -> Self {
        ControllerError::Poison
    }
}

/// The body shared by both process entry points (`instrument-sim` and
/// `instrument-sim-dummy`): open a log file inside `log_dir` (creating the directory if
/// necessary), construct a `Hal` via `build_hal` (given that shared log), read the
/// configuration file at `config_path`, build the engine, start it, and then block the calling
/// thread forever, periodically reporting statistics to the log.
///
/// The two binaries differ only in `build_hal`: `instrument-sim` probes real Linux GPIO/I2C
/// hardware (falling back transparently to a mock on any binding failure),
/// `instrument-sim-dummy` forces every pin and device to its mock implementation via
/// `Hal::new_mock`. Threading the log through `build_hal`
/// (rather than constructing the `Hal` before this function is called) ensures binding
/// diagnostics land in the same log file as everything else.
///
/// # Errors
///
/// Returns `ControllerError::Io` if the configuration file cannot be read or the log directory
/// cannot be created, `ControllerError::Config` if the configuration document is malformed, or
/// `ControllerError::Hal`/`ControllerError::Poison` if hardware provisioning fails.
pub fn run_with_hal(
    build_hal: impl FnOnce(std::sync::Arc<console::UserLog>) -> hardware::Hal,
    config_path: &str,
    log_dir: &str,
) -> Result<(), ControllerError> {
    std::fs::create_dir_all(log_dir)?;
    let log_file_path = std::path::Path::new(log_dir).join("instrument-sim.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;
    let log = std::sync::Arc::new(console::UserLog::new(log_file));

    let hal = build_hal(std::sync::Arc::clone(&log));
    let source = std::fs::read_to_string(config_path)?;
    let adapter = adapter::Adapter::build(&source, hal, std::sync::Arc::clone(&log), engine::DEFAULT_TARGET_RATE_HZ)?;

    let _ = log.info("configuration loaded; starting tick loop");
    adapter.start()?;

    loop {
        std::thread::sleep(std::time::Duration::from_secs(30));
        if let Ok(stats) = adapter.statistics() {
            let _ = log.info(&format!(
                "tick-loop: {} updates, {:.2} Hz measured, {} instruments",
                stats.total_updates, stats.measured_rate_hz, stats.instrument_count
            ));
        }
    }
}
