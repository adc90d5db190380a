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

//! The simulation engine: HAL provisioning from the assembled instrument set, the fixed-rate
//! tick loop, and its start/stop/cleanup lifecycle.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::InstrumentConfig;
use crate::console::UserLog;
use crate::hardware::Hal;
use crate::instrument::{DisplayData, InstrumentSet, LinkResolver};
use crate::io_pin::IoPin;
use crate::ControllerError;

/// The nominal tick rate when none is specified, in Hz.
pub const DEFAULT_TARGET_RATE_HZ: f64 = 10.0;

/// How long [`Engine::stop`] polls the worker thread for termination before giving up.
const STOP_DEADLINE: Duration = Duration::from_secs(2);

/// How often [`Engine::stop`] polls `JoinHandle::is_finished` while waiting on the deadline
/// above (`std` has no timed join).
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq)]
/// A point-in-time snapshot of the engine's scheduling statistics.
pub struct Statistics {
    /// The total number of ticks executed since the engine was constructed.
    pub total_updates: u64,
    /// The measured tick rate over the most recent tick, in Hz.
    pub measured_rate_hz: f64,
    /// Seconds since the engine was constructed at which the most recent tick completed, or
    /// `None` if no tick has run yet.
    pub last_update_timestamp: Option<f64>,
    /// Whether the tick loop is currently running.
    pub running: bool,
    /// The number of instruments in the assembled configuration.
    pub instrument_count: usize,
    /// The configured nominal tick rate, in Hz.
    pub target_rate_hz: f64,
}

struct StatsInner {
    total_updates: u64,
    measured_rate_hz: f64,
    last_update_timestamp: Option<f64>,
}

/// Owns the assembled instrument set and hardware abstraction layer, and drives the fixed-rate
/// tick loop on a dedicated worker thread.
///
/// There is exactly one `Engine` per running configuration; the process entry point owns it and
/// hands a reference to the external adapter surface.
pub struct Engine {
    instruments: Arc<InstrumentSet>,
    hal: Arc<Mutex<Hal>>,
    log: Arc<UserLog>,
    target_period: Duration,
    target_rate_hz: f64,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<StatsInner>>,
    ticks_seen: Arc<AtomicU64>,
    io_pins: Vec<IoPin>,
}

impl Engine {
    /// Construct a new engine over `instruments`, using `hal` for I/O and `log` for
    /// diagnostics. `target_rate_hz` must be positive. `configs` is the validated configuration
    /// `instruments` was built from; it is consulted once, by [`Engine::initialize_hardware`],
    /// to learn which I/O pins must be provisioned on the HAL (the built `Instrument`s do not
    /// expose their I/O maps back out, since each variant owns its own).
    #[must_use]
    pub fn new(
        instruments: InstrumentSet,
        configs: &[InstrumentConfig],
        hal: Hal,
        log: Arc<UserLog>,
        target_rate_hz: f64,
    ) -> Engine {
        let target_rate_hz = if target_rate_hz > 0.0 {
            target_rate_hz
        } else {
            DEFAULT_TARGET_RATE_HZ
        };
        let io_pins = configs.iter().flat_map(|c| c.io.values().copied()).collect();
        Engine {
            instruments: Arc::new(instruments),
            hal: Arc::new(Mutex::new(hal)),
            log,
            target_period: Duration::from_secs_f64(1.0 / target_rate_hz),
            target_rate_hz,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            worker: None,
            stats: Arc::new(Mutex::new(StatsInner {
                total_updates: 0,
                measured_rate_hz: 0.0,
                last_update_timestamp: None,
            })),
            ticks_seen: Arc::new(AtomicU64::new(0)),
            io_pins,
        }
    }

    /// Walk every instrument's I/O map and provision the HAL accordingly: digital outputs start
    /// at 0, digital inputs are configured with no pull resistor, and every referenced I2C
    /// address is registered as a DAC or ADC as appropriate.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the HAL lock was poisoned, or
    /// `ControllerError::Hal` if a pin could not be configured at all (as opposed to merely
    /// falling back to a mock, which is not an error).
    pub fn initialize_hardware(&self) -> Result<(), ControllerError> {
        let mut hal = self.hal.lock()?;
        for io in &self.io_pins {
            match *io {
                IoPin::DigitalOut { pin } => hal.setup_output(pin, false)?,
                IoPin::DigitalIn { pin } => {
                    hal.setup_input(pin, crate::hardware::PullMode::None)?;
                }
                IoPin::AnalogOut { address, .. } => hal.register_dac(address),
                IoPin::AnalogIn { address, .. } => hal.register_adc(address),
            }
        }
        Ok(())
    }

    /// Idempotent: start the tick loop on a dedicated worker thread if it is not already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if an internal lock was poisoned.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let instruments = Arc::clone(&self.instruments);
        let hal = Arc::clone(&self.hal);
        let log = Arc::clone(&self.log);
        let running = Arc::clone(&self.running);
        let stop_requested = Arc::clone(&self.stop_requested);
        let stats = Arc::clone(&self.stats);
        let ticks_seen = Arc::clone(&self.ticks_seen);
        let target_period = self.target_period;
        let loop_start = Instant::now();

        let handle = std::thread::Builder::new()
            .name("tick-loop".to_owned())
            .spawn(move || {
                run_tick_loop(
                    &instruments,
                    &hal,
                    &log,
                    &stop_requested,
                    &stats,
                    &ticks_seen,
                    target_period,
                    loop_start,
                );
                running.store(false, Ordering::SeqCst);
            })
            .expect("failed to spawn tick-loop worker thread");

        self.worker = Some(handle);
        Ok(())
    }

    /// Idempotent: request termination of the tick loop and join the worker within a 2 s
    /// deadline. If the deadline elapses the worker is abandoned (it will still observe the
    /// stop flag and exit on its next iteration) and a lifecycle fault is logged per the error
    /// handling taxonomy.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) && self.worker.is_none() {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);

        let Some(handle) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + STOP_DEADLINE;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(STOP_POLL_INTERVAL);
        }

        if handle.is_finished() {
            let _ = handle.join();
        } else {
            let _ = self
                .log
                .critical("tick-loop worker did not terminate within the stop deadline");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the engine, then release all HAL resources. Safe to call even if the worker did not
    /// terminate cleanly; HAL cleanup does not depend on the worker thread having exited.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the HAL lock was poisoned.
    pub fn cleanup(&mut self) -> Result<(), ControllerError> {
        self.stop();
        self.hal.lock()?.cleanup();
        Ok(())
    }

    /// Whether the tick loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A thread-safe read of every instrument's display projection, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if any instrument's lock was poisoned.
    pub fn snapshot(&self) -> Result<HashMap<String, DisplayData>, ControllerError> {
        let mut out = HashMap::with_capacity(self.instruments.len());
        for instrument in self.instruments.iter() {
            out.insert(instrument.id.clone(), instrument.display()?);
        }
        Ok(out)
    }

    /// The assembled instrument set, for adapter-level parameter mutation and lookups.
    #[must_use]
    pub fn instruments(&self) -> &InstrumentSet {
        &self.instruments
    }

    /// A snapshot of the engine's current scheduling statistics.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the statistics lock was poisoned.
    pub fn statistics(&self) -> Result<Statistics, ControllerError> {
        let stats = self.stats.lock()?;
        Ok(Statistics {
            total_updates: stats.total_updates,
            measured_rate_hz: stats.measured_rate_hz,
            last_update_timestamp: stats.last_update_timestamp,
            running: self.running.load(Ordering::SeqCst),
            instrument_count: self.instruments.len(),
            target_rate_hz: self.target_rate_hz,
        })
    }
}

/// The tick loop body, run on the dedicated worker thread spawned by [`Engine::start`].
///
/// Each phase across all instruments completes before the next phase starts: every instrument's
/// `read_inputs` runs, then every `update`, then every `write_outputs`. A fault in any single
/// instrument's phase call — a poisoned lock, or a panic inside that instrument's logic — is
/// caught here, logged with the offending instrument's id, and the loop continues with the next
/// instrument; that instrument's outputs simply retain their previous values for this tick.
#[allow(clippy::too_many_arguments)]
fn run_tick_loop(
    instruments: &Arc<InstrumentSet>,
    hal: &Arc<Mutex<Hal>>,
    log: &Arc<UserLog>,
    stop_requested: &Arc<AtomicBool>,
    stats: &Arc<Mutex<StatsInner>>,
    ticks_seen: &Arc<AtomicU64>,
    target_period: Duration,
    loop_start: Instant,
) {
    let mut t_prev = Instant::now();

    while !stop_requested.load(Ordering::SeqCst) {
        let t_now = Instant::now();
        let dt = if ticks_seen.load(Ordering::SeqCst) == 0 {
            target_period.as_secs_f64()
        } else {
            (t_now - t_prev).as_secs_f64()
        };
        t_prev = t_now;

        {
            let Ok(mut hal_guard) = hal.lock() else {
                let _ = log.critical("HAL lock poisoned; aborting tick loop");
                break;
            };
            for instrument in instruments.iter() {
                let result = catch_unwind(AssertUnwindSafe(|| instrument.read_inputs(&mut hal_guard)));
                log_tick_fault(log, &instrument.id, "read_inputs", result);
            }
        }

        for instrument in instruments.iter() {
            let resolver: &dyn LinkResolver = instruments.as_ref();
            let result = catch_unwind(AssertUnwindSafe(|| instrument.update(dt, resolver)));
            log_tick_fault(log, &instrument.id, "update", result);
        }

        {
            let Ok(mut hal_guard) = hal.lock() else {
                let _ = log.critical("HAL lock poisoned; aborting tick loop");
                break;
            };
            for instrument in instruments.iter() {
                let result =
                    catch_unwind(AssertUnwindSafe(|| instrument.write_outputs(&mut hal_guard)));
                log_tick_fault(log, &instrument.id, "write_outputs", result);
            }
        }

        let total = ticks_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut s) = stats.lock() {
            s.total_updates = total;
            s.measured_rate_hz = if dt > 0.0 { 1.0 / dt } else { 0.0 };
            s.last_update_timestamp = Some((Instant::now() - loop_start).as_secs_f64());
        }

        let elapsed = t_now.elapsed();
        if elapsed < target_period {
            std::thread::sleep(target_period - elapsed);
        }
        // an overrun (elapsed >= target_period) is reflected in next tick's larger dt and is
        // not separately corrected for; that's physically correct rather than an error to
        // recover from.
    }
}

/// Log a tick-phase fault for `instrument_id`, whether it came back as a `Result::Err` or was
/// caught as a panic.
fn log_tick_fault(
    log: &UserLog,
    instrument_id: &str,
    phase: &str,
    result: std::thread::Result<Result<(), ControllerError>>,
) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = log.warn(&format!("instrument `{instrument_id}` {phase}: {e}"));
        }
        Err(_) => {
            let _ = log.warn(&format!(
                "instrument `{instrument_id}` {phase}: panicked; outputs retain previous values"
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::config::Configuration;
    use crate::console::UserLog;
    use crate::hardware::Hal;
    use crate::instrument::build_all;
    use std::sync::Arc;
    use std::time::Duration;

    const DOC: &str = r"
instruments:
  - id: tank1
    type: level
    parameters:
      tank_volume_m3: 10.0
      tank_height_mm: 2000
      height_100_percent: 2000
      height_hh_alarm: 1800
";

    fn test_engine(rate_hz: f64) -> Engine {
        let log = Arc::new(UserLog::new(Vec::new()));
        let config = Configuration::parse(DOC, &log).unwrap();
        let instruments = build_all(&config.instruments, &log);
        let hal = Hal::new_mock(Arc::clone(&log));
        Engine::new(instruments, &config.instruments, hal, log, rate_hz)
    }

    #[test]
    fn start_stop_are_idempotent() {
        let mut engine = test_engine(50.0);
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        std::thread::sleep(Duration::from_millis(50));
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn statistics_advance_while_running() {
        let mut engine = test_engine(50.0);
        engine.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        engine.stop();
        let stats = engine.statistics().unwrap();
        assert!(stats.total_updates > 0);
        assert_eq!(stats.instrument_count, 1);
        assert!((stats.target_rate_hz - 50.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_reports_every_instrument() {
        let engine = test_engine(10.0);
        let snap = engine.snapshot().unwrap();
        assert!(snap.contains_key("tank1"));
    }
}
