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

//! The external adapter surface: the read-only snapshot export, parameter mutation, and
//! lifecycle control exposed to the out-of-scope UI layer, plus serialized reconfiguration.
//!
//! Adding, removing, or updating instruments at runtime stops and rebuilds the whole engine; left
//! unguarded, concurrent reconfiguration requests could race each other. This adapter resolves
//! that by serializing every reconfiguration through a single mutex: at most one `reconfigure`
//! call is ever in flight, and it fully owns the engine swap (stop old engine, build new one,
//! start it) while holding that lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::console::UserLog;
use crate::engine::{Engine, Statistics};
use crate::hardware::Hal;
use crate::instrument::{build_all, DisplayData};
use crate::io_pin::IoPin;
use crate::ControllerError;

/// A handle to the running simulation, shared between the process entry point and whatever
/// out-of-scope UI layer drives it. Cloning an `Adapter` is cheap; every clone refers to the
/// same underlying engine.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<Mutex<Engine>>,
    log: Arc<UserLog>,
}

impl Adapter {
    /// Build an `Adapter` around a freshly constructed engine: parses `source` as a
    /// configuration document, builds the instrument set, provisions `hal` with the resulting
    /// I/O pins, and leaves the engine stopped (the caller decides when to `start`).
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Config` if `source` does not parse, or `ControllerError::Hal`/
    /// `ControllerError::Poison` if hardware provisioning fails.
    pub fn build(
        source: &str,
        hal: Hal,
        log: Arc<UserLog>,
        target_rate_hz: f64,
    ) -> Result<Adapter, ControllerError> {
        let config = Configuration::parse(source, &log)?;
        let instruments = build_all(&config.instruments, &log);
        let engine = Engine::new(instruments, &config.instruments, hal, Arc::clone(&log), target_rate_hz);
        engine.initialize_hardware()?;
        Ok(Adapter {
            inner: Arc::new(Mutex::new(engine)),
            log,
        })
    }

    /// Start the tick loop. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine lock was poisoned.
    pub fn start(&self) -> Result<(), ControllerError> {
        self.inner.lock()?.start()
    }

    /// Stop the tick loop. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine lock was poisoned.
    pub fn stop(&self) -> Result<(), ControllerError> {
        self.inner.lock()?.stop();
        Ok(())
    }

    /// A read-only snapshot of every instrument's display projection, keyed by id.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine lock, or any instrument's lock, was
    /// poisoned.
    pub fn snapshot(&self) -> Result<HashMap<String, DisplayData>, ControllerError> {
        self.inner.lock()?.snapshot()
    }

    /// The engine's current scheduling statistics.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine lock was poisoned.
    pub fn statistics(&self) -> Result<Statistics, ControllerError> {
        self.inner.lock()?.statistics()
    }

    /// Mutate a named parameter on the instrument `id`. Unknown instrument ids, unknown
    /// parameter names, and wrong-shaped values are all reported back as an error string rather
    /// than panicking or silently corrupting state.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine lock was poisoned, or a descriptive
    /// `String` (bridged through the `Err` variant's payload) if `id` is unknown or the
    /// parameter rejects `value`.
    pub fn set_parameter(
        &self,
        id: &str,
        name: &str,
        value: crate::config::ParamValue,
    ) -> Result<Result<(), String>, ControllerError> {
        let engine = self.inner.lock()?;
        let Some(instrument) = engine.instruments().get(id) else {
            return Ok(Err(format!("unknown instrument `{id}`")));
        };
        Ok(instrument.set_parameter(name, value))
    }

    /// Reset the named instrument's state to its documented initial values.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the engine or instrument lock was poisoned.
    pub fn reset_instrument(&self, id: &str) -> Result<Result<(), String>, ControllerError> {
        let engine = self.inner.lock()?;
        let Some(instrument) = engine.instruments().get(id) else {
            return Ok(Err(format!("unknown instrument `{id}`")));
        };
        instrument.reset()?;
        Ok(Ok(()))
    }

    /// Replace the running configuration: stop the current engine, parse and build a new one
    /// from `source`, provision `hal` for it, and leave it stopped. Serialized against every
    /// other call to `reconfigure` or any other adapter method by the single engine lock held
    /// for the whole operation, so concurrent reconfiguration requests cannot race.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Config` if `source` does not parse, or `ControllerError::Hal`/
    /// `ControllerError::Poison` for hardware or locking failures. On error the previous engine
    /// remains stopped but otherwise intact.
    pub fn reconfigure(&self, source: &str, hal: Hal, target_rate_hz: f64) -> Result<(), ControllerError> {
        let mut slot = self.inner.lock()?;
        slot.cleanup()?;

        let config = Configuration::parse(source, &self.log)?;
        let instruments = build_all(&config.instruments, &self.log);
        let engine = Engine::new(
            instruments,
            &config.instruments,
            hal,
            Arc::clone(&self.log),
            target_rate_hz,
        );
        engine.initialize_hardware()?;
        *slot = engine;
        Ok(())
    }
}

/// The distinct sets of I/O locations an assembled configuration references, partitioned by
/// capability. Exposed for callers (e.g. `instrument-sim`'s binaries) that want to provision a
/// HAL ahead of constructing an `Adapter`, without duplicating the walk `Engine::new` already
/// performs internally.
#[must_use]
pub fn referenced_io(config: &Configuration) -> Vec<IoPin> {
    config
        .instruments
        .iter()
        .flat_map(|c| c.io.values().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::Adapter;
    use crate::config::ParamValue;
    use crate::console::UserLog;
    use crate::hardware::Hal;
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

    #[test]
    fn snapshot_reflects_configured_instrument() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let hal = Hal::new_mock(Arc::clone(&log));
        let adapter = Adapter::build(DOC, hal, log, 50.0).unwrap();
        let snap = adapter.snapshot().unwrap();
        assert!(snap.contains_key("tank1"));
    }

    #[test]
    fn set_parameter_rejects_unknown_instrument() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let hal = Hal::new_mock(Arc::clone(&log));
        let adapter = Adapter::build(DOC, hal, log, 50.0).unwrap();
        let result = adapter
            .set_parameter("nonexistent", "tank_volume_m3", ParamValue::Number(5.0))
            .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn set_parameter_rejects_wrong_shape() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let hal = Hal::new_mock(Arc::clone(&log));
        let adapter = Adapter::build(DOC, hal, log, 50.0).unwrap();
        let result = adapter
            .set_parameter("tank1", "tank_volume_m3", ParamValue::Bool(true))
            .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn start_stop_round_trip() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let hal = Hal::new_mock(Arc::clone(&log));
        let adapter = Adapter::build(DOC, hal, log, 50.0).unwrap();
        adapter.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        adapter.stop().unwrap();
        let stats = adapter.statistics().unwrap();
        assert!(stats.total_updates > 0);
    }

    #[test]
    fn reconfigure_replaces_instrument_set() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let hal = Hal::new_mock(Arc::clone(&log));
        let adapter = Adapter::build(DOC, hal, Arc::clone(&log), 50.0).unwrap();

        let replacement = r"
instruments:
  - id: tank2
    type: level
    parameters:
      tank_volume_m3: 5.0
      tank_height_mm: 1000
      height_100_percent: 1000
      height_hh_alarm: 900
";
        let hal2 = Hal::new_mock(log);
        adapter.reconfigure(replacement, hal2, 50.0).unwrap();
        let snap = adapter.snapshot().unwrap();
        assert!(!snap.contains_key("tank1"));
        assert!(snap.contains_key("tank2"));
    }
}
