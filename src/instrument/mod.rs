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

//! The instrument kernel: a closed set of tagged instrument variants, dispatched through a
//! small capability set, plus the link graph that couples them.
//!
//! This module is the only place in the crate that maps a configuration `type` string to a
//! constructor. Every variant lives in its own submodule and implements [`InstrumentLogic`];
//! this module owns lifecycle (construction, link resolution), locking discipline, and the
//! display/parameter/reset surface common to all of them.

pub mod flow;
pub mod level;
pub mod pump;
pub mod reg_valve;
pub mod tankbil;
pub mod valve;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::config::{InstrumentConfig, ParamValue};
use crate::console::UserLog;
use crate::hardware::Hal;
use crate::io_pin::IoPin;
use crate::ControllerError;

/// The set of instrument type strings this crate knows how to construct. The configuration
/// loader does not need to know this set; only [`build_all`] does.
const KNOWN_KINDS: &[&str] = &["level", "valve", "pump", "flow", "reg_valve", "tankbil"];

#[derive(Clone, Copy, Debug, PartialEq)]
/// A single state field value, rounded for presentation.
pub enum DisplayValue {
    /// A numeric state field, rounded to two decimal places.
    Number(f64),
    /// A boolean state field.
    Bool(bool),
}

/// Round a value to two decimal places. Presentation only — internal state stays full
/// precision.
#[must_use]
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The read-only projection of an instrument exposed to the external adapter surface: its
/// current (rounded) state plus a config echo.
pub struct DisplayData {
    /// The instrument's configuration, as last set.
    pub config: HashMap<String, ParamValue>,
    /// The instrument's current state, rounded for presentation.
    pub state: HashMap<String, DisplayValue>,
}

/// Resolves a named link to a state value on another instrument, without ever holding more
/// than one instrument's lock at a time.
pub trait LinkResolver {
    /// Read a numeric state field from the instrument with id `target_id`. Returns `None` if
    /// the instrument does not exist or does not have that field — callers treat this exactly
    /// like a missing hardware input, defaulting to 0.
    fn get_f64(&self, target_id: &str, key: &str) -> Option<f64>;

    /// Read a boolean state field from the instrument with id `target_id`. Returns `None` under
    /// the same conditions as [`LinkResolver::get_f64`].
    fn get_bool(&self, target_id: &str, key: &str) -> Option<bool>;
}

/// The per-tick contract every instrument variant implements.
pub trait InstrumentLogic: Send {
    /// Copy hardware inputs relevant to this instrument into its state. Must not block beyond
    /// what the HAL itself does, and must not consult links.
    fn read_inputs(&mut self, hal: &mut Hal);

    /// Advance this instrument's physical model by `dt` seconds, consulting `links` for any
    /// linked instrument's state.
    fn update(&mut self, dt: f64, links: &dyn LinkResolver);

    /// Write this instrument's state-derived outputs to hardware.
    fn write_outputs(&mut self, hal: &mut Hal);

    /// Read a numeric state field by name, for link resolution.
    fn state_f64(&self, key: &str) -> Option<f64>;

    /// Read a boolean state field by name, for link resolution.
    fn state_bool(&self, key: &str) -> Option<bool>;

    /// Produce the display projection of this instrument.
    fn display(&self) -> DisplayData;

    /// Mutate the named parameter. Unknown names, or a value of the wrong shape for the named
    /// parameter, are rejected rather than silently corrupting state.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message if `name` is unknown or `value` has the wrong shape.
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String>;

    /// Reset this instrument's state to its documented initial values. Parameters are
    /// untouched.
    fn reset(&mut self);
}

/// One instrument in the running configuration: its id, type, the I/O pins and link targets it
/// was constructed with, and its mutex-guarded logic.
pub struct Instrument {
    /// The instrument's unique id.
    pub id: String,
    /// The instrument's type, e.g. `level` or `pump`.
    pub kind: String,
    /// Guards both this instrument's state and its parameters, matching the single-lock
    /// discipline described for the simulation kernel: the tick loop and any external reader
    /// acquire this lock, do their work, and release it before touching another instrument.
    logic: Mutex<Box<dyn InstrumentLogic>>,
}

impl Instrument {
    /// Call [`InstrumentLogic::read_inputs`] under this instrument's lock.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned by a prior panic.
    pub fn read_inputs(&self, hal: &mut Hal) -> Result<(), ControllerError> {
        self.logic.lock()?.read_inputs(hal);
        Ok(())
    }

    /// Call [`InstrumentLogic::update`] under this instrument's lock.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned by a prior panic.
    pub fn update(&self, dt: f64, links: &dyn LinkResolver) -> Result<(), ControllerError> {
        self.logic.lock()?.update(dt, links);
        Ok(())
    }

    /// Call [`InstrumentLogic::write_outputs`] under this instrument's lock.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned by a prior panic.
    pub fn write_outputs(&self, hal: &mut Hal) -> Result<(), ControllerError> {
        self.logic.lock()?.write_outputs(hal);
        Ok(())
    }

    /// Read a numeric state field, for link resolution.
    ///
    /// Uses `try_lock` rather than `lock`: link resolution runs while the calling instrument's
    /// own lock is held, and a link that ever targeted this same instrument (directly, or
    /// through a cycle re-entering it) would otherwise deadlock the tick loop on a non-reentrant
    /// mutex. A lock that is unavailable — held by this thread or any other — reads as a missing
    /// field, the same as an instrument that does not expose that key.
    fn state_f64(&self, key: &str) -> Option<f64> {
        self.logic.try_lock().ok()?.state_f64(key)
    }

    /// Read a boolean state field, for link resolution. See [`Instrument::state_f64`] for why
    /// this uses `try_lock`.
    fn state_bool(&self, key: &str) -> Option<bool> {
        self.logic.try_lock().ok()?.state_bool(key)
    }

    /// Produce this instrument's display projection.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned by a prior panic.
    pub fn display(&self) -> Result<DisplayData, ControllerError> {
        Ok(self.logic.lock()?.display())
    }

    /// Mutate the named parameter.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned, or bubbles up the
    /// `InstrumentLogic::set_parameter` rejection as a `ControllerError::Config`-free string
    /// error via the adapter layer (see [`crate::adapter`]).
    pub fn set_parameter(&self, name: &str, value: ParamValue) -> Result<(), String> {
        self.logic
            .lock()
            .map_err(|_| "internal lock poisoned".to_owned())?
            .set_parameter(name, value)
    }

    /// Reset this instrument's state to its documented initial values.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Poison` if the lock was poisoned by a prior panic.
    pub fn reset(&self) -> Result<(), ControllerError> {
        self.logic.lock()?.reset();
        Ok(())
    }
}

/// An assembled collection of instruments, indexed by id, resolving links between them.
pub struct InstrumentSet {
    instruments: Vec<Instrument>,
    index: HashMap<String, usize>,
}

impl InstrumentSet {
    /// Iterate over the instruments in construction (deterministic, file) order.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    /// The number of instruments in this set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether this set has no instruments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Look up an instrument by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Instrument> {
        self.index.get(id).map(|&i| &self.instruments[i])
    }
}

impl LinkResolver for InstrumentSet {
    fn get_f64(&self, target_id: &str, key: &str) -> Option<f64> {
        self.get(target_id).and_then(|i| i.state_f64(key))
    }

    fn get_bool(&self, target_id: &str, key: &str) -> Option<bool> {
        self.get(target_id).and_then(|i| i.state_bool(key))
    }
}

/// Construct the `InstrumentLogic` for a single configuration entry, or `None` if `kind` is not
/// a recognized instrument type.
fn construct(
    kind: &str,
    params: &HashMap<String, ParamValue>,
    io: HashMap<String, IoPin>,
    links: HashMap<String, String>,
) -> Option<Box<dyn InstrumentLogic>> {
    match kind {
        "level" => Some(Box::new(level::Level::new(params, io, links))),
        "valve" => Some(Box::new(valve::Valve::new(params, io, links))),
        "pump" => Some(Box::new(pump::Pump::new(params, io, links))),
        "flow" => Some(Box::new(flow::FlowMeter::new(params, io, links))),
        "reg_valve" => Some(Box::new(reg_valve::RegValve::new(params, io, links))),
        "tankbil" => Some(Box::new(tankbil::Tankbil::new(params, io, links))),
        _ => None,
    }
}

/// Build every instrument named in `configs`.
///
/// Unknown types are dropped with a warning. Links whose target id does not resolve to a
/// constructed instrument are dropped with a warning.
#[must_use]
pub fn build_all(configs: &[InstrumentConfig], log: &UserLog) -> InstrumentSet {
    let recognized_ids: HashSet<&str> = configs
        .iter()
        .filter(|c| KNOWN_KINDS.contains(&c.kind.as_str()))
        .map(|c| c.id.as_str())
        .collect();

    let mut instruments = Vec::with_capacity(configs.len());
    let mut index = HashMap::with_capacity(configs.len());

    for cfg in configs {
        if !KNOWN_KINDS.contains(&cfg.kind.as_str()) {
            let _ = log.warn(&format!(
                "instrument `{}`: unknown type `{}`; skipping",
                cfg.id, cfg.kind
            ));
            continue;
        }

        let mut links = HashMap::with_capacity(cfg.links.len());
        for (name, target) in &cfg.links {
            if target == &cfg.id {
                let _ = log.warn(&format!(
                    "instrument `{}`: link `{}` targets itself; dropping",
                    cfg.id, name
                ));
            } else if recognized_ids.contains(target.as_str()) {
                links.insert(name.clone(), target.clone());
            } else {
                let _ = log.warn(&format!(
                    "instrument `{}`: link `{}` targets unknown instrument `{}`; dropping",
                    cfg.id, name, target
                ));
            }
        }

        let Some(logic) = construct(&cfg.kind, &cfg.parameters, cfg.io.clone(), links) else {
            continue;
        };

        let idx = instruments.len();
        index.insert(cfg.id.clone(), idx);
        instruments.push(Instrument {
            id: cfg.id.clone(),
            kind: cfg.kind.clone(),
            logic: Mutex::new(logic),
        });
    }

    InstrumentSet { instruments, index }
}

/// Read a digital input pin through the HAL for the logical name `name`, defaulting to `false`
/// if `name` is not present in `io` (a dropped or never-configured pin must not fault the tick —
/// a missing input reads as 0/false).
pub(crate) fn read_digital(io: &HashMap<String, IoPin>, hal: &mut Hal, name: &str) -> bool {
    match io.get(name) {
        Some(IoPin::DigitalIn { pin } | IoPin::DigitalOut { pin }) => {
            hal.read(*pin).unwrap_or(false)
        }
        _ => false,
    }
}

/// Write a digital output pin through the HAL for the logical name `name`. A no-op if `name` is
/// not present in `io`.
pub(crate) fn write_digital(io: &HashMap<String, IoPin>, hal: &mut Hal, name: &str, value: bool) {
    if let Some(IoPin::DigitalOut { pin } | IoPin::DigitalIn { pin }) = io.get(name) {
        let _ = hal.write(*pin, value);
    }
}

/// Write a percentage (clamped to `[0, 100]`) as a 4-20mA current through the analog output pin
/// for the logical name `name`. A no-op if `name` is not present in `io`.
pub(crate) fn write_analog_percent(
    io: &HashMap<String, IoPin>,
    hal: &mut Hal,
    name: &str,
    percent: f64,
) {
    if let Some(IoPin::AnalogOut { address, .. }) = io.get(name) {
        let _ = hal.dac_set_current_ma(*address, crate::hardware::percent_to_ma(percent));
    }
}

/// Read a 0-10V analog input pin through the HAL for the logical name `name`, scaled linearly
/// to a percentage in `[0, 100]`. Defaults to 0 if `name` is not present in `io`.
pub(crate) fn read_analog_percent(io: &HashMap<String, IoPin>, hal: &mut Hal, name: &str) -> f64 {
    match io.get(name) {
        Some(IoPin::AnalogIn { address, channel }) => hal
            .adc_read_voltage(*address, *channel)
            .map(|v| (v / 10.0 * 100.0).clamp(0.0, 100.0))
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_all, LinkResolver, KNOWN_KINDS};
    use crate::config::Configuration;
    use crate::console::UserLog;

    #[test]
    fn unknown_type_and_dangling_link_are_dropped() {
        let log = UserLog::new(Vec::new());
        let doc = r"
instruments:
  - id: a
    type: level
    parameters:
      tank_volume_m3: 1.0
      tank_height_mm: 1000
      height_100_percent: 1000
      height_hh_alarm: 900
    links:
      flowmeter: nonexistent
  - id: b
    type: not_a_real_type
";
        let config = Configuration::parse(doc, &log).unwrap();
        let set = build_all(&config.instruments, &log);
        assert_eq!(set.len(), 1);
        assert!(set.get("b").is_none());
        assert!(KNOWN_KINDS.contains(&"level"));
    }

    /// A link that targets its own instrument is dropped at construction rather than being left
    /// to deadlock the tick loop when resolved.
    #[test]
    fn self_link_is_dropped() {
        let log = UserLog::new(Vec::new());
        let doc = r"
instruments:
  - id: a
    type: level
    parameters:
      tank_volume_m3: 1.0
      tank_height_mm: 1000
      height_100_percent: 1000
      height_hh_alarm: 900
    links:
      flowmeter: a
";
        let config = Configuration::parse(doc, &log).unwrap();
        let set = build_all(&config.instruments, &log);
        assert_eq!(set.len(), 1);
        // resolving the dropped link must not block, regardless of whether it was dropped.
        assert_eq!(set.get_f64("a", "flow_lpm"), None);
    }
}
