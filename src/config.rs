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

//! The configuration loader.
//!
//! Deserializes the YAML configuration document into a list of validated instrument
//! descriptions. Entries missing `id` or `type` are skipped with a warning rather than failing
//! the whole document; everything else (link resolution, instrument construction) happens one
//! layer up in [`crate::instrument`], which is the only place that maps a `type` string to a
//! constructor.

use std::collections::HashMap;
use std::fmt::Display;

use serde::Deserialize;

use crate::console::UserLog;
use crate::io_pin::{IoPin, RawIoPin};

#[derive(Debug)]
/// Errors encountered while loading a configuration document.
pub enum Error {
    /// The document was not well-formed YAML, or did not match the expected top-level shape.
    Parse(serde_yaml::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "could not parse configuration: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Parse(e)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
/// A scalar parameter value. Parameters are untyped on the wire; instrument constructors are
/// responsible for coercing each one to the shape they expect.
pub enum ParamValue {
    /// A boolean parameter, e.g. `noise_enabled: true`.
    Bool(bool),
    /// A numeric parameter, e.g. `tank_volume_m3: 10.0`. Integral YAML scalars also land here.
    Number(f64),
    /// A string/enum-like parameter, e.g. `valve_type: import`.
    Text(String),
}

impl ParamValue {
    /// Interpret this value as a floating-point number, if it is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interpret this value as a boolean, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret this value as a string, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
/// One `instruments:` entry, as deserialized directly from YAML, before validation.
struct RawInstrumentEntry {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, ParamValue>,
    #[serde(default)]
    io: HashMap<String, RawIoPin>,
    #[serde(default)]
    links: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
/// The top-level shape of a configuration document.
struct RawConfiguration {
    #[serde(default)]
    instruments: Vec<RawInstrumentEntry>,
}

#[derive(Clone, Debug, PartialEq)]
/// A fully validated instrument description, ready to be handed to a constructor.
pub struct InstrumentConfig {
    /// The instrument's unique id.
    pub id: String,
    /// The instrument type, e.g. `level` or `pump`.
    pub kind: String,
    /// Per-type parameters.
    pub parameters: HashMap<String, ParamValue>,
    /// Logical I/O name to validated pin location.
    pub io: HashMap<String, IoPin>,
    /// Logical link name to target instrument id.
    pub links: HashMap<String, String>,
}

/// A parsed and validated configuration document.
pub struct Configuration {
    /// The instruments named in the document, in file order.
    pub instruments: Vec<InstrumentConfig>,
}

impl Configuration {
    /// Parse and validate a configuration document from `source`.
    ///
    /// Entries missing `id` or `type`, and I/O entries with a wrong-shaped location, are
    /// dropped with a warning rather than failing the whole document. Unknown instrument
    /// `type`s are *not* rejected here — that mapping is owned by
    /// [`crate::instrument::build_all`], which is the only place that knows the set of
    /// constructible types.
    ///
    /// # Errors
    ///
    /// Returns `Error::Parse` if `source` is not well-formed YAML matching the top-level
    /// `instruments: [...]` shape.
    pub fn parse(source: &str, log: &UserLog) -> Result<Configuration, Error> {
        let raw: RawConfiguration = serde_yaml::from_str(source)?;
        let mut instruments = Vec::with_capacity(raw.instruments.len());

        for entry in raw.instruments {
            let (Some(id), Some(kind)) = (entry.id, entry.kind) else {
                let _ = log.warn("skipping instrument entry missing `id` or `type`");
                continue;
            };

            let mut io = HashMap::with_capacity(entry.io.len());
            for (name, raw_pin) in entry.io {
                match IoPin::from_raw(&raw_pin) {
                    Ok(pin) => {
                        io.insert(name, pin);
                    }
                    Err(e) => {
                        let _ = log.warn(&format!(
                            "instrument `{id}`: dropping io entry `{name}`: {e}"
                        ));
                    }
                }
            }

            instruments.push(InstrumentConfig {
                id,
                kind,
                parameters: entry.parameters,
                io,
                links: entry.links,
            });
        }

        Ok(Configuration { instruments })
    }
}

#[cfg(test)]
mod tests {
    use super::{Configuration, ParamValue};
    use crate::console::UserLog;

    const DOC: &str = r"
instruments:
  - id: tank1
    type: level
    parameters:
      tank_volume_m3: 10.0
      tank_height_mm: 2000
      height_100_percent: 2000
      height_hh_alarm: 1800
    io:
      level_output: { type: analog_out, i2c_address: 96, channel: 0 }
      hh_alarm_output: { type: digital_out, pin: 17 }
    links:
      flowmeter: flow1
  - type: pump
    parameters: {}
  - id: bad_pin
    type: valve
    io:
      open_input: { type: digital_in }
";

    #[test]
    fn parses_valid_instrument_and_skips_invalid_entries() {
        let log = UserLog::new(Vec::new());
        let config = Configuration::parse(DOC, &log).unwrap();
        // the entry missing `id` is dropped.
        assert_eq!(config.instruments.len(), 2);

        let tank = &config.instruments[0];
        assert_eq!(tank.id, "tank1");
        assert_eq!(tank.kind, "level");
        assert_eq!(
            tank.parameters.get("tank_volume_m3").and_then(ParamValue::as_f64),
            Some(10.0)
        );
        assert_eq!(tank.links.get("flowmeter").map(String::as_str), Some("flow1"));
        assert_eq!(tank.io.len(), 2);

        // the malformed io entry (digital_in without `pin`) is dropped, leaving an empty map,
        // but the instrument itself survives.
        let bad_pin = &config.instruments[1];
        assert_eq!(bad_pin.id, "bad_pin");
        assert!(bad_pin.io.is_empty());
    }

    #[test]
    fn rejects_malformed_yaml() {
        let log = UserLog::new(Vec::new());
        assert!(Configuration::parse("instruments: [", &log).is_err());
    }
}
