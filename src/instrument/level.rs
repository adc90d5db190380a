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

//! The level (tank) instrument: a tank whose volume is driven by the flow of a linked flow
//! meter, exposing a 4-20mA level output and a digital high-high alarm.

use std::collections::HashMap;

use crate::config::ParamValue;
use crate::hardware::Hal;
use crate::instrument::{
    round2, write_analog_percent, write_digital, DisplayData, DisplayValue, InstrumentLogic,
    LinkResolver,
};
use crate::io_pin::IoPin;

/// Fixed configuration for a level instrument. Derived fields are computed once at construction
/// and whenever a parameter that feeds them changes.
struct Params {
    tank_height_mm: f64,
    height_100_percent: f64,
    height_hh_alarm: f64,
    tank_volume_m3: f64,
}

impl Params {
    /// `cross_section_m2 = tank_volume_m3 / (tank_height_mm / 1000)`.
    fn cross_section_m2(&self) -> f64 {
        self.tank_volume_m3 / (self.tank_height_mm / 1000.0)
    }
}

/// Mutable simulation state for a level instrument. Always fully populated after construction —
/// no lazily-created keys.
struct State {
    level_mm: f64,
    level_percent: f64,
    volume_m3: f64,
    hh_alarm: bool,
}

impl State {
    fn initial() -> State {
        State {
            level_mm: 0.0,
            level_percent: 0.0,
            volume_m3: 0.0,
            hh_alarm: false,
        }
    }
}

/// The tank level instrument.
pub struct Level {
    params: Params,
    state: State,
    io: HashMap<String, IoPin>,
    links: HashMap<String, String>,
}

impl Level {
    #[must_use]
    pub fn new(
        params: &HashMap<String, ParamValue>,
        io: HashMap<String, IoPin>,
        links: HashMap<String, String>,
    ) -> Level {
        Level {
            params: Params {
                tank_height_mm: params
                    .get("tank_height_mm")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(2000.0),
                height_100_percent: params
                    .get("height_100_percent")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(2000.0),
                height_hh_alarm: params
                    .get("height_hh_alarm")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(1800.0),
                tank_volume_m3: params
                    .get("tank_volume_m3")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(10.0),
            },
            state: State::initial(),
            io,
            links,
        }
    }
}

impl InstrumentLogic for Level {
    /// No hardware inputs: this instrument's state is driven entirely by its link.
    fn read_inputs(&mut self, _hal: &mut Hal) {}

    fn update(&mut self, dt: f64, links: &dyn LinkResolver) {
        let flow_lpm = self
            .links
            .get("flowmeter")
            .and_then(|target| links.get_f64(target, "flow_lpm"))
            .unwrap_or(0.0);

        let flow_m3_s = flow_lpm / 60_000.0;
        let delta_volume = flow_m3_s * dt;
        let new_volume = (self.state.volume_m3 + delta_volume).clamp(0.0, self.params.tank_volume_m3);

        let cross_section = self.params.cross_section_m2();
        let level_mm = (new_volume / cross_section) * 1000.0;

        self.state.volume_m3 = new_volume;
        self.state.level_mm = level_mm;
        self.state.level_percent = (level_mm / self.params.height_100_percent) * 100.0;
        self.state.hh_alarm = level_mm >= self.params.height_hh_alarm;
    }

    fn write_outputs(&mut self, hal: &mut Hal) {
        write_analog_percent(&self.io, hal, "level_output", self.state.level_percent);
        write_digital(&self.io, hal, "hh_alarm_output", self.state.hh_alarm);
    }

    fn state_f64(&self, key: &str) -> Option<f64> {
        match key {
            "level_mm" => Some(self.state.level_mm),
            "level_percent" => Some(self.state.level_percent),
            "volume_m3" => Some(self.state.volume_m3),
            _ => None,
        }
    }

    fn state_bool(&self, key: &str) -> Option<bool> {
        match key {
            "hh_alarm" => Some(self.state.hh_alarm),
            _ => None,
        }
    }

    fn display(&self) -> DisplayData {
        let mut state = HashMap::new();
        state.insert("level_mm".to_owned(), DisplayValue::Number(round2(self.state.level_mm)));
        state.insert(
            "level_percent".to_owned(),
            DisplayValue::Number(round2(self.state.level_percent)),
        );
        state.insert("volume_m3".to_owned(), DisplayValue::Number(round2(self.state.volume_m3)));
        state.insert("hh_alarm".to_owned(), DisplayValue::Bool(self.state.hh_alarm));

        let mut config = HashMap::new();
        config.insert("tank_height_mm".to_owned(), ParamValue::Number(self.params.tank_height_mm));
        config.insert(
            "height_100_percent".to_owned(),
            ParamValue::Number(self.params.height_100_percent),
        );
        config.insert(
            "height_hh_alarm".to_owned(),
            ParamValue::Number(self.params.height_hh_alarm),
        );
        config.insert("tank_volume_m3".to_owned(), ParamValue::Number(self.params.tank_volume_m3));

        DisplayData { config, state }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String> {
        let Some(v) = value.as_f64() else {
            return Err(format!("parameter `{name}` expects a number"));
        };
        match name {
            "tank_height_mm" => self.params.tank_height_mm = v,
            "height_100_percent" => self.params.height_100_percent = v,
            "height_hh_alarm" => self.params.height_hh_alarm = v,
            "tank_volume_m3" => self.params.tank_volume_m3 = v,
            _ => return Err(format!("unknown parameter `{name}`")),
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = State::initial();
    }
}

#[cfg(test)]
mod tests {
    use super::Level;
    use crate::config::ParamValue;
    use crate::instrument::{InstrumentLogic, LinkResolver};
    use std::collections::HashMap;

    fn params(entries: &[(&str, f64)]) -> HashMap<String, ParamValue> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), ParamValue::Number(*v)))
            .collect()
    }

    /// A fixed link resolver, used to feed a constant `flow_lpm` into the level instrument's
    /// link without needing a second instrument.
    struct FixedFlow(f64);

    impl LinkResolver for FixedFlow {
        fn get_f64(&self, _target_id: &str, key: &str) -> Option<f64> {
            (key == "flow_lpm").then_some(self.0)
        }

        fn get_bool(&self, _target_id: &str, _key: &str) -> Option<bool> {
            None
        }
    }

    fn level_with_flowmeter_link() -> Level {
        let mut links = HashMap::new();
        links.insert("flowmeter".to_owned(), "flow1".to_owned());
        Level::new(
            &params(&[
                ("tank_volume_m3", 10.0),
                ("tank_height_mm", 2000.0),
                ("height_100_percent", 2000.0),
                ("height_hh_alarm", 1800.0),
            ]),
            HashMap::new(),
            links,
        )
    }

    /// Level fills from a steady linked flow rate over a run of ticks.
    #[test]
    fn fills_from_linked_flow() {
        let mut level = level_with_flowmeter_link();
        let links = FixedFlow(60.0);
        // 10 s at 10 Hz.
        for _ in 0..100 {
            level.update(0.1, &links);
        }
        assert!((level.state.volume_m3 - 0.01).abs() < 1e-6);
        assert!((level.state.level_mm - 2.0).abs() < 1e-3);
        assert!(!level.state.hh_alarm);
    }

    /// The HH alarm trips once level reaches the configured threshold.
    #[test]
    fn hh_alarm_trips() {
        let mut level = level_with_flowmeter_link();
        // preset volume so that level_mm starts at 1799.
        level.state.volume_m3 = 1799.0 / 1000.0 * level.params.cross_section_m2();
        level.state.level_mm = 1799.0;
        let links = FixedFlow(600.0);
        level.update(0.2, &links);
        assert!(level.state.level_mm >= 1800.0);
        assert!(level.state.hh_alarm);
    }

    #[test]
    fn volume_clamped_to_tank_capacity() {
        let mut level = level_with_flowmeter_link();
        let links = FixedFlow(1_000_000.0);
        for _ in 0..50 {
            level.update(0.1, &links);
        }
        assert!(level.state.volume_m3 <= 10.0 + 1e-9);
    }

    #[test]
    fn unknown_parameter_rejected() {
        let mut level = level_with_flowmeter_link();
        assert!(level.set_parameter("not_a_field", ParamValue::Number(1.0)).is_err());
    }

    #[test]
    fn wrong_shaped_parameter_rejected() {
        let mut level = level_with_flowmeter_link();
        assert!(level
            .set_parameter("tank_volume_m3", ParamValue::Bool(true))
            .is_err());
    }
}
