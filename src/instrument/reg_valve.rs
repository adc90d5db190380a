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

//! The regulating (modulating) valve instrument: an analog position servo coupled to a simple
//! pressure-drop model.

use std::collections::HashMap;

use crate::config::ParamValue;
use crate::hardware::Hal;
use crate::instrument::{
    read_analog_percent, read_digital, round2, write_analog_percent, write_digital, DisplayData,
    DisplayValue, InstrumentLogic, LinkResolver,
};
use crate::io_pin::IoPin;

struct Params {
    /// Cosmetic only (`LVRA` raise-to-open or `LVRD` raise-to-close).
    valve_type: String,
    open_speed_sec: f64,
    close_speed_sec: f64,
    min_position_20_pct: bool,
    /// Cosmetic only (`switch` or `analog`); both feedback outputs are always written.
    feedback_type: String,
}

struct State {
    position_percent: f64,
    setpoint_percent: f64,
    open_cmd: bool,
    hold_cmd: bool,
    at_closed_limit: bool,
    pressure_bar: f64,
}

impl State {
    fn initial() -> State {
        State {
            position_percent: 0.0,
            setpoint_percent: 0.0,
            open_cmd: false,
            hold_cmd: false,
            at_closed_limit: true,
            pressure_bar: 0.0,
        }
    }
}

/// The regulating valve instrument.
pub struct RegValve {
    params: Params,
    state: State,
    io: HashMap<String, IoPin>,
}

impl RegValve {
    #[must_use]
    pub fn new(
        params: &HashMap<String, ParamValue>,
        io: HashMap<String, IoPin>,
        _links: HashMap<String, String>,
    ) -> RegValve {
        RegValve {
            params: Params {
                valve_type: params
                    .get("valve_type")
                    .and_then(ParamValue::as_str)
                    .unwrap_or("LVRA")
                    .to_owned(),
                open_speed_sec: params
                    .get("open_speed_sec")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(10.0),
                close_speed_sec: params
                    .get("close_speed_sec")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(10.0),
                min_position_20_pct: params
                    .get("min_position_20_pct")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(false),
                feedback_type: params
                    .get("feedback_type")
                    .and_then(ParamValue::as_str)
                    .unwrap_or("analog")
                    .to_owned(),
            },
            state: State::initial(),
            io,
        }
    }
}

impl InstrumentLogic for RegValve {
    fn read_inputs(&mut self, hal: &mut Hal) {
        self.state.open_cmd = read_digital(&self.io, hal, "open_input");
        self.state.hold_cmd = read_digital(&self.io, hal, "hold_input");
        self.state.setpoint_percent = read_analog_percent(&self.io, hal, "position_input");
    }

    fn update(&mut self, dt: f64, _links: &dyn LinkResolver) {
        if self.state.hold_cmd {
            return;
        }

        let raw_setpoint = self.state.setpoint_percent;
        let target = if self.params.min_position_20_pct && raw_setpoint > 0.0 {
            raw_setpoint.max(20.0)
        } else {
            raw_setpoint
        };

        let position = self.state.position_percent;
        if position < target {
            let delta = (100.0 / self.params.open_speed_sec) * dt;
            self.state.position_percent = (position + delta).min(target);
        } else if position > target {
            let delta = (100.0 / self.params.close_speed_sec) * dt;
            self.state.position_percent = (position - delta).max(target);
        }

        self.state.at_closed_limit = self.state.position_percent < 5.0;

        let position_factor = self.state.position_percent / 100.0;
        self.state.pressure_bar = if position_factor > 0.0 {
            2.0 * (1.0 - position_factor)
        } else {
            10.0
        };
    }

    fn write_outputs(&mut self, hal: &mut Hal) {
        write_digital(&self.io, hal, "closed_limit_output", self.state.at_closed_limit);
        write_analog_percent(&self.io, hal, "position_output", self.state.position_percent);
    }

    fn state_f64(&self, key: &str) -> Option<f64> {
        match key {
            "position_percent" => Some(self.state.position_percent),
            "setpoint_percent" => Some(self.state.setpoint_percent),
            "pressure_bar" => Some(self.state.pressure_bar),
            _ => None,
        }
    }

    fn state_bool(&self, key: &str) -> Option<bool> {
        match key {
            "at_closed_limit" => Some(self.state.at_closed_limit),
            _ => None,
        }
    }

    fn display(&self) -> DisplayData {
        let mut state = HashMap::new();
        state.insert(
            "position_percent".to_owned(),
            DisplayValue::Number(round2(self.state.position_percent)),
        );
        state.insert(
            "setpoint_percent".to_owned(),
            DisplayValue::Number(round2(self.state.setpoint_percent)),
        );
        state.insert("pressure_bar".to_owned(), DisplayValue::Number(round2(self.state.pressure_bar)));
        state.insert(
            "at_closed_limit".to_owned(),
            DisplayValue::Bool(self.state.at_closed_limit),
        );

        let mut config = HashMap::new();
        config.insert("valve_type".to_owned(), ParamValue::Text(self.params.valve_type.clone()));
        config.insert("open_speed_sec".to_owned(), ParamValue::Number(self.params.open_speed_sec));
        config.insert(
            "close_speed_sec".to_owned(),
            ParamValue::Number(self.params.close_speed_sec),
        );
        config.insert(
            "min_position_20_pct".to_owned(),
            ParamValue::Bool(self.params.min_position_20_pct),
        );
        config.insert(
            "feedback_type".to_owned(),
            ParamValue::Text(self.params.feedback_type.clone()),
        );

        DisplayData { config, state }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String> {
        match name {
            "valve_type" => {
                self.params.valve_type = value
                    .as_str()
                    .ok_or_else(|| format!("parameter `{name}` expects a string"))?
                    .to_owned();
            }
            "open_speed_sec" => {
                self.params.open_speed_sec = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
            }
            "close_speed_sec" => {
                self.params.close_speed_sec = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
            }
            "min_position_20_pct" => {
                self.params.min_position_20_pct = value
                    .as_bool()
                    .ok_or_else(|| format!("parameter `{name}` expects a boolean"))?;
            }
            "feedback_type" => {
                self.params.feedback_type = value
                    .as_str()
                    .ok_or_else(|| format!("parameter `{name}` expects a string"))?
                    .to_owned();
            }
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
    use super::RegValve;
    use crate::config::ParamValue;
    use crate::instrument::InstrumentLogic;
    use std::collections::HashMap;

    struct NoLinks;
    impl crate::instrument::LinkResolver for NoLinks {
        fn get_f64(&self, _: &str, _: &str) -> Option<f64> {
            None
        }
        fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
            None
        }
    }

    #[test]
    fn min_position_forces_20_only_above_zero() {
        let params = HashMap::from([
            ("open_speed_sec".to_owned(), ParamValue::Number(10.0)),
            ("close_speed_sec".to_owned(), ParamValue::Number(10.0)),
            ("min_position_20_pct".to_owned(), ParamValue::Bool(true)),
        ]);
        let mut rv = RegValve::new(&params, HashMap::new(), HashMap::new());

        // raw setpoint 0 must still permit closing (target stays 0).
        rv.state.setpoint_percent = 0.0;
        rv.state.position_percent = 50.0;
        rv.update(100.0, &NoLinks);
        assert_eq!(rv.state.position_percent, 0.0);

        // raw setpoint > 0 is floored to 20%.
        rv.state.setpoint_percent = 5.0;
        rv.state.position_percent = 0.0;
        rv.update(100.0, &NoLinks);
        assert_eq!(rv.state.position_percent, 20.0);
    }

    #[test]
    fn hold_freezes_position() {
        let params = HashMap::new();
        let mut rv = RegValve::new(&params, HashMap::new(), HashMap::new());
        rv.state.position_percent = 40.0;
        rv.state.setpoint_percent = 100.0;
        rv.state.hold_cmd = true;
        rv.update(5.0, &NoLinks);
        assert_eq!(rv.state.position_percent, 40.0);
    }

    #[test]
    fn pressure_is_max_when_fully_closed() {
        let params = HashMap::new();
        let mut rv = RegValve::new(&params, HashMap::new(), HashMap::new());
        rv.state.setpoint_percent = 0.0;
        rv.update(1.0, &NoLinks);
        assert_eq!(rv.state.pressure_bar, 10.0);
        assert!(rv.state.at_closed_limit);
    }
}
