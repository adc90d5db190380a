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

//! The pump instrument: a ramped speed drive coupled to a linked regulating valve's
//! back-pressure.

use std::collections::HashMap;

use crate::config::ParamValue;
use crate::hardware::Hal;
use crate::instrument::{
    read_analog_percent, read_digital, round2, write_analog_percent, write_digital, DisplayData,
    DisplayValue, InstrumentLogic, LinkResolver,
};
use crate::io_pin::IoPin;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ControlType {
    Digital,
    Analog,
}

struct Params {
    control_type: ControlType,
    max_pressure_bar: f64,
    set_pressure_bar: f64,
    max_flow_lpm: f64,
    ramp_time_sec: f64,
}

struct State {
    running: bool,
    enable_cmd: bool,
    speed_cmd_percent: f64,
    current_speed_percent: f64,
    pressure_bar: f64,
    flow_lpm: f64,
    fault: bool,
}

impl State {
    fn initial() -> State {
        State {
            running: false,
            enable_cmd: false,
            speed_cmd_percent: 0.0,
            current_speed_percent: 0.0,
            pressure_bar: 0.0,
            flow_lpm: 0.0,
            fault: false,
        }
    }
}

/// The pump instrument.
pub struct Pump {
    params: Params,
    state: State,
    io: HashMap<String, IoPin>,
    links: HashMap<String, String>,
}

impl Pump {
    #[must_use]
    pub fn new(
        params: &HashMap<String, ParamValue>,
        io: HashMap<String, IoPin>,
        links: HashMap<String, String>,
    ) -> Pump {
        let control_type = match params.get("control_type").and_then(ParamValue::as_str) {
            Some("analog") => ControlType::Analog,
            _ => ControlType::Digital,
        };
        Pump {
            params: Params {
                control_type,
                max_pressure_bar: params
                    .get("max_pressure_bar")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(10.0),
                set_pressure_bar: params
                    .get("set_pressure_bar")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(8.0),
                max_flow_lpm: params
                    .get("max_flow_lpm")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(100.0),
                ramp_time_sec: params
                    .get("ramp_time_sec")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(5.0),
            },
            state: State::initial(),
            io,
            links,
        }
    }
}

impl InstrumentLogic for Pump {
    fn read_inputs(&mut self, hal: &mut Hal) {
        self.state.enable_cmd = read_digital(&self.io, hal, "enable_input");
        if self.params.control_type == ControlType::Analog {
            self.state.speed_cmd_percent = read_analog_percent(&self.io, hal, "speed_input");
        }
    }

    fn update(&mut self, dt: f64, links: &dyn LinkResolver) {
        let mut target_speed = match self.params.control_type {
            ControlType::Digital => 100.0,
            ControlType::Analog => self.state.speed_cmd_percent,
        };
        if !self.state.enable_cmd {
            target_speed = 0.0;
        }

        let ramp_rate = (100.0 / self.params.ramp_time_sec) * dt;
        let current_speed = self.state.current_speed_percent;
        self.state.current_speed_percent = if current_speed < target_speed {
            (current_speed + ramp_rate).min(target_speed)
        } else if current_speed > target_speed {
            (current_speed - ramp_rate).max(target_speed)
        } else {
            current_speed
        };

        self.state.running = self.state.current_speed_percent > 1.0;

        let speed_factor = self.state.current_speed_percent / 100.0;
        let back_pressure = self
            .links
            .get("reg_valve")
            .and_then(|target| links.get_f64(target, "pressure_bar"))
            .unwrap_or(0.0);

        let pressure = (self.params.set_pressure_bar * speed_factor) - (back_pressure * 0.5);
        self.state.pressure_bar = pressure.clamp(0.0, self.params.max_pressure_bar);

        let pressure_diff = self.state.pressure_bar - back_pressure;
        self.state.flow_lpm = if pressure_diff > 0.0 {
            ((pressure_diff / self.params.max_pressure_bar) * self.params.max_flow_lpm * speed_factor)
                .min(self.params.max_flow_lpm)
        } else {
            0.0
        };

        self.state.fault = self.state.pressure_bar >= self.params.max_pressure_bar;
    }

    fn write_outputs(&mut self, hal: &mut Hal) {
        write_digital(&self.io, hal, "running_output", self.state.running);
        write_digital(&self.io, hal, "fault_output", self.state.fault);
        write_analog_percent(&self.io, hal, "feedback_output", self.state.current_speed_percent);
    }

    fn state_f64(&self, key: &str) -> Option<f64> {
        match key {
            "pressure_bar" => Some(self.state.pressure_bar),
            "flow_lpm" => Some(self.state.flow_lpm),
            "current_speed_percent" => Some(self.state.current_speed_percent),
            _ => None,
        }
    }

    fn state_bool(&self, key: &str) -> Option<bool> {
        match key {
            "running" => Some(self.state.running),
            "fault" => Some(self.state.fault),
            _ => None,
        }
    }

    fn display(&self) -> DisplayData {
        let mut state = HashMap::new();
        state.insert("running".to_owned(), DisplayValue::Bool(self.state.running));
        state.insert(
            "speed_percent".to_owned(),
            DisplayValue::Number(round2(self.state.current_speed_percent)),
        );
        state.insert("pressure_bar".to_owned(), DisplayValue::Number(round2(self.state.pressure_bar)));
        state.insert("flow_lpm".to_owned(), DisplayValue::Number(round2(self.state.flow_lpm)));
        state.insert("fault".to_owned(), DisplayValue::Bool(self.state.fault));
        state.insert("enable_cmd".to_owned(), DisplayValue::Bool(self.state.enable_cmd));

        let mut config = HashMap::new();
        config.insert(
            "control_type".to_owned(),
            ParamValue::Text(
                match self.params.control_type {
                    ControlType::Digital => "digital",
                    ControlType::Analog => "analog",
                }
                .to_owned(),
            ),
        );
        config.insert(
            "max_pressure_bar".to_owned(),
            ParamValue::Number(self.params.max_pressure_bar),
        );
        config.insert(
            "set_pressure_bar".to_owned(),
            ParamValue::Number(self.params.set_pressure_bar),
        );
        config.insert("max_flow_lpm".to_owned(), ParamValue::Number(self.params.max_flow_lpm));
        config.insert("ramp_time_sec".to_owned(), ParamValue::Number(self.params.ramp_time_sec));

        DisplayData { config, state }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String> {
        match name {
            "control_type" => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("parameter `{name}` expects a string"))?;
                self.params.control_type = match s {
                    "analog" => ControlType::Analog,
                    "digital" => ControlType::Digital,
                    other => return Err(format!("unknown control_type `{other}`")),
                };
            }
            "max_pressure_bar" => {
                self.params.max_pressure_bar = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
            }
            "set_pressure_bar" => {
                self.params.set_pressure_bar = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
            }
            "max_flow_lpm" => {
                self.params.max_flow_lpm = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
            }
            "ramp_time_sec" => {
                self.params.ramp_time_sec = value
                    .as_f64()
                    .ok_or_else(|| format!("parameter `{name}` expects a number"))?;
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
    use super::Pump;
    use crate::config::ParamValue;
    use crate::instrument::{InstrumentLogic, LinkResolver};
    use std::collections::HashMap;

    struct FixedBackPressure(f64);
    impl LinkResolver for FixedBackPressure {
        fn get_f64(&self, _target_id: &str, key: &str) -> Option<f64> {
            (key == "pressure_bar").then_some(self.0)
        }
        fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
            None
        }
    }

    fn pump_with_reg_valve_link() -> Pump {
        let params = HashMap::from([
            ("set_pressure_bar".to_owned(), ParamValue::Number(8.0)),
            ("max_pressure_bar".to_owned(), ParamValue::Number(10.0)),
            ("max_flow_lpm".to_owned(), ParamValue::Number(100.0)),
            ("ramp_time_sec".to_owned(), ParamValue::Number(5.0)),
        ]);
        let mut links = HashMap::new();
        links.insert("reg_valve".to_owned(), "rv1".to_owned());
        Pump::new(&params, HashMap::new(), links)
    }

    /// A pump against a fixed back-pressure reaches a steady state.
    #[test]
    fn steady_state_with_back_pressure() {
        let mut pump = pump_with_reg_valve_link();
        pump.state.enable_cmd = true;
        let links = FixedBackPressure(4.0);
        for _ in 0..100 {
            pump.update(0.1, &links);
        }
        assert!((pump.state.pressure_bar - 6.0).abs() < 0.1);
        assert!((pump.state.flow_lpm - 20.0).abs() < 1.0);
        assert!(pump.state.running);
        assert!(!pump.state.fault);
    }

    #[test]
    fn fault_when_pressure_saturates() {
        let params = HashMap::from([
            ("set_pressure_bar".to_owned(), ParamValue::Number(20.0)),
            ("max_pressure_bar".to_owned(), ParamValue::Number(10.0)),
            ("max_flow_lpm".to_owned(), ParamValue::Number(100.0)),
            ("ramp_time_sec".to_owned(), ParamValue::Number(1.0)),
        ]);
        let mut pump = Pump::new(&params, HashMap::new(), HashMap::new());
        pump.state.enable_cmd = true;
        let links = FixedBackPressure(0.0);
        for _ in 0..50 {
            pump.update(0.1, &links);
        }
        assert!(pump.state.fault);
        assert!(pump.state.pressure_bar <= 10.0);
    }

    #[test]
    fn disabled_pump_ramps_to_zero() {
        let mut pump = pump_with_reg_valve_link();
        pump.state.current_speed_percent = 100.0;
        let links = FixedBackPressure(0.0);
        pump.update(10.0, &links);
        assert_eq!(pump.state.current_speed_percent, 0.0);
        assert!(!pump.state.running);
    }
}
