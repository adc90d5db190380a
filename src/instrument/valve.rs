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

//! The on/off valve instrument: a position state machine driven by open/close/hold commands.

use std::collections::HashMap;

use crate::config::ParamValue;
use crate::hardware::Hal;
use crate::instrument::{read_digital, round2, DisplayData, DisplayValue, InstrumentLogic, LinkResolver};
use crate::io_pin::IoPin;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The valve's position state machine.
enum Status {
    Closed,
    Opening,
    Open,
    Closing,
    Hold,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Closed => "closed",
            Status::Opening => "opening",
            Status::Open => "open",
            Status::Closing => "closing",
            Status::Hold => "hold",
        }
    }
}

struct Params {
    open_speed_sec: f64,
    close_speed_sec: f64,
    has_hold_solenoid: bool,
    has_return_spring: bool,
    /// Cosmetic only; carried through to the display projection.
    valve_type: String,
}

struct State {
    position_percent: f64,
    status: Status,
    open_cmd: bool,
    close_cmd: bool,
    hold_cmd: bool,
}

impl State {
    fn initial() -> State {
        State {
            position_percent: 0.0,
            status: Status::Closed,
            open_cmd: false,
            close_cmd: false,
            hold_cmd: false,
        }
    }
}

/// The on/off valve instrument.
pub struct Valve {
    params: Params,
    state: State,
    io: HashMap<String, IoPin>,
}

impl Valve {
    #[must_use]
    pub fn new(
        params: &HashMap<String, ParamValue>,
        io: HashMap<String, IoPin>,
        _links: HashMap<String, String>,
    ) -> Valve {
        Valve {
            params: Params {
                open_speed_sec: params
                    .get("open_speed_sec")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(5.0),
                close_speed_sec: params
                    .get("close_speed_sec")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(5.0),
                has_hold_solenoid: params
                    .get("has_hold_solenoid")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(false),
                has_return_spring: params
                    .get("has_return_spring")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(false),
                valve_type: params
                    .get("valve_type")
                    .and_then(ParamValue::as_str)
                    .unwrap_or("import")
                    .to_owned(),
            },
            state: State::initial(),
            io,
        }
    }
}

impl InstrumentLogic for Valve {
    fn read_inputs(&mut self, hal: &mut Hal) {
        self.state.open_cmd = read_digital(&self.io, hal, "open_input");
        self.state.close_cmd = read_digital(&self.io, hal, "close_input");
        if self.params.has_hold_solenoid {
            self.state.hold_cmd = read_digital(&self.io, hal, "hold_input");
        } else {
            self.state.hold_cmd = false;
        }
    }

    fn update(&mut self, dt: f64, _links: &dyn LinkResolver) {
        let position = self.state.position_percent;

        if self.params.has_hold_solenoid && self.state.hold_cmd {
            self.state.status = Status::Hold;
        } else if self.state.open_cmd && !self.state.close_cmd {
            if position < 100.0 {
                let delta = (100.0 / self.params.open_speed_sec) * dt;
                self.state.position_percent = (position + delta).min(100.0);
                self.state.status = Status::Opening;
            } else {
                self.state.status = Status::Open;
            }
        } else if self.state.close_cmd && !self.state.open_cmd {
            if position > 0.0 {
                let delta = (100.0 / self.params.close_speed_sec) * dt;
                self.state.position_percent = (position - delta).max(0.0);
                self.state.status = Status::Closing;
            } else {
                self.state.status = Status::Closed;
            }
        } else if self.params.has_return_spring && !self.state.open_cmd {
            if position > 0.0 {
                let delta = (100.0 / self.params.close_speed_sec) * dt;
                self.state.position_percent = (position - delta).max(0.0);
                self.state.status = Status::Closing;
            } else {
                self.state.status = Status::Closed;
            }
        } else if position >= 99.0 {
            self.state.status = Status::Open;
        } else if position <= 1.0 {
            self.state.status = Status::Closed;
        } else {
            self.state.status = Status::Hold;
        }
    }

    /// No hardware outputs: the valve is an actuator only.
    fn write_outputs(&mut self, _hal: &mut Hal) {}

    fn state_f64(&self, key: &str) -> Option<f64> {
        match key {
            "position_percent" => Some(self.state.position_percent),
            _ => None,
        }
    }

    fn state_bool(&self, _key: &str) -> Option<bool> {
        None
    }

    fn display(&self) -> DisplayData {
        let mut state = HashMap::new();
        state.insert(
            "position_percent".to_owned(),
            DisplayValue::Number(round2(self.state.position_percent)),
        );
        state.insert("open_cmd".to_owned(), DisplayValue::Bool(self.state.open_cmd));
        state.insert("close_cmd".to_owned(), DisplayValue::Bool(self.state.close_cmd));
        state.insert("hold_cmd".to_owned(), DisplayValue::Bool(self.state.hold_cmd));

        let mut config = HashMap::new();
        config.insert("open_speed_sec".to_owned(), ParamValue::Number(self.params.open_speed_sec));
        config.insert(
            "close_speed_sec".to_owned(),
            ParamValue::Number(self.params.close_speed_sec),
        );
        config.insert(
            "has_hold_solenoid".to_owned(),
            ParamValue::Bool(self.params.has_hold_solenoid),
        );
        config.insert(
            "has_return_spring".to_owned(),
            ParamValue::Bool(self.params.has_return_spring),
        );
        config.insert(
            "valve_type".to_owned(),
            ParamValue::Text(self.params.valve_type.clone()),
        );
        config.insert("status".to_owned(), ParamValue::Text(self.state.status.as_str().to_owned()));

        DisplayData { config, state }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String> {
        match name {
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
            "has_hold_solenoid" => {
                self.params.has_hold_solenoid = value
                    .as_bool()
                    .ok_or_else(|| format!("parameter `{name}` expects a boolean"))?;
            }
            "has_return_spring" => {
                self.params.has_return_spring = value
                    .as_bool()
                    .ok_or_else(|| format!("parameter `{name}` expects a boolean"))?;
            }
            "valve_type" => {
                self.params.valve_type = value
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
    use super::{Status, Valve};
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

    fn valve(open_speed: f64, close_speed: f64) -> Valve {
        let params = HashMap::from([
            ("open_speed_sec".to_owned(), ParamValue::Number(open_speed)),
            ("close_speed_sec".to_owned(), ParamValue::Number(close_speed)),
        ]);
        Valve::new(&params, HashMap::new(), HashMap::new())
    }

    /// Opening ramp reaches 50% at the half-way point and saturates at 100%.
    #[test]
    fn open_ramp_reaches_target_without_overshoot() {
        let mut valve = valve(5.0, 5.0);
        valve.state.open_cmd = true;
        let links = NoLinks;
        for _ in 0..25 {
            valve.update(0.1, &links);
        }
        assert!((valve.state.position_percent - 50.0).abs() < 1.0);

        for _ in 0..35 {
            valve.update(0.1, &links);
        }
        assert_eq!(valve.state.position_percent, 100.0);
        assert_eq!(valve.state.status, Status::Open);
    }

    #[test]
    fn overlong_tick_does_not_overshoot() {
        let mut valve = valve(5.0, 5.0);
        valve.state.open_cmd = true;
        valve.update(1000.0, &NoLinks);
        assert_eq!(valve.state.position_percent, 100.0);

        valve.state.open_cmd = false;
        valve.state.close_cmd = true;
        valve.update(1000.0, &NoLinks);
        assert_eq!(valve.state.position_percent, 0.0);
    }

    #[test]
    fn hold_command_ignored_without_solenoid() {
        let mut valve = valve(5.0, 5.0);
        valve.state.hold_cmd = true;
        valve.state.position_percent = 50.0;
        valve.update(1.0, &NoLinks);
        // no open/close/spring -> maintains position, reported as hold (between 1 and 99).
        assert_eq!(valve.state.status, Status::Hold);
    }

    #[test]
    fn return_spring_closes_without_open_command() {
        let params = HashMap::from([
            ("close_speed_sec".to_owned(), ParamValue::Number(5.0)),
            ("has_return_spring".to_owned(), ParamValue::Bool(true)),
        ]);
        let mut valve = Valve::new(&params, HashMap::new(), HashMap::new());
        valve.state.position_percent = 100.0;
        valve.update(5.0, &NoLinks);
        assert_eq!(valve.state.position_percent, 0.0);
        assert_eq!(valve.state.status, Status::Closed);
    }
}
