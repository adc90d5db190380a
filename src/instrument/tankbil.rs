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

//! The tank-truck (tankbil) safety interlock instrument: grounding, overfill and deadman
//! supervision for tank truck loading/unloading.

use std::collections::HashMap;

use crate::config::ParamValue;
use crate::hardware::Hal;
use crate::instrument::{read_digital, round2, write_digital, DisplayData, DisplayValue, InstrumentLogic, LinkResolver};
use crate::io_pin::IoPin;

struct Params {
    deadman_enabled: bool,
}

struct State {
    ground_ok: bool,
    overfill_ok: bool,
    deadman_pressed: bool,
    deadman_timer: f64,
    deadman_warning: bool,
    system_safe: bool,
    test_ground_cmd: bool,
    test_overfill_cmd: bool,
}

impl State {
    fn initial() -> State {
        State {
            ground_ok: false,
            overfill_ok: false,
            deadman_pressed: false,
            deadman_timer: 0.0,
            deadman_warning: false,
            system_safe: false,
            test_ground_cmd: false,
            test_overfill_cmd: false,
        }
    }
}

/// The tank-truck safety interlock instrument.
pub struct Tankbil {
    params: Params,
    state: State,
    io: HashMap<String, IoPin>,
}

impl Tankbil {
    #[must_use]
    pub fn new(
        params: &HashMap<String, ParamValue>,
        io: HashMap<String, IoPin>,
        _links: HashMap<String, String>,
    ) -> Tankbil {
        Tankbil {
            params: Params {
                deadman_enabled: params
                    .get("deadman_enabled")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(true),
            },
            state: State::initial(),
            io,
        }
    }
}

impl InstrumentLogic for Tankbil {
    fn read_inputs(&mut self, hal: &mut Hal) {
        self.state.ground_ok = read_digital(&self.io, hal, "ground_ok_input");
        self.state.overfill_ok = read_digital(&self.io, hal, "overfill_ok_input");
        if self.params.deadman_enabled {
            self.state.deadman_pressed = read_digital(&self.io, hal, "deadman_input");
        }
    }

    fn update(&mut self, dt: f64, _links: &dyn LinkResolver) {
        if self.params.deadman_enabled {
            if self.state.deadman_pressed {
                self.state.deadman_timer = 0.0;
            } else {
                self.state.deadman_timer += dt;
            }
            self.state.deadman_warning = self.state.deadman_timer > 2.0;
        } else {
            self.state.deadman_warning = false;
            self.state.deadman_timer = 0.0;
        }

        let deadman_safe = !self.params.deadman_enabled || self.state.deadman_timer < 5.0;
        self.state.system_safe = self.state.ground_ok && self.state.overfill_ok && deadman_safe;
    }

    fn write_outputs(&mut self, hal: &mut Hal) {
        write_digital(&self.io, hal, "test_ground_output", self.state.test_ground_cmd);
        write_digital(&self.io, hal, "test_overfill_output", self.state.test_overfill_cmd);
        write_digital(&self.io, hal, "deadman_warning_output", self.state.deadman_warning);
    }

    fn state_f64(&self, key: &str) -> Option<f64> {
        match key {
            "deadman_timer" => Some(self.state.deadman_timer),
            _ => None,
        }
    }

    fn state_bool(&self, key: &str) -> Option<bool> {
        match key {
            "ground_ok" => Some(self.state.ground_ok),
            "overfill_ok" => Some(self.state.overfill_ok),
            "deadman_pressed" => Some(self.state.deadman_pressed),
            "deadman_warning" => Some(self.state.deadman_warning),
            "system_safe" => Some(self.state.system_safe),
            _ => None,
        }
    }

    fn display(&self) -> DisplayData {
        let mut state = HashMap::new();
        state.insert("ground_ok".to_owned(), DisplayValue::Bool(self.state.ground_ok));
        state.insert("overfill_ok".to_owned(), DisplayValue::Bool(self.state.overfill_ok));
        state.insert(
            "deadman_pressed".to_owned(),
            DisplayValue::Bool(self.state.deadman_pressed),
        );
        state.insert(
            "deadman_warning".to_owned(),
            DisplayValue::Bool(self.state.deadman_warning),
        );
        state.insert("system_safe".to_owned(), DisplayValue::Bool(self.state.system_safe));
        state.insert(
            "deadman_timer".to_owned(),
            DisplayValue::Number(round2(self.state.deadman_timer)),
        );

        let mut config = HashMap::new();
        config.insert(
            "deadman_enabled".to_owned(),
            ParamValue::Bool(self.params.deadman_enabled),
        );

        DisplayData { config, state }
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), String> {
        match name {
            "deadman_enabled" => {
                self.params.deadman_enabled = value
                    .as_bool()
                    .ok_or_else(|| format!("parameter `{name}` expects a boolean"))?;
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
    use super::Tankbil;
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

    fn tankbil_ground_and_overfill_ok() -> Tankbil {
        let params = HashMap::from([("deadman_enabled".to_owned(), ParamValue::Bool(true))]);
        let mut t = Tankbil::new(&params, HashMap::new(), HashMap::new());
        t.state.ground_ok = true;
        t.state.overfill_ok = true;
        t
    }

    /// Deadman timeout sequence: warning at 2.5s, unsafe at 5.1s, recovers on press.
    #[test]
    fn deadman_timeout_sequence() {
        let mut t = tankbil_ground_and_overfill_ok();
        let links = NoLinks;

        // release deadman and tick up to 2.5 s.
        for _ in 0..25 {
            t.update(0.1, &links);
        }
        assert!(t.state.deadman_warning);

        // keep going to 5.1 s total.
        for _ in 0..26 {
            t.update(0.1, &links);
        }
        assert!(!t.state.system_safe);

        // press deadman: warning clears and system is safe again next tick.
        t.state.deadman_pressed = true;
        t.update(0.1, &links);
        assert!(!t.state.deadman_warning);
        assert!(t.state.system_safe);
    }

    #[test]
    fn disabled_deadman_never_warns() {
        let params = HashMap::from([("deadman_enabled".to_owned(), ParamValue::Bool(false))]);
        let mut t = Tankbil::new(&params, HashMap::new(), HashMap::new());
        t.state.ground_ok = true;
        t.state.overfill_ok = true;
        for _ in 0..100 {
            t.update(0.1, &NoLinks);
        }
        assert!(!t.state.deadman_warning);
        assert_eq!(t.state.deadman_timer, 0.0);
        assert!(t.state.system_safe);
    }

    #[test]
    fn unsafe_when_ground_not_ok() {
        let mut t = tankbil_ground_and_overfill_ok();
        t.state.ground_ok = false;
        t.update(0.1, &NoLinks);
        assert!(!t.state.system_safe);
    }
}
