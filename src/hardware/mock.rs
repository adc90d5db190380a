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

//! Mock hardware: in-memory implementations of the HAL capability traits with the same
//! observable semantics as the real drivers, used both as the fallback when real hardware
//! cannot be bound and as test doubles.

use super::{AdcDevice, DacDevice, GpioPin};

/// A mock GPIO pin, holding only its last-written value.
pub struct MockGpioPin {
    value: bool,
}

impl MockGpioPin {
    /// Construct a new `MockGpioPin` with the given initial value.
    #[must_use]
    pub fn new(initial_value: bool) -> MockGpioPin {
        MockGpioPin {
            value: initial_value,
        }
    }
}

impl GpioPin for MockGpioPin {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        Ok(self.value)
    }

    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        self.value = value;
        Ok(())
    }
}

/// A mock DAC, storing the last current value it was set to.
pub struct MockDac {
    last_ma: f64,
}

impl MockDac {
    /// Construct a new `MockDac`, initialized to the minimum loop current.
    #[must_use]
    pub fn new() -> MockDac {
        MockDac { last_ma: 4.0 }
    }
}

impl Default for MockDac {
    fn default() -> Self {
        MockDac::new()
    }
}

impl DacDevice for MockDac {
    fn set_current_ma(&mut self, ma: f64) -> Result<(), String> {
        self.last_ma = ma;
        Ok(())
    }

    fn last_current_ma(&self) -> f64 {
        self.last_ma
    }
}

/// A mock ADC, returning a configurable per-channel voltage (default 0V on every channel).
pub struct MockAdc {
    voltages: std::collections::HashMap<u8, f64>,
}

impl MockAdc {
    /// Construct a new `MockAdc` with every channel defaulted to 0V.
    #[must_use]
    pub fn new() -> MockAdc {
        MockAdc {
            voltages: std::collections::HashMap::new(),
        }
    }

    /// Set the voltage that `channel` will report on the next read. Intended for tests.
    pub fn set_voltage(&mut self, channel: u8, volts: f64) {
        self.voltages.insert(channel, volts);
    }
}

impl Default for MockAdc {
    fn default() -> Self {
        MockAdc::new()
    }
}

impl AdcDevice for MockAdc {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, String> {
        Ok(self.voltages.get(&channel).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::{AdcDevice, DacDevice, MockAdc, MockDac};

    #[test]
    fn mock_dac_stores_last_value() {
        let mut dac = MockDac::new();
        dac.set_current_ma(12.5).unwrap();
        assert_eq!(dac.last_current_ma(), 12.5);
    }

    #[test]
    fn mock_adc_defaults_to_zero() {
        let mut adc = MockAdc::new();
        assert_eq!(adc.read_voltage(3).unwrap(), 0.0);
        adc.set_voltage(3, 2.5);
        assert_eq!(adc.read_voltage(3).unwrap(), 2.5);
    }
}
