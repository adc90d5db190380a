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

//! Definitions for hardware devices.
//!
//! The goal of this module is to abstract away some of the details of exactly how our hardware
//! works so that we can focus on the business logic elsewhere.
//!
//! Two capabilities are exposed: digital GPIO and analog I2C (DAC/ADC). Both fall back
//! transparently to a mock implementation when the real driver cannot be bound, so the rest of
//! the crate depends only on the [`Hal`] capability set and never on whether it is talking to
//! silicon or to memory.

pub mod i2c;
pub mod mock;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::console::UserLog;
use mock::{MockAdc, MockDac, MockGpioPin};

/// The reference voltage used to convert between loop current and voltage, in volts.
pub const VREF: f64 = 3.3;

/// A trait for GPIO pins.
pub trait GpioPin {
    /// Perform a GPIO read on this pin.
    /// Returns `true` if the pin is pulled high, and `false` otherwise.
    ///
    /// # Errors
    ///
    /// This can return an error if the read failed.
    fn read(&mut self) -> Result<bool, gpio_cdev::Error>;

    /// Perform a GPIO write on this pin, setting the pin's logic level to `value`.
    ///
    /// # Errors
    ///
    /// This can return an error if the write failed.
    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error>;
}

/// A trait for a single-channel 4-20mA current-loop DAC.
pub trait DacDevice {
    /// Set the output current of this DAC, in milliamps.
    /// Callers are expected to have already clamped `ma` to `[4.0, 20.0]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying bus transaction fails.
    fn set_current_ma(&mut self, ma: f64) -> Result<(), String>;

    /// The last current value this DAC was set to.
    fn last_current_ma(&self) -> f64;
}

/// A trait for a multi-channel ADC addressed over I2C.
pub trait AdcDevice {
    /// Read the voltage present on `channel`, in volts.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying bus transaction fails.
    fn read_voltage(&mut self, channel: u8) -> Result<f64, String>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The pull resistor configuration for a digital input.
pub enum PullMode {
    /// No pull resistor.
    None,
    /// Pull-up resistor.
    Up,
    /// Pull-down resistor.
    Down,
}

#[derive(Debug)]
/// The set of errors the HAL can report.
pub enum HalError {
    /// A configuration error: an out-of-range pin or address, or use of an unconfigured pin.
    /// Fatal at initialization time.
    Configuration(String),
    /// A driver-level error encountered while talking to a (real) device. Non-fatal: callers
    /// should log this and retain the last-known value for the current tick.
    Driver(String),
}

impl Display for HalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HalError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            HalError::Driver(msg) => write!(f, "driver error: {msg}"),
        }
    }
}

impl std::error::Error for HalError {}

/// The hardware abstraction layer.
///
/// Owns every GPIO line and I2C device the configuration references. Each capability is bound
/// to a real driver at registration time if possible; on any binding failure a mock with
/// identical semantics is installed instead, and the failure is logged rather than surfaced.
pub struct Hal {
    /// An open handle to the GPIO chip, if one could be bound. `None` forces every pin to mock.
    chip: Option<Chip>,
    /// The filesystem path of the I2C bus to bind analog devices against.
    i2c_bus_path: Option<String>,
    /// Configured digital pins, keyed by line number.
    gpio_pins: HashMap<u32, Box<dyn GpioPin + Send>>,
    /// Whether each configured digital pin is backed by a mock.
    gpio_is_mock: HashMap<u32, bool>,
    /// Configured DAC devices, keyed by I2C address.
    dacs: HashMap<u16, Box<dyn DacDevice + Send>>,
    /// Whether each configured DAC is backed by a mock.
    dac_is_mock: HashMap<u16, bool>,
    /// Configured ADC devices, keyed by I2C address.
    adcs: HashMap<u16, Box<dyn AdcDevice + Send>>,
    /// Whether each configured ADC is backed by a mock.
    adc_is_mock: HashMap<u16, bool>,
    /// The log to report binding outcomes and driver faults to.
    log: Arc<UserLog>,
}

impl Hal {
    /// Construct a new `Hal`, probing for a real GPIO chip at `gpio_chip_path` and recording
    /// `i2c_bus_path` for later per-device I2C probes.
    ///
    /// Binding failures at this stage (the chip device node does not exist, or this process
    /// lacks permission to open it) are logged and result in every subsequent GPIO pin being
    /// backed by a mock; this is not an error condition.
    #[must_use]
    pub fn new(gpio_chip_path: &str, i2c_bus_path: &str, log: Arc<UserLog>) -> Hal {
        let chip = match Chip::new(gpio_chip_path) {
            Ok(c) => Some(c),
            Err(e) => {
                let _ = log.info(&format!(
                    "could not open GPIO chip at {gpio_chip_path} ({e}); using mock GPIO"
                ));
                None
            }
        };
        Hal {
            chip,
            i2c_bus_path: Some(i2c_bus_path.to_owned()),
            gpio_pins: HashMap::new(),
            gpio_is_mock: HashMap::new(),
            dacs: HashMap::new(),
            dac_is_mock: HashMap::new(),
            adcs: HashMap::new(),
            adc_is_mock: HashMap::new(),
            log,
        }
    }

    /// Construct a `Hal` which unconditionally uses mock GPIO and I2C devices, without
    /// attempting to probe real hardware at all.
    #[must_use]
    pub fn new_mock(log: Arc<UserLog>) -> Hal {
        Hal {
            chip: None,
            i2c_bus_path: None,
            gpio_pins: HashMap::new(),
            gpio_is_mock: HashMap::new(),
            dacs: HashMap::new(),
            dac_is_mock: HashMap::new(),
            adcs: HashMap::new(),
            adc_is_mock: HashMap::new(),
            log,
        }
    }

    /// Configure `pin` as a digital output with the given initial value. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if the underlying line request fails for a reason
    /// other than the chip being absent (e.g. the pin is already claimed elsewhere).
    pub fn setup_output(&mut self, pin: u32, initial_value: bool) -> Result<(), HalError> {
        if self.gpio_pins.contains_key(&pin) {
            return Ok(());
        }
        let (handle, is_mock) = self.bind_gpio(pin, true, initial_value, PullMode::None)?;
        self.gpio_pins.insert(pin, handle);
        self.gpio_is_mock.insert(pin, is_mock);
        Ok(())
    }

    /// Configure `pin` as a digital input with the given pull resistor mode. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if the underlying line request fails.
    pub fn setup_input(&mut self, pin: u32, pull: PullMode) -> Result<(), HalError> {
        if self.gpio_pins.contains_key(&pin) {
            return Ok(());
        }
        let (handle, is_mock) = self.bind_gpio(pin, false, false, pull)?;
        self.gpio_pins.insert(pin, handle);
        self.gpio_is_mock.insert(pin, is_mock);
        Ok(())
    }

    fn bind_gpio(
        &self,
        pin: u32,
        output: bool,
        initial_value: bool,
        pull: PullMode,
    ) -> Result<(Box<dyn GpioPin + Send>, bool), HalError> {
        if let Some(chip) = &self.chip {
            let mut flags = if output {
                LineRequestFlags::OUTPUT
            } else {
                LineRequestFlags::INPUT
            };
            flags |= match pull {
                PullMode::None => LineRequestFlags::empty(),
                PullMode::Up => LineRequestFlags::BIAS_PULL_UP,
                PullMode::Down => LineRequestFlags::BIAS_PULL_DOWN,
            };
            let line = chip
                .get_line(pin)
                .map_err(|e| HalError::Configuration(format!("no such GPIO line {pin}: {e}")))?;
            let request = line
                .request(flags, u8::from(initial_value), "instrument-sim")
                .map_err(|e| HalError::Configuration(format!("could not claim pin {pin}: {e}")));
            match request {
                Ok(handle) => return Ok((Box::new(handle), false)),
                Err(e) => {
                    let _ = self
                        .log
                        .info(&format!("falling back to mock for GPIO pin {pin}: {e}"));
                }
            }
        }
        Ok((Box::new(MockGpioPin::new(initial_value)), true))
    }

    /// Write a logic level to a previously configured output pin.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if `pin` was never configured as an output, or
    /// `HalError::Driver` if the underlying write failed.
    pub fn write(&mut self, pin: u32, value: bool) -> Result<(), HalError> {
        let handle = self
            .gpio_pins
            .get_mut(&pin)
            .ok_or_else(|| HalError::Configuration(format!("pin {pin} not configured")))?;
        handle
            .write(value)
            .map_err(|e| HalError::Driver(format!("GPIO write failed on pin {pin}: {e}")))
    }

    /// Read the logic level of a previously configured input pin.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if `pin` was never configured, or `HalError::Driver`
    /// if the underlying read failed.
    pub fn read(&mut self, pin: u32) -> Result<bool, HalError> {
        let handle = self
            .gpio_pins
            .get_mut(&pin)
            .ok_or_else(|| HalError::Configuration(format!("pin {pin} not configured")))?;
        handle
            .read()
            .map_err(|e| HalError::Driver(format!("GPIO read failed on pin {pin}: {e}")))
    }

    /// Whether the digital pin `pin` is backed by a mock. Returns `false` for an unconfigured
    /// pin.
    #[must_use]
    pub fn is_gpio_mock(&self, pin: u32) -> bool {
        self.gpio_is_mock.get(&pin).copied().unwrap_or(false)
    }

    /// Release all configured GPIO pins and I2C devices. Safe to call more than once.
    pub fn cleanup(&mut self) {
        self.gpio_pins.clear();
        self.gpio_is_mock.clear();
        self.dacs.clear();
        self.dac_is_mock.clear();
        self.adcs.clear();
        self.adc_is_mock.clear();
        self.chip = None;
    }

    /// Register the I2C device at `address` as a DAC, idempotent. Binding failures fall back
    /// to a mock and are logged, never returned as an error.
    pub fn register_dac(&mut self, address: u16) {
        if self.dacs.contains_key(&address) {
            return;
        }
        let (dac, is_mock) = self.bind_dac(address);
        self.dacs.insert(address, dac);
        self.dac_is_mock.insert(address, is_mock);
    }

    fn bind_dac(&self, address: u16) -> (Box<dyn DacDevice + Send>, bool) {
        if let Some(path) = &self.i2c_bus_path {
            match i2c::I2cDac::new(path, address) {
                Ok(dac) => return (Box::new(dac), false),
                Err(e) => {
                    let _ = self.log.info(&format!(
                        "falling back to mock for DAC at address {address:#04x}: {e}"
                    ));
                }
            }
        }
        (Box::new(MockDac::new()), true)
    }

    /// Register the I2C device at `address` as an ADC, idempotent.
    pub fn register_adc(&mut self, address: u16) {
        if self.adcs.contains_key(&address) {
            return;
        }
        let (adc, is_mock) = self.bind_adc(address);
        self.adcs.insert(address, adc);
        self.adc_is_mock.insert(address, is_mock);
    }

    fn bind_adc(&self, address: u16) -> (Box<dyn AdcDevice + Send>, bool) {
        if let Some(path) = &self.i2c_bus_path {
            match i2c::I2cAdc::new(path, address) {
                Ok(adc) => return (Box::new(adc), false),
                Err(e) => {
                    let _ = self.log.info(&format!(
                        "falling back to mock for ADC at address {address:#04x}: {e}"
                    ));
                }
            }
        }
        (Box::new(MockAdc::new()), true)
    }

    /// Whether the I2C device at `address` is backed by a mock DAC or ADC. Returns `false` if
    /// the address was never registered.
    #[must_use]
    pub fn is_i2c_mock(&self, address: u16) -> bool {
        self.dac_is_mock
            .get(&address)
            .or_else(|| self.adc_is_mock.get(&address))
            .copied()
            .unwrap_or(false)
    }

    /// Set the output current of the DAC at `address`, in milliamps. Values outside
    /// `[4.0, 20.0]` are clamped before being applied.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if no DAC was registered at `address`, or
    /// `HalError::Driver` if the underlying transaction failed.
    pub fn dac_set_current_ma(&mut self, address: u16, ma: f64) -> Result<(), HalError> {
        let clamped = ma.clamp(4.0, 20.0);
        let dac = self
            .dacs
            .get_mut(&address)
            .ok_or_else(|| HalError::Configuration(format!("no DAC at address {address:#04x}")))?;
        dac.set_current_ma(clamped)
            .map_err(|e| HalError::Driver(format!("DAC write failed at {address:#04x}: {e}")))
    }

    /// Read the voltage present on `channel` of the ADC at `address`, in volts.
    ///
    /// # Errors
    ///
    /// Returns `HalError::Configuration` if no ADC was registered at `address`, or
    /// `HalError::Driver` if the underlying transaction failed.
    pub fn adc_read_voltage(&mut self, address: u16, channel: u8) -> Result<f64, HalError> {
        let adc = self
            .adcs
            .get_mut(&address)
            .ok_or_else(|| HalError::Configuration(format!("no ADC at address {address:#04x}")))?;
        adc.read_voltage(channel)
            .map_err(|e| HalError::Driver(format!("ADC read failed at {address:#04x}: {e}")))
    }

    /// Read the current loop reading present on `channel` of the ADC at `address`, in
    /// milliamps, computed as `4 + (V / VREF) * 16`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Hal::adc_read_voltage`].
    pub fn adc_read_current_ma(&mut self, address: u16, channel: u8) -> Result<f64, HalError> {
        let voltage = self.adc_read_voltage(address, channel)?;
        Ok(4.0 + (voltage / VREF) * 16.0)
    }
}

impl GpioPin for LineHandle {
    fn read(&mut self) -> Result<bool, gpio_cdev::Error> {
        Ok(1 == self.get_value()?)
    }

    fn write(&mut self, value: bool) -> Result<(), gpio_cdev::Error> {
        let int_value = u8::from(value);
        self.set_value(int_value)?;

        Ok(())
    }
}

/// Convert a percentage in `[0, 100]` to a 4-20mA loop current.
#[must_use]
pub fn percent_to_ma(percent: f64) -> f64 {
    4.0 + (percent.clamp(0.0, 100.0) / 100.0) * 16.0
}

#[cfg(test)]
mod tests {
    use super::{percent_to_ma, Hal};
    use crate::console::UserLog;
    use std::sync::Arc;

    #[test]
    fn mock_hal_round_trips_gpio() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let mut hal = Hal::new_mock(log);
        hal.setup_output(4, false).unwrap();
        hal.write(4, true).unwrap();
        assert!(hal.read(4).unwrap());
        assert!(hal.is_gpio_mock(4));
    }

    #[test]
    fn mock_hal_round_trips_dac_adc() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let mut hal = Hal::new_mock(log);
        hal.register_dac(0x60);
        hal.dac_set_current_ma(0x60, 12.0).unwrap();
        hal.register_adc(0x48);
        // mock ADC defaults to 0V, i.e. a 4mA reading.
        let reading = hal.adc_read_current_ma(0x48, 0).unwrap();
        assert!((reading - 4.0).abs() < 1e-9);
    }

    #[test]
    fn dac_current_is_clamped() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let mut hal = Hal::new_mock(log);
        hal.register_dac(0x60);
        hal.dac_set_current_ma(0x60, 99.0).unwrap();
        assert_eq!(percent_to_ma(100.0), 20.0);
    }

    #[test]
    fn unconfigured_pin_is_configuration_error() {
        let log = Arc::new(UserLog::new(Vec::new()));
        let mut hal = Hal::new_mock(log);
        assert!(hal.write(7, true).is_err());
    }
}
