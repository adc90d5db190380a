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

//! Real I2C-addressed analog devices: a 12-bit current-loop DAC and a 16-bit ADC, in the style
//! of the MCP4725 and ADS1115 devices these instruments are commonly wired to.

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use super::{AdcDevice, DacDevice, VREF};

/// The full-scale range of the ADC, in volts. Readings outside `[0, ADC_FSR]` saturate.
const ADC_FSR: f64 = 4.096;

/// A real DAC bound to an MCP4725-style device over I2C.
///
/// The DAC accepts a 12-bit code in its "fast mode" write, two bytes with the high nibble of
/// the first byte holding the top bits of the code.
pub struct I2cDac {
    device: LinuxI2CDevice,
    last_ma: f64,
}

impl I2cDac {
    /// Open the DAC at `address` on the bus at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be opened or the device does not ACK at `address`.
    pub fn new(path: &str, address: u16) -> Result<I2cDac, String> {
        let device =
            LinuxI2CDevice::new(path, address).map_err(|e| format!("open {path}: {e}"))?;
        Ok(I2cDac {
            device,
            last_ma: 4.0,
        })
    }
}

impl DacDevice for I2cDac {
    fn set_current_ma(&mut self, ma: f64) -> Result<(), String> {
        let voltage = ((ma - 4.0) / 16.0) * VREF;
        let code = ((voltage / VREF) * 4095.0).round().clamp(0.0, 4095.0) as u16;
        let bytes = [(code >> 8) as u8 & 0x0F, (code & 0xFF) as u8];
        self.device
            .write(&bytes)
            .map_err(|e| format!("DAC write failed: {e}"))?;
        self.last_ma = ma;
        Ok(())
    }

    fn last_current_ma(&self) -> f64 {
        self.last_ma
    }
}

/// A real ADC bound to an ADS1115-style device over I2C.
///
/// Each read selects the requested single-ended input channel via the config register, waits
/// for a conversion, then reads the 16-bit signed conversion register.
pub struct I2cAdc {
    device: LinuxI2CDevice,
}

impl I2cAdc {
    /// The ADC's config register address.
    const REG_CONFIG: u8 = 0x01;
    /// The ADC's conversion result register address.
    const REG_CONVERSION: u8 = 0x00;

    /// Open the ADC at `address` on the bus at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be opened or the device does not ACK at `address`.
    pub fn new(path: &str, address: u16) -> Result<I2cAdc, String> {
        let device =
            LinuxI2CDevice::new(path, address).map_err(|e| format!("open {path}: {e}"))?;
        Ok(I2cAdc { device })
    }
}

impl AdcDevice for I2cAdc {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, String> {
        // single-ended mux selection for channel 0..=3, start a single conversion,
        // +/-4.096V gain, 128SPS, comparator disabled.
        let mux = 0x4000 | (u16::from(channel) << 12);
        let config: u16 = 0x8000 | mux | 0x0200 | 0x0080 | 0x0003;
        self.device
            .smbus_write_word_data(Self::REG_CONFIG, config.swap_bytes())
            .map_err(|e| format!("ADC config write failed: {e}"))?;
        let raw = self
            .device
            .smbus_read_word_data(Self::REG_CONVERSION)
            .map_err(|e| format!("ADC conversion read failed: {e}"))?
            .swap_bytes() as i16;
        Ok(f64::from(raw) / f64::from(i16::MAX) * ADC_FSR)
    }
}
