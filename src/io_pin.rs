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

//! The I/O pin descriptor: a value type that binds a logical pin name on an
//! instrument to its physical location, either a GPIO line number or an I2C
//! device address with an optional channel.

use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
/// The kind of a single I/O pin.
pub enum PinKind {
    /// A GPIO input, read once per tick.
    DigitalIn,
    /// A GPIO output, written once per tick.
    DigitalOut,
    /// An I2C ADC channel, read once per tick.
    AnalogIn,
    /// An I2C DAC channel, written once per tick.
    AnalogOut,
}

#[derive(Clone, Debug, Deserialize)]
/// The raw, as-configured shape of an I/O pin, deserialized directly from the
/// configuration document before it is validated into an [`IoPin`].
pub struct RawIoPin {
    /// The kind of this pin.
    #[serde(rename = "type")]
    pub kind: PinKind,
    /// The GPIO line number, meaningful only for digital pins.
    pub pin: Option<u32>,
    /// The I2C device address, meaningful only for analog pins.
    pub i2c_address: Option<u16>,
    /// The ADC/DAC channel index, meaningful only for analog pins.
    pub channel: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A validated I/O pin descriptor.
///
/// Exactly one location field is meaningful per kind: digital kinds carry a
/// GPIO line number, analog kinds carry an I2C address and a channel index.
pub enum IoPin {
    /// A GPIO input line.
    DigitalIn {
        /// The GPIO line number.
        pin: u32,
    },
    /// A GPIO output line.
    DigitalOut {
        /// The GPIO line number.
        pin: u32,
    },
    /// An I2C-addressed ADC channel.
    AnalogIn {
        /// The I2C address of the ADC device.
        address: u16,
        /// The channel index on the device.
        channel: u8,
    },
    /// An I2C-addressed DAC channel.
    AnalogOut {
        /// The I2C address of the DAC device.
        address: u16,
        /// The channel index on the device.
        channel: u8,
    },
}

impl IoPin {
    /// The kind of this pin.
    #[must_use]
    pub fn kind(&self) -> PinKind {
        match self {
            IoPin::DigitalIn { .. } => PinKind::DigitalIn,
            IoPin::DigitalOut { .. } => PinKind::DigitalOut,
            IoPin::AnalogIn { .. } => PinKind::AnalogIn,
            IoPin::AnalogOut { .. } => PinKind::AnalogOut,
        }
    }

    /// Validate a [`RawIoPin`] into an [`IoPin`], checking that exactly the
    /// fields meaningful to its kind were supplied.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message if a required field is missing.
    pub fn from_raw(raw: &RawIoPin) -> Result<IoPin, String> {
        match raw.kind {
            PinKind::DigitalIn => match raw.pin {
                Some(pin) => Ok(IoPin::DigitalIn { pin }),
                None => Err("digital_in pin requires `pin`".to_owned()),
            },
            PinKind::DigitalOut => match raw.pin {
                Some(pin) => Ok(IoPin::DigitalOut { pin }),
                None => Err("digital_out pin requires `pin`".to_owned()),
            },
            PinKind::AnalogIn => match (raw.i2c_address, raw.channel) {
                (Some(address), Some(channel)) => Ok(IoPin::AnalogIn { address, channel }),
                _ => Err("analog_in pin requires `i2c_address` and `channel`".to_owned()),
            },
            PinKind::AnalogOut => match (raw.i2c_address, raw.channel) {
                (Some(address), Some(channel)) => Ok(IoPin::AnalogOut { address, channel }),
                _ => Err("analog_out pin requires `i2c_address` and `channel`".to_owned()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IoPin, PinKind, RawIoPin};

    #[test]
    fn digital_in_requires_pin() {
        let raw = RawIoPin {
            kind: PinKind::DigitalIn,
            pin: None,
            i2c_address: None,
            channel: None,
        };
        assert!(IoPin::from_raw(&raw).is_err());
    }

    #[test]
    fn analog_out_from_raw() {
        let raw = RawIoPin {
            kind: PinKind::AnalogOut,
            pin: None,
            i2c_address: Some(0x60),
            channel: Some(0),
        };
        assert_eq!(
            IoPin::from_raw(&raw).unwrap(),
            IoPin::AnalogOut {
                address: 0x60,
                channel: 0
            }
        );
    }
}
