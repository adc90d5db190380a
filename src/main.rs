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

use instrument_sim::hardware::Hal;
use instrument_sim::{run_with_hal, ControllerError};

const GPIO_CHIP_PATH: &str = "/dev/gpiochip0";
const I2C_BUS_PATH: &str = "/dev/i2c-1";

/// The main function for `instrument-sim`, probing real GPIO/I2C hardware.
///
/// # Arguments
///
/// The first argument to this executable (via `std::env::args`) is the path to a configuration
/// YAML file, formatted according to the `instruments: [...]` schema documented on
/// [`instrument_sim::config::Configuration`].
///
/// The second argument is a path to a directory where log files should be created. If the
/// directory does not exist, it will be created.
fn main() -> Result<(), ControllerError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = args
        .first()
        .ok_or(ControllerError::Args("missing configuration file path"))?;
    let log_dir = args
        .get(1)
        .ok_or(ControllerError::Args("missing log directory path"))?;

    run_with_hal(
        |log| Hal::new(GPIO_CHIP_PATH, I2C_BUS_PATH, log),
        config_path,
        log_dir,
    )
}
