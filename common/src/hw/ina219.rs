//! Support for the INA219 sensor.

use std::thread;
use std::time::Duration;

use rppal::i2c::I2c;

use crate::channel;
use crate::channel::{ChannelError, DeviceChannel};
use crate::config::DeviceConfig;

/// INA219 register addresses.
#[allow(unused)]
mod register {
    pub const CONFIGURATION: u8 = 0x00;
    pub const SHUNT_VOLTAGE: u8 = 0x01;
    pub const BUS_VOLTAGE: u8   = 0x02;
    pub const POWER: u8         = 0x03;
    pub const CURRENT: u8       = 0x04;
    pub const CALIBRATION: u8   = 0x05;
}

/// Conversion factor when reading bus voltage (4mV per value).
const BUS_VOLTAGE_LSB: f64 = 0.004;

/// Fixed value from the datasheet's calibration equation.
const CALIBRATION_FACTOR: f64 = 0.04096;

/// Full scale of the signed current register.
const CURRENT_REGISTER_MAX: f64 = 32767.0;

/// Largest usable calibration value; bit 0 is always clear.
const CALIBRATION_REGISTER_MAX: f64 = 0xFFFE as f64;

/// Power register LSB relative to the current register LSB.
const POWER_LSB_FACTOR: f64 = 20.0;

/// Setting this in the configuration register resets the device.
const RESET: u16 = 1 << 15;

/// 12-bit conversion for both ADCs.
const ADC_12BIT: u16 = 0b0011;

/// Shunt and bus, continuous.
const MODE_CONTINUOUS: u16 = 0b111;

/// 532us per conversion at 12 bits; shunt and bus convert back to back.
const CONVERSION_TIME: Duration = Duration::from_micros(2 * 532);

/// Slack when comparing the expected shunt voltage against a gain's range.
const RANGE_TOLERANCE: f64 = 1e-9;

/// Programmable shunt voltage gain.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Gain {
    /// /1, +/- 40mV
    Div1,
    /// /2, +/- 80mV
    Div2,
    /// /4, +/- 160mV
    Div4,
    /// /8, +/- 320mV
    Div8,
}

impl Gain {
    const ALL: [Gain; 4] = [Gain::Div1, Gain::Div2, Gain::Div4, Gain::Div8];

    /// Largest shunt voltage this gain can measure.
    pub fn max_shunt_volts(&self) -> f64 {
        match self {
            Gain::Div1 => 0.04,
            Gain::Div2 => 0.08,
            Gain::Div4 => 0.16,
            Gain::Div8 => 0.32,
        }
    }

    /// Smallest gain able to measure the given shunt voltage.
    pub fn covering(shunt_volts: f64) -> Option<Gain> {
        Self::ALL.iter()
            .copied()
            .find(|gain| shunt_volts <= gain.max_shunt_volts() + RANGE_TOLERANCE)
    }

    /// Gain to start measuring with; the coarsest one when nothing covers the
    /// expected shunt voltage, leaving the overflow to be reported per read.
    pub fn starting(shunt_volts: f64) -> Gain {
        Self::covering(shunt_volts).unwrap_or(Gain::Div8)
    }

    /// Next coarser gain.
    pub fn next(&self) -> Option<Gain> {
        match self {
            Gain::Div1 => Some(Gain::Div2),
            Gain::Div2 => Some(Gain::Div4),
            Gain::Div4 => Some(Gain::Div8),
            Gain::Div8 => None,
        }
    }

    fn pga_bits(&self) -> u16 {
        match self {
            Gain::Div1 => 0b00,
            Gain::Div2 => 0b01,
            Gain::Div4 => 0b10,
            Gain::Div8 => 0b11,
        }
    }
}

/// Configuration register contents for a 16V bus range at the given gain.
pub fn configuration_word(gain: Gain) -> u16 {
    /* Configuration register layout (see INA219 datasheet):

    - 13: bus voltage range (0 for 16V)
    - 12-11: PGA gain
    - 10-7: bus ADC resolution/averaging
    - 6-3: shunt ADC resolution/averaging
    - 2-0: operating mode
     */
    (gain.pga_bits() << 11)
        | (ADC_12BIT << 7)
        | (ADC_12BIT << 3)
        | MODE_CONTINUOUS
}

/// Decode the bus voltage register into volts and the math overflow flag.
pub fn decode_bus_voltage(raw: u16) -> (f64, bool) {
    let volts = ((raw >> 3) as f64) * BUS_VOLTAGE_LSB;
    let overflow = raw & 0b1 != 0;

    (volts, overflow)
}

/// Register scaling derived from the shunt and the expected current.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    /// Amps per bit of the current register.
    pub current_lsb: f64,
    /// Watts per bit of the power register.
    pub power_lsb: f64,
    /// Value for the calibration register.
    pub register: u16,
}

impl Calibration {
    /// Compute the calibration for a device configuration.
    ///
    /// The current LSB is raised when the expected current is so small that
    /// the calibration value would not fit the register.
    pub fn for_config(config: &DeviceConfig) -> channel::Result<Calibration> {
        let shunt = config.shunt_resistance_ohms;
        let min_lsb = CALIBRATION_FACTOR / (CALIBRATION_REGISTER_MAX * shunt);
        let current_lsb = (config.max_expected_current_amps / CURRENT_REGISTER_MAX).max(min_lsb);
        let register = (CALIBRATION_FACTOR / (current_lsb * shunt)).trunc();
        if !(register.is_finite() && register >= 2.0) {
            return Err(ChannelError::Connection(
                format!("no calibration for a {} ohm shunt and {}A", shunt, config.max_expected_current_amps)));
        }

        Ok(Calibration {
            current_lsb,
            power_lsb: current_lsb * POWER_LSB_FACTOR,
            // Bit 0 is not used.
            register: (register.min(CALIBRATION_REGISTER_MAX) as u16) & 0xFFFE,
        })
    }
}

/// Driver for the TI INA219 current sensor.
///
/// The I2C bus is opened by [`DeviceChannel::configure`], not at construction.
#[derive(Debug)]
pub struct Ina219 {
    config: DeviceConfig,
    i2c: Option<I2c>,
    calibration: Option<Calibration>,
    gain: Gain,
}

impl Ina219 {
    /// Create a new INA219 driver.
    pub fn new(config: DeviceConfig) -> Ina219 {
        Ina219 {
            config,
            i2c: None,
            calibration: None,
            gain: Gain::Div8,
        }
    }

    /// Reset the INA219.
    pub fn reset(&mut self) -> channel::Result<()> {
        self.write(register::CONFIGURATION, RESET)?;
        thread::sleep(Duration::from_micros(40)); // need >=40us after reset.

        Ok(())
    }

    fn calibration(&self) -> channel::Result<Calibration> {
        self.calibration
            .ok_or_else(|| ChannelError::Communication("device is not configured".to_string()))
    }

    fn set_gain(&mut self, gain: Gain) -> channel::Result<()> {
        self.write(register::CONFIGURATION, configuration_word(gain))?;
        self.gain = gain;
        thread::sleep(CONVERSION_TIME);

        Ok(())
    }

    /// Step the gain up while the last conversion overflowed.
    ///
    /// Fails with `RangeExceeded` once the coarsest gain still overflows.
    fn handle_overflow(&mut self) -> channel::Result<()> {
        loop {
            let (_volts, overflow) = decode_bus_voltage(self.read(register::BUS_VOLTAGE)?);
            if !overflow {
                return Ok(());
            }

            match self.gain.next() {
                Some(gain) => {
                    log::info!("ina219: overflow at +/-{:.0}mV, increasing gain",
                               self.gain.max_shunt_volts() * 1000.0);
                    self.set_gain(gain)?;
                },
                None => {
                    return Err(ChannelError::RangeExceeded(
                        format!("shunt voltage beyond +/-{:.0}mV",
                                self.gain.max_shunt_volts() * 1000.0)));
                },
            }
        }
    }

    fn read(&mut self, reg_addr: u8) -> channel::Result<u16> {
        let i2c = self.i2c.as_mut()
            .ok_or_else(|| ChannelError::Communication("I2C bus is not open".to_string()))?;

        let mut out = [0xff; 2];
        i2c.write_read(&[reg_addr], &mut out)
            .map_err(|e| ChannelError::Communication(
                format!("failed to read {:X} register: {}", reg_addr, e)))?;
        Ok(((out[0] as u16) << 8) | (out[1] as u16))
    }

    fn write(&mut self, reg_addr: u8, value: u16) -> channel::Result<()> {
        let i2c = self.i2c.as_mut()
            .ok_or_else(|| ChannelError::Communication("I2C bus is not open".to_string()))?;

        let buf = [
            reg_addr,
            (value >> 8) as u8,
            (value & 0xFF) as u8,
        ];
        i2c.write(&buf)
            .map(|_bytes_written| ())
            .map_err(|e| ChannelError::Communication(
                format!("failed to write {:X} register: {}", reg_addr, e)))
    }

    fn init(&mut self) -> channel::Result<()> {
        let expected_shunt_volts = self.config.max_expected_current_amps * self.config.shunt_resistance_ohms;
        let gain = Gain::starting(expected_shunt_volts);
        if Gain::covering(expected_shunt_volts).is_none() {
            log::warn!("ina219: expected shunt voltage {:.3}V exceeds +/-320mV, large currents will be out of range",
                       expected_shunt_volts);
        }
        let calibration = Calibration::for_config(&self.config)?;

        let mut i2c = I2c::with_bus(self.config.bus_id)
            .map_err(|e| ChannelError::Connection(
                format!("failed to open I2C bus {}: {}", self.config.bus_id, e)))?;
        i2c.set_slave_address(self.config.address as u16)
            .map_err(|e| ChannelError::Connection(
                format!("failed to set peripheral address: {}", e)))?;
        self.i2c = Some(i2c);

        self.reset()?;
        self.write(register::CALIBRATION, calibration.register)?;
        self.set_gain(gain)?;
        self.calibration = Some(calibration);

        log::debug!("ina219: calibration {}, current LSB {:e}A, gain +/-{:.0}mV",
                    calibration.register,
                    calibration.current_lsb,
                    gain.max_shunt_volts() * 1000.0);

        Ok(())
    }
}

impl DeviceChannel for Ina219 {
    fn configure(&mut self) -> channel::Result<()> {
        self.init().map_err(|e| match e {
            ChannelError::Connection(_) => e,
            other => ChannelError::Connection(other.to_string()),
        })
    }

    fn read_voltage(&mut self) -> channel::Result<f64> {
        let (volts, _overflow) = decode_bus_voltage(self.read(register::BUS_VOLTAGE)?);
        Ok(volts)
    }

    fn read_current_milliamps(&mut self) -> channel::Result<f64> {
        let calibration = self.calibration()?;
        self.handle_overflow()?;
        let raw = self.read(register::CURRENT)? as i16;
        Ok(raw as f64 * calibration.current_lsb * 1_000f64)
    }

    fn read_power_milliwatts(&mut self) -> channel::Result<f64> {
        let calibration = self.calibration()?;
        self.handle_overflow()?;
        let raw = self.read(register::POWER)?;
        Ok(raw as f64 * calibration.power_lsb * 1_000f64)
    }
}
