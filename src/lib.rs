//! # VL53L1 Time-of-Flight Ranging Sensor Driver
//!
//! This crate provides a `no_std` control-plane driver for ST-Microelectronics' VL53L1
//! time-of-flight ranging sensor. It sequences the device through its lifecycle, configures
//! ranging (timing budget, region of interest, sequence steps, limit checks), runs the
//! cross-talk, offset and reference-SPAD calibrations, and reads ranging results.
//!
//! The driver is blocking by default. Enable the `async` feature to get the same API as
//! `async fn`s on top of `embedded-hal-async`.
//!
//! ## Lifecycle
//!
//! ```text
//! PowerDown --data_init--> WaitStaticInit --static_init--> Idle <--start/stop--> Running
//!     ^                                                                             |
//!     +------------------------------- reset_device --------------------------------+
//! ```
//!
//! Every operation checks the current [`PalState`] and fails with
//! [`Error::InvalidState`] when called out of order.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use vl53l1_pal::{PresetMode, VL53L1};
//!
//! let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
//! let delay = embedded_hal_mock::eh1::delay::NoopDelay;
//! let mut sensor = VL53L1::new(i2c, delay);
//!
//! sensor.wait_device_booted().unwrap();
//! if let Some(warning) = sensor.data_init().unwrap() {
//!     println!("DataInit: {:?}", warning);
//! }
//! sensor.static_init().unwrap();
//! sensor.set_preset_mode(PresetMode::LiteRanging).unwrap();
//! sensor.set_measurement_timing_budget_micro_seconds(33_000).unwrap();
//! sensor.start_measurement().unwrap();
//!
//! loop {
//!     sensor.wait_measurement_data_ready().unwrap();
//!     let data = sensor.get_ranging_measurement_data().unwrap();
//!     println!("Distance: {} mm ({:?})", data.range_mm, data.range_status);
//!     sensor.clear_interrupt_and_start_measurement().unwrap();
//! }
//! ```
//!
//! ## Bus access
//!
//! Every method that talks to the device performs one or more I2C round trips and may block.
//! The driver never retries a failed transaction: the bus error is returned as
//! [`Error::I2cError`]. A handle is not meant to be shared between callers; distinct handles
//! are fully independent.
#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod fmt; // <-- must be first module!

mod calibration;
mod config;
mod fixed_point;
mod limit_check;
mod measurement;
mod register;
mod roi;
mod sequence;
#[cfg(all(test, not(feature = "async")))]
mod sim;
mod state;

pub use calibration::{CalibrationData, RefSpadInfo, XTalkCalibrationOption};
pub use config::{MeasurementMode, PresetMode, Timeouts};
pub use fixed_point::FixPoint1616;
pub use limit_check::LimitCheck;
pub use measurement::{
    MultiRangingData, RangeStatus, RangingMeasurementData, TargetRangeData, MAX_RANGE_RESULTS,
    RANGE_STATUS_NONE,
};
pub use roi::Roi;
pub use sequence::SequenceStep;
pub use state::PalState;

#[cfg(not(feature = "async"))]
use embedded_hal::{delay::DelayNs, i2c::I2c};
#[cfg(feature = "async")]
use embedded_hal_async::{delay::DelayNs, i2c::I2c};

use config::Oscillator;
use limit_check::LimitChecks;
use register::Register;
use sequence::SequenceSteps;

/// Default 7-bit I2C address of the sensor.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x29;

// Largest payload accepted by a single block write (the default configuration).
const MAX_BLOCK_WRITE: usize = register::DEFAULT_CONFIGURATION.len();

/// Driver version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Patch level
    pub build: u8,
}

/// Version of this driver, taken from the crate manifest.
pub const DRIVER_VERSION: Version = Version {
    major: parse_version_part(env!("CARGO_PKG_VERSION_MAJOR")),
    minor: parse_version_part(env!("CARGO_PKG_VERSION_MINOR")),
    build: parse_version_part(env!("CARGO_PKG_VERSION_PATCH")),
};

const fn parse_version_part(part: &str) -> u8 {
    let bytes = part.as_bytes();
    let mut value: u8 = 0;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0');
        i += 1;
    }
    value
}

/// Silicon revision as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProductRevision {
    /// Major revision (always 1 for this product family)
    pub major: u8,
    /// Minor revision
    pub minor: u8,
}

/// Identification data read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Model id (0xEA for the VL53L1)
    pub model_id: u8,
    /// Module type (0xCC for the VL53L1)
    pub product_type: u8,
    /// Silicon revision
    pub revision: ProductRevision,
}

/// Non-fatal condition reported next to a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Warning {
    /// The device was not reset since its last static init: the offset data read back from
    /// it may be stale. Restore saved data with
    /// [`set_calibration_data`](VL53L1::set_calibration_data) or reset the device.
    Calibration,
}

/// VL53L1 time-of-flight ranging sensor driver.
///
/// One instance drives one physical sensor. It owns the bus, the delay used for every
/// bounded polling loop, and all host-side device state: lifecycle state, configuration,
/// limit checks and calibration data.
pub struct VL53L1<I2C, D> {
    /// I2C interface for communication with the sensor
    i2c: I2C,
    /// Current I2C slave address of the sensor
    address: u8,
    /// Time source for polling loops
    delay: D,
    timeouts: Timeouts,
    state: PalState,
    preset_mode: Option<PresetMode>,
    measurement_mode: MeasurementMode,
    timing_budget_us: u32,
    inter_measurement_period_ms: u32,
    /// Set when host-side timing changed without the registers being programmed.
    timing_pending: bool,
    roi: Roi,
    sequence_steps: SequenceSteps,
    limit_checks: LimitChecks,
    calibration: Option<CalibrationData>,
    xtalk_compensation_enabled: bool,
    ref_spad: Option<RefSpadInfo>,
    oscillator: Oscillator,
}

impl<I2C, D> VL53L1<I2C, D> {
    /// Creates a new driver instance.
    ///
    /// The sensor is assumed to be in [`PalState::PowerDown`], i.e. just released from hardware
    /// standby. Nothing is sent on the bus until the first lifecycle call.
    ///
    /// # Default Configuration
    ///
    /// - **I2C Address**: 0x29
    /// - **Timeouts**: [`Timeouts::default`]
    /// - **Preset mode**: [`PresetMode::LiteRanging`], 16 ms timing budget, 1000 ms period
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PalState, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    ///
    /// let sensor = VL53L1::new(i2c, delay);
    /// assert_eq!(sensor.get_pal_state(), PalState::PowerDown);
    /// ```
    pub fn new(i2c: I2C, delay: D) -> Self {
        let mut sensor = Self {
            i2c,
            address: DEFAULT_I2C_ADDRESS,
            delay,
            timeouts: Timeouts::default(),
            state: PalState::PowerDown,
            preset_mode: None,
            measurement_mode: MeasurementMode::Continuous,
            timing_budget_us: 0,
            inter_measurement_period_ms: 0,
            timing_pending: true,
            roi: Roi::FULL,
            sequence_steps: SequenceSteps::DEFAULT,
            limit_checks: LimitChecks::default(),
            calibration: None,
            xtalk_compensation_enabled: false,
            ref_spad: None,
            oscillator: Oscillator::default(),
        };
        sensor.restore_host_defaults();
        sensor
    }

    /// Replaces the polling timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Releases the bus and the delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Returns the current lifecycle state. Does not access the device.
    pub fn get_pal_state(&self) -> PalState {
        self.state
    }

    /// Returns the driver version. Does not access the device.
    #[must_use]
    pub fn get_version() -> Version {
        DRIVER_VERSION
    }

    /// Host-side state after construction or a reset.
    fn restore_host_defaults(&mut self) {
        self.apply_preset_defaults(PresetMode::LiteRanging);
        self.measurement_mode = MeasurementMode::Continuous;
        self.roi = Roi::FULL;
        self.sequence_steps = SequenceSteps::DEFAULT;
        self.limit_checks = LimitChecks::default();
        self.calibration = None;
        self.xtalk_compensation_enabled = false;
        self.ref_spad = None;
        self.oscillator = Oscillator::default();
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Fails with [`Error::InvalidState`] unless the device is in one of `allowed`.
    pub(crate) fn check_state(&self, allowed: &[PalState]) -> Result<(), Error<E>> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            error!("Operation not allowed in state {}", self.state as u8);
            Err(Error::InvalidState)
        }
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), keep_self),
    async(feature = "async", keep_self)
)]
impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
    D: DelayNs,
{
    /// Sets a new I2C address for the sensor.
    ///
    /// The device answers on the new address as soon as the write completes and the driver
    /// switches to it. Use this before bringing up further sensors that share the bus.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `address` is not a valid 7-bit device address
    /// * `Err(Error::InvalidState)` - If called while ranging or in [`PalState::Error`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::VL53L1;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// // Move the sensor to 0x30 before bringing up a second one at the default address
    /// sensor.set_device_address(0x30).unwrap();
    /// ```
    pub async fn set_device_address(&mut self, address: u8) -> Result<(), Error<E>> {
        self.check_state(&[PalState::PowerDown, PalState::WaitStaticInit, PalState::Idle])?;
        if !(0x08..=0x77).contains(&address) {
            error!("Invalid I2C address: {}", address);
            return Err(Error::InvalidParams);
        }
        self.write_byte(Register::I2cSlaveDeviceAddress, address)
            .await?;
        self.address = address;
        Ok(())
    }

    /// Retrieves the sensor identification word (model id and module type, `0xEACC`).
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device has not been initialized
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::VL53L1;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// let sensor_id = sensor.get_sensor_id().unwrap();
    /// if sensor_id != 0xEACC {
    ///     println!("Unexpected sensor ID: 0x{:04X}", sensor_id);
    /// }
    /// ```
    pub async fn get_sensor_id(&mut self) -> Result<u16, Error<E>> {
        self.check_state(state::BOOTED)?;
        let id = self.read_word(Register::IdentificationModelId).await?;
        Ok(id)
    }

    /// Reads the silicon revision.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device has not been initialized
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    pub async fn get_product_revision(&mut self) -> Result<ProductRevision, Error<E>> {
        self.check_state(state::BOOTED)?;
        let revision = self.read_byte(Register::IdentificationRevisionId).await?;
        Ok(ProductRevision {
            major: 1,
            minor: (revision & 0xF0) >> 4,
        })
    }

    /// Reads model id, module type and silicon revision.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device has not been initialized
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::VL53L1;
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// let info = sensor.get_device_info().unwrap();
    /// println!(
    ///     "Model 0x{:02X}, type 0x{:02X}, revision {}.{}",
    ///     info.model_id, info.product_type, info.revision.major, info.revision.minor
    /// );
    /// ```
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo, Error<E>> {
        let [model_id, product_type] = self.get_sensor_id().await?.to_be_bytes();
        let revision = self.get_product_revision().await?;
        Ok(DeviceInfo {
            model_id,
            product_type,
            revision,
        })
    }

    pub(crate) async fn write_byte<R>(
        &mut self,
        register_address: R,
        value: u8,
    ) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register_address.into();
        let mut buffer = [0u8; 3];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2] = value;
        self.i2c.write(self.address, &buffer).await?;
        Ok(())
    }

    pub(crate) async fn read_byte<R>(&mut self, register_address: R) -> Result<u8, Error<E>>
    where
        R: Into<u16>,
    {
        let mut read_buffer = [0u8; 1];
        self.read_block(register_address, &mut read_buffer).await?;
        Ok(read_buffer[0])
    }

    pub(crate) async fn write_word<R>(
        &mut self,
        register_address: R,
        value: u16,
    ) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register_address.into();
        let mut buffer = [0u8; 4];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2..4].copy_from_slice(&value.to_be_bytes());
        self.i2c.write(self.address, &buffer).await?;
        Ok(())
    }

    pub(crate) async fn read_word<R>(&mut self, register_address: R) -> Result<u16, Error<E>>
    where
        R: Into<u16>,
    {
        let mut read_buffer = [0u8; 2];
        self.read_block(register_address, &mut read_buffer).await?;
        Ok(u16::from_be_bytes(read_buffer))
    }

    pub(crate) async fn write_dword<R>(
        &mut self,
        register_address: R,
        value: u32,
    ) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register_address.into();
        let mut buffer = [0u8; 6];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2..6].copy_from_slice(&value.to_be_bytes());
        self.i2c.write(self.address, &buffer).await?;
        Ok(())
    }

    /// Writes `data` to consecutive registers starting at `register_address`.
    pub(crate) async fn write_block<R>(
        &mut self,
        register_address: R,
        data: &[u8],
    ) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        if data.len() > MAX_BLOCK_WRITE {
            error!("Block write too long: {}", data.len());
            return Err(Error::InvalidParams);
        }
        let reg: u16 = register_address.into();
        let mut buffer = [0u8; 2 + MAX_BLOCK_WRITE];
        buffer[0..2].copy_from_slice(&reg.to_be_bytes());
        buffer[2..2 + data.len()].copy_from_slice(data);
        self.i2c.write(self.address, &buffer[..2 + data.len()]).await?;
        Ok(())
    }

    /// Fills `buffer` from consecutive registers starting at `register_address`.
    pub(crate) async fn read_block<R>(
        &mut self,
        register_address: R,
        buffer: &mut [u8],
    ) -> Result<(), Error<E>>
    where
        R: Into<u16>,
    {
        let reg: u16 = register_address.into();
        self.i2c
            .write_read(self.address, &reg.to_be_bytes(), buffer)
            .await?;
        Ok(())
    }
}

/// Errors returned by the driver.
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E: core::fmt::Debug> {
    /// I2C transport error, propagated unchanged
    I2cError(E),
    /// Operation not legal in the current lifecycle state
    InvalidState,
    /// Out-of-range id, malformed ROI, unknown sequence step or value out of range
    InvalidParams,
    /// Operation incompatible with the active (or missing) preset mode
    ModeNotSupported,
    /// Capability not available in the active preset mode
    NotSupported,
    /// Bounded wait exceeded
    Timeout,
    /// A calibration could not produce a usable correction
    CalibrationFailed,
    /// Unexpected value reported by the device
    Unknown,
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<E: core::fmt::Debug> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::I2cError(error)
    }
}
