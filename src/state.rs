//! Device lifecycle: boot, data init, static init and reset.

use crate::register::{
    Register, DEFAULT_CONFIGURATION, DEFAULT_CONFIGURATION_START, FIRMWARE_BOOTED, MODEL_ID,
    MODE_START_STOP, MODE_START_TIMED, VHV_INIT_FROM_PREVIOUS,
};
use crate::{DelayNs, Error, I2c, Warning, VL53L1};

/// Lifecycle state of the device as tracked by the driver.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PalState {
    /// Out of hardware standby, not yet initialized
    PowerDown = 0,
    /// Data init done, waiting for static init
    WaitStaticInit = 1,
    /// Configured, not ranging
    Idle = 3,
    /// Ranging
    Running = 4,
    /// A multi-step device sequence failed half-way. Only a reset leaves this state.
    Error = 99,
}

/// States in which the device answers identification reads.
pub(crate) const BOOTED: &[PalState] =
    &[PalState::WaitStaticInit, PalState::Idle, PalState::Running];

// Register values of the soft reset sequence.
const SOFT_RESET_ASSERT: u8 = 0x00;
const SOFT_RESET_RELEASE: u8 = 0x01;

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
    /// Waits for the device firmware to finish booting.
    ///
    /// Polls the firmware status every [`Timeouts::polling_delay_ms`](crate::Timeouts) until the
    /// boot bit is set or [`Timeouts::boot_ms`](crate::Timeouts) elapses.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::PowerDown`]
    /// * `Err(Error::Timeout)` - If the device did not boot in time
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PalState, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// assert_eq!(sensor.get_pal_state(), PalState::WaitStaticInit);
    /// ```
    pub async fn wait_device_booted(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::PowerDown])?;
        info!("Waiting for device to boot");

        let max_polls = self.timeouts.max_polls(self.timeouts.boot_ms);
        let mut polls = 0;
        loop {
            let status = self.read_byte(Register::FirmwareSystemStatus).await?;
            if status & FIRMWARE_BOOTED != 0 {
                break;
            }
            polls += 1;
            if polls >= max_polls {
                error!("Device not booted after {} ms", self.timeouts.boot_ms);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(self.timeouts.polling_delay_ms).await;
        }

        info!("Device booted");
        Ok(())
    }

    /// One-time initialization after boot.
    ///
    /// Verifies the device identity, seeds the host calibration data from the device and
    /// restores the default configuration: [`PresetMode::LiteRanging`](crate::PresetMode),
    /// full ROI, default sequence steps and limit checks.
    ///
    /// Returns `Some(Warning::Calibration)` when the device kept the state of an earlier static
    /// init (no reset in between): the calibration data read back from it may be stale.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::PowerDown`]
    /// * `Err(Error::Unknown)` - If the device does not identify as a VL53L1
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{VL53L1, Warning};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// sensor.wait_device_booted().unwrap();
    /// if let Some(Warning::Calibration) = sensor.data_init().unwrap() {
    ///     // Offsets read from the device may be stale, restore saved ones here
    /// }
    /// sensor.static_init().unwrap();
    /// ```
    pub async fn data_init(&mut self) -> Result<Option<Warning>, Error<E>> {
        self.check_state(&[PalState::PowerDown])?;

        let model_id = self.read_word(Register::IdentificationModelId).await?;
        if model_id != MODEL_ID {
            error!("Unexpected model id: {}", model_id);
            return Err(Error::Unknown);
        }

        let vhv_init = self.read_byte(Register::VhvConfigInit).await?;
        let warning = if vhv_init == VHV_INIT_FROM_PREVIOUS {
            warn!("Device not reset since last static init, calibration data may be stale");
            Some(Warning::Calibration)
        } else {
            None
        };

        let calibration = self.read_calibration_data().await?;
        self.xtalk_compensation_enabled = calibration.xtalk_plane_offset_kcps != 0;
        self.calibration = Some(calibration);

        self.restore_configuration_defaults();
        self.state = PalState::WaitStaticInit;
        info!("Data init done");
        Ok(warning)
    }

    /// Loads the device configuration.
    ///
    /// Writes the default register block, runs the VHV (temperature) search, reads the
    /// oscillator trims, restores the host calibration data and programs the host
    /// configuration (timing, inter-measurement period, ROI, sequence steps, limit checks).
    ///
    /// A failure once the device has been written to leaves the driver in
    /// [`PalState::Error`].
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::WaitStaticInit`]
    /// * `Err(Error::Timeout)` - If the VHV search did not complete
    /// * `Err(Error::Unknown)` - If the oscillator trims read back as zero
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PalState, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    ///
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    /// assert_eq!(sensor.get_pal_state(), PalState::Idle);
    /// ```
    pub async fn static_init(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::WaitStaticInit])?;

        match self.load_static_configuration().await {
            Ok(()) => {
                self.state = PalState::Idle;
                info!("Static init done");
                Ok(())
            }
            Err(e) => {
                error!("Static init failed");
                self.state = PalState::Error;
                Err(e)
            }
        }
    }

    async fn load_static_configuration(&mut self) -> Result<(), Error<E>> {
        debug!("Writing default configuration");
        self.write_block(DEFAULT_CONFIGURATION_START, &DEFAULT_CONFIGURATION)
            .await?;

        // The first ranging after boot only runs the VHV search.
        debug!("Running VHV search");
        self.write_byte(Register::SystemModeStart, MODE_START_TIMED)
            .await?;
        self.poll_data_ready(self.timeouts.range_completion_ms)
            .await?;
        self.clear_interrupt().await?;
        self.write_byte(Register::SystemModeStart, MODE_START_STOP)
            .await?;
        // Two bounds loops for VHV, then start from the temperature found above.
        self.write_byte(Register::VhvConfigTimeoutMacropLoopBound, 0x09)
            .await?;
        self.write_byte(Register::VhvConfigInit, VHV_INIT_FROM_PREVIOUS)
            .await?;

        self.read_oscillator().await?;

        if let Some(calibration) = self.calibration {
            self.write_calibration_data(&calibration, self.xtalk_compensation_enabled)
                .await?;
        }

        self.program_configuration().await
    }

    /// Soft-resets the device.
    ///
    /// All host-side state is returned to its defaults, including calibration data. The
    /// device must be brought up again with [`wait_device_booted`](Self::wait_device_booted),
    /// [`data_init`](Self::data_init) and [`static_init`](Self::static_init). This is the only
    /// way out of [`PalState::Error`].
    ///
    /// # Errors
    ///
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PalState, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.reset_device().unwrap();
    /// assert_eq!(sensor.get_pal_state(), PalState::PowerDown);
    /// ```
    pub async fn reset_device(&mut self) -> Result<(), Error<E>> {
        info!("Resetting device");
        self.write_byte(Register::SoftReset, SOFT_RESET_ASSERT).await?;
        self.delay.delay_us(100).await;
        self.write_byte(Register::SoftReset, SOFT_RESET_RELEASE).await?;

        self.restore_host_defaults();
        self.state = PalState::PowerDown;
        Ok(())
    }
}

impl<I2C, D> VL53L1<I2C, D> {
    /// Host configuration established by a data init.
    fn restore_configuration_defaults(&mut self) {
        let calibration = self.calibration;
        let xtalk = self.xtalk_compensation_enabled;
        let oscillator = self.oscillator;
        self.restore_host_defaults();
        self.calibration = calibration;
        self.xtalk_compensation_enabled = xtalk;
        self.oscillator = oscillator;
    }
}

#[cfg(all(test, not(feature = "async")))]
mod tests {
    use super::*;
    use crate::sim::{self, CountingDelay, SimDevice};
    use crate::Timeouts;
    use embedded_hal::i2c::ErrorKind;

    #[test]
    fn lifecycle_follows_the_legal_sequence() {
        let device = SimDevice::new();
        let mut sensor = VL53L1::new(device.clone(), CountingDelay::default());
        assert_eq!(sensor.get_pal_state(), PalState::PowerDown);

        sensor.wait_device_booted().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::PowerDown);

        assert_eq!(sensor.data_init(), Ok(None));
        assert_eq!(sensor.get_pal_state(), PalState::WaitStaticInit);

        sensor.static_init().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::Idle);

        sensor.start_measurement().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::Running);

        sensor.stop_measurement().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::Idle);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let device = SimDevice::new();
        let mut sensor = VL53L1::new(device.clone(), CountingDelay::default());

        assert_eq!(sensor.static_init(), Err(Error::InvalidState));
        assert_eq!(sensor.start_measurement(), Err(Error::InvalidState));
        assert_eq!(sensor.get_ranging_measurement_data(), Err(Error::InvalidState));

        sensor.data_init().unwrap();
        assert_eq!(sensor.data_init(), Err(Error::InvalidState));
        assert_eq!(sensor.wait_device_booted(), Err(Error::InvalidState));
        assert_eq!(sensor.start_measurement(), Err(Error::InvalidState));

        sensor.static_init().unwrap();
        assert_eq!(sensor.static_init(), Err(Error::InvalidState));
        assert_eq!(sensor.stop_measurement(), Err(Error::InvalidState));
        assert_eq!(sensor.wait_measurement_data_ready(), Err(Error::InvalidState));

        sensor.start_measurement().unwrap();
        assert_eq!(sensor.start_measurement(), Err(Error::InvalidState));
        assert_eq!(sensor.set_roi(crate::Roi::FULL), Err(Error::InvalidState));
        assert_eq!(sensor.perform_offset_calibration(100), Err(Error::InvalidState));
        assert_eq!(sensor.get_pal_state(), PalState::Running);
    }

    #[test]
    fn boot_times_out_within_the_configured_bound() {
        let device = SimDevice::new();
        device.state().boot_polls = u32::MAX;
        let delay = CountingDelay::default();
        let timeouts = Timeouts {
            boot_ms: 20,
            ..Timeouts::default()
        };
        let mut sensor = VL53L1::new(device.clone(), delay.clone()).with_timeouts(timeouts);

        assert_eq!(sensor.wait_device_booted(), Err(Error::Timeout));
        assert!(delay.elapsed_ms() <= 20);
        assert!(device.state().status_reads >= 2);
    }

    #[test]
    fn boot_waits_for_firmware() {
        let device = SimDevice::new();
        device.state().boot_polls = 3;
        let delay = CountingDelay::default();
        let mut sensor = VL53L1::new(device.clone(), delay.clone());

        sensor.wait_device_booted().unwrap();
        assert_eq!(delay.elapsed_ms(), 3);
    }

    #[test]
    fn data_init_rejects_foreign_devices() {
        let device = SimDevice::new();
        device.state().poke_word(0x010F, 0xEEAA);
        let mut sensor = VL53L1::new(device.clone(), CountingDelay::default());

        assert_eq!(sensor.data_init(), Err(Error::Unknown));
        assert_eq!(sensor.get_pal_state(), PalState::PowerDown);
    }

    #[test]
    fn data_init_warns_when_device_kept_an_earlier_static_init() {
        let (sensor, device, delay) = sim::idle_sensor();
        drop(sensor);

        // A new handle on a device that was not power cycled.
        let mut sensor = VL53L1::new(device.clone(), delay);
        sensor.wait_device_booted().unwrap();
        assert_eq!(sensor.data_init(), Ok(Some(Warning::Calibration)));
    }

    #[test]
    fn reset_clears_the_warning_and_host_state() {
        let (mut sensor, device, _delay) = sim::idle_sensor();
        sensor
            .set_calibration_data(crate::CalibrationData {
                offset_mm: 12,
                ..crate::CalibrationData::default()
            })
            .unwrap();
        assert_eq!(device.state().peek_word(0x001E), 48);

        sensor.reset_device().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::PowerDown);

        sensor.wait_device_booted().unwrap();
        assert_eq!(sensor.data_init(), Ok(None));
        assert_eq!(sensor.get_calibration_data().unwrap().offset_mm, 0);
    }

    #[test]
    fn failed_static_init_enters_error_until_reset() {
        let device = SimDevice::new();
        let mut sensor = VL53L1::new(device.clone(), CountingDelay::default());
        sensor.data_init().unwrap();

        device.state().fail_writes_to = Some(Register::VhvConfigInit as u16);
        assert_eq!(sensor.static_init(), Err(Error::I2cError(ErrorKind::Other)));
        assert_eq!(sensor.get_pal_state(), PalState::Error);
        assert_eq!(sensor.static_init(), Err(Error::InvalidState));
        assert_eq!(sensor.set_device_address(0x30), Err(Error::InvalidState));

        device.state().fail_writes_to = None;
        sensor.reset_device().unwrap();
        sensor.wait_device_booted().unwrap();
        sensor.data_init().unwrap();
        sensor.static_init().unwrap();
        assert_eq!(sensor.get_pal_state(), PalState::Idle);
    }

    #[test]
    fn static_init_rejects_an_untrimmed_oscillator() {
        let device = SimDevice::new();
        device.state().poke_word(0x0006, 0);
        let mut sensor = VL53L1::new(device.clone(), CountingDelay::default());
        sensor.data_init().unwrap();

        assert_eq!(sensor.static_init(), Err(Error::Unknown));
        assert_eq!(sensor.get_pal_state(), PalState::Error);
    }
}
