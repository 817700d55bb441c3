//! Ranging start/stop, data-ready handling and result retrieval.

use crate::register::{
    result_offset, Register, FIRMWARE_READY, INTERRUPT_CLEAR_RANGE, MODE_START_STOP,
    RESULT_BLOCK_LEN,
};
use crate::{DelayNs, Error, FixPoint1616, I2c, LimitCheck, PalState, PresetMode, VL53L1};

/// Most objects the device reports for one region of interest.
pub const MAX_RANGE_RESULTS: usize = 4;

// Maps the device range status (low five bits of the result status) to [`RangeStatus`] codes.
const DEVICE_RANGE_STATUS: [u8; 24] = [
    255, 255, 255, 5, 2, 4, 1, 7, 3, 0, 255, 255, 9, 13, 255, 255, 255, 255, 10, 6, 255, 255, 11,
    12,
];

/// Hardware-level validity of a range, reported next to the limit-check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RangeStatus {
    /// Range is valid
    #[default]
    RangeValid,
    /// Sigma estimator check is above the internal threshold
    SigmaFail,
    /// Return signal is too low
    SignalFail,
    /// Target is below the minimum detection range, range clipped
    RangeValidMinRangeClipped,
    /// Phase out of the valid limits
    OutOfBoundsFail,
    /// Hardware or VCSEL failure
    HardwareFail,
    /// Range valid, wrap-around check not done
    RangeValidNoWrapCheckFail,
    /// Wrapped target, phase does not match
    WrapTargetFail,
    /// Internal processing failure
    ProcessingFail,
    /// Cross-talk signal failure
    XtalkSignalFail,
    /// First interrupt after start, range not to be used
    SynchronisationInt,
    /// Range valid, several targets merged
    RangeValidMergedPulse,
    /// Target present but signal too low
    TargetPresentLackOfSignal,
    /// Target below the minimum range
    MinRangeFail,
    /// No valid range
    RangeInvalid,
    /// Code not known to the driver, kept for diagnostics; converts to
    /// [`RANGE_STATUS_NONE`]
    Unknown(u8),
}

/// Numeric status of [`RangeStatus::Unknown`], outside the known codes.
pub const RANGE_STATUS_NONE: u8 = 255;

impl RangeStatus {
    /// `true` for the statuses that carry a usable distance.
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(
            self,
            RangeStatus::RangeValid
                | RangeStatus::RangeValidMinRangeClipped
                | RangeStatus::RangeValidNoWrapCheckFail
                | RangeStatus::RangeValidMergedPulse
        )
    }

    fn from_device(raw: u8) -> Self {
        let code = raw & 0x1F;
        match DEVICE_RANGE_STATUS.get(usize::from(code)).copied() {
            Some(status) if status != 0xFF => Self::from(status),
            _ => {
                warn!("Unknown device range status: {}", code);
                RangeStatus::Unknown(code)
            }
        }
    }
}

impl From<u8> for RangeStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => RangeStatus::RangeValid,
            1 => RangeStatus::SigmaFail,
            2 => RangeStatus::SignalFail,
            3 => RangeStatus::RangeValidMinRangeClipped,
            4 => RangeStatus::OutOfBoundsFail,
            5 => RangeStatus::HardwareFail,
            6 => RangeStatus::RangeValidNoWrapCheckFail,
            7 => RangeStatus::WrapTargetFail,
            8 => RangeStatus::ProcessingFail,
            9 => RangeStatus::XtalkSignalFail,
            10 => RangeStatus::SynchronisationInt,
            11 => RangeStatus::RangeValidMergedPulse,
            12 => RangeStatus::TargetPresentLackOfSignal,
            13 => RangeStatus::MinRangeFail,
            14 => RangeStatus::RangeInvalid,
            _ => {
                warn!("Unknown range status: {}", value);
                RangeStatus::Unknown(value)
            }
        }
    }
}

impl From<RangeStatus> for u8 {
    fn from(status: RangeStatus) -> Self {
        match status {
            RangeStatus::RangeValid => 0,
            RangeStatus::SigmaFail => 1,
            RangeStatus::SignalFail => 2,
            RangeStatus::RangeValidMinRangeClipped => 3,
            RangeStatus::OutOfBoundsFail => 4,
            RangeStatus::HardwareFail => 5,
            RangeStatus::RangeValidNoWrapCheckFail => 6,
            RangeStatus::WrapTargetFail => 7,
            RangeStatus::ProcessingFail => 8,
            RangeStatus::XtalkSignalFail => 9,
            RangeStatus::SynchronisationInt => 10,
            RangeStatus::RangeValidMergedPulse => 11,
            RangeStatus::TargetPresentLackOfSignal => 12,
            RangeStatus::MinRangeFail => 13,
            RangeStatus::RangeInvalid => 14,
            RangeStatus::Unknown(_) => RANGE_STATUS_NONE,
        }
    }
}

/// Result of one ranging cycle: the first object of the first region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RangingMeasurementData {
    /// Increments with every result, wraps at 255
    pub stream_count: u8,
    /// Distance in mm, offset corrected
    pub range_mm: i16,
    /// Sigma estimate in mm
    pub sigma_mm: FixPoint1616,
    /// Return signal rate in Mcps, cross-talk corrected
    pub signal_rate_mcps: FixPoint1616,
    /// Ambient rate in Mcps
    pub ambient_rate_mcps: FixPoint1616,
    /// Number of SPADs used for the measurement
    pub effective_spad_count: FixPoint1616,
    /// Hardware-level validity
    pub range_status: RangeStatus,
    limit_check_failures: u8,
}

impl RangingMeasurementData {
    /// `true` if `check` was enabled and failed on this result.
    #[must_use]
    pub fn limit_check_failed(&self, check: LimitCheck) -> bool {
        self.limit_check_failures & check.mask() != 0
    }

    /// `true` if the range status is valid and no limit check failed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.range_status.is_valid() && self.limit_check_failures == 0
    }
}

/// One object detected in a region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetRangeData {
    /// Distance in mm, offset corrected
    pub range_mm: i16,
    /// Sigma estimate in mm
    pub sigma_mm: FixPoint1616,
    /// Return signal rate in Mcps, cross-talk corrected
    pub signal_rate_mcps: FixPoint1616,
    /// Ambient rate in Mcps
    pub ambient_rate_mcps: FixPoint1616,
    /// Hardware-level validity
    pub range_status: RangeStatus,
}

/// Results of one region of interest for one ranging cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MultiRangingData {
    /// Increments with every result, wraps at 255
    pub stream_count: u8,
    /// Region of interest these objects were found in
    pub roi_index: u8,
    /// Number of valid entries in `objects`
    pub number_of_objects_found: u8,
    /// Number of SPADs used for the measurement
    pub effective_spad_count: FixPoint1616,
    /// Detected objects, nearest first
    pub objects: [TargetRangeData; MAX_RANGE_RESULTS],
    limit_check_failures: u8,
}

impl MultiRangingData {
    /// The detected objects.
    #[must_use]
    pub fn objects(&self) -> &[TargetRangeData] {
        let found = usize::from(self.number_of_objects_found).min(MAX_RANGE_RESULTS);
        &self.objects[..found]
    }

    /// `true` if `check` was enabled and failed on this region.
    #[must_use]
    pub fn limit_check_failed(&self, check: LimitCheck) -> bool {
        self.limit_check_failures & check.mask() != 0
    }
}

/// Result block as read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawResult {
    pub range_status: u8,
    pub stream_count: u8,
    /// 8.8
    pub effective_spads: u16,
    /// 9.7 Mcps, before cross-talk correction
    pub peak_signal_rate: u16,
    /// 9.7 Mcps
    pub ambient_rate: u16,
    /// 14.2 mm
    pub sigma: u16,
    pub range_mm: i16,
    /// 9.7 Mcps
    pub corrected_signal_rate: u16,
}

impl RawResult {
    fn parse(block: &[u8; RESULT_BLOCK_LEN]) -> Self {
        let word = |offset: usize| u16::from_be_bytes([block[offset], block[offset + 1]]);
        Self {
            range_status: block[result_offset::RANGE_STATUS],
            stream_count: block[result_offset::STREAM_COUNT],
            effective_spads: word(result_offset::EFFECTIVE_SPADS),
            peak_signal_rate: word(result_offset::PEAK_SIGNAL_RATE),
            ambient_rate: word(result_offset::AMBIENT_RATE),
            sigma: word(result_offset::SIGMA),
            range_mm: i16::from_be_bytes([
                block[result_offset::RANGE_MM],
                block[result_offset::RANGE_MM + 1],
            ]),
            corrected_signal_rate: word(result_offset::CORRECTED_SIGNAL_RATE),
        }
    }

    pub(crate) fn status(&self) -> RangeStatus {
        RangeStatus::from_device(self.range_status)
    }

    fn target(&self) -> TargetRangeData {
        TargetRangeData {
            range_mm: self.range_mm,
            sigma_mm: FixPoint1616::from_14_2(self.sigma),
            signal_rate_mcps: FixPoint1616::from_9_7(self.corrected_signal_rate),
            ambient_rate_mcps: FixPoint1616::from_9_7(self.ambient_rate),
            range_status: self.status(),
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
    /// Starts ranging in the selected [`MeasurementMode`](crate::MeasurementMode).
    ///
    /// Timing left pending by [`set_preset_mode`](Self::set_preset_mode) is programmed
    /// first, then the driver waits for the firmware to be ready and arms the device.
    ///
    /// # Errors
    ///
    /// * `Err(Error::ModeNotSupported)` - If no preset mode is active (after a calibration)
    /// * `Err(Error::Timeout)` - If the firmware did not become ready
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
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
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.start_measurement().unwrap();
    /// for _ in 0..10 {
    ///     sensor.wait_measurement_data_ready().unwrap();
    ///     let data = sensor.get_ranging_measurement_data().unwrap();
    ///     if data.is_valid() {
    ///         println!("Distance: {} mm", data.range_mm);
    ///     }
    ///     sensor.clear_interrupt_and_start_measurement().unwrap();
    /// }
    /// sensor.stop_measurement().unwrap();
    /// ```
    pub async fn start_measurement(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        self.active_mode_parameters()?;

        if self.timing_pending {
            self.program_timing().await?;
        }

        let max_polls = self.timeouts.max_polls(self.timeouts.boot_ms);
        let mut polls = 0;
        loop {
            let status = self.read_byte(Register::FirmwareSystemStatus).await?;
            if status & FIRMWARE_READY != 0 {
                break;
            }
            polls += 1;
            if polls >= max_polls {
                error!("Firmware not ready after {} ms", self.timeouts.boot_ms);
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(self.timeouts.polling_delay_ms).await;
        }

        self.clear_interrupt().await?;
        self.write_byte(Register::SystemModeStart, self.measurement_mode.mode_start())
            .await?;
        self.state = PalState::Running;
        info!("Ranging started");
        Ok(())
    }

    /// Stops ranging.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
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
    /// sensor.start_measurement().unwrap();
    /// sensor.stop_measurement().unwrap();
    /// assert_eq!(sensor.get_pal_state(), PalState::Idle);
    /// ```
    pub async fn stop_measurement(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Running])?;
        self.write_byte(Register::SystemModeStart, MODE_START_STOP)
            .await?;
        self.state = PalState::Idle;
        info!("Ranging stopped");
        Ok(())
    }

    /// Acknowledges the current result and arms the next cycle in one bus transaction.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    pub async fn clear_interrupt_and_start_measurement(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Running])?;
        let mode_start = self.measurement_mode.mode_start();
        self.write_block(Register::SystemInterruptClear, &[INTERRUPT_CLEAR_RANGE, mode_start])
            .await
    }

    /// Returns `true` when a ranging result is available.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
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
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.start_measurement().unwrap();
    /// while !sensor.get_measurement_data_ready().unwrap() {
    ///     // Do something else
    /// }
    /// let data = sensor.get_ranging_measurement_data().unwrap();
    /// ```
    pub async fn get_measurement_data_ready(&mut self) -> Result<bool, Error<E>> {
        self.check_state(&[PalState::Running])?;
        self.read_data_ready().await
    }

    /// Waits until a ranging result is available.
    ///
    /// Polls every [`Timeouts::polling_delay_ms`](crate::Timeouts) for at most
    /// [`Timeouts::range_completion_ms`](crate::Timeouts).
    ///
    /// # Errors
    ///
    /// * `Err(Error::Timeout)` - If no result arrived in time
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    pub async fn wait_measurement_data_ready(&mut self) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Running])?;
        self.poll_data_ready(self.timeouts.range_completion_ms)
            .await
    }

    /// Reads the result of the last ranging cycle and evaluates the limit checks on it.
    ///
    /// # Errors
    ///
    /// * `Err(Error::NotSupported)` - If the active mode is not [`PresetMode::LiteRanging`]
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{LimitCheck, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.start_measurement().unwrap();
    /// sensor.wait_measurement_data_ready().unwrap();
    /// let data = sensor.get_ranging_measurement_data().unwrap();
    /// if data.limit_check_failed(LimitCheck::SigmaFinalRange) {
    ///     println!("Sigma too high: {} mm", data.sigma_mm);
    /// } else {
    ///     println!("Distance: {} mm, signal {} Mcps", data.range_mm, data.signal_rate_mcps);
    /// }
    /// ```
    pub async fn get_ranging_measurement_data(
        &mut self,
    ) -> Result<RangingMeasurementData, Error<E>> {
        self.check_state(&[PalState::Running])?;
        if self.preset_mode != Some(PresetMode::LiteRanging) {
            error!("Single result only available in lite ranging");
            return Err(Error::NotSupported);
        }

        let raw = self.read_raw_result().await?;
        let target = raw.target();
        let limit_check_failures = self
            .limit_checks
            .evaluate(target.sigma_mm, target.signal_rate_mcps);
        trace!("Range {} mm, status {}", target.range_mm, u8::from(target.range_status));

        Ok(RangingMeasurementData {
            stream_count: raw.stream_count,
            range_mm: target.range_mm,
            sigma_mm: target.sigma_mm,
            signal_rate_mcps: target.signal_rate_mcps,
            ambient_rate_mcps: target.ambient_rate_mcps,
            effective_spad_count: FixPoint1616::from_8_8(raw.effective_spads),
            range_status: target.range_status,
            limit_check_failures,
        })
    }

    /// Reads every region of interest of the last ranging cycle into `results`.
    ///
    /// `results` needs one entry per region, see
    /// [`get_max_number_of_roi`](Self::get_max_number_of_roi). Returns the number of entries
    /// filled.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `results` is shorter than the number of regions
    /// * `Err(Error::ModeNotSupported)` - If no preset mode is active
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Running`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{MultiRangingData, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.start_measurement().unwrap();
    /// sensor.wait_measurement_data_ready().unwrap();
    ///
    /// let mut results = [MultiRangingData::default(); 1];
    /// let count = sensor.get_multi_ranging_data(&mut results).unwrap();
    /// for roi in &results[..count] {
    ///     for object in roi.objects() {
    ///         println!("ROI {}: {} mm", roi.roi_index, object.range_mm);
    ///     }
    /// }
    /// ```
    pub async fn get_multi_ranging_data(
        &mut self,
        results: &mut [MultiRangingData],
    ) -> Result<usize, Error<E>> {
        self.check_state(&[PalState::Running])?;
        let roi_count = usize::from(self.active_mode_parameters()?.max_number_of_roi);
        if results.len() < roi_count {
            error!("Result slice too short: {} < {}", results.len(), roi_count);
            return Err(Error::InvalidParams);
        }

        // Lite ranging reports one region with one object.
        let raw = self.read_raw_result().await?;
        let target = raw.target();
        let limit_check_failures = self
            .limit_checks
            .evaluate(target.sigma_mm, target.signal_rate_mcps);

        let mut objects = [TargetRangeData::default(); MAX_RANGE_RESULTS];
        objects[0] = target;
        results[0] = MultiRangingData {
            stream_count: raw.stream_count,
            roi_index: 0,
            number_of_objects_found: 1,
            effective_spad_count: FixPoint1616::from_8_8(raw.effective_spads),
            objects,
            limit_check_failures,
        };
        Ok(roi_count)
    }

    pub(crate) async fn clear_interrupt(&mut self) -> Result<(), Error<E>> {
        self.write_byte(Register::SystemInterruptClear, INTERRUPT_CLEAR_RANGE)
            .await
    }

    pub(crate) async fn read_data_ready(&mut self) -> Result<bool, Error<E>> {
        let mux = self.read_byte(Register::GpioHvMuxCtrl).await?;
        let polarity = u8::from(mux & 0x10 == 0);
        let status = self.read_byte(Register::GpioTioHvStatus).await?;
        Ok(status & 0x01 == polarity)
    }

    /// Polls data ready for at most `timeout_ms`.
    pub(crate) async fn poll_data_ready(&mut self, timeout_ms: u32) -> Result<(), Error<E>> {
        let max_polls = self.timeouts.max_polls(timeout_ms);
        let mut polls = 0;
        loop {
            if self.read_data_ready().await? {
                return Ok(());
            }
            polls += 1;
            if polls >= max_polls {
                error!("No result after {} ms", timeout_ms);
                return Err(Error::Timeout);
            }
            trace!("Waiting for data ready");
            self.delay.delay_ms(self.timeouts.polling_delay_ms).await;
        }
    }

    pub(crate) async fn read_raw_result(&mut self) -> Result<RawResult, Error<E>> {
        let mut block = [0u8; RESULT_BLOCK_LEN];
        self.read_block(Register::ResultRangeStatus, &mut block)
            .await?;
        Ok(RawResult::parse(&block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_codes_map_to_range_status() {
        assert_eq!(RangeStatus::from_device(9), RangeStatus::RangeValid);
        assert_eq!(RangeStatus::from_device(6), RangeStatus::SigmaFail);
        assert_eq!(RangeStatus::from_device(4), RangeStatus::SignalFail);
        assert_eq!(RangeStatus::from_device(7), RangeStatus::WrapTargetFail);
        // Upper bits are not part of the status.
        assert_eq!(RangeStatus::from_device(0xE9), RangeStatus::RangeValid);
        assert_eq!(RangeStatus::from_device(0), RangeStatus::Unknown(0));
        assert_eq!(RangeStatus::from_device(30), RangeStatus::Unknown(30));
    }

    #[test]
    fn range_status_codes_convert_both_ways() {
        for code in 0..=14 {
            assert_eq!(u8::from(RangeStatus::from(code)), code);
        }
        assert_eq!(u8::from(RangeStatus::from_device(0)), RANGE_STATUS_NONE);
        assert_eq!(u8::from(RangeStatus::from(200)), RANGE_STATUS_NONE);
        assert!(RangeStatus::RangeValidMergedPulse.is_valid());
        assert!(!RangeStatus::SignalFail.is_valid());
    }

    #[test]
    fn result_block_is_parsed_big_endian() {
        let block = [
            0x09, 0x00, 0x2A, // status, report status, stream count
            0x05, 0x80, // 5.5 effective SPADs
            0x02, 0x00, // peak signal 4 Mcps
            0x00, 0x40, // ambient 0.5 Mcps
            0x00, 0x50, // sigma 20 mm
            0x00, 0x00, // phase
            0xFF, 0xF6, // -10 mm
            0x01, 0x80, // corrected signal 3 Mcps
        ];
        let raw = RawResult::parse(&block);
        assert_eq!(raw.status(), RangeStatus::RangeValid);
        assert_eq!(raw.stream_count, 42);
        assert_eq!(raw.range_mm, -10);

        let target = raw.target();
        assert_eq!(target.sigma_mm, FixPoint1616::from_int(20));
        assert_eq!(target.signal_rate_mcps, FixPoint1616::from_int(3));
        assert_eq!(target.ambient_rate_mcps, FixPoint1616::from_bits(0x8000));
        assert_eq!(
            FixPoint1616::from_8_8(raw.effective_spads),
            FixPoint1616::from_bits(0x0005_8000)
        );
    }

    #[test]
    fn multi_result_lists_found_objects_only() {
        let mut data = MultiRangingData::default();
        assert!(data.objects().is_empty());
        data.number_of_objects_found = 2;
        assert_eq!(data.objects().len(), 2);
    }

    #[cfg(not(feature = "async"))]
    mod device {
        use super::*;
        use crate::sim::{self, CountingDelay, SimDevice};
        use crate::{MeasurementMode, Timeouts};
        use embedded_hal::i2c::ErrorKind;

        #[test]
        fn wait_times_out_when_data_never_becomes_ready() {
            let device = SimDevice::new();
            let delay = CountingDelay::default();
            let timeouts = Timeouts {
                range_completion_ms: 50,
                polling_delay_ms: 5,
                ..Timeouts::default()
            };
            let mut sensor = sim::bring_up(device.clone(), delay.clone(), timeouts);
            sensor.start_measurement().unwrap();
            device.state().never_ready = true;
            sensor.clear_interrupt_and_start_measurement().unwrap();

            let before = delay.elapsed_ms();
            assert_eq!(sensor.wait_measurement_data_ready(), Err(Error::Timeout));
            assert!(delay.elapsed_ms() - before <= 50);
            assert_eq!(sensor.get_pal_state(), PalState::Running);
        }

        #[test]
        fn wait_returns_once_ready_after_some_polls() {
            let (mut sensor, device, delay) = sim::running_sensor();
            device.state().ready_after_polls = 4;
            sensor.clear_interrupt_and_start_measurement().unwrap();

            let before = delay.elapsed_ms();
            sensor.wait_measurement_data_ready().unwrap();
            assert_eq!(delay.elapsed_ms() - before, 4);
            assert_eq!(sensor.get_measurement_data_ready(), Ok(true));
        }

        #[test]
        fn results_carry_status_and_limit_checks_side_by_side() {
            let (mut sensor, device, _delay) = sim::running_sensor();
            {
                let mut state = device.state();
                state.scene.distance_mm = 742;
                // 120 mm sigma fails the 90 mm default threshold.
                state.scene.sigma = 120 * 4;
                state.scene.device_status = 9;
            }
            sensor.clear_interrupt_and_start_measurement().unwrap();
            sensor.wait_measurement_data_ready().unwrap();

            let data = sensor.get_ranging_measurement_data().unwrap();
            assert_eq!(data.range_mm, 742);
            assert_eq!(data.range_status, RangeStatus::RangeValid);
            assert!(data.limit_check_failed(LimitCheck::SigmaFinalRange));
            assert!(!data.limit_check_failed(LimitCheck::SignalRateFinalRange));
            assert!(!data.is_valid());
            assert_eq!(sensor.get_limit_check_status(0), Ok(true));
            assert_eq!(sensor.get_limit_check_current(0), Ok(FixPoint1616::from_int(120)));
        }

        #[test]
        fn weak_signal_fails_the_signal_rate_check() {
            let (mut sensor, device, _delay) = sim::running_sensor();
            {
                let mut state = device.state();
                // 0.5 Mcps against the 1 Mcps default.
                state.scene.signal_rate = 0x0040;
                state.scene.device_status = 4;
            }
            sensor.clear_interrupt_and_start_measurement().unwrap();
            sensor.wait_measurement_data_ready().unwrap();

            let data = sensor.get_ranging_measurement_data().unwrap();
            assert_eq!(data.range_status, RangeStatus::SignalFail);
            assert!(data.limit_check_failed(LimitCheck::SignalRateFinalRange));
            assert_eq!(sensor.get_limit_check_status(1), Ok(true));
            assert_eq!(sensor.get_limit_check_status(0), Ok(false));
        }

        #[test]
        fn multi_result_needs_room_for_every_roi() {
            let (mut sensor, device, _delay) = sim::running_sensor();
            device.state().scene.distance_mm = 321;
            sensor.clear_interrupt_and_start_measurement().unwrap();
            sensor.wait_measurement_data_ready().unwrap();

            let mut none: [MultiRangingData; 0] = [];
            assert_eq!(sensor.get_multi_ranging_data(&mut none), Err(Error::InvalidParams));

            let mut results = [MultiRangingData::default(); 2];
            assert_eq!(sensor.get_multi_ranging_data(&mut results), Ok(1));
            assert_eq!(results[0].objects().len(), 1);
            assert_eq!(results[0].objects()[0].range_mm, 321);
            assert_eq!(results[1], MultiRangingData::default());
        }

        #[test]
        fn single_shot_mode_ranges_once_per_start() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            sensor
                .set_measurement_mode(MeasurementMode::SingleShot)
                .unwrap();
            sensor.start_measurement().unwrap();
            assert_eq!(device.state().peek(Register::SystemModeStart as u16), 0x10);

            sensor.wait_measurement_data_ready().unwrap();
            let first = sensor.get_ranging_measurement_data().unwrap();
            sensor.clear_interrupt_and_start_measurement().unwrap();
            sensor.wait_measurement_data_ready().unwrap();
            let second = sensor.get_ranging_measurement_data().unwrap();
            assert_eq!(second.stream_count, first.stream_count.wrapping_add(1));

            sensor.stop_measurement().unwrap();
            assert_eq!(device.state().peek(Register::SystemModeStart as u16), 0x00);
        }

        #[test]
        fn start_times_out_when_firmware_is_not_ready() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            device.state().firmware_ready = false;

            assert_eq!(sensor.start_measurement(), Err(Error::Timeout));
            assert_eq!(sensor.get_pal_state(), PalState::Idle);
        }

        #[test]
        fn transport_errors_surface_unchanged() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            device.state().fail_writes_to = Some(Register::SystemModeStart as u16);

            assert_eq!(sensor.start_measurement(), Err(Error::I2cError(ErrorKind::Other)));
            assert_eq!(sensor.get_pal_state(), PalState::Idle);
        }
    }
}
