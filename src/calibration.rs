//! Offset, cross-talk and reference SPAD calibration.
//!
//! Every calibration ranges privately in single-shot mode with its own sequence steps.
//! Afterwards no preset mode is active: the caller restores the preset mode (and the
//! sequence steps it wants) before ranging again.

use crate::config::{compute_timing, TimingConfig};
use crate::measurement::RawResult;
use crate::register::{Register, INTERRUPT_CLEAR_RANGE, MODE_START_SINGLE_SHOT};
use crate::sequence::SequenceSteps;
use crate::{DelayNs, Error, I2c, PalState, PresetMode, VL53L1};

// Ranging cycles thrown away before offset sampling starts.
const OFFSET_WARMUP_CYCLES: u8 = 3;
const OFFSET_SAMPLE_CYCLES: u8 = 10;
const XTALK_AVERAGED_CYCLES: u8 = 8;

const REF_SPAD_LOCATIONS: u8 = 4;
const REF_SPAD_MAX_COUNT: u8 = 44;
// 20 Mcps in 9.7.
const REF_SPAD_TARGET_RATE: u16 = 0x0A00;

/// Offset and cross-talk corrections of one device.
///
/// Read from the device by [`data_init`](VL53L1::data_init) and updated by the
/// calibrations. Save it with [`get_calibration_data`](VL53L1::get_calibration_data) and
/// restore it after a power cycle with [`set_calibration_data`](VL53L1::set_calibration_data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationData {
    /// Part-to-part range offset in mm
    pub offset_mm: i16,
    /// Inner offset in mm
    pub inner_offset_mm: i16,
    /// Outer offset in mm
    pub outer_offset_mm: i16,
    /// Cross-talk plane offset, 7.9 kcps per SPAD
    pub xtalk_plane_offset_kcps: u16,
    /// Cross-talk X gradient, 3.11 kcps per SPAD
    pub xtalk_x_plane_gradient_kcps: i16,
    /// Cross-talk Y gradient, 3.11 kcps per SPAD
    pub xtalk_y_plane_gradient_kcps: i16,
}

/// Reference SPAD selection found by
/// [`perform_ref_spad_management`](VL53L1::perform_ref_spad_management).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RefSpadInfo {
    /// Number of reference SPADs
    pub count: u8,
    /// Location of the reference SPADs on the reference array
    pub location: u8,
}

/// Cycles of a cross-talk calibration.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XTalkCalibrationOption {
    /// One ranging cycle
    SingleCycle = 0,
    /// Average of 8 ranging cycles
    Averaged = 1,
}

impl XTalkCalibrationOption {
    fn cycles(self) -> u8 {
        match self {
            XTalkCalibrationOption::SingleCycle => 1,
            XTalkCalibrationOption::Averaged => XTALK_AVERAGED_CYCLES,
        }
    }
}

impl TryFrom<u8> for XTalkCalibrationOption {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(XTalkCalibrationOption::SingleCycle),
            1 => Ok(XTalkCalibrationOption::Averaged),
            other => Err(other),
        }
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Returns the host copy of the calibration data.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If [`data_init`](Self::data_init) has not run
    pub fn get_calibration_data(&self) -> Result<CalibrationData, Error<E>> {
        self.check_state(&[PalState::WaitStaticInit, PalState::Idle, PalState::Running])?;
        self.calibration.ok_or(Error::InvalidState)
    }

    /// Returns whether cross-talk compensation is enabled.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_xtalk_compensation_enable(&self) -> Result<bool, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.xtalk_compensation_enabled)
    }

    /// Result of the last reference SPAD search, cleared by a reset.
    pub fn ref_spad_info(&self) -> Option<RefSpadInfo> {
        self.ref_spad
    }

    /// Ends a calibration: no preset mode, and `Error` state when the device was left
    /// half-programmed.
    fn finish_calibration<T>(&mut self, result: Result<T, Error<E>>) -> Result<T, Error<E>> {
        self.preset_mode = None;
        self.timing_pending = true;
        match &result {
            Ok(_) | Err(Error::CalibrationFailed) => {}
            Err(_) => {
                error!("Calibration aborted");
                self.state = PalState::Error;
            }
        }
        result
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
    /// Replaces the calibration data, e.g. with data saved before a power cycle.
    ///
    /// In [`PalState::Idle`] the data is programmed right away, in
    /// [`PalState::WaitStaticInit`] it is programmed by [`static_init`](Self::static_init).
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in `WaitStaticInit` or `Idle`
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
    /// let saved = sensor.get_calibration_data().unwrap();
    ///
    /// // After a power cycle
    /// sensor.reset_device().unwrap();
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.set_calibration_data(saved).unwrap();
    /// sensor.static_init().unwrap();
    /// ```
    pub async fn set_calibration_data(&mut self, data: CalibrationData) -> Result<(), Error<E>> {
        self.check_state(&[PalState::WaitStaticInit, PalState::Idle])?;
        let xtalk_enabled = data.xtalk_plane_offset_kcps != 0;
        if self.state == PalState::Idle {
            self.write_calibration_data(&data, xtalk_enabled).await?;
        }
        self.calibration = Some(data);
        self.xtalk_compensation_enabled = xtalk_enabled;
        Ok(())
    }

    /// Enables or disables cross-talk compensation.
    ///
    /// Disabling clears the compensation registers and keeps the calibrated values, enabling
    /// programs them again.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    pub async fn set_xtalk_compensation_enable(&mut self, enable: bool) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let data = self.calibration.unwrap_or_default();
        if enable {
            self.write_xtalk(
                data.xtalk_plane_offset_kcps,
                data.xtalk_x_plane_gradient_kcps,
                data.xtalk_y_plane_gradient_kcps,
            )
            .await?;
        } else {
            self.write_xtalk(0, 0, 0).await?;
        }
        self.xtalk_compensation_enabled = enable;
        Ok(())
    }

    /// Calibrates the range offset against a target at a known distance.
    ///
    /// Ranges the target, averages the valid results and programs the offset that brings
    /// them to `cal_distance_mm`. Returns the programmed offset in mm.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `cal_distance_mm` is not a positive distance
    /// * `Err(Error::CalibrationFailed)` - If no ranging result was valid; the previous
    ///   offsets are programmed again
    /// * `Err(Error::Timeout)` - If a ranging cycle did not complete
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PresetMode, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// // White target at 100 mm
    /// let offset_mm = sensor.perform_offset_calibration(100).unwrap();
    /// println!("Offset: {} mm", offset_mm);
    ///
    /// // Calibrations leave no preset mode behind
    /// sensor.set_preset_mode(PresetMode::LiteRanging).unwrap();
    /// ```
    pub async fn perform_offset_calibration(
        &mut self,
        cal_distance_mm: i32,
    ) -> Result<i16, Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let target_mm = match i16::try_from(cal_distance_mm) {
            Ok(target_mm) if target_mm > 0 => target_mm,
            _ => {
                error!("Invalid calibration distance: {} mm", cal_distance_mm);
                return Err(Error::InvalidParams);
            }
        };
        info!("Offset calibration at {} mm", target_mm);

        let result = self.run_offset_calibration(target_mm).await;
        self.finish_calibration(result)
    }

    async fn run_offset_calibration(&mut self, target_mm: i16) -> Result<i16, Error<E>> {
        self.enter_calibration(SequenceSteps::CALIBRATION).await?;
        self.write_offsets(0, 0, 0).await?;

        let offset_mm = match self.measure_offset(target_mm).await {
            Err(Error::CalibrationFailed) => {
                let data = self.calibration.unwrap_or_default();
                self.write_offsets(data.offset_mm, data.inner_offset_mm, data.outer_offset_mm)
                    .await?;
                return Err(Error::CalibrationFailed);
            }
            result => result?,
        };

        self.write_offsets(offset_mm, 0, 0).await?;
        let mut data = self.calibration.unwrap_or_default();
        data.offset_mm = offset_mm;
        data.inner_offset_mm = 0;
        data.outer_offset_mm = 0;
        self.calibration = Some(data);
        Ok(offset_mm)
    }

    /// Ranges with the offsets cleared and returns the offset that brings the mean valid
    /// range to `target_mm`.
    async fn measure_offset(&mut self, target_mm: i16) -> Result<i16, Error<E>> {
        for _ in 0..OFFSET_WARMUP_CYCLES {
            self.single_shot().await?;
        }

        let mut sum: i32 = 0;
        let mut samples: i32 = 0;
        for _ in 0..OFFSET_SAMPLE_CYCLES {
            let raw = self.single_shot().await?;
            if raw.status().is_valid() {
                sum += i32::from(raw.range_mm);
                samples += 1;
            }
        }
        if samples == 0 {
            error!("Offset calibration: no valid range");
            return Err(Error::CalibrationFailed);
        }

        let mean_mm = sum / samples;
        // The register holds a quarter-mm value.
        let offset_mm = i16::try_from(i32::from(target_mm) - mean_mm)
            .ok()
            .filter(|offset| (i16::MIN / 4..=i16::MAX / 4).contains(offset))
            .ok_or_else(|| {
                error!("Offset out of range (mean {} mm)", mean_mm);
                Error::CalibrationFailed
            })?;
        info!("Offset: {} mm (mean {} mm)", offset_mm, mean_mm);
        Ok(offset_mm)
    }

    /// Calibrates cross-talk compensation without a target in the field of view.
    ///
    /// Measures the return rate per SPAD with compensation off, programs it as the plane
    /// offset (zero gradients) and enables compensation. Returns the plane offset in 7.9
    /// kcps per SPAD.
    ///
    /// # Arguments
    ///
    /// * `option` - 0 for a single cycle, 1 for an average over 8 cycles, see
    ///   [`XTalkCalibrationOption`]
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `option` is unknown
    /// * `Err(Error::CalibrationFailed)` - If no result used any SPAD or the rate does not fit
    ///   the register; the previous compensation is restored
    /// * `Err(Error::Timeout)` - If a ranging cycle did not complete
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{PresetMode, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// // No target in the field of view
    /// sensor.perform_xtalk_calibration(1).unwrap();
    /// sensor.set_preset_mode(PresetMode::LiteRanging).unwrap();
    /// assert_eq!(sensor.get_xtalk_compensation_enable(), Ok(true));
    /// ```
    pub async fn perform_xtalk_calibration(&mut self, option: u8) -> Result<u16, Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let option = XTalkCalibrationOption::try_from(option).map_err(|option| {
            error!("Unknown cross-talk calibration option: {}", option);
            Error::InvalidParams
        })?;
        info!("Cross-talk calibration over {} cycles", option.cycles());

        let result = self.run_xtalk_calibration(option).await;
        self.finish_calibration(result)
    }

    async fn run_xtalk_calibration(
        &mut self,
        option: XTalkCalibrationOption,
    ) -> Result<u16, Error<E>> {
        let was_enabled = self.xtalk_compensation_enabled;
        self.enter_calibration(SequenceSteps::CALIBRATION).await?;
        self.write_xtalk(0, 0, 0).await?;
        self.xtalk_compensation_enabled = false;

        let plane_offset = match self.measure_xtalk(option).await {
            Err(Error::CalibrationFailed) => {
                if was_enabled {
                    self.set_xtalk_compensation_enable(true).await?;
                }
                return Err(Error::CalibrationFailed);
            }
            result => result?,
        };

        self.write_xtalk(plane_offset, 0, 0).await?;
        let mut data = self.calibration.unwrap_or_default();
        data.xtalk_plane_offset_kcps = plane_offset;
        data.xtalk_x_plane_gradient_kcps = 0;
        data.xtalk_y_plane_gradient_kcps = 0;
        self.calibration = Some(data);
        self.xtalk_compensation_enabled = true;
        info!("Cross-talk plane offset: {}", plane_offset);
        Ok(plane_offset)
    }

    /// Average return rate per SPAD in 7.9 kcps.
    async fn measure_xtalk(&mut self, option: XTalkCalibrationOption) -> Result<u16, Error<E>> {
        let mut sum: u64 = 0;
        let mut samples: u64 = 0;
        for _ in 0..option.cycles() {
            let raw = self.single_shot().await?;
            let spads = u64::from(raw.effective_spads >> 8);
            if spads == 0 {
                continue;
            }
            // 9.7 Mcps to 7.9 kcps: x 1000 x 4.
            sum += u64::from(raw.peak_signal_rate) * 4_000 / spads;
            samples += 1;
        }
        if samples == 0 {
            error!("Cross-talk calibration: no SPAD returned a signal");
            return Err(Error::CalibrationFailed);
        }
        u16::try_from(sum / samples).map_err(|_| {
            error!("Cross-talk rate out of range");
            Error::CalibrationFailed
        })
    }

    /// Finds the smallest number of reference SPADs that reaches the reference rate.
    ///
    /// Locations are tried in order; for each, the count is binary searched with
    /// reference-phase-only ranging. The first location that can reach the rate wins. The
    /// result is programmed, cached (see [`ref_spad_info`](Self::ref_spad_info)) and must be
    /// searched again after a reset.
    ///
    /// # Errors
    ///
    /// * `Err(Error::CalibrationFailed)` - If no location reaches the reference rate; the
    ///   previous reference SPAD selection is programmed again
    /// * `Err(Error::Timeout)` - If a ranging cycle did not complete
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
    /// let info = sensor.perform_ref_spad_management().unwrap();
    /// println!("{} reference SPADs at location {}", info.count, info.location);
    /// ```
    pub async fn perform_ref_spad_management(&mut self) -> Result<RefSpadInfo, Error<E>> {
        self.check_state(&[PalState::Idle])?;
        info!("Reference SPAD search");
        let result = self.run_ref_spad_management().await;
        self.finish_calibration(result)
    }

    async fn run_ref_spad_management(&mut self) -> Result<RefSpadInfo, Error<E>> {
        let previous = RefSpadInfo {
            count: self
                .read_byte(Register::RefSpadManNumRequestedRefSpads)
                .await?,
            location: self.read_byte(Register::RefSpadManRefLocation).await?,
        };
        self.enter_calibration(SequenceSteps::REFERENCE_ONLY).await?;

        for location in 0..REF_SPAD_LOCATIONS {
            if !self.reference_rate_reached(REF_SPAD_MAX_COUNT, location).await? {
                debug!("Reference location {} too weak", location);
                continue;
            }

            let mut low = 1;
            let mut high = REF_SPAD_MAX_COUNT;
            while low < high {
                let mid = low + (high - low) / 2;
                if self.reference_rate_reached(mid, location).await? {
                    high = mid;
                } else {
                    low = mid + 1;
                }
            }

            let info = RefSpadInfo {
                count: low,
                location,
            };
            self.program_ref_spads(info).await?;
            self.ref_spad = Some(info);
            info!("Reference SPADs: {} at location {}", info.count, info.location);
            return Ok(info);
        }

        error!("Reference rate not reached");
        self.program_ref_spads(previous).await?;
        Err(Error::CalibrationFailed)
    }

    async fn reference_rate_reached(&mut self, count: u8, location: u8) -> Result<bool, Error<E>> {
        self.program_ref_spads(RefSpadInfo { count, location })
            .await?;
        let raw = self.single_shot().await?;
        trace!("{} reference SPADs: {}", count, raw.peak_signal_rate);
        Ok(raw.peak_signal_rate >= REF_SPAD_TARGET_RATE)
    }

    async fn program_ref_spads(&mut self, info: RefSpadInfo) -> Result<(), Error<E>> {
        self.write_byte(Register::RefSpadManNumRequestedRefSpads, info.count)
            .await?;
        self.write_byte(Register::RefSpadManRefLocation, info.location)
            .await
    }

    /// Switches to the calibration sequence steps, with lite ranging timing.
    async fn enter_calibration(&mut self, steps: SequenceSteps) -> Result<(), Error<E>> {
        self.preset_mode = None;
        let timing = self.calibration_timing(steps)?;
        self.write_timing(steps, &timing).await?;
        self.sequence_steps = steps;
        Ok(())
    }

    fn calibration_timing(&self, steps: SequenceSteps) -> Result<TimingConfig, Error<E>> {
        PresetMode::LiteRanging
            .parameters()
            .and_then(|parameters| {
                compute_timing(
                    self.timing_budget_us,
                    &parameters,
                    steps,
                    self.oscillator.fast_osc_frequency,
                )
            })
            .ok_or(Error::InvalidParams)
    }

    /// One ranging cycle: start, wait, read, acknowledge.
    async fn single_shot(&mut self) -> Result<RawResult, Error<E>> {
        self.write_block(
            Register::SystemInterruptClear,
            &[INTERRUPT_CLEAR_RANGE, MODE_START_SINGLE_SHOT],
        )
            .await?;
        self.poll_data_ready(self.timeouts.range_completion_ms)
            .await?;
        let raw = self.read_raw_result().await?;
        self.clear_interrupt().await?;
        Ok(raw)
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) async fn read_calibration_data(&mut self) -> Result<CalibrationData, Error<E>> {
        let offset = self.read_word(Register::AlgoPartToPartRangeOffsetMm).await?;
        let inner = self.read_word(Register::MmConfigInnerOffsetMm).await?;
        let outer = self.read_word(Register::MmConfigOuterOffsetMm).await?;
        let plane = self
            .read_word(Register::AlgoCrosstalkCompensationPlaneOffsetKcps)
            .await?;
        let x_gradient = self
            .read_word(Register::AlgoCrosstalkCompensationXPlaneGradientKcps)
            .await?;
        let y_gradient = self
            .read_word(Register::AlgoCrosstalkCompensationYPlaneGradientKcps)
            .await?;

        Ok(CalibrationData {
            offset_mm: (offset as i16) / 4,
            inner_offset_mm: inner as i16,
            outer_offset_mm: outer as i16,
            xtalk_plane_offset_kcps: plane,
            xtalk_x_plane_gradient_kcps: x_gradient as i16,
            xtalk_y_plane_gradient_kcps: y_gradient as i16,
        })
    }

    pub(crate) async fn write_calibration_data(
        &mut self,
        data: &CalibrationData,
        xtalk_enabled: bool,
    ) -> Result<(), Error<E>> {
        self.write_offsets(data.offset_mm, data.inner_offset_mm, data.outer_offset_mm)
            .await?;
        if xtalk_enabled {
            self.write_xtalk(
                data.xtalk_plane_offset_kcps,
                data.xtalk_x_plane_gradient_kcps,
                data.xtalk_y_plane_gradient_kcps,
            )
            .await?;
        } else {
            self.write_xtalk(0, 0, 0).await?;
        }
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    async fn write_offsets(
        &mut self,
        offset_mm: i16,
        inner_mm: i16,
        outer_mm: i16,
    ) -> Result<(), Error<E>> {
        self.write_word(
            Register::AlgoPartToPartRangeOffsetMm,
            offset_mm.saturating_mul(4) as u16,
        )
        .await?;
        self.write_word(Register::MmConfigInnerOffsetMm, inner_mm as u16)
            .await?;
        self.write_word(Register::MmConfigOuterOffsetMm, outer_mm as u16)
            .await
    }

    #[allow(clippy::cast_sign_loss)]
    async fn write_xtalk(
        &mut self,
        plane_offset: u16,
        x_gradient: i16,
        y_gradient: i16,
    ) -> Result<(), Error<E>> {
        self.write_word(Register::AlgoCrosstalkCompensationPlaneOffsetKcps, plane_offset)
            .await?;
        self.write_word(
            Register::AlgoCrosstalkCompensationXPlaneGradientKcps,
            x_gradient as u16,
        )
        .await?;
        self.write_word(
            Register::AlgoCrosstalkCompensationYPlaneGradientKcps,
            y_gradient as u16,
        )
        .await
    }
}
