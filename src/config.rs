//! Preset mode, timing budget and inter-measurement period.

use crate::register::{Register, DEFAULT_VCSEL_PERIOD_A, DEFAULT_VCSEL_PERIOD_B};
use crate::sequence::{SequenceStep, SequenceSteps};
use crate::{DelayNs, Error, I2c, PalState, VL53L1};

/// Upper bound of the timing budget for every mode, in µs.
pub const MAX_TIMING_BUDGET_US: u32 = 10_000_000;

/// Timing budget applied by [`VL53L1::set_preset_mode`], in µs.
pub const DEFAULT_TIMING_BUDGET_US: u32 = 16_000;

/// Inter-measurement period applied by [`VL53L1::set_preset_mode`], in ms.
pub const DEFAULT_INTER_MEASUREMENT_PERIOD_MS: u32 = 1_000;

// Oscillator ticks per ms are scaled by 1.075 to get the period register value.
const INTER_MEASUREMENT_FACTOR_PER_MILLE: u64 = 1_075;

/// Device operating mode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PresetMode {
    /// Standard ranging
    Ranging = 1,
    /// Multi-zone scanning
    MultiZonesScanning = 2,
    /// Autonomous ranging
    Autonomous = 3,
    /// Lite ranging, the only mode this driver supports
    LiteRanging = 4,
    /// Low power autonomous ranging
    LowPowerAutonomous = 8,
}

/// Per-mode limits and constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ModeParameters {
    pub min_timing_budget_us: u32,
    /// Part of the budget not available to any sequence step.
    pub timing_guard_us: u32,
    pub min_inter_measurement_period_ms: u32,
    pub max_inter_measurement_period_ms: u32,
    pub max_number_of_roi: u8,
}

const LITE_RANGING: ModeParameters = ModeParameters {
    min_timing_budget_us: 8_000,
    timing_guard_us: 2_000,
    min_inter_measurement_period_ms: 10,
    max_inter_measurement_period_ms: 60_000,
    max_number_of_roi: 1,
};

impl PresetMode {
    /// `true` if the driver can run the device in this mode.
    #[must_use]
    pub const fn is_supported(self) -> bool {
        self.parameters().is_some()
    }

    pub(crate) const fn parameters(self) -> Option<ModeParameters> {
        match self {
            PresetMode::LiteRanging => Some(LITE_RANGING),
            PresetMode::Ranging
            | PresetMode::MultiZonesScanning
            | PresetMode::Autonomous
            | PresetMode::LowPowerAutonomous => None,
        }
    }
}

/// Ranging cadence used by [`VL53L1::start_measurement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MeasurementMode {
    /// One ranging per start (or per clear-and-start)
    SingleShot,
    /// Back-to-back ranging paced by the inter-measurement period
    Continuous,
}

impl MeasurementMode {
    pub(crate) const fn mode_start(self) -> u8 {
        match self {
            MeasurementMode::SingleShot => crate::register::MODE_START_SINGLE_SHOT,
            MeasurementMode::Continuous => crate::register::MODE_START_TIMED,
        }
    }
}

/// Bounds of every polling loop in the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    /// Wait for firmware boot and for firmware ready at measurement start
    pub boot_ms: u32,
    /// Wait for one ranging cycle to complete
    pub range_completion_ms: u32,
    /// Delay between two polls
    pub polling_delay_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            boot_ms: 500,
            range_completion_ms: 2_000,
            polling_delay_ms: 1,
        }
    }
}

impl Timeouts {
    /// Number of polls that fit in `timeout_ms`, at least one.
    pub(crate) fn max_polls(&self, timeout_ms: u32) -> u32 {
        (timeout_ms / self.polling_delay_ms.max(1)).max(1)
    }
}

/// Oscillator trims read at static init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Oscillator {
    /// 4.12 MHz
    pub fast_osc_frequency: u16,
    pub osc_calibrate_val: u16,
}

/// Register values derived from a timing budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimingConfig {
    pub phasecal_us: u32,
    pub mm_us: u32,
    pub range_us: u32,
    pub phasecal_timeout: u8,
    pub mm_timeout_a: u16,
    pub mm_timeout_b: u16,
    pub range_timeout_a: u16,
    pub range_timeout_b: u16,
}

/// Splits `budget_us` over the enabled steps and encodes the step timeouts.
///
/// Returns `None` when the fixed step allotments do not fit in the budget.
pub(crate) fn compute_timing(
    budget_us: u32,
    parameters: &ModeParameters,
    steps: SequenceSteps,
    fast_osc_frequency: u16,
) -> Option<TimingConfig> {
    let mut remaining = budget_us.checked_sub(parameters.timing_guard_us)?;
    let mut phasecal_us = 0;
    let mut mm_us = 0;

    for step in SequenceStep::ALL {
        if !steps.contains(step) {
            continue;
        }
        let allotment = step.allotment_us();
        remaining = remaining.checked_sub(allotment)?;
        match step {
            SequenceStep::PhaseCal => phasecal_us += allotment,
            SequenceStep::Mm1 | SequenceStep::Mm2 => mm_us += allotment,
            SequenceStep::Vhv
            | SequenceStep::RefPhase
            | SequenceStep::Dss1
            | SequenceStep::Dss2
            | SequenceStep::Range => {}
        }
    }
    let range_us = if steps.contains(SequenceStep::Range) {
        remaining
    } else {
        0
    };

    let period_a = macro_period_us(fast_osc_frequency, DEFAULT_VCSEL_PERIOD_A);
    let period_b = macro_period_us(fast_osc_frequency, DEFAULT_VCSEL_PERIOD_B);

    Some(TimingConfig {
        phasecal_us,
        mm_us,
        range_us,
        phasecal_timeout: u8::try_from(timeout_mclks(phasecal_us, period_a)).unwrap_or(u8::MAX),
        mm_timeout_a: encode_timeout(timeout_mclks(mm_us, period_a)),
        mm_timeout_b: encode_timeout(timeout_mclks(mm_us, period_b)),
        range_timeout_a: encode_timeout(timeout_mclks(range_us, period_a)),
        range_timeout_b: encode_timeout(timeout_mclks(range_us, period_b)),
    })
}

/// Macro period in 12.12 µs for a VCSEL period register value.
fn macro_period_us(fast_osc_frequency: u16, vcsel_period: u8) -> u32 {
    if fast_osc_frequency == 0 {
        return 0;
    }
    let pll_period_us = (1u64 << 30) / u64::from(fast_osc_frequency);
    let vcsel_period_pclks = (u64::from(vcsel_period) + 1) << 1;
    let mut macro_period_us = (2304 * pll_period_us) >> 6;
    macro_period_us = (macro_period_us * vcsel_period_pclks) >> 6;
    u32::try_from(macro_period_us).unwrap_or(u32::MAX)
}

fn timeout_mclks(timeout_us: u32, macro_period_us: u32) -> u32 {
    if macro_period_us == 0 {
        return 0;
    }
    let mclks = ((u64::from(timeout_us) << 12) + u64::from(macro_period_us >> 1))
        / u64::from(macro_period_us);
    u32::try_from(mclks).unwrap_or(u32::MAX)
}

/// Encodes macro periods as `(ms_byte << 8) | ls_byte`, value `ls_byte * 2^ms_byte + 1`.
fn encode_timeout(timeout_mclks: u32) -> u16 {
    if timeout_mclks == 0 {
        return 0;
    }
    let mut ls_byte = timeout_mclks - 1;
    let mut ms_byte: u16 = 0;
    while ls_byte & 0xFFFF_FF00 > 0 {
        ls_byte >>= 1;
        ms_byte += 1;
    }
    (ms_byte << 8) | (ls_byte & 0xFF) as u16
}

impl<I2C, D> VL53L1<I2C, D> {
    /// Host-only part of a preset mode change.
    pub(crate) fn apply_preset_defaults(&mut self, mode: PresetMode) {
        self.preset_mode = Some(mode);
        self.timing_budget_us = DEFAULT_TIMING_BUDGET_US;
        self.inter_measurement_period_ms = DEFAULT_INTER_MEASUREMENT_PERIOD_MS;
        self.timing_pending = true;
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Selects the preset mode.
    ///
    /// This does not access the device. It resets the timing budget to 16 ms and the
    /// inter-measurement period to 1000 ms; the registers are programmed at the next
    /// [`start_measurement`](Self::start_measurement). Set the mode first, then override
    /// the budget and period.
    ///
    /// # Errors
    ///
    /// * `Err(Error::ModeNotSupported)` - If `mode` is not [`PresetMode::LiteRanging`]
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
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
    /// sensor.set_preset_mode(PresetMode::LiteRanging).unwrap();
    /// assert_eq!(sensor.get_measurement_timing_budget_micro_seconds(), Ok(16_000));
    /// ```
    pub fn set_preset_mode(&mut self, mode: PresetMode) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        if !mode.is_supported() {
            error!("Preset mode not supported: {}", mode as u8);
            return Err(Error::ModeNotSupported);
        }
        self.apply_preset_defaults(mode);
        debug!("Preset mode: {}", mode as u8);
        Ok(())
    }

    /// Returns the active preset mode.
    ///
    /// # Errors
    ///
    /// * `Err(Error::ModeNotSupported)` - If a calibration ran since the last
    ///   [`set_preset_mode`](Self::set_preset_mode)
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_preset_mode(&self) -> Result<PresetMode, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        self.preset_mode.ok_or(Error::ModeNotSupported)
    }

    /// Selects single-shot or continuous ranging for the next start.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{MeasurementMode, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor.set_measurement_mode(MeasurementMode::SingleShot).unwrap();
    /// sensor.start_measurement().unwrap();
    /// sensor.wait_measurement_data_ready().unwrap();
    /// let data = sensor.get_ranging_measurement_data().unwrap();
    /// ```
    pub fn set_measurement_mode(&mut self, mode: MeasurementMode) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        self.measurement_mode = mode;
        Ok(())
    }

    /// Returns the measurement mode.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_measurement_mode(&self) -> Result<MeasurementMode, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.measurement_mode)
    }

    /// Returns the timing budget in µs.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_measurement_timing_budget_micro_seconds(&self) -> Result<u32, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.timing_budget_us)
    }

    /// Returns the inter-measurement period in ms.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_inter_measurement_period_milli_seconds(&self) -> Result<u32, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.inter_measurement_period_ms)
    }

    pub(crate) fn active_mode_parameters(&self) -> Result<ModeParameters, Error<E>> {
        self.preset_mode
            .and_then(PresetMode::parameters)
            .ok_or(Error::ModeNotSupported)
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
    /// Sets the time allowed for one ranging cycle.
    ///
    /// The budget, minus a fixed guard, is split over the enabled sequence steps and
    /// programmed right away. Longer budgets give more accurate and longer ranges.
    ///
    /// # Arguments
    ///
    /// * `budget_us` - From 8000 (lite ranging) to 10 000 000 µs
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `budget_us` is out of range; nothing is written
    /// * `Err(Error::ModeNotSupported)` - If no preset mode is active
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
    /// // 50 ms per ranging cycle, ranging every 100 ms
    /// sensor.set_measurement_timing_budget_micro_seconds(50_000).unwrap();
    /// sensor.set_inter_measurement_period_milli_seconds(100).unwrap();
    /// ```
    pub async fn set_measurement_timing_budget_micro_seconds(
        &mut self,
        budget_us: u32,
    ) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let parameters = self.active_mode_parameters()?;
        if !(parameters.min_timing_budget_us..=MAX_TIMING_BUDGET_US).contains(&budget_us) {
            error!("Timing budget out of range: {} us", budget_us);
            return Err(Error::InvalidParams);
        }
        let timing = compute_timing(
            budget_us,
            &parameters,
            self.sequence_steps,
            self.oscillator.fast_osc_frequency,
        )
        .ok_or(Error::InvalidParams)?;

        self.write_timing(self.sequence_steps, &timing).await?;
        self.timing_budget_us = budget_us;
        debug!("Timing budget: {} us, range step: {} us", budget_us, timing.range_us);
        Ok(())
    }

    /// Sets the delay between two ranging cycles in continuous mode.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `period_ms` is outside the mode range (10 to
    ///   60 000 ms for lite ranging); the value is never clamped
    /// * `Err(Error::ModeNotSupported)` - If no preset mode is active
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
    /// sensor.set_inter_measurement_period_milli_seconds(500).unwrap();
    /// assert_eq!(sensor.get_inter_measurement_period_milli_seconds(), Ok(500));
    /// ```
    pub async fn set_inter_measurement_period_milli_seconds(
        &mut self,
        period_ms: u32,
    ) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let parameters = self.active_mode_parameters()?;
        let range = parameters.min_inter_measurement_period_ms
            ..=parameters.max_inter_measurement_period_ms;
        if !range.contains(&period_ms) {
            error!("Inter-measurement period out of range: {} ms", period_ms);
            return Err(Error::InvalidParams);
        }
        self.write_inter_measurement_period(period_ms).await?;
        self.inter_measurement_period_ms = period_ms;
        Ok(())
    }

    pub(crate) async fn read_oscillator(&mut self) -> Result<(), Error<E>> {
        let fast_osc_frequency = self.read_word(Register::OscMeasuredFastOscFrequency).await?;
        let osc_calibrate_val = self.read_word(Register::ResultOscCalibrateVal).await? & 0x3FF;
        if fast_osc_frequency == 0 || osc_calibrate_val == 0 {
            error!(
                "Oscillator not trimmed: frequency {}, calibration {}",
                fast_osc_frequency,
                osc_calibrate_val
            );
            return Err(Error::Unknown);
        }
        self.oscillator = Oscillator {
            fast_osc_frequency,
            osc_calibrate_val,
        };
        Ok(())
    }

    /// Programs the whole host configuration.
    pub(crate) async fn program_configuration(&mut self) -> Result<(), Error<E>> {
        self.program_timing().await?;
        self.write_roi(self.roi).await?;
        self.write_limit_checks().await
    }

    /// Programs timing budget and inter-measurement period for the active mode.
    pub(crate) async fn program_timing(&mut self) -> Result<(), Error<E>> {
        let parameters = self.active_mode_parameters()?;
        let timing = compute_timing(
            self.timing_budget_us,
            &parameters,
            self.sequence_steps,
            self.oscillator.fast_osc_frequency,
        )
        .ok_or(Error::InvalidParams)?;
        self.write_timing(self.sequence_steps, &timing).await?;
        self.write_inter_measurement_period(self.inter_measurement_period_ms)
            .await?;
        self.timing_pending = false;
        Ok(())
    }

    pub(crate) async fn write_timing(
        &mut self,
        steps: SequenceSteps,
        timing: &TimingConfig,
    ) -> Result<(), Error<E>> {
        self.write_byte(Register::SystemSequenceConfig, steps.bits())
            .await?;
        self.write_byte(Register::PhasecalConfigTimeoutMacrop, timing.phasecal_timeout)
            .await?;
        self.write_word(Register::MmConfigTimeoutMacropAHi, timing.mm_timeout_a)
            .await?;
        self.write_word(Register::MmConfigTimeoutMacropBHi, timing.mm_timeout_b)
            .await?;
        self.write_word(Register::RangeConfigTimeoutMacropAHi, timing.range_timeout_a)
            .await?;
        self.write_word(Register::RangeConfigTimeoutMacropBHi, timing.range_timeout_b)
            .await?;
        Ok(())
    }

    async fn write_inter_measurement_period(&mut self, period_ms: u32) -> Result<(), Error<E>> {
        let ticks = u64::from(period_ms)
            * u64::from(self.oscillator.osc_calibrate_val)
            * INTER_MEASUREMENT_FACTOR_PER_MILLE
            / 1_000;
        let ticks = u32::try_from(ticks).map_err(|_| Error::InvalidParams)?;
        trace!("Inter-measurement period: {} ms, {} ticks", period_ms, ticks);
        self.write_dword(Register::SystemIntermeasurementPeriod, ticks)
            .await
    }
}
