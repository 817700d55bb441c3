//! Limit checks: quality gates evaluated on every ranging result.

use crate::register::Register;
use crate::{DelayNs, Error, FixPoint1616, I2c, PalState, VL53L1};

/// Quality gate applied to every ranging result.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LimitCheck {
    /// Fails when the range sigma estimate (mm) is above the threshold
    SigmaFinalRange = 0,
    /// Fails when the return signal rate (Mcps) is below the threshold
    SignalRateFinalRange = 1,
}

impl LimitCheck {
    /// Every check, in id order.
    pub const ALL: [LimitCheck; 2] = [
        LimitCheck::SigmaFinalRange,
        LimitCheck::SignalRateFinalRange,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Bit of this check in a failure mask.
    pub(crate) const fn mask(self) -> u8 {
        1 << (self as u8)
    }

    fn violated_by(self, observed: FixPoint1616, threshold: FixPoint1616) -> bool {
        match self {
            LimitCheck::SigmaFinalRange => observed > threshold,
            LimitCheck::SignalRateFinalRange => observed < threshold,
        }
    }

    fn register(self) -> Register {
        match self {
            LimitCheck::SigmaFinalRange => Register::RangeConfigSigmaThresh,
            LimitCheck::SignalRateFinalRange => Register::RangeConfigMinCountRateRtnLimitMcps,
        }
    }

    fn encode(self, value: FixPoint1616) -> u16 {
        match self {
            LimitCheck::SigmaFinalRange => value.to_14_2(),
            LimitCheck::SignalRateFinalRange => value.to_9_7(),
        }
    }

    /// Largest threshold the register holds.
    fn max(self) -> FixPoint1616 {
        self.decode(u16::MAX)
    }

    fn decode(self, raw: u16) -> FixPoint1616 {
        match self {
            LimitCheck::SigmaFinalRange => FixPoint1616::from_14_2(raw),
            LimitCheck::SignalRateFinalRange => FixPoint1616::from_9_7(raw),
        }
    }
}

impl TryFrom<u16> for LimitCheck {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        LimitCheck::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(value)
    }
}

impl From<LimitCheck> for u16 {
    fn from(check: LimitCheck) -> Self {
        check as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LimitCheckState {
    enabled: bool,
    /// Kept while the check is disabled.
    threshold: FixPoint1616,
    last_observed: FixPoint1616,
    failed: bool,
}

/// Host copy of every limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LimitChecks([LimitCheckState; LimitCheck::ALL.len()]);

impl Default for LimitChecks {
    /// Thresholds of the default configuration: 90 mm sigma, 1 Mcps signal rate, both enabled.
    fn default() -> Self {
        let check = |threshold| LimitCheckState {
            enabled: true,
            threshold,
            last_observed: FixPoint1616::ZERO,
            failed: false,
        };
        Self([
            check(FixPoint1616::from_14_2(0x0168)),
            check(FixPoint1616::from_9_7(0x0080)),
        ])
    }
}

impl LimitChecks {
    fn get(&self, check: LimitCheck) -> &LimitCheckState {
        &self.0[check.index()]
    }

    fn get_mut(&mut self, check: LimitCheck) -> &mut LimitCheckState {
        &mut self.0[check.index()]
    }

    /// Register value for `check`: the threshold when enabled, zero otherwise.
    fn programmed(&self, check: LimitCheck) -> u16 {
        let state = self.get(check);
        if state.enabled {
            check.encode(state.threshold)
        } else {
            0
        }
    }

    /// Records one ranging result and returns the mask of failed checks.
    pub(crate) fn evaluate(
        &mut self,
        sigma_mm: FixPoint1616,
        signal_rate_mcps: FixPoint1616,
    ) -> u8 {
        let mut failures = 0;
        for check in LimitCheck::ALL {
            let observed = match check {
                LimitCheck::SigmaFinalRange => sigma_mm,
                LimitCheck::SignalRateFinalRange => signal_rate_mcps,
            };
            let state = self.get_mut(check);
            state.last_observed = observed;
            state.failed = state.enabled && check.violated_by(observed, state.threshold);
            if state.failed {
                failures |= check.mask();
            }
        }
        failures
    }

    /// Reconciles the host threshold of `check` with the value read from the device.
    ///
    /// A device value of zero means the check is off on the device: the host threshold is
    /// returned and the check is marked disabled. This mutation on read is kept on purpose,
    /// callers rely on it. Any other value becomes the host threshold unless it is just the
    /// register encoding of the current one, which is then returned unchanged.
    pub(crate) fn adopt_device_value(&mut self, check: LimitCheck, raw: u16) -> FixPoint1616 {
        let state = self.get_mut(check);
        if raw == 0 {
            state.enabled = false;
        } else if raw != check.encode(state.threshold) {
            state.threshold = check.decode(raw);
        }
        state.threshold
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Number of limit checks. Does not access the device.
    pub fn get_number_of_limit_check(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let count = LimitCheck::ALL.len() as u16;
        count
    }

    /// Returns whether limit check `check_id` is enabled.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is not below
    ///   [`get_number_of_limit_check`](Self::get_number_of_limit_check)
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_limit_check_enable(&self, check_id: u16) -> Result<bool, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        let check = Self::limit_check(check_id)?;
        Ok(self.limit_checks.get(check).enabled)
    }

    /// Value observed by limit check `check_id` on the last ranging result.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is out of range
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_limit_check_current(&self, check_id: u16) -> Result<FixPoint1616, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        let check = Self::limit_check(check_id)?;
        Ok(self.limit_checks.get(check).last_observed)
    }

    /// Returns `true` if limit check `check_id` failed on the last ranging result.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is out of range
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_limit_check_status(&self, check_id: u16) -> Result<bool, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        let check = Self::limit_check(check_id)?;
        Ok(self.limit_checks.get(check).failed)
    }

    fn limit_check(check_id: u16) -> Result<LimitCheck, Error<E>> {
        LimitCheck::try_from(check_id).map_err(|id| {
            error!("Unknown limit check: {}", id);
            Error::InvalidParams
        })
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
    /// Enables or disables limit check `check_id`.
    ///
    /// Enabling programs the stored threshold; disabling programs zero and keeps the
    /// threshold for later.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is out of range
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
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
    /// sensor
    ///     .set_limit_check_enable(LimitCheck::SignalRateFinalRange.into(), false)
    ///     .unwrap();
    /// ```
    pub async fn set_limit_check_enable(
        &mut self,
        check_id: u16,
        enable: bool,
    ) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let check = Self::limit_check(check_id)?;
        let mut checks = self.limit_checks.clone();
        checks.get_mut(check).enabled = enable;

        self.write_word(check.register(), checks.programmed(check))
            .await?;
        self.limit_checks = checks;
        debug!("Limit check {} enabled: {}", check_id, enable);
        Ok(())
    }

    /// Sets the threshold of limit check `check_id`.
    ///
    /// The threshold is programmed only while the check is enabled.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is out of range, or `value` is negative
    ///   or above the largest value the threshold register holds (16383.75 mm sigma,
    ///   511.99 Mcps signal rate)
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{FixPoint1616, LimitCheck, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// // Reject ranges with a sigma above 60 mm
    /// let sigma = LimitCheck::SigmaFinalRange.into();
    /// sensor
    ///     .set_limit_check_value(sigma, FixPoint1616::from_int(60))
    ///     .unwrap();
    /// ```
    pub async fn set_limit_check_value(
        &mut self,
        check_id: u16,
        value: FixPoint1616,
    ) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let check = Self::limit_check(check_id)?;
        if value < FixPoint1616::ZERO || value > check.max() {
            error!("Limit check {} threshold out of range: {}", check_id, value);
            return Err(Error::InvalidParams);
        }
        let mut checks = self.limit_checks.clone();
        checks.get_mut(check).threshold = value;

        if checks.get(check).enabled {
            self.write_word(check.register(), checks.programmed(check))
                .await?;
        }
        self.limit_checks = checks;
        Ok(())
    }

    /// Reads the threshold of limit check `check_id` from the device.
    ///
    /// A zero on the device returns the stored threshold and marks the check disabled. Any
    /// other device value becomes the stored threshold, as if set with
    /// [`set_limit_check_value`](Self::set_limit_check_value).
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `check_id` is out of range
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    pub async fn get_limit_check_value(&mut self, check_id: u16) -> Result<FixPoint1616, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        let check = Self::limit_check(check_id)?;
        let raw = self.read_word(check.register()).await?;
        Ok(self.limit_checks.adopt_device_value(check, raw))
    }

    pub(crate) async fn write_limit_checks(&mut self) -> Result<(), Error<E>> {
        for check in LimitCheck::ALL {
            let raw = self.limit_checks.programmed(check);
            self.write_word(check.register(), raw).await?;
        }
        Ok(())
    }
}
