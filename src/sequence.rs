//! Sequence steps: the independently enabled stages of a ranging cycle.

use crate::config::compute_timing;
use crate::register::{Register, DEFAULT_CONFIGURATION, DEFAULT_CONFIGURATION_START};
use crate::{DelayNs, Error, I2c, PalState, VL53L1};

/// Stage of the device ranging pipeline, numbered as the bits of the
/// sequence configuration register.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequenceStep {
    /// VHV (temperature) search
    Vhv = 0,
    /// Phase calibration
    PhaseCal = 1,
    /// Reference phase
    RefPhase = 2,
    /// Dynamic SPAD selection, first pass
    Dss1 = 3,
    /// Dynamic SPAD selection, second pass
    Dss2 = 4,
    /// Multi-mode, first pass
    Mm1 = 5,
    /// Multi-mode, second pass
    Mm2 = 6,
    /// Final range
    Range = 7,
}

impl SequenceStep {
    /// Every step, in register bit order.
    pub const ALL: [SequenceStep; 8] = [
        SequenceStep::Vhv,
        SequenceStep::PhaseCal,
        SequenceStep::RefPhase,
        SequenceStep::Dss1,
        SequenceStep::Dss2,
        SequenceStep::Mm1,
        SequenceStep::Mm2,
        SequenceStep::Range,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Fixed share of the timing budget taken by the step, in µs.
    /// The range step gets whatever is left.
    pub(crate) const fn allotment_us(self) -> u32 {
        match self {
            SequenceStep::Vhv | SequenceStep::Dss1 | SequenceStep::Dss2 => 250,
            SequenceStep::RefPhase => 500,
            SequenceStep::PhaseCal | SequenceStep::Mm1 | SequenceStep::Mm2 => 1_000,
            SequenceStep::Range => 0,
        }
    }
}

impl TryFrom<u8> for SequenceStep {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SequenceStep::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(value)
    }
}

impl From<SequenceStep> for u8 {
    fn from(step: SequenceStep) -> Self {
        step as u8
    }
}

/// Set of enabled steps, stored as the register bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SequenceSteps(u8);

impl SequenceSteps {
    /// Steps enabled by the default configuration.
    pub(crate) const DEFAULT: Self = Self(
        DEFAULT_CONFIGURATION
            [Register::SystemSequenceConfig as usize - DEFAULT_CONFIGURATION_START as usize],
    );

    /// Steps run by the offset and cross-talk calibrations.
    pub(crate) const CALIBRATION: Self = Self(
        SequenceStep::Vhv.bit()
            | SequenceStep::PhaseCal.bit()
            | SequenceStep::Dss1.bit()
            | SequenceStep::Dss2.bit()
            | SequenceStep::Range.bit(),
    );

    /// Steps run by the reference SPAD search.
    pub(crate) const REFERENCE_ONLY: Self = Self(SequenceStep::RefPhase.bit());

    pub(crate) const fn bits(self) -> u8 {
        self.0
    }

    pub(crate) const fn contains(self, step: SequenceStep) -> bool {
        self.0 & step.bit() != 0
    }

    #[must_use]
    pub(crate) const fn with(self, step: SequenceStep, enabled: bool) -> Self {
        if enabled {
            Self(self.0 | step.bit())
        } else {
            Self(self.0 & !step.bit())
        }
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Number of sequence steps. Does not access the device.
    pub fn get_number_of_sequence_steps(&self) -> u8 {
        // Always fits: the set is one register byte.
        #[allow(clippy::cast_possible_truncation)]
        let count = SequenceStep::ALL.len() as u8;
        count
    }

    /// Returns whether sequence step `step_id` is enabled.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `step_id` is not a [`SequenceStep`]
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_sequence_step_enable(&self, step_id: u8) -> Result<bool, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        let step = Self::sequence_step(step_id)?;
        Ok(self.sequence_steps.contains(step))
    }

    fn sequence_step(step_id: u8) -> Result<SequenceStep, Error<E>> {
        SequenceStep::try_from(step_id).map_err(|id| {
            error!("Unknown sequence step: {}", id);
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
    /// Enables or disables sequence step `step_id`.
    ///
    /// The timing budget is redistributed over the new step set and programmed
    /// immediately: a disabled step's share goes to the range step. Without an active preset
    /// mode (after a calibration) the distribution is programmed at the next start.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `step_id` is not a [`SequenceStep`]
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{SequenceStep, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// sensor
    ///     .set_sequence_step_enable(SequenceStep::Mm1.into(), false)
    ///     .unwrap();
    /// ```
    pub async fn set_sequence_step_enable(
        &mut self,
        step_id: u8,
        enabled: bool,
    ) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        let step = Self::sequence_step(step_id)?;
        let steps = self.sequence_steps.with(step, enabled);
        debug!("Sequence step {} enabled: {}", step_id, enabled);

        match self.preset_mode.and_then(|mode| mode.parameters()) {
            Some(parameters) => {
                let timing = compute_timing(
                    self.timing_budget_us,
                    &parameters,
                    steps,
                    self.oscillator.fast_osc_frequency,
                )
                .ok_or(Error::InvalidParams)?;
                self.write_timing(steps, &timing).await?;
            }
            None => self.timing_pending = true,
        }

        self.sequence_steps = steps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_steps_come_from_the_configuration_block() {
        assert_eq!(SequenceSteps::DEFAULT.bits(), 0x9B);
        assert!(SequenceSteps::DEFAULT.contains(SequenceStep::Range));
        assert!(!SequenceSteps::DEFAULT.contains(SequenceStep::Mm1));
    }

    #[test]
    fn toggling_twice_restores_the_set() {
        let steps = SequenceSteps::DEFAULT;
        for step in SequenceStep::ALL {
            let toggled = steps.with(step, !steps.contains(step));
            assert_ne!(toggled, steps);
            assert_eq!(toggled.with(step, steps.contains(step)), steps);
        }
    }

    #[test]
    fn ids_map_to_steps() {
        assert_eq!(SequenceStep::try_from(0), Ok(SequenceStep::Vhv));
        assert_eq!(SequenceStep::try_from(7), Ok(SequenceStep::Range));
        assert_eq!(SequenceStep::try_from(8), Err(8));
        assert_eq!(u8::from(SequenceStep::Mm2), 6);
    }

    #[cfg(not(feature = "async"))]
    mod device {
        use super::*;
        use crate::sim;

        #[test]
        fn disabling_and_reenabling_restores_timing_registers() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            let before = device.state().timing_registers();

            sensor
                .set_sequence_step_enable(SequenceStep::PhaseCal as u8, false)
                .unwrap();
            assert_eq!(sensor.get_sequence_step_enable(1), Ok(false));
            let disabled = device.state().timing_registers();
            assert_ne!(disabled, before);
            assert_eq!(device.state().peek(Register::SystemSequenceConfig as u16), 0x99);

            sensor
                .set_sequence_step_enable(SequenceStep::PhaseCal as u8, true)
                .unwrap();
            assert_eq!(device.state().timing_registers(), before);
            assert_eq!(sensor.get_sequence_step_enable(1), Ok(true));
        }

        #[test]
        fn unknown_step_is_rejected() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            let before = device.state().timing_registers();

            assert_eq!(sensor.set_sequence_step_enable(8, false), Err(Error::InvalidParams));
            assert_eq!(sensor.get_sequence_step_enable(200), Err(Error::InvalidParams));
            assert_eq!(device.state().timing_registers(), before);
            assert_eq!(sensor.get_number_of_sequence_steps(), 8);
        }
    }
}
