//! Region of interest on the 16x16 receive SPAD array.

use crate::register::Register;
use crate::{DelayNs, Error, I2c, PalState, VL53L1};

/// Rectangle of the receive array used for ranging.
///
/// Coordinates are SPAD columns (x, left to right) and rows (y, bottom to top) in
/// `0..16`. The top-left corner is strictly above and left of the bottom-right one and
/// the rectangle spans at least 4x4 SPADs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Roi {
    /// Left column
    pub top_left_x: u8,
    /// Top row
    pub top_left_y: u8,
    /// Right column
    pub bot_right_x: u8,
    /// Bottom row
    pub bot_right_y: u8,
}

impl Roi {
    /// Number of SPADs along each side of the array.
    pub const GRID_SIZE: u8 = 16;
    /// Smallest accepted width and height.
    pub const MIN_SIZE: u8 = 4;
    /// The whole array.
    pub const FULL: Roi = Roi::new(0, 15, 15, 0);

    /// Builds a rectangle from its corners. See [`is_valid`](Self::is_valid).
    #[must_use]
    pub const fn new(top_left_x: u8, top_left_y: u8, bot_right_x: u8, bot_right_y: u8) -> Self {
        Self {
            top_left_x,
            top_left_y,
            bot_right_x,
            bot_right_y,
        }
    }

    /// `true` if the rectangle lies on the array, is not inverted and spans at least 4x4.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.bot_right_x < Self::GRID_SIZE
            && self.top_left_y < Self::GRID_SIZE
            && self.top_left_x < self.bot_right_x
            && self.top_left_y > self.bot_right_y
            && self.bot_right_x - self.top_left_x + 1 >= Self::MIN_SIZE
            && self.top_left_y - self.bot_right_y + 1 >= Self::MIN_SIZE
    }

    fn width(&self) -> u8 {
        self.bot_right_x - self.top_left_x + 1
    }

    fn height(&self) -> u8 {
        self.top_left_y - self.bot_right_y + 1
    }

    /// Index of the SPAD closest to the centre, in the device's numbering.
    pub(crate) fn centre_spad(&self) -> u8 {
        let column = (self.top_left_x + self.bot_right_x + 1) / 2;
        let row = (self.top_left_y + self.bot_right_y + 1) / 2;
        if row > 7 {
            128 + (column << 3) + (15 - row)
        } else {
            ((15 - column) << 3) + row
        }
    }

    /// `(height - 1) << 4 | (width - 1)`.
    pub(crate) fn xy_size(&self) -> u8 {
        ((self.height() - 1) << 4) | (self.width() - 1)
    }
}

impl Default for Roi {
    fn default() -> Self {
        Self::FULL
    }
}

impl<I2C, E, D> VL53L1<I2C, D>
where
    I2C: I2c<Error = E>,
    E: core::fmt::Debug,
{
    /// Returns the region of interest exactly as last set.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_roi(&self) -> Result<Roi, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.roi)
    }

    /// Number of regions of interest ranged per cycle in the active mode.
    ///
    /// # Errors
    ///
    /// * `Err(Error::ModeNotSupported)` - If no preset mode is active
    /// * `Err(Error::InvalidState)` - If the device is not initialized
    pub fn get_max_number_of_roi(&self) -> Result<u8, Error<E>> {
        self.check_state(&[PalState::Idle, PalState::Running])?;
        Ok(self.active_mode_parameters()?.max_number_of_roi)
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
    /// Sets the region of interest.
    ///
    /// # Errors
    ///
    /// * `Err(Error::InvalidParams)` - If `roi` is off the array, inverted or smaller than
    ///   4x4; the previous region stays in effect
    /// * `Err(Error::InvalidState)` - If not called in [`PalState::Idle`]
    /// * `Err(Error::I2cError(E))` - If there was an I2C communication error
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use vl53l1_pal::{Roi, VL53L1};
    ///
    /// let i2c = embedded_hal_mock::eh1::i2c::Mock::new(&[]);
    /// let delay = embedded_hal_mock::eh1::delay::NoopDelay;
    /// let mut sensor = VL53L1::new(i2c, delay);
    /// sensor.wait_device_booted().unwrap();
    /// sensor.data_init().unwrap();
    /// sensor.static_init().unwrap();
    ///
    /// // Central 8x8 SPADs
    /// sensor.set_roi(Roi::new(4, 11, 11, 4)).unwrap();
    /// ```
    pub async fn set_roi(&mut self, roi: Roi) -> Result<(), Error<E>> {
        self.check_state(&[PalState::Idle])?;
        if !roi.is_valid() {
            error!(
                "Invalid ROI: ({}, {}) - ({}, {})",
                roi.top_left_x,
                roi.top_left_y,
                roi.bot_right_x,
                roi.bot_right_y
            );
            return Err(Error::InvalidParams);
        }
        self.write_roi(roi).await?;
        self.roi = roi;
        Ok(())
    }

    pub(crate) async fn write_roi(&mut self, roi: Roi) -> Result<(), Error<E>> {
        debug!("ROI centre {}, size {}", roi.centre_spad(), roi.xy_size());
        self.write_byte(Register::RoiConfigUserRoiCentreSpad, roi.centre_spad())
            .await?;
        self.write_byte(Register::RoiConfigUserRoiRequestedGlobalXySize, roi.xy_size())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_array_matches_the_default_configuration() {
        assert!(Roi::FULL.is_valid());
        assert_eq!(Roi::FULL.centre_spad(), 0xC7);
        assert_eq!(Roi::FULL.xy_size(), 0xFF);
    }

    #[test]
    fn small_centred_roi() {
        // 4x4 around the middle of the array.
        let roi = Roi::new(6, 9, 9, 6);
        assert!(roi.is_valid());
        assert_eq!(roi.xy_size(), 0x33);
        // Centre column 8, row 8.
        assert_eq!(roi.centre_spad(), 128 + (8 << 3) + 7);

        // Lower half of the array uses the other numbering.
        let low = Roi::new(0, 5, 4, 0);
        assert_eq!(low.centre_spad(), ((15 - 2) << 3) + 3);
    }

    #[test]
    fn malformed_rectangles_are_invalid() {
        // Too narrow, too short.
        assert!(!Roi::new(0, 15, 2, 0).is_valid());
        assert!(!Roi::new(0, 3, 15, 1).is_valid());
        // Inverted.
        assert!(!Roi::new(15, 15, 0, 0).is_valid());
        assert!(!Roi::new(0, 0, 15, 15).is_valid());
        // Off the array.
        assert!(!Roi::new(0, 16, 15, 0).is_valid());
        assert!(!Roi::new(12, 15, 16, 0).is_valid());
        // Degenerate.
        assert!(!Roi::new(5, 5, 5, 5).is_valid());
    }

    #[cfg(not(feature = "async"))]
    mod device {
        use super::*;
        use crate::sim;

        #[test]
        fn set_then_get_returns_the_same_rectangle() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            for roi in [
                Roi::new(0, 15, 3, 12),
                Roi::new(12, 3, 15, 0),
                Roi::new(3, 12, 12, 3),
                Roi::new(1, 14, 14, 1),
                Roi::FULL,
            ] {
                sensor.set_roi(roi).unwrap();
                assert_eq!(sensor.get_roi(), Ok(roi));
                assert_eq!(
                    device.state().peek(Register::RoiConfigUserRoiCentreSpad as u16),
                    roi.centre_spad()
                );
                assert_eq!(
                    device.state().peek(Register::RoiConfigUserRoiRequestedGlobalXySize as u16),
                    roi.xy_size()
                );
            }
        }

        #[test]
        fn rejected_rectangle_keeps_the_previous_one() {
            let (mut sensor, device, _delay) = sim::idle_sensor();
            let previous = Roi::new(4, 11, 11, 4);
            sensor.set_roi(previous).unwrap();

            for roi in [Roi::new(0, 15, 2, 0), Roi::new(15, 15, 0, 0), Roi::new(0, 16, 15, 0)] {
                assert_eq!(sensor.set_roi(roi), Err(Error::InvalidParams));
                assert_eq!(sensor.get_roi(), Ok(previous));
            }
            assert_eq!(
                device.state().peek(Register::RoiConfigUserRoiRequestedGlobalXySize as u16),
                previous.xy_size()
            );
        }

        #[test]
        fn lite_ranging_has_a_single_roi() {
            let (sensor, _device, _delay) = sim::idle_sensor();
            assert_eq!(sensor.get_max_number_of_roi(), Ok(1));
        }
    }
}
