//! Register map and fixed register contents of the VL53L1.

/// Register addresses used by the driver.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// Soft reset control (0x0000)
    SoftReset = 0x0000,
    /// I2C slave device address (0x0001)
    I2cSlaveDeviceAddress = 0x0001,
    /// Measured fast oscillator frequency, 4.12 MHz (0x0006)
    OscMeasuredFastOscFrequency = 0x0006,
    /// VHV timeout macro loop bound (0x0008)
    VhvConfigTimeoutMacropLoopBound = 0x0008,
    /// VHV init control (0x000B)
    VhvConfigInit = 0x000B,
    /// Requested number of reference SPADs (0x0014)
    RefSpadManNumRequestedRefSpads = 0x0014,
    /// Reference SPAD location (0x0015)
    RefSpadManRefLocation = 0x0015,
    /// Cross-talk plane offset, 7.9 kcps (0x0016)
    AlgoCrosstalkCompensationPlaneOffsetKcps = 0x0016,
    /// Cross-talk X plane gradient (0x0018)
    AlgoCrosstalkCompensationXPlaneGradientKcps = 0x0018,
    /// Cross-talk Y plane gradient (0x001A)
    AlgoCrosstalkCompensationYPlaneGradientKcps = 0x001A,
    /// Part to part range offset, 14.2 mm (0x001E)
    AlgoPartToPartRangeOffsetMm = 0x001E,
    /// Inner offset, mm (0x0020)
    MmConfigInnerOffsetMm = 0x0020,
    /// Outer offset, mm (0x0022)
    MmConfigOuterOffsetMm = 0x0022,
    /// GPIO HV mux control (0x0030)
    GpioHvMuxCtrl = 0x0030,
    /// GPIO TIO HV status (0x0031)
    GpioTioHvStatus = 0x0031,
    /// Phase calibration timeout, macro periods (0x004B)
    PhasecalConfigTimeoutMacrop = 0x004B,
    /// MM timeout A (0x005A)
    MmConfigTimeoutMacropAHi = 0x005A,
    /// MM timeout B (0x005C)
    MmConfigTimeoutMacropBHi = 0x005C,
    /// Range timeout A (0x005E)
    RangeConfigTimeoutMacropAHi = 0x005E,
    /// VCSEL period A (0x0060)
    RangeConfigVcselPeriodA = 0x0060,
    /// Range timeout B (0x0061)
    RangeConfigTimeoutMacropBHi = 0x0061,
    /// VCSEL period B (0x0063)
    RangeConfigVcselPeriodB = 0x0063,
    /// Sigma threshold, 14.2 mm (0x0064)
    RangeConfigSigmaThresh = 0x0064,
    /// Minimum return signal rate, 9.7 Mcps (0x0066)
    RangeConfigMinCountRateRtnLimitMcps = 0x0066,
    /// Inter-measurement period, oscillator ticks (0x006C)
    SystemIntermeasurementPeriod = 0x006C,
    /// User ROI centre SPAD (0x007F)
    RoiConfigUserRoiCentreSpad = 0x007F,
    /// User ROI size, `(height - 1) << 4 | (width - 1)` (0x0080)
    RoiConfigUserRoiRequestedGlobalXySize = 0x0080,
    /// Sequence step enables, one bit per step (0x0081)
    SystemSequenceConfig = 0x0081,
    /// Interrupt clear (0x0086)
    SystemInterruptClear = 0x0086,
    /// Measurement mode start (0x0087)
    SystemModeStart = 0x0087,
    /// First byte of the result block (0x0089)
    ResultRangeStatus = 0x0089,
    /// Oscillator calibration value (0x00DE)
    ResultOscCalibrateVal = 0x00DE,
    /// Firmware system status (0x00E5)
    FirmwareSystemStatus = 0x00E5,
    /// Model id and module type (0x010F)
    IdentificationModelId = 0x010F,
    /// Silicon revision (0x0111)
    IdentificationRevisionId = 0x0111,
}

impl From<Register> for u16 {
    fn from(r: Register) -> Self {
        r as u16
    }
}

/// Expected content of [`Register::IdentificationModelId`] (model id, module type).
pub(crate) const MODEL_ID: u16 = 0xEACC;

/// `FIRMWARE__SYSTEM_STATUS` bits.
pub(crate) const FIRMWARE_BOOTED: u8 = 0x01;
pub(crate) const FIRMWARE_READY: u8 = 0x02;

/// `VHV_CONFIG__INIT` after a static init: restart VHV from the previous temperature.
/// The value after a reset is non-zero.
pub(crate) const VHV_INIT_FROM_PREVIOUS: u8 = 0x00;

/// `SYSTEM__MODE_START` values.
pub(crate) const MODE_START_STOP: u8 = 0x00;
pub(crate) const MODE_START_SINGLE_SHOT: u8 = 0x10;
pub(crate) const MODE_START_TIMED: u8 = 0x40;

/// `SYSTEM__INTERRUPT_CLEAR` value acknowledging a range result.
pub(crate) const INTERRUPT_CLEAR_RANGE: u8 = 0x01;

/// Length of the result block starting at [`Register::ResultRangeStatus`].
pub(crate) const RESULT_BLOCK_LEN: usize = 17;

/// Offsets inside the result block.
pub(crate) mod result_offset {
    pub(crate) const RANGE_STATUS: usize = 0;
    pub(crate) const STREAM_COUNT: usize = 2;
    pub(crate) const EFFECTIVE_SPADS: usize = 3;
    pub(crate) const PEAK_SIGNAL_RATE: usize = 5;
    pub(crate) const AMBIENT_RATE: usize = 7;
    pub(crate) const SIGMA: usize = 9;
    pub(crate) const RANGE_MM: usize = 13;
    pub(crate) const CORRECTED_SIGNAL_RATE: usize = 15;
}

/// First register written by the default configuration block.
pub(crate) const DEFAULT_CONFIGURATION_START: u16 = 0x002D;

// Default register contents for 0x2D..=0x87 (lite ranging, 100 kHz I2C,
// active-high new-sample-ready interrupt, ranging stopped).
pub(crate) const DEFAULT_CONFIGURATION: [u8; 91] = [
    0x00, /* 0x2d */
    0x00, /* 0x2e */
    0x00, /* 0x2f */
    0x01, /* 0x30 */
    0x02, /* 0x31 */
    0x00, /* 0x32 */
    0x02, /* 0x33 */
    0x08, /* 0x34 */
    0x00, /* 0x35 */
    0x08, /* 0x36 */
    0x10, /* 0x37 */
    0x01, /* 0x38 */
    0x01, /* 0x39 */
    0x00, /* 0x3a */
    0x00, /* 0x3b */
    0x00, /* 0x3c */
    0x00, /* 0x3d */
    0xff, /* 0x3e */
    0x00, /* 0x3f */
    0x0F, /* 0x40 */
    0x00, /* 0x41 */
    0x00, /* 0x42 */
    0x00, /* 0x43 */
    0x00, /* 0x44 */
    0x00, /* 0x45 */
    0x20, /* 0x46 */
    0x0b, /* 0x47 */
    0x00, /* 0x48 */
    0x00, /* 0x49 */
    0x02, /* 0x4a */
    0x0a, /* 0x4b */
    0x21, /* 0x4c */
    0x00, /* 0x4d */
    0x00, /* 0x4e */
    0x05, /* 0x4f */
    0x00, /* 0x50 */
    0x00, /* 0x51 */
    0x00, /* 0x52 */
    0x00, /* 0x53 */
    0xc8, /* 0x54 */
    0x00, /* 0x55 */
    0x00, /* 0x56 */
    0x38, /* 0x57 */
    0xff, /* 0x58 */
    0x01, /* 0x59 */
    0x00, /* 0x5a */
    0x08, /* 0x5b */
    0x00, /* 0x5c */
    0x00, /* 0x5d */
    0x01, /* 0x5e */
    0xcc, /* 0x5f */
    0x0f, /* 0x60 */
    0x01, /* 0x61 */
    0xf1, /* 0x62 */
    0x0d, /* 0x63 */
    0x01, /* 0x64 */
    0x68, /* 0x65 */
    0x00, /* 0x66 */
    0x80, /* 0x67 */
    0x08, /* 0x68 */
    0xb8, /* 0x69 */
    0x00, /* 0x6a */
    0x00, /* 0x6b */
    0x00, /* 0x6c */
    0x00, /* 0x6d */
    0x0f, /* 0x6e */
    0x89, /* 0x6f */
    0x00, /* 0x70 */
    0x00, /* 0x71 */
    0x00, /* 0x72 */
    0x00, /* 0x73 */
    0x00, /* 0x74 */
    0x00, /* 0x75 */
    0x00, /* 0x76 */
    0x01, /* 0x77 */
    0x0f, /* 0x78 */
    0x0d, /* 0x79 */
    0x0e, /* 0x7a */
    0x0e, /* 0x7b */
    0x00, /* 0x7c */
    0x00, /* 0x7d */
    0x02, /* 0x7e */
    0xc7, /* 0x7f */
    0xff, /* 0x80 */
    0x9B, /* 0x81 */
    0x00, /* 0x82 */
    0x00, /* 0x83 */
    0x00, /* 0x84 */
    0x01, /* 0x85 */
    0x00, /* 0x86 */
    0x00, /* 0x87 */
];

/// VCSEL period A as programmed by [`DEFAULT_CONFIGURATION`] (register 0x60).
pub(crate) const DEFAULT_VCSEL_PERIOD_A: u8 = DEFAULT_CONFIGURATION[0x60 - 0x2D];
/// VCSEL period B as programmed by [`DEFAULT_CONFIGURATION`] (register 0x63).
pub(crate) const DEFAULT_VCSEL_PERIOD_B: u8 = DEFAULT_CONFIGURATION[0x63 - 0x2D];
