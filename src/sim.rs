//! Register-level model of a VL53L1 for the unit tests.
//!
//! Keeps a register file, answers the firmware status and data-ready registers, and
//! produces a result block whenever ranging is started or re-armed. Distances honour the
//! programmed part-to-part offset; reference-phase-only runs report a rate proportional to
//! the requested reference SPAD count.

extern crate std;

use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::register::{result_offset, Register, RESULT_BLOCK_LEN};
use crate::{Timeouts, DEFAULT_I2C_ADDRESS, VL53L1};

pub(crate) const FAST_OSC_FREQUENCY: u16 = 0xB000;
pub(crate) const OSC_CALIBRATE_VAL: u16 = 0x0110;

const REGISTER_SPACE: usize = 0x200;
const REFERENCE_ONLY_SEQUENCE: u8 = 0x04;

/// What the device sees, in register units.
pub(crate) struct Scene {
    pub distance_mm: i16,
    /// 14.2 mm
    pub sigma: u16,
    /// 9.7 Mcps, cross-talk corrected
    pub signal_rate: u16,
    /// 9.7 Mcps
    pub peak_signal_rate: u16,
    /// 9.7 Mcps
    pub ambient_rate: u16,
    /// 8.8
    pub effective_spads: u16,
    /// Raw device range status
    pub device_status: u8,
    /// 9.7 Mcps per reference SPAD, by location
    pub ref_rate_per_spad: [u16; 4],
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            distance_mm: 500,
            sigma: 20 * 4,
            signal_rate: 0x0200,
            peak_signal_rate: 0x0200,
            ambient_rate: 0x0020,
            effective_spads: 10 << 8,
            device_status: 9,
            ref_rate_per_spad: [0x0040; 4],
        }
    }
}

pub(crate) struct SimState {
    regs: [u8; REGISTER_SPACE],
    address: u8,
    pub scene: Scene,
    /// Firmware status reads answered with "not booted".
    pub boot_polls: u32,
    pub status_reads: u32,
    pub firmware_ready: bool,
    /// Ranging never completes.
    pub never_ready: bool,
    /// Data-ready reads answered with "not ready" after each new result.
    pub ready_after_polls: u32,
    pending_polls: u32,
    /// Writes to this register fail with `ErrorKind::Other`.
    pub fail_writes_to: Option<u16>,
    continuous: bool,
    data_ready: bool,
    stream_count: u8,
    in_reset: bool,
}

impl SimState {
    fn new() -> Self {
        let mut state = Self {
            regs: [0; REGISTER_SPACE],
            address: DEFAULT_I2C_ADDRESS,
            scene: Scene::default(),
            boot_polls: 0,
            status_reads: 0,
            firmware_ready: true,
            never_ready: false,
            ready_after_polls: 0,
            pending_polls: 0,
            fail_writes_to: None,
            continuous: false,
            data_ready: false,
            stream_count: 0,
            in_reset: false,
        };
        state.power_on();
        state
    }

    /// Register contents after power-on or a soft reset.
    fn power_on(&mut self) {
        self.regs = [0; REGISTER_SPACE];
        self.poke_word(Register::OscMeasuredFastOscFrequency as u16, FAST_OSC_FREQUENCY);
        self.poke(Register::VhvConfigInit as u16, 0x20);
        self.poke(Register::GpioHvMuxCtrl as u16, 0x01);
        self.poke_word(Register::ResultOscCalibrateVal as u16, 0x0400 | OSC_CALIBRATE_VAL);
        self.poke_word(Register::IdentificationModelId as u16, 0xEACC);
        self.poke(Register::IdentificationRevisionId as u16, 0x10);
        self.continuous = false;
        self.data_ready = false;
        self.stream_count = 0;
        self.in_reset = false;
    }

    /// Power cycle: like a soft reset, and the bus address goes back to its default.
    pub fn power_cycle(&mut self) {
        self.power_on();
        self.address = DEFAULT_I2C_ADDRESS;
    }

    pub fn peek(&self, reg: u16) -> u8 {
        self.regs[usize::from(reg)]
    }

    pub fn peek_word(&self, reg: u16) -> u16 {
        u16::from_be_bytes([self.peek(reg), self.peek(reg + 1)])
    }

    pub fn peek_dword(&self, reg: u16) -> u32 {
        u32::from_be_bytes([
            self.peek(reg),
            self.peek(reg + 1),
            self.peek(reg + 2),
            self.peek(reg + 3),
        ])
    }

    pub fn poke(&mut self, reg: u16, value: u8) {
        self.regs[usize::from(reg)] = value;
    }

    pub fn poke_word(&mut self, reg: u16, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.poke(reg, hi);
        self.poke(reg + 1, lo);
    }

    /// Phase-cal, MM and range timeout registers.
    pub fn timing_registers(&self) -> [u8; 9] {
        [0x4B, 0x5A, 0x5B, 0x5C, 0x5D, 0x5E, 0x5F, 0x61, 0x62].map(|reg| self.peek(reg))
    }

    fn read(&mut self, reg: u16) -> u8 {
        if reg == Register::FirmwareSystemStatus as u16 {
            self.status_reads += 1;
            return if self.boot_polls > 0 {
                self.boot_polls -= 1;
                0x00
            } else if self.firmware_ready {
                0x03
            } else {
                0x01
            };
        }
        if reg == Register::GpioTioHvStatus as u16 {
            let ready = if !self.data_ready {
                false
            } else if self.pending_polls > 0 {
                self.pending_polls -= 1;
                false
            } else {
                true
            };
            return (self.peek(reg) & !0x01) | u8::from(ready);
        }
        self.regs.get(usize::from(reg)).copied().unwrap_or(0)
    }

    fn write(&mut self, reg: u16, value: u8) -> Result<(), ErrorKind> {
        if self.fail_writes_to == Some(reg) {
            return Err(ErrorKind::Other);
        }
        if let Some(slot) = self.regs.get_mut(usize::from(reg)) {
            *slot = value;
        }

        match reg {
            r if r == Register::SoftReset as u16 => {
                if value == 0x00 {
                    self.in_reset = true;
                } else if self.in_reset {
                    self.power_on();
                }
            }
            r if r == Register::I2cSlaveDeviceAddress as u16 => self.address = value & 0x7F,
            r if r == Register::SystemInterruptClear as u16 => {
                if value & 0x01 != 0 {
                    self.data_ready = false;
                    if self.continuous {
                        self.produce();
                    }
                }
            }
            r if r == Register::SystemModeStart as u16 => match value {
                0x10 => {
                    self.continuous = false;
                    self.produce();
                }
                0x40 => {
                    self.continuous = true;
                    self.produce();
                }
                _ => {
                    self.continuous = false;
                    self.data_ready = false;
                }
            },
            _ => {}
        }
        Ok(())
    }

    /// Completes one ranging cycle.
    fn produce(&mut self) {
        if self.never_ready {
            return;
        }

        let mut block = [0u8; RESULT_BLOCK_LEN];
        let mut put = |offset: usize, value: u16| {
            block[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        };
        if self.peek(Register::SystemSequenceConfig as u16) == REFERENCE_ONLY_SEQUENCE {
            let count = u32::from(self.peek(Register::RefSpadManNumRequestedRefSpads as u16));
            let location = usize::from(self.peek(Register::RefSpadManRefLocation as u16));
            let rate = self.scene.ref_rate_per_spad.get(location).copied().unwrap_or(0);
            let peak = u16::try_from(count * u32::from(rate)).unwrap_or(u16::MAX);
            put(result_offset::PEAK_SIGNAL_RATE, peak);
            block[result_offset::RANGE_STATUS] = 9;
        } else {
            let raw_offset = self.peek_word(Register::AlgoPartToPartRangeOffsetMm as u16);
            let offset_mm = (raw_offset as i16) / 4;
            let range_mm = self.scene.distance_mm + offset_mm;
            put(result_offset::EFFECTIVE_SPADS, self.scene.effective_spads);
            put(result_offset::PEAK_SIGNAL_RATE, self.scene.peak_signal_rate);
            put(result_offset::AMBIENT_RATE, self.scene.ambient_rate);
            put(result_offset::SIGMA, self.scene.sigma);
            put(result_offset::RANGE_MM, range_mm as u16);
            put(result_offset::CORRECTED_SIGNAL_RATE, self.scene.signal_rate);
            block[result_offset::RANGE_STATUS] = self.scene.device_status;
        }

        self.stream_count = self.stream_count.wrapping_add(1);
        block[result_offset::STREAM_COUNT] = self.stream_count;
        let start = usize::from(Register::ResultRangeStatus as u16);
        self.regs[start..start + RESULT_BLOCK_LEN].copy_from_slice(&block);

        self.data_ready = true;
        self.pending_polls = self.ready_after_polls;
    }
}

/// Shared handle on a simulated device; clones see the same registers.
#[derive(Clone)]
pub(crate) struct SimDevice(Rc<RefCell<SimState>>);

impl SimDevice {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(SimState::new())))
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }
}

impl ErrorType for SimDevice {
    type Error = ErrorKind;
}

impl I2c for SimDevice {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.0.borrow_mut();
        if address != state.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        let mut pointer: u16 = 0;
        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    if bytes.len() < 2 {
                        return Err(ErrorKind::Other);
                    }
                    pointer = u16::from_be_bytes([bytes[0], bytes[1]]);
                    for &value in &bytes[2..] {
                        state.write(pointer, value)?;
                        pointer = pointer.wrapping_add(1);
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        *byte = state.read(pointer);
                        pointer = pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Delay that only accumulates the requested time.
#[derive(Clone, Default)]
pub(crate) struct CountingDelay(Rc<Cell<u64>>);

impl CountingDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }
}

impl DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

pub(crate) type SimSensor = VL53L1<SimDevice, CountingDelay>;

/// Boots and initializes a sensor on `device`.
pub(crate) fn bring_up(device: SimDevice, delay: CountingDelay, timeouts: Timeouts) -> SimSensor {
    let mut sensor = VL53L1::new(device, delay).with_timeouts(timeouts);
    sensor.wait_device_booted().unwrap();
    assert_eq!(sensor.data_init(), Ok(None));
    sensor.static_init().unwrap();
    sensor
}

pub(crate) fn idle_sensor() -> (SimSensor, SimDevice, CountingDelay) {
    let device = SimDevice::new();
    let delay = CountingDelay::default();
    let sensor = bring_up(device.clone(), delay.clone(), Timeouts::default());
    (sensor, device, delay)
}

/// Sensor ranging continuously, with a first result available.
pub(crate) fn running_sensor() -> (SimSensor, SimDevice, CountingDelay) {
    let (mut sensor, device, delay) = idle_sensor();
    sensor.start_measurement().unwrap();
    (sensor, device, delay)
}
