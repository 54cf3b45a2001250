//! SPI-configured 16-channel PWM peripheral.
//!
//! A receive-only serial control-register interface drives sixteen output
//! channels. The serial pins (chip-select, clock, data) belong to the bus
//! controller's clock domain; every pin is resynchronized before use. One
//! chip-select assertion frames one 8-bit byte, MSB first; two consecutive
//! byte-frames — a validated address byte, then a raw data byte — commit
//! exactly one register write. There is no response channel: malformed
//! frames and invalid addresses vanish without a trace.
//!
//! # Registers (address byte bits 3–0, all reset to 0x00)
//!
//! | Addr | Register        | Effect                                  |
//! |------|-----------------|-----------------------------------------|
//! | 0    | out_enable_low  | static-output enable, output bits 7:0   |
//! | 1    | out_enable_high | static-output enable, output bits 15:8  |
//! | 2    | pwm_enable_low  | PWM-mode enable, output bits 7:0        |
//! | 3    | pwm_enable_high | PWM-mode enable, output bits 15:8       |
//! | 4    | pwm_duty        | shared duty, 0x00 = 0%, 0xFF = 100%     |
//!
//! Per output bit: output-enable 0 drives 0; else PWM-enable 0 drives 1;
//! else the shared PWM waveform.

mod pwm;
mod registers;
mod serial;
mod sync;

pub use pwm::{PWM_PERIOD_TICKS, PWM_PRESCALE, PwmGenerator, output_byte};
pub use registers::{Register, RegisterFile};
pub use serial::{SerialReceiver, TransactionPhase};
pub use sync::EdgeSync;

/// The peripheral: pin interface, synchronizers, serial receiver,
/// register file, and waveform generator.
///
/// Drive the four `pub` pin fields from outside, then call
/// [`tick`](Self::tick) once per processing-clock cycle. Within a tick the
/// stages run in bus order — synchronize, assemble, decode, commit,
/// generate — so no stage ever observes a value a later stage produces.
pub struct SpiPwmPeripheral {
    /// Active-low reset pin. Sampled synchronously at the top of each tick.
    pub rst_n: bool,
    /// Active-low chip-select pin (raw, controller clock domain).
    pub cs_n: bool,
    /// Serial clock pin (raw, controller clock domain).
    pub sclk: bool,
    /// Serial data pin (raw, controller clock domain).
    pub copi: bool,

    cs_sync: EdgeSync,
    sclk_sync: EdgeSync,
    copi_sync: EdgeSync,
    serial: SerialReceiver,
    regs: RegisterFile,
    pwm: PwmGenerator,
}

impl SpiPwmPeripheral {
    /// Create the peripheral in its reset state, pins idle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rst_n: true,
            cs_n: true,
            sclk: false,
            copi: false,
            // Chip-select idles deasserted (high); clock and data idle low.
            cs_sync: EdgeSync::new(true),
            sclk_sync: EdgeSync::new(false),
            copi_sync: EdgeSync::new(false),
            serial: SerialReceiver::new(),
            regs: RegisterFile::new(),
            pwm: PwmGenerator::new(),
        }
    }

    /// Advance one processing-clock cycle.
    pub fn tick(&mut self) {
        if !self.rst_n {
            self.cs_sync.reset();
            self.sclk_sync.reset();
            self.copi_sync.reset();
            self.serial.reset();
            self.regs.reset();
            self.pwm.reset();
            return;
        }

        // 1. Cross the pins into this clock domain.
        self.cs_sync.tick(self.cs_n);
        self.sclk_sync.tick(self.sclk);
        self.copi_sync.tick(self.copi);

        // 2. Assemble the byte-frame. Chip-select is active-low, so its
        //    falling edge opens a frame and bits shift only while it is low.
        let cs_asserted = !self.cs_sync.level();
        self.serial.assemble(
            self.cs_sync.fell(),
            cs_asserted && self.sclk_sync.rose(),
            self.copi_sync.level(),
        );

        // 3. Decode at frame close (chip-select deassertion edge).
        self.serial.decode(self.cs_sync.rose());

        // 4. Commit a completed transaction into the register file.
        self.serial.commit(&mut self.regs);

        // 5. Run the waveform generator off the committed registers.
        self.pwm.tick();
    }

    /// The committed configuration registers.
    #[must_use]
    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Output bits 7:0.
    #[must_use]
    pub fn output_low(&self) -> u8 {
        self.pwm.outputs(&self.regs).0
    }

    /// Output bits 15:8.
    #[must_use]
    pub fn output_high(&self) -> u8 {
        self.pwm.outputs(&self.regs).1
    }

    /// All sixteen output channels as one word.
    #[must_use]
    pub fn output(&self) -> u16 {
        (u16::from(self.output_high()) << 8) | u16::from(self.output_low())
    }

    /// Current transaction phase (diagnostic).
    #[must_use]
    pub fn transaction_phase(&self) -> TransactionPhase {
        self.serial.phase()
    }

    /// Bits shifted in the byte-frame in progress (diagnostic).
    #[must_use]
    pub fn frame_bit_count(&self) -> u8 {
        self.serial.bit_count()
    }

    /// Current PWM ramp value (diagnostic).
    #[must_use]
    pub fn pwm_counter(&self) -> u8 {
        self.pwm.counter()
    }
}

impl Default for SpiPwmPeripheral {
    fn default() -> Self {
        Self::new()
    }
}
