//! Board support traits.
//!
//! The controller driver only touches its own register block. Everything
//! outside of it (clock/reset controller, pinmux, power rails, GPIOs and
//! the microsecond timer) is reached through these traits, implemented by
//! the platform integration.

use bitflags::bitflags;

use crate::sdmmc::{ClockMode, SdmmcId, SdmmcPower};

/// SDMMC pads whose electrical configuration the driver manages directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdmmcPad {
    Sdmmc1Clk,
    Sdmmc1Cmd,
    Sdmmc1Dat0,
    Sdmmc1Dat1,
    Sdmmc1Dat2,
    Sdmmc1Dat3,
}

/// GPIOs the SD slot bring-up sequence depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPin {
    /// Card detect switch, active low.
    SdCardDetect,
    /// Slot power load switch enable.
    SdPowerEnable,
}

/// Externally regulated power rails used by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rail {
    /// SD bus I/O voltage rail.
    SdIo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

bitflags! {
    /// Per-pad electrical configuration bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PadConfig: u32 {
        const DRIVE_2X     = 1 << 0;
        const PARKED       = 1 << 1;
        const TRISTATE     = 1 << 2;
        const INPUT_ENABLE = 1 << 3;
        const PULL_UP      = 1 << 4;
        const SCHMITT      = 1 << 5;
    }
}

/// Clock and reset controller services for the SDMMC instances.
pub trait ClockSupply {
    /// Source frequency in kHz and card-clock divisor target for a bus mode.
    fn clock_params(&self, mode: ClockMode) -> (u32, u16);

    /// Program the module clock source for `id` at `khz` and return the
    /// frequency actually achieved, in kHz.
    fn config_clock_source(&self, id: SdmmcId, khz: u32) -> u32;

    /// Ungate the module clock and lift reset.
    fn enable_clock(&self, id: SdmmcId, khz: u32);

    /// Gate the module clock and assert reset.
    fn disable_clock(&self, id: SdmmcId);

    /// Whether the module clock is currently ungated.
    fn clock_is_active(&self, id: SdmmcId) -> bool;
}

/// Pinmux, pad control and GPIO services.
pub trait Pinmux {
    fn set_pad_config(&self, pad: SdmmcPad, cfg: PadConfig);

    /// Enable or disable the clock return path for a controller.
    fn set_clk_loopback(&self, id: SdmmcId, on: bool);

    /// Apply the fixed drive strength defaults for a controller's pads at
    /// the given signalling voltage.
    fn apply_pad_defaults(&self, id: SdmmcId, power: SdmmcPower);

    /// Engage or release the I/O clamp between controller and pads.
    fn set_io_clamp(&self, id: SdmmcId, engaged: bool);

    fn read_gpio(&self, pin: GpioPin) -> Level;

    fn write_gpio(&self, pin: GpioPin, level: Level);
}

/// Voltage regulator control.
pub trait Regulator {
    fn set_rail_microvolts(&self, rail: Rail, uv: u32);
}

/// Free-running microsecond timer.
pub trait Timer {
    /// Current timer value in microseconds. Wraps.
    fn ticks(&self) -> u32;

    fn sleep_us(&self, us: u32);
}

/// Everything the driver needs from the platform.
pub trait SdmmcHal: ClockSupply + Pinmux + Regulator + Timer {}

impl<T: ClockSupply + Pinmux + Regulator + Timer> SdmmcHal for T {}
