mod clock;
mod cmd;

pub mod constant;

use core::fmt::Display;

use constant::*;
use log::{debug, info, warn};

use crate::err::SdError;
use crate::hal::{GpioPin, Level, PadConfig, Rail, SdmmcHal, SdmmcPad};

pub use cmd::{Command, Request, RspType};

/// SDMMC controller instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdmmcId {
    Sdmmc1 = 0,
    Sdmmc2 = 1,
    Sdmmc3 = 2,
    Sdmmc4 = 3,
}

/// SD bus power states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdmmcPower {
    Off,
    V18,
    V33,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    W1,
    W4,
    W8,
}

/// Bus timing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    MmcIdent = 0,
    MmcLegacy = 1,
    MmcHs52 = 2,
    MmcHs200 = 3,
    MmcHs400 = 4,
    SdIdent = 5,
    SdDs12 = 6,
    SdHs25 = 7,
    UhsSdr12 = 8,
    UhsSdr25 = 9,
    UhsSdr50 = 10,
    UhsSdr104 = 11,
    UhsSdr82 = 12,
    UhsDdr50 = 13,
    MmcDdr52 = 14,
}

const fn base_address(id: SdmmcId) -> usize {
    match id {
        SdmmcId::Sdmmc1 => 0x700B_0000,
        SdmmcId::Sdmmc2 => 0x700B_0200,
        SdmmcId::Sdmmc3 => 0x700B_0400,
        SdmmcId::Sdmmc4 => 0x700B_0600,
    }
}

// SD Host Controller structure
pub struct Sdmmc<H: SdmmcHal> {
    hal: H,
    id: SdmmcId,
    base_addr: usize,
    no_sd: bool,
    sd_clock_enabled: bool,
    clock_stopped: bool,
    divisor: u32,
    expected_rsp: RspType,
    rsp: [u32; 4],
    auto_cmd12_rsp: u32,
    tap: Option<u32>,
    dma_addr_next: u32,
}

impl<H: SdmmcHal> Display for Sdmmc<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "SDMMC{} {{ base_addr: {:#x}, divisor: {} }}",
            self.id as u32 + 1,
            self.base_addr,
            self.divisor
        )
    }
}

impl<H: SdmmcHal> Sdmmc<H> {
    pub fn new(hal: H, id: SdmmcId) -> Self {
        Self {
            hal,
            id,
            base_addr: base_address(id),
            no_sd: false,
            sd_clock_enabled: false,
            clock_stopped: true,
            divisor: 0,
            expected_rsp: RspType::None,
            rsp: [0; 4],
            auto_cmd12_rsp: 0,
            tap: None,
            dma_addr_next: 0,
        }
    }

    pub fn id(&self) -> SdmmcId {
        self.id
    }

    // Read a 32-bit register
    pub(crate) fn read_reg(&self, offset: u32) -> u32 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u32) }
    }

    // Read a 16-bit register
    pub(crate) fn read_reg16(&self, offset: u32) -> u16 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u16) }
    }

    // Read an 8-bit register
    pub(crate) fn read_reg8(&self, offset: u32) -> u8 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u8) }
    }

    // Write a 32-bit register
    pub(crate) fn write_reg(&self, offset: u32, value: u32) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u32, value) }
    }

    // Write a 16-bit register
    pub(crate) fn write_reg16(&self, offset: u32, value: u16) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u16, value) }
    }

    // Write an 8-bit register
    pub(crate) fn write_reg8(&self, offset: u32, value: u8) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u8, value) }
    }

    // Dummy read to drain the posted write queue.
    pub(crate) fn flush_posted_writes(&self) {
        let _ = self.read_reg16(SDMMC_CLKCON);
    }

    /// Poll `done` until it reports true or `timeout_us` elapses.
    pub(crate) fn poll(&self, timeout_us: u32, mut done: impl FnMut() -> bool) -> bool {
        let start = self.hal.ticks();
        while !done() {
            if self.hal.ticks().wrapping_sub(start) > timeout_us {
                return false;
            }
        }
        true
    }

    // Wait out 8 card clock cycles.
    pub(crate) fn settle_delay(&self) {
        let divisor = self.divisor.max(1);
        self.hal.sleep_us((8000 + divisor - 1) / divisor);
    }

    pub fn get_voltage(&self) -> Result<SdmmcPower, SdError> {
        let pwr = self.read_reg8(SDMMC_PWRCON);
        if pwr & TEGRA_MMC_PWRCTL_SD_BUS_POWER == 0 {
            return Ok(SdmmcPower::Off);
        }
        match pwr & TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_MASK {
            TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V1_8 => Ok(SdmmcPower::V18),
            TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V3_3 => Ok(SdmmcPower::V33),
            _ => Err(SdError::UnsupportedConfig),
        }
    }

    fn set_voltage(&self, power: SdmmcPower) {
        let pwr = match power {
            SdmmcPower::Off => {
                let pwrcon = self.read_reg8(SDMMC_PWRCON);
                self.write_reg8(SDMMC_PWRCON, pwrcon & !TEGRA_MMC_PWRCTL_SD_BUS_POWER);
                return;
            }
            SdmmcPower::V18 => TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V1_8,
            SdmmcPower::V33 => TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V3_3,
        };
        self.write_reg8(SDMMC_PWRCON, pwr);
        self.write_reg8(SDMMC_PWRCON, pwr | TEGRA_MMC_PWRCTL_SD_BUS_POWER);
    }

    pub fn bus_width(&self) -> BusWidth {
        let hostctl = self.read_reg8(SDMMC_HOSTCTL);
        if hostctl & TEGRA_MMC_HOSTCTL_8BIT != 0 {
            BusWidth::W8
        } else if hostctl & TEGRA_MMC_HOSTCTL_4BIT != 0 {
            BusWidth::W4
        } else {
            BusWidth::W1
        }
    }

    pub fn set_bus_width(&self, bus_width: BusWidth) {
        let hostctl = self.read_reg8(SDMMC_HOSTCTL);
        match bus_width {
            BusWidth::W1 => {
                self.write_reg8(
                    SDMMC_HOSTCTL,
                    hostctl & !(TEGRA_MMC_HOSTCTL_4BIT | TEGRA_MMC_HOSTCTL_8BIT),
                );
            }
            BusWidth::W4 => {
                self.write_reg8(SDMMC_HOSTCTL, hostctl | TEGRA_MMC_HOSTCTL_4BIT);
                let hostctl = self.read_reg8(SDMMC_HOSTCTL);
                self.write_reg8(SDMMC_HOSTCTL, hostctl & !TEGRA_MMC_HOSTCTL_8BIT);
            }
            BusWidth::W8 => {
                self.write_reg8(SDMMC_HOSTCTL, hostctl | TEGRA_MMC_HOSTCTL_8BIT);
            }
        }
    }

    pub(crate) fn sd_clock_enable(&mut self) {
        if !self.no_sd {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE == 0 {
                self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
            }
        }
        self.sd_clock_enabled = true;
    }

    pub(crate) fn sd_clock_disable(&mut self) {
        self.sd_clock_enabled = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
    }

    /// Gate or ungate the card clock for card-less operation.
    pub fn sd_clock_ctrl(&mut self, no_sd: bool) {
        self.no_sd = no_sd;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if no_sd {
            if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE != 0 {
                self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
            }
            return;
        }
        if self.sd_clock_enabled && clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE == 0 {
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }
    }

    fn autocal_config_offset(&self, power: SdmmcPower) -> Result<(), SdError> {
        let (off_pd, off_pu): (u32, u32) = match self.id {
            SdmmcId::Sdmmc2 | SdmmcId::Sdmmc4 => {
                if power != SdmmcPower::V18 {
                    return Err(SdError::UnsupportedConfig);
                }
                (5, 5)
            }
            SdmmcId::Sdmmc1 | SdmmcId::Sdmmc3 => match power {
                SdmmcPower::V18 => (123, 123),
                SdmmcPower::V33 => (125, 0),
                SdmmcPower::Off => return Err(SdError::UnsupportedConfig),
            },
        };

        let cfg = self.read_reg(SDMMC_AUTOCALCFG);
        self.write_reg(
            SDMMC_AUTOCALCFG,
            (((cfg & 0xFFFF_80FF) | (off_pd << 8)) >> 7 << 7) | off_pu,
        );
        Ok(())
    }

    /// Run pad drive strength autocalibration. On timeout the suggested
    /// fixed values are loaded instead.
    pub(crate) fn autocal_execute(&self, power: SdmmcPower) {
        let mut should_enable_sd_clock = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE != 0 {
            should_enable_sd_clock = true;
            self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        let padctl = self.read_reg(SDMMC_SDMEMCOMPPADCTL);
        if padctl & TEGRA_MMC_SDMEMCOMPPADCTL_PAD_E_INPUT_PWRD == 0 {
            self.write_reg(
                SDMMC_SDMEMCOMPPADCTL,
                padctl | TEGRA_MMC_SDMEMCOMPPADCTL_PAD_E_INPUT_PWRD,
            );
            self.flush_posted_writes();
            self.hal.sleep_us(1);
        }

        let cfg = self.read_reg(SDMMC_AUTOCALCFG);
        self.write_reg(
            SDMMC_AUTOCALCFG,
            cfg | TEGRA_MMC_AUTOCALCFG_AUTO_CAL_START | TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ENABLE,
        );
        self.flush_posted_writes();
        self.hal.sleep_us(1);

        let done = self.poll(SDMMC_AUTOCAL_TIMEOUT_US, || {
            self.read_reg(SDMMC_AUTOCALCFG) & TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ACTIVE == 0
        });
        if !done {
            warn!(
                "SDMMC{}: pad autocal timed out, loading default drive strengths",
                self.id as u32 + 1
            );
            self.hal.apply_pad_defaults(self.id, power);
            let cfg = self.read_reg(SDMMC_AUTOCALCFG);
            self.write_reg(SDMMC_AUTOCALCFG, cfg & !TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ENABLE);
        }

        let padctl = self.read_reg(SDMMC_SDMEMCOMPPADCTL);
        self.write_reg(
            SDMMC_SDMEMCOMPPADCTL,
            padctl & !TEGRA_MMC_SDMEMCOMPPADCTL_PAD_E_INPUT_PWRD,
        );

        if should_enable_sd_clock {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }
    }

    fn enable_internal_clock(&self) -> Result<(), SdError> {
        // Enable the internal clock and wait till it is stable.
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_INTERNAL_CLOCK_ENABLE);
        self.flush_posted_writes();
        let stable = self.poll(SDMMC_DEFAULT_TIMEOUT_US, || {
            self.read_reg16(SDMMC_CLKCON) & TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE != 0
        });
        if !stable {
            return Err(SdError::Timeout);
        }

        let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
        self.write_reg16(SDMMC_HOSTCTL2, hostctl2 & !TEGRA_MMC_HOSTCTL2_PRESET_VALUE_ENABLE);
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_CLKGEN_SELECT);
        let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
        self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_HOST_VERSION_4_EN);

        if self.read_reg(SDMMC_CAPAREG) & TEGRA_MMC_CAPAREG_ADDRESSING_64BIT == 0 {
            return Err(SdError::UnsupportedConfig);
        }

        let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
        self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_ADDRESSING_64BIT_EN);
        let hostctl = self.read_reg8(SDMMC_HOSTCTL);
        self.write_reg8(SDMMC_HOSTCTL, hostctl & 0xE7); // SDMA select
        let timeoutcon = self.read_reg8(SDMMC_TIMEOUTCON);
        self.write_reg8(SDMMC_TIMEOUTCON, (timeoutcon & 0xF0) | 0xE);

        Ok(())
    }

    fn config_sdmmc1_pads(&self, power: SdmmcPower) {
        let enabled = power != SdmmcPower::Off;
        self.hal.set_clk_loopback(SdmmcId::Sdmmc1, enabled);

        let mut cfg = PadConfig::DRIVE_2X | PadConfig::PARKED;
        if enabled {
            cfg |= PadConfig::INPUT_ENABLE;
        } else {
            cfg |= PadConfig::TRISTATE;
        }
        if power == SdmmcPower::V18 {
            cfg |= PadConfig::SCHMITT;
        }

        self.hal.set_pad_config(SdmmcPad::Sdmmc1Clk, cfg);
        if enabled {
            cfg |= PadConfig::PULL_UP; // needed for all except CLK
        }
        self.hal.set_pad_config(SdmmcPad::Sdmmc1Cmd, cfg);
        self.hal.set_pad_config(SdmmcPad::Sdmmc1Dat3, cfg);
        self.hal.set_pad_config(SdmmcPad::Sdmmc1Dat2, cfg);
        self.hal.set_pad_config(SdmmcPad::Sdmmc1Dat1, cfg);
        self.hal.set_pad_config(SdmmcPad::Sdmmc1Dat0, cfg);
    }

    fn config_sdmmc1(&self) -> Result<(), SdError> {
        // Let the card detect line stabilize, then check for a card.
        self.hal.sleep_us(100);
        if self.hal.read_gpio(GpioPin::SdCardDetect) == Level::High {
            return Err(SdError::NoCard);
        }

        // Set the IO clamps to the safe value before changing voltage.
        self.hal.set_io_clamp(SdmmcId::Sdmmc1, true);
        self.hal.set_rail_microvolts(Rail::SdIo, 3_300_000);

        self.config_sdmmc1_pads(SdmmcPower::V33);

        // Let the power to the SD card flow.
        self.hal.write_gpio(GpioPin::SdPowerEnable, Level::High);
        self.hal.sleep_us(1000);

        self.hal.apply_pad_defaults(SdmmcId::Sdmmc1, SdmmcPower::V33);
        self.hal.sleep_us(1000);

        Ok(())
    }

    /// Bring the controller up for the given power, bus width and timing.
    pub fn init(
        &mut self,
        power: SdmmcPower,
        bus_width: BusWidth,
        mode: ClockMode,
        no_sd: bool,
    ) -> Result<(), SdError> {
        if self.id == SdmmcId::Sdmmc1 {
            self.config_sdmmc1()?;
        }

        self.no_sd = false;
        self.sd_clock_enabled = false;
        self.clock_stopped = true;
        self.divisor = 0;
        self.expected_rsp = RspType::None;
        self.rsp = [0; 4];
        self.auto_cmd12_rsp = 0;
        self.tap = None;
        self.dma_addr_next = 0;

        if self.hal.clock_is_active(self.id) {
            self.sd_clock_disable();
            self.flush_posted_writes();
        }

        let (khz, _) = self.hal.clock_params(mode);
        self.hal.enable_clock(self.id, khz);
        self.clock_stopped = false;

        let spare = self.read_reg(SDMMC_IO_SPARE);
        self.write_reg(SDMMC_IO_SPARE, spare | 0x80000);
        let trim = self.read_reg(SDMMC_IO_TRIM);
        self.write_reg(SDMMC_IO_TRIM, trim & !4);
        let venclkctl = self.read_reg(SDMMC_VENCLKCTL);
        self.write_reg(
            SDMMC_VENCLKCTL,
            (venclkctl & 0xE0FF_FFFF) | (SDMMC_TRIM_VALUES[self.id as usize] << 24),
        );
        let padctl = self.read_reg(SDMMC_SDMEMCOMPPADCTL);
        self.write_reg(SDMMC_SDMEMCOMPPADCTL, (padctl & 0xF) | 7);

        self.autocal_config_offset(power)?;
        self.autocal_execute(power);
        self.enable_internal_clock()?;
        self.set_bus_width(bus_width);
        self.set_voltage(power);
        self.setup_clock(mode)?;
        self.sd_clock_ctrl(no_sd);
        self.sd_clock_enable();
        self.flush_posted_writes();

        info!("{} initialized, mode {:?}", self, mode);
        Ok(())
    }

    /// Shut the controller down. `cut_power` also powers off the SD slot.
    pub fn end(&mut self, cut_power: bool) {
        if !self.clock_stopped {
            self.sd_clock_disable();
            self.set_voltage(SdmmcPower::Off);
            self.flush_posted_writes();
            self.hal.disable_clock(self.id);
            self.clock_stopped = true;
            debug!("SDMMC{}: clock stopped", self.id as u32 + 1);
        }

        if cut_power && self.id == SdmmcId::Sdmmc1 {
            self.config_sdmmc1_pads(SdmmcPower::Off);
            self.hal.write_gpio(GpioPin::SdPowerEnable, Level::Low);
            // Clamps back to the safe value before changing voltage.
            self.hal.set_io_clamp(SdmmcId::Sdmmc1, true);
            self.hal.set_rail_microvolts(Rail::SdIo, 3_300_000);
        }
    }

    /// Switch the SD slot to 1.8V signalling.
    pub fn enable_low_voltage(&mut self) -> Result<(), SdError> {
        if self.id != SdmmcId::Sdmmc1 {
            return Err(SdError::UnsupportedConfig);
        }

        self.setup_clock(ClockMode::UhsSdr12)?;
        self.flush_posted_writes();

        self.hal.set_rail_microvolts(Rail::SdIo, 1_800_000);
        // Wait for the regulator to change voltage.
        self.hal.sleep_us(1000);
        self.hal.set_io_clamp(SdmmcId::Sdmmc1, false);
        self.config_sdmmc1_pads(SdmmcPower::V18);

        let _ = self.autocal_config_offset(SdmmcPower::V18);
        self.autocal_execute(SdmmcPower::V18);
        self.set_voltage(SdmmcPower::V18);
        self.flush_posted_writes();
        self.hal.sleep_us(5000);

        if self.read_reg16(SDMMC_HOSTCTL2) & TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN != 0 {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
            self.flush_posted_writes();
            self.hal.sleep_us(1000);
            if self.read_reg(SDMMC_PRNSTS) & TEGRA_MMC_PRNSTS_SD_ALL_LINES
                == TEGRA_MMC_PRNSTS_SD_ALL_LINES
            {
                return Ok(());
            }
        }

        Err(SdError::VoltageSwitchFailed)
    }
}


#[cfg(test)]
mod tests {
    use super::constant::*;
    use super::testutil::*;
    use super::*;

    #[test]
    fn voltage_writes_and_round_trips() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);

        dev.set_voltage(SdmmcPower::V33);
        assert_eq!(regs.get8(SDMMC_PWRCON), 0x0F);
        assert_eq!(dev.get_voltage(), Ok(SdmmcPower::V33));

        dev.set_voltage(SdmmcPower::V18);
        assert_eq!(regs.get8(SDMMC_PWRCON), 0x0B);
        assert_eq!(dev.get_voltage(), Ok(SdmmcPower::V18));

        dev.set_voltage(SdmmcPower::Off);
        assert_eq!(regs.get8(SDMMC_PWRCON) & TEGRA_MMC_PWRCTL_SD_BUS_POWER, 0);
        assert_eq!(dev.get_voltage(), Ok(SdmmcPower::Off));
    }

    #[test]
    fn voltage_rejects_unknown_select() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);

        regs.set8(SDMMC_PWRCON, 0x05);
        assert_eq!(dev.get_voltage(), Err(SdError::UnsupportedConfig));
    }

    #[test]
    fn bus_width_8bit_keeps_4bit_flag() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);

        dev.set_bus_width(BusWidth::W4);
        assert_eq!(regs.get8(SDMMC_HOSTCTL), TEGRA_MMC_HOSTCTL_4BIT);
        assert_eq!(dev.bus_width(), BusWidth::W4);

        dev.set_bus_width(BusWidth::W8);
        assert_eq!(
            regs.get8(SDMMC_HOSTCTL),
            TEGRA_MMC_HOSTCTL_4BIT | TEGRA_MMC_HOSTCTL_8BIT
        );
        assert_eq!(dev.bus_width(), BusWidth::W8);

        dev.set_bus_width(BusWidth::W1);
        assert_eq!(regs.get8(SDMMC_HOSTCTL), 0);
        assert_eq!(dev.bus_width(), BusWidth::W1);
    }

    #[test]
    fn autocal_offsets_depend_on_controller_and_power() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);

        assert!(dev.autocal_config_offset(SdmmcPower::V33).is_ok());
        assert_eq!(regs.get32(SDMMC_AUTOCALCFG), 125 << 8);

        assert_eq!(
            dev.autocal_config_offset(SdmmcPower::Off),
            Err(SdError::UnsupportedConfig)
        );

        let dev2 = test_dev(&regs, SdmmcId::Sdmmc2, 1);
        assert_eq!(
            dev2.autocal_config_offset(SdmmcPower::V33),
            Err(SdError::UnsupportedConfig)
        );
        regs.set32(SDMMC_AUTOCALCFG, 0);
        assert!(dev2.autocal_config_offset(SdmmcPower::V18).is_ok());
        assert_eq!(regs.get32(SDMMC_AUTOCALCFG), (5 << 8) | 5);
    }

    #[test]
    fn autocal_falls_back_to_default_pads_on_timeout() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc1, 50);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);

        dev.autocal_execute(SdmmcPower::V33);

        assert!(saw_event(&dev, "apply_pad_defaults Sdmmc1 V33"));
        // Enable bit dropped, comparator powered back down, card clock restored.
        assert_eq!(
            regs.get32(SDMMC_AUTOCALCFG) & TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ENABLE,
            0
        );
        assert_eq!(
            regs.get32(SDMMC_SDMEMCOMPPADCTL) & TEGRA_MMC_SDMEMCOMPPADCTL_PAD_E_INPUT_PWRD,
            0
        );
        assert_ne!(
            regs.get16(SDMMC_CLKCON) & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE,
            0
        );
    }

    #[test]
    fn internal_clock_setup_programs_host_controls() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc4, 1);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE);
        regs.set32(SDMMC_CAPAREG, TEGRA_MMC_CAPAREG_ADDRESSING_64BIT);
        regs.set8(SDMMC_TIMEOUTCON, 0xA5);

        assert!(dev.enable_internal_clock().is_ok());

        let hostctl2 = regs.get16(SDMMC_HOSTCTL2);
        assert_ne!(hostctl2 & TEGRA_MMC_HOSTCTL2_HOST_VERSION_4_EN, 0);
        assert_ne!(hostctl2 & TEGRA_MMC_HOSTCTL2_ADDRESSING_64BIT_EN, 0);
        assert_eq!(regs.get8(SDMMC_TIMEOUTCON), 0xAE);
    }

    #[test]
    fn internal_clock_setup_needs_64bit_addressing() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc4, 1);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE);

        assert_eq!(dev.enable_internal_clock(), Err(SdError::UnsupportedConfig));
    }

    #[test]
    fn internal_clock_stable_wait_times_out() {
        let regs = Regs::new();
        let dev = test_dev(&regs, SdmmcId::Sdmmc4, 5000);

        assert_eq!(dev.enable_internal_clock(), Err(SdError::Timeout));
    }

    #[test]
    fn init_brings_up_sd_slot() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 50);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE);
        regs.set32(SDMMC_CAPAREG, TEGRA_MMC_CAPAREG_ADDRESSING_64BIT);

        dev.init(SdmmcPower::V33, BusWidth::W4, ClockMode::SdDs12, false)
            .unwrap();

        assert!(dev.sd_clock_enabled);
        assert!(!dev.clock_stopped);
        // (408000 + 256 - 1) / 256
        assert_eq!(dev.divisor, 1594);

        let clkcon = regs.get16(SDMMC_CLKCON);
        assert_eq!(clkcon & 0xFF00, (256u16 >> 1) << 8);
        assert_ne!(clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE, 0);

        assert_eq!(regs.get8(SDMMC_PWRCON), 0x0F);
        assert_ne!(regs.get8(SDMMC_HOSTCTL) & TEGRA_MMC_HOSTCTL_4BIT, 0);

        let venclkctl = regs.get32(SDMMC_VENCLKCTL);
        assert_eq!(venclkctl >> 24, SDMMC_TRIM_VALUES[0]);
        assert_eq!((venclkctl >> 16) & 0xFF, SDMMC_TAP_VALUES[0]);

        assert!(saw_event(&dev, "enable_clock Sdmmc1 408000"));
        assert!(saw_event(&dev, "write_gpio SdPowerEnable High"));
        assert!(saw_event(&dev, "set_rail_microvolts SdIo 3300000"));
    }

    #[test]
    fn init_reports_missing_card() {
        let regs = Regs::new();
        let hal = MockHal {
            card_present: false,
            ..MockHal::default()
        };
        let mut dev = Sdmmc::new(hal, SdmmcId::Sdmmc1);
        dev.base_addr = regs.base();

        assert_eq!(
            dev.init(SdmmcPower::V33, BusWidth::W4, ClockMode::SdDs12, false),
            Err(SdError::NoCard)
        );
    }

    #[test]
    fn end_stops_clock_once() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 50);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE);
        regs.set32(SDMMC_CAPAREG, TEGRA_MMC_CAPAREG_ADDRESSING_64BIT);
        dev.init(SdmmcPower::V33, BusWidth::W4, ClockMode::SdDs12, false)
            .unwrap();

        dev.end(true);
        assert!(dev.clock_stopped);
        assert!(!dev.sd_clock_enabled);
        assert_eq!(regs.get8(SDMMC_PWRCON) & TEGRA_MMC_PWRCTL_SD_BUS_POWER, 0);
        assert!(saw_event(&dev, "disable_clock Sdmmc1"));
        assert!(saw_event(&dev, "write_gpio SdPowerEnable Low"));

        let events = dev.hal.events.borrow().len();
        dev.end(false);
        assert_eq!(dev.hal.events.borrow().len(), events);
    }

    #[test]
    fn low_voltage_switch_checks_lines() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 50);
        regs.set16(SDMMC_HOSTCTL2, TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
        regs.set32(SDMMC_PRNSTS, TEGRA_MMC_PRNSTS_SD_ALL_LINES);

        assert!(dev.enable_low_voltage().is_ok());
        assert!(saw_event(&dev, "set_rail_microvolts SdIo 1800000"));
        assert!(saw_event(&dev, "set_io_clamp Sdmmc1 false"));
        assert_ne!(regs.get8(SDMMC_PWRCON) & TEGRA_MMC_PWRCTL_SD_BUS_POWER, 0);
    }

    #[test]
    fn low_voltage_switch_is_sd_slot_only() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc4, 1);
        assert_eq!(dev.enable_low_voltage(), Err(SdError::UnsupportedConfig));
    }
}
