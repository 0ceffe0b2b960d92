//! Card clock configuration, HS400 DLL calibration and UHS tuning.

use log::debug;

use crate::err::SdError;
use crate::hal::SdmmcHal;
use crate::sdmmc::constant::*;
use crate::sdmmc::{BusWidth, ClockMode, Command, RspType, Sdmmc};

impl<H: SdmmcHal> Sdmmc<H> {
    /// Remember the tap value left behind by the previous bootloader stage.
    /// HS400 cannot be configured without it.
    pub fn capture_clock_tap(&mut self) {
        self.tap = Some((self.read_reg(SDMMC_VENCLKCTL) >> 16) & 0xFF);
    }

    fn config_clock_tap(&mut self, mode: ClockMode) -> Result<(), SdError> {
        if mode == ClockMode::MmcHs400 {
            let ceata = self.read_reg(SDMMC_VENCEATACTL);
            self.write_reg(SDMMC_VENCEATACTL, (ceata & 0xFFFF_C0FF) | 0x2800);
        }

        let tunctl = self.read_reg(SDMMC_VENTUNCTL0);
        self.write_reg(SDMMC_VENTUNCTL0, tunctl & 0xFFFD_FFFF);

        let tap = if mode == ClockMode::MmcHs400 {
            self.tap.ok_or(SdError::InvalidArgument)?
        } else {
            SDMMC_TAP_VALUES[self.id as usize]
        };

        let venclkctl = self.read_reg(SDMMC_VENCLKCTL);
        self.write_reg(SDMMC_VENCLKCTL, (venclkctl & 0xFF00_FFFF) | (tap << 16));
        Ok(())
    }

    fn apply_uhs_mode(&self, mode: ClockMode) {
        use ClockMode::*;
        match mode {
            MmcIdent | MmcLegacy | SdIdent | SdDs12 => {
                let hostctl = self.read_reg8(SDMMC_HOSTCTL);
                self.write_reg8(SDMMC_HOSTCTL, hostctl & !TEGRA_MMC_HOSTCTL_HIGH_SPEED_EN);
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 & !TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            MmcHs52 | SdHs25 => {
                let hostctl = self.read_reg8(SDMMC_HOSTCTL);
                self.write_reg8(SDMMC_HOSTCTL, hostctl | TEGRA_MMC_HOSTCTL_HIGH_SPEED_EN);
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 & !TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            MmcHs200 | UhsSdr104 | UhsDdr50 | MmcDdr52 => {
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(
                    SDMMC_HOSTCTL2,
                    (hostctl2 & !TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK) | 3,
                );
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            MmcHs400 => {
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(
                    SDMMC_HOSTCTL2,
                    (hostctl2 & !TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK) | 5,
                );
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            UhsSdr12 => {
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 & !TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK);
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            UhsSdr50 => {
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(
                    SDMMC_HOSTCTL2,
                    (hostctl2 & !TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK) | 2,
                );
                let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
                self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN);
            }
            UhsSdr25 | UhsSdr82 => {}
        }
    }

    fn wait_dll_calibration(&self) -> Result<(), SdError> {
        let mut should_disable_sd_clock = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE == 0 {
            should_disable_sd_clock = true;
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        let cfg = self.read_reg(SDMMC_DLLCAL_CFG);
        self.write_reg(SDMMC_DLLCAL_CFG, cfg | TEGRA_MMC_DLLCAL_CFG_EN_CALIBRATE);
        self.flush_posted_writes();

        let mut ok = self.poll(SDMMC_DLL_CAL_TIMEOUT_US, || {
            self.read_reg(SDMMC_DLLCAL_CFG) & TEGRA_MMC_DLLCAL_CFG_EN_CALIBRATE == 0
        });
        if ok {
            ok = self.poll(SDMMC_DLL_CAL_STA_TIMEOUT_US, || {
                self.read_reg(SDMMC_DLLCAL_CFG_STA) & TEGRA_MMC_DLLCAL_CFG_STATUS_ACTIVE == 0
            });
        }

        if should_disable_sd_clock {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        if ok { Ok(()) } else { Err(SdError::Timeout) }
    }

    fn setup_clock_core(&mut self, mode: ClockMode) -> Result<(), SdError> {
        self.config_clock_tap(mode)?;
        self.apply_uhs_mode(mode);
        self.flush_posted_writes();

        let (khz, target_div) = self.hal.clock_params(mode);
        let khz = self.hal.config_clock_source(self.id, khz);
        self.divisor = (khz + target_div as u32 - 1) / target_div as u32;

        let div = target_div >> 1;
        let hi = if div > 0xFF { div >> 8 } else { 0 };
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(
            SDMMC_CLKCON,
            (clkcon & 0x3F)
                | (((div as u32) << TEGRA_MMC_CLKCON_SDCLK_FREQ_SEL_SHIFT) as u16)
                | (hi << TEGRA_MMC_CLKCON_SDCLK_FREQ_SEL_UPPER_SHIFT),
        );

        debug!(
            "SDMMC{}: {:?} source {} kHz, divisor {}",
            self.id as u32 + 1,
            mode,
            khz,
            self.divisor
        );
        Ok(())
    }

    /// Reprogram the card clock for a new timing mode. The card clock is
    /// gated for the duration of the change.
    pub fn setup_clock(&mut self, mode: ClockMode) -> Result<(), SdError> {
        let mut should_enable_sd_clock = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE != 0 {
            should_enable_sd_clock = true;
            self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        let res = self.setup_clock_core(mode);

        if should_enable_sd_clock {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }
        res?;

        if mode == ClockMode::MmcHs400 {
            self.wait_dll_calibration()?;
        }
        Ok(())
    }

    fn setup_read_small_block(&self) {
        match self.bus_width() {
            BusWidth::W1 => return,
            BusWidth::W4 => self.write_reg16(SDMMC_BLKSIZE, 0x40),
            BusWidth::W8 => self.write_reg16(SDMMC_BLKSIZE, 0x80),
        }
        self.write_reg16(SDMMC_BLKCNT, 1);
        self.write_reg16(SDMMC_TRNMOD, TEGRA_MMC_TRNMOD_DATA_XFER_DIR_SEL_READ);
    }

    fn tuning_once(&mut self, opcode: u8) -> bool {
        if self.no_sd {
            return false;
        }
        if self.wait_lines_idle(true).is_err() {
            return false;
        }

        self.setup_read_small_block();
        let stsen = self.read_reg16(SDMMC_NORINTSTSEN);
        self.write_reg16(SDMMC_NORINTSTSEN, stsen | TEGRA_MMC_NORINTSTSEN_BUFFER_READ_READY);
        let sts = self.read_reg16(SDMMC_NORINTSTS);
        self.write_reg16(SDMMC_NORINTSTS, sts);

        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);

        let cmd = Command {
            opcode,
            arg: 0,
            rsp_type: RspType::Rsp48,
            check_busy: false,
        };
        self.parse_cmdbuf(&cmd, true);
        self.flush_posted_writes();
        self.hal.sleep_us(1);
        self.reset();

        let clkcon = self.read_reg16(SDMMC_CLKCON);
        self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        self.flush_posted_writes();

        let hit = self.poll(SDMMC_TUNING_BLOCK_TIMEOUT_US, || {
            self.read_reg16(SDMMC_NORINTSTS) & TEGRA_MMC_NORINTSTS_BUFFER_READ_READY != 0
        });
        if hit {
            self.write_reg16(SDMMC_NORINTSTS, TEGRA_MMC_NORINTSTS_BUFFER_READ_READY);
        } else {
            self.reset();
        }
        let stsen = self.read_reg16(SDMMC_NORINTSTSEN);
        self.write_reg16(
            SDMMC_NORINTSTSEN,
            stsen & !TEGRA_MMC_NORINTSTSEN_BUFFER_READ_READY,
        );
        self.flush_posted_writes();
        self.settle_delay();
        hit
    }

    /// Run the sampling clock tuning procedure for a fast timing mode.
    pub fn config_tuning(&mut self, mode: ClockMode, opcode: u8) -> Result<(), SdError> {
        self.write_reg(SDMMC_VENTUNCTL1, 0);

        let (max, flag) = match mode {
            ClockMode::MmcHs200 | ClockMode::MmcHs400 | ClockMode::UhsSdr104 => (0x80, 0x4000),
            ClockMode::UhsSdr50 | ClockMode::UhsDdr50 | ClockMode::MmcDdr52 => (0x100, 0x8000),
            _ => return Err(SdError::UnsupportedConfig),
        };

        let tunctl = self.read_reg(SDMMC_VENTUNCTL0);
        self.write_reg(SDMMC_VENTUNCTL0, (tunctl & 0xFFFF_1FFF) | flag);
        let tunctl = self.read_reg(SDMMC_VENTUNCTL0);
        self.write_reg(SDMMC_VENTUNCTL0, (tunctl & 0xFFFF_E03F) | 0x40);
        let tunctl = self.read_reg(SDMMC_VENTUNCTL0);
        self.write_reg(SDMMC_VENTUNCTL0, tunctl | 0x20000);

        let hostctl2 = self.read_reg16(SDMMC_HOSTCTL2);
        self.write_reg16(SDMMC_HOSTCTL2, hostctl2 | TEGRA_MMC_HOSTCTL2_EXECUTE_TUNING);

        for _ in 0..max {
            self.tuning_once(opcode);
            if self.read_reg16(SDMMC_HOSTCTL2) & TEGRA_MMC_HOSTCTL2_EXECUTE_TUNING == 0 {
                break;
            }
        }

        if self.read_reg16(SDMMC_HOSTCTL2) & TEGRA_MMC_HOSTCTL2_SAMPLING_CLOCK_SELECT != 0 {
            debug!("SDMMC{}: tuning converged", self.id as u32 + 1);
            Ok(())
        } else {
            Err(SdError::TuningFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdmmc::testutil::*;
    use crate::sdmmc::SdmmcId;

    #[test]
    fn setup_clock_programs_divider_and_restores_gate() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);

        dev.setup_clock(ClockMode::SdDs12).unwrap();

        assert_eq!(dev.divisor, 1594);
        let clkcon = regs.get16(SDMMC_CLKCON);
        assert_eq!(clkcon & 0xFF00, (256u16 >> 1) << 8);
        assert_ne!(clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE, 0);
        // Default speed clears the high speed and 1.8V bits.
        assert_eq!(
            regs.get8(SDMMC_HOSTCTL) & TEGRA_MMC_HOSTCTL_HIGH_SPEED_EN,
            0
        );
        assert_eq!(
            regs.get16(SDMMC_HOSTCTL2) & TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN,
            0
        );
        // Default tap for the first controller.
        assert_eq!((regs.get32(SDMMC_VENCLKCTL) >> 16) & 0xFF, 4);
    }

    #[test]
    fn setup_clock_upper_divider_bits() {
        let regs = Regs::new();
        let hal = MockHal {
            mode_params: (408_000, 1024),
            ..MockHal::default()
        };
        let mut dev = Sdmmc::new(hal, SdmmcId::Sdmmc1);
        dev.base_addr = regs.base();

        dev.setup_clock(ClockMode::SdIdent).unwrap();

        // div = 512 spills into the upper divider field.
        let clkcon = regs.get16(SDMMC_CLKCON);
        assert_eq!(clkcon & 0xFF00, ((512u32 << 8) & 0xFFFF) as u16 & 0xFF00);
        assert_eq!((clkcon >> 6) & 3, 2);
    }

    #[test]
    fn hs400_requires_captured_tap() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc4, 1);
        regs.set16(SDMMC_CLKCON, TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);

        assert_eq!(
            dev.setup_clock(ClockMode::MmcHs400),
            Err(SdError::InvalidArgument)
        );
        // Gate restored even though tap config failed.
        assert_ne!(
            regs.get16(SDMMC_CLKCON) & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE,
            0
        );
    }

    #[test]
    fn hs400_dll_calibration_times_out_when_stuck() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc4, 100);
        regs.set32(SDMMC_VENCLKCTL, 0x0045_0000);
        dev.capture_clock_tap();
        assert_eq!(dev.tap, Some(0x45));

        assert_eq!(dev.setup_clock(ClockMode::MmcHs400), Err(SdError::Timeout));
        assert_eq!(regs.get32(SDMMC_VENCEATACTL) & 0x3F00, 0x2800);
        assert_eq!(regs.get16(SDMMC_HOSTCTL2) & TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK, 5);
    }

    #[test]
    fn uhs_mode_field_select() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);

        dev.setup_clock(ClockMode::UhsSdr50).unwrap();
        let hostctl2 = regs.get16(SDMMC_HOSTCTL2);
        assert_eq!(hostctl2 & TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK, 2);
        assert_ne!(hostctl2 & TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN, 0);
    }

    #[test]
    fn tuning_rejects_slow_modes() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);
        assert_eq!(
            dev.config_tuning(ClockMode::SdDs12, 19),
            Err(SdError::UnsupportedConfig)
        );
    }

    #[test]
    fn tuning_fails_without_sampling_clock() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);
        // Card-less operation makes every tuning block a no-op.
        dev.no_sd = true;

        assert_eq!(
            dev.config_tuning(ClockMode::UhsSdr50, 19),
            Err(SdError::TuningFailed)
        );
        assert_eq!(regs.get32(SDMMC_VENTUNCTL0), 0x28040);
    }

    #[test]
    fn tuning_reports_success_from_sampling_clock() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1);
        dev.no_sd = true;
        regs.set16(SDMMC_HOSTCTL2, TEGRA_MMC_HOSTCTL2_SAMPLING_CLOCK_SELECT);

        assert!(dev.config_tuning(ClockMode::UhsSdr104, 19).is_ok());
        assert_eq!(regs.get32(SDMMC_VENTUNCTL0), 0x24040);
    }

    #[test]
    fn tuning_block_timeout_cleans_up() {
        let regs = Regs::new();
        let mut dev = test_dev(&regs, SdmmcId::Sdmmc1, 1000);
        dev.divisor = 4;
        regs.set8(SDMMC_HOSTCTL, TEGRA_MMC_HOSTCTL_4BIT);

        assert!(!dev.tuning_once(19));

        assert_eq!(regs.get16(SDMMC_BLKSIZE), 0x40);
        assert_eq!(regs.get16(SDMMC_BLKCNT), 1);
        assert_eq!(
            regs.get16(SDMMC_TRNMOD),
            TEGRA_MMC_TRNMOD_DATA_XFER_DIR_SEL_READ
        );
        // Read ready enable dropped again and the lines were reset.
        assert_eq!(
            regs.get16(SDMMC_NORINTSTSEN) & TEGRA_MMC_NORINTSTSEN_BUFFER_READ_READY,
            0
        );
        assert_ne!(
            regs.get8(SDMMC_SWRST)
                & (TEGRA_MMC_SWRST_SW_RESET_FOR_CMD_LINE | TEGRA_MMC_SWRST_SW_RESET_FOR_DAT_LINE),
            0
        );
    }
}
