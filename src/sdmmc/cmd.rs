//! Command transaction engine and SDMA transfer loop.

use log::debug;

use crate::err::SdError;
use crate::hal::SdmmcHal;
use crate::sdmmc::constant::*;
use crate::sdmmc::{Sdmmc, SdmmcId, SdmmcPower};

/// Response layouts the controller can latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RspType {
    None,
    /// 48-bit response with CRC and index check.
    Rsp48,
    /// 136-bit response, CRC check only.
    Rsp136,
    /// 48-bit response without CRC check (R3/R4 class).
    Rsp48NoCrc,
}

#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub opcode: u8,
    pub arg: u32,
    pub rsp_type: RspType,
    pub check_busy: bool,
}

/// A data transfer rider for a command.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    /// Bus address of the data buffer.
    pub buf: u32,
    pub blksize: u32,
    pub num_sectors: u32,
    pub is_write: bool,
    pub is_multi_block: bool,
    pub is_auto_cmd12: bool,
}

enum MaskInt {
    /// At least one of the requested bits was raised and has been acked.
    Masked(u16),
    NoIrq,
    Error,
}

impl<H: SdmmcHal> Sdmmc<H> {
    /// Reset the CMD and DAT state machines after a failed transaction.
    pub(crate) fn reset(&self) {
        let swrst = self.read_reg8(SDMMC_SWRST);
        self.write_reg8(
            SDMMC_SWRST,
            swrst | TEGRA_MMC_SWRST_SW_RESET_FOR_CMD_LINE | TEGRA_MMC_SWRST_SW_RESET_FOR_DAT_LINE,
        );
        self.flush_posted_writes();
        let _ = self.poll(SDMMC_DEFAULT_TIMEOUT_US, || {
            self.read_reg8(SDMMC_SWRST)
                & (TEGRA_MMC_SWRST_SW_RESET_FOR_CMD_LINE | TEGRA_MMC_SWRST_SW_RESET_FOR_DAT_LINE)
                == 0
        });
    }

    pub(crate) fn wait_lines_idle(&self, wait_dat: bool) -> Result<(), SdError> {
        self.flush_posted_writes();

        let idle = self.poll(SDMMC_DEFAULT_TIMEOUT_US, || {
            self.read_reg(SDMMC_PRNSTS) & TEGRA_MMC_PRNSTS_CMD_INHIBIT_CMD == 0
        });
        if !idle {
            self.reset();
            return Err(SdError::Timeout);
        }

        if wait_dat {
            let idle = self.poll(SDMMC_DEFAULT_TIMEOUT_US, || {
                self.read_reg(SDMMC_PRNSTS) & TEGRA_MMC_PRNSTS_CMD_INHIBIT_DAT == 0
            });
            if !idle {
                self.reset();
                return Err(SdError::Timeout);
            }
        }

        Ok(())
    }

    fn wait_card_ready(&self) -> Result<(), SdError> {
        self.flush_posted_writes();

        let ready = self.poll(SDMMC_DEFAULT_TIMEOUT_US, || {
            self.read_reg(SDMMC_PRNSTS) & TEGRA_MMC_PRNSTS_DAT0_LINE_LEVEL != 0
        });
        if !ready {
            self.reset();
            return Err(SdError::Timeout);
        }
        Ok(())
    }

    fn enable_interrupts(&self) {
        let stsen = self.read_reg16(SDMMC_NORINTSTSEN);
        self.write_reg16(
            SDMMC_NORINTSTSEN,
            stsen
                | TEGRA_MMC_NORINTSTSEN_CMD_COMPLETE
                | TEGRA_MMC_NORINTSTSEN_XFER_COMPLETE
                | TEGRA_MMC_NORINTSTSEN_DMA_INTERRUPT,
        );
        let erren = self.read_reg16(SDMMC_ERRINTSTSEN);
        self.write_reg16(SDMMC_ERRINTSTSEN, erren | TEGRA_MMC_ERRINTSTSEN_ALL);
        // Ack anything pending.
        let sts = self.read_reg16(SDMMC_NORINTSTS);
        self.write_reg16(SDMMC_NORINTSTS, sts);
        let errsts = self.read_reg16(SDMMC_ERRINTSTS);
        self.write_reg16(SDMMC_ERRINTSTS, errsts);
    }

    fn mask_interrupts(&self) {
        let erren = self.read_reg16(SDMMC_ERRINTSTSEN);
        self.write_reg16(SDMMC_ERRINTSTSEN, erren & 0xFE80);
        let stsen = self.read_reg16(SDMMC_NORINTSTSEN);
        self.write_reg16(SDMMC_NORINTSTSEN, stsen & 0xFFF4);
    }

    fn check_mask_interrupt(&self, mask: u16) -> MaskInt {
        let norintsts = self.read_reg16(SDMMC_NORINTSTS);
        let errintsts = self.read_reg16(SDMMC_ERRINTSTS);

        if norintsts & TEGRA_MMC_NORINTSTS_ERR_INTERRUPT != 0 {
            self.write_reg16(SDMMC_ERRINTSTS, errintsts);
            MaskInt::Error
        } else if norintsts & mask != 0 {
            self.write_reg16(SDMMC_NORINTSTS, norintsts & mask);
            MaskInt::Masked(norintsts)
        } else {
            MaskInt::NoIrq
        }
    }

    fn wait_request(&self) -> Result<(), SdError> {
        self.flush_posted_writes();

        let start = self.hal.ticks();
        loop {
            match self.check_mask_interrupt(TEGRA_MMC_NORINTSTS_CMD_COMPLETE) {
                MaskInt::Masked(_) => return Ok(()),
                MaskInt::Error => {
                    self.reset();
                    return Err(SdError::CmdError);
                }
                MaskInt::NoIrq => {
                    if self.hal.ticks().wrapping_sub(start) > SDMMC_DEFAULT_TIMEOUT_US {
                        self.reset();
                        return Err(SdError::Timeout);
                    }
                }
            }
        }
    }

    pub(crate) fn parse_cmdbuf(&self, cmd: &Command, is_data_present: bool) {
        let mut cmdflags = match cmd.rsp_type {
            RspType::None => 0,
            RspType::Rsp48 => {
                let select = if cmd.check_busy {
                    TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_48_BUSY
                } else {
                    TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_48
                };
                select | TEGRA_MMC_CMDREG_CMD_INDEX_CHECK | TEGRA_MMC_CMDREG_CMD_CRC_CHECK
            }
            RspType::Rsp136 => {
                TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_136 | TEGRA_MMC_CMDREG_CMD_CRC_CHECK
            }
            RspType::Rsp48NoCrc => TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_48,
        };
        if is_data_present {
            cmdflags |= TEGRA_MMC_CMDREG_DATA_PRESENT_SELECT;
        }

        self.write_reg(SDMMC_ARGUMENT, cmd.arg);
        self.write_reg16(SDMMC_CMDREG, ((cmd.opcode as u16) << 8) | cmdflags);
    }

    fn cache_rsp(&mut self, rsp_type: RspType) {
        match rsp_type {
            RspType::None => {}
            RspType::Rsp48 | RspType::Rsp48NoCrc => {
                self.rsp[0] = self.read_reg(SDMMC_RSPREG0);
            }
            RspType::Rsp136 => {
                // CRC is stripped by the controller, so the 120-bit payload
                // needs shifting back into place.
                let regs = [
                    self.read_reg(SDMMC_RSPREG3),
                    self.read_reg(SDMMC_RSPREG2),
                    self.read_reg(SDMMC_RSPREG1),
                    self.read_reg(SDMMC_RSPREG0),
                ];
                for (i, reg) in regs.iter().enumerate() {
                    self.rsp[i] = reg << 8;
                    if i > 0 {
                        self.rsp[i - 1] |= (reg >> 24) & 0xFF;
                    }
                }
            }
        }
    }

    /// Fetch the cached response of the last command. `rsp_type` must match
    /// what the command was issued with.
    pub fn get_rsp(&self, out: &mut [u32], rsp_type: RspType) -> Result<(), SdError> {
        if rsp_type != self.expected_rsp {
            return Err(SdError::InvalidResponseType);
        }

        match rsp_type {
            RspType::None => Err(SdError::InvalidResponseType),
            RspType::Rsp48 | RspType::Rsp48NoCrc => {
                if out.is_empty() {
                    return Err(SdError::InvalidArgument);
                }
                out[0] = self.rsp[0];
                Ok(())
            }
            RspType::Rsp136 => {
                if out.len() < 4 {
                    return Err(SdError::InvalidArgument);
                }
                out[..4].copy_from_slice(&self.rsp);
                Ok(())
            }
        }
    }

    /// Response latched by an auto CMD12 on the last data transfer.
    pub fn auto_cmd12_rsp(&self) -> u32 {
        self.auto_cmd12_rsp
    }

    fn config_dma(&mut self, req: &Request) -> Result<u32, SdError> {
        if req.blksize == 0 || req.num_sectors == 0 {
            return Err(SdError::InvalidArgument);
        }

        let blkcnt = req.num_sectors.min(0xFFFF);
        self.write_reg(SDMMC_ADMAADDR, req.buf);
        // Next 512 KiB boundary the transfer will cross.
        self.dma_addr_next = req.buf.wrapping_add(0x80000) & 0xFFF8_0000;
        self.write_reg16(SDMMC_BLKSIZE, (req.blksize | 0x7000) as u16);
        self.write_reg16(SDMMC_BLKCNT, blkcnt as u16);

        let mut trnmod = TEGRA_MMC_TRNMOD_DMA_ENABLE;
        if req.is_multi_block {
            trnmod = TEGRA_MMC_TRNMOD_MULTI_BLOCK_SELECT
                | TEGRA_MMC_TRNMOD_BLOCK_COUNT_ENABLE
                | TEGRA_MMC_TRNMOD_DMA_ENABLE;
        }
        if !req.is_write {
            trnmod |= TEGRA_MMC_TRNMOD_DATA_XFER_DIR_SEL_READ;
        }
        if req.is_auto_cmd12 {
            trnmod = (trnmod & 0xFFF3) | TEGRA_MMC_TRNMOD_AUTO_CMD12;
        }
        self.write_reg16(SDMMC_TRNMOD, trnmod);

        Ok(blkcnt)
    }

    fn update_dma(&mut self) -> Result<(), SdError> {
        loop {
            let blkcnt = self.read_reg16(SDMMC_BLKCNT);
            let start = self.hal.ticks();
            while self.hal.ticks().wrapping_sub(start) < SDMMC_DMA_PROGRESS_TIMEOUT_US {
                match self.check_mask_interrupt(
                    TEGRA_MMC_NORINTSTS_XFER_COMPLETE | TEGRA_MMC_NORINTSTS_DMA_INTERRUPT,
                ) {
                    MaskInt::Masked(intr) => {
                        if intr & TEGRA_MMC_NORINTSTS_XFER_COMPLETE != 0 {
                            return Ok(());
                        }
                        if intr & TEGRA_MMC_NORINTSTS_DMA_INTERRUPT != 0 {
                            // The engine stopped on a 512 KiB boundary and
                            // wants the next system address.
                            self.write_reg(SDMMC_ADMAADDR, self.dma_addr_next);
                            self.dma_addr_next = self.dma_addr_next.wrapping_add(0x80000);
                        }
                    }
                    MaskInt::NoIrq => {}
                    MaskInt::Error => {
                        self.reset();
                        return Err(SdError::CmdError);
                    }
                }
            }
            // Keep waiting as long as blocks are still moving.
            if self.read_reg16(SDMMC_BLKCNT) == blkcnt {
                break;
            }
        }

        self.reset();
        Err(SdError::Timeout)
    }

    fn execute_cmd_inner(
        &mut self,
        cmd: &Command,
        req: Option<&Request>,
    ) -> Result<u32, SdError> {
        self.wait_lines_idle(req.is_some() || cmd.check_busy)?;

        let mut blkcnt = 0;
        if let Some(req) = req {
            blkcnt = self.config_dma(req)?;
        }
        self.enable_interrupts();
        self.parse_cmdbuf(cmd, req.is_some());

        let mut res = self.wait_request();
        if res.is_ok() {
            if cmd.rsp_type != RspType::None {
                self.expected_rsp = cmd.rsp_type;
                self.cache_rsp(cmd.rsp_type);
            }
            if req.is_some() {
                res = self.update_dma();
            }
        }
        self.mask_interrupts();
        res?;

        debug!(
            "SDMMC{}: CMD{} done, rsp {:08X?}",
            self.id as u32 + 1,
            cmd.opcode,
            self.rsp[0]
        );

        if let Some(req) = req {
            if req.is_auto_cmd12 {
                self.auto_cmd12_rsp = self.read_reg(SDMMC_RSPREG3);
            }
        }

        if cmd.check_busy || req.is_some() {
            self.wait_card_ready()?;
        }

        Ok(blkcnt)
    }

    /// Issue a command, optionally with a data transfer. Returns the number
    /// of blocks programmed into the controller.
    pub fn execute_cmd(&mut self, cmd: &Command, req: Option<&Request>) -> Result<u32, SdError> {
        if !self.sd_clock_enabled {
            return Err(SdError::ClockStopped);
        }

        // Recalibrate the pads periodically on the SD slot controller.
        if self.id == SdmmcId::Sdmmc1 && self.no_sd {
            let power = self.get_voltage().unwrap_or(SdmmcPower::Off);
            self.autocal_execute(power);
        }

        let mut should_disable_sd_clock = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE == 0 {
            should_disable_sd_clock = true;
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
            self.flush_posted_writes();
            self.settle_delay();
        }

        let res = self.execute_cmd_inner(cmd, req);
        self.settle_delay();

        if should_disable_sd_clock {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        res
    }

    fn stop_transmission_inner(&mut self) -> Result<u32, SdError> {
        self.wait_lines_idle(false)?;
        self.enable_interrupts();

        let cmd = Command {
            opcode: MMC_STOP_TRANSMISSION,
            arg: 0,
            rsp_type: RspType::Rsp48,
            check_busy: true,
        };
        self.parse_cmdbuf(&cmd, false);

        let res = self.wait_request();
        self.mask_interrupts();
        res?;

        let rsp = self.read_reg(SDMMC_RSPREG0);
        self.wait_card_ready()?;
        Ok(rsp)
    }

    /// Issue CMD12 to halt an open-ended transfer. Returns the R1 response.
    pub fn stop_transmission(&mut self) -> Result<u32, SdError> {
        if !self.sd_clock_enabled {
            return Err(SdError::ClockStopped);
        }

        let mut should_disable_sd_clock = false;
        let clkcon = self.read_reg16(SDMMC_CLKCON);
        if clkcon & TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE == 0 {
            should_disable_sd_clock = true;
            self.write_reg16(SDMMC_CLKCON, clkcon | TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
            self.flush_posted_writes();
            self.settle_delay();
        }

        let res = self.stop_transmission_inner();
        self.settle_delay();

        if should_disable_sd_clock {
            let clkcon = self.read_reg16(SDMMC_CLKCON);
            self.write_reg16(SDMMC_CLKCON, clkcon & !TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE);
        }

        res
    }
}
