#![allow(unused)]

// SDMMC controller register offsets
pub const SDMMC_BLKSIZE: u32 = 0x04;
pub const SDMMC_BLKCNT: u32 = 0x06;
pub const SDMMC_ARGUMENT: u32 = 0x08;
pub const SDMMC_TRNMOD: u32 = 0x0C;
pub const SDMMC_CMDREG: u32 = 0x0E;
pub const SDMMC_RSPREG0: u32 = 0x10;
pub const SDMMC_RSPREG1: u32 = 0x14;
pub const SDMMC_RSPREG2: u32 = 0x18;
pub const SDMMC_RSPREG3: u32 = 0x1C;
pub const SDMMC_PRNSTS: u32 = 0x24;
pub const SDMMC_HOSTCTL: u32 = 0x28;
pub const SDMMC_PWRCON: u32 = 0x29;
pub const SDMMC_CLKCON: u32 = 0x2C;
pub const SDMMC_TIMEOUTCON: u32 = 0x2E;
pub const SDMMC_SWRST: u32 = 0x2F;
pub const SDMMC_NORINTSTS: u32 = 0x30;
pub const SDMMC_ERRINTSTS: u32 = 0x32;
pub const SDMMC_NORINTSTSEN: u32 = 0x34;
pub const SDMMC_ERRINTSTSEN: u32 = 0x36;
pub const SDMMC_HOSTCTL2: u32 = 0x3E;
pub const SDMMC_CAPAREG: u32 = 0x40;
pub const SDMMC_ADMAADDR: u32 = 0x58;

// Tegra vendor registers
pub const SDMMC_VENCLKCTL: u32 = 0x100;
pub const SDMMC_VENCEATACTL: u32 = 0x1A8;
pub const SDMMC_IO_TRIM: u32 = 0x1AC;
pub const SDMMC_DLLCAL_CFG: u32 = 0x1B0;
pub const SDMMC_DLLCAL_CFG_STA: u32 = 0x1BC;
pub const SDMMC_VENTUNCTL1: u32 = 0x1C4;
pub const SDMMC_VENTUNCTL0: u32 = 0x1C0;
pub const SDMMC_SDMEMCOMPPADCTL: u32 = 0x1E0;
pub const SDMMC_AUTOCALCFG: u32 = 0x1E4;
pub const SDMMC_IO_SPARE: u32 = 0x1F0;

// Present state
pub const TEGRA_MMC_PRNSTS_CMD_INHIBIT_CMD: u32 = 1 << 0;
pub const TEGRA_MMC_PRNSTS_CMD_INHIBIT_DAT: u32 = 1 << 1;
pub const TEGRA_MMC_PRNSTS_DAT0_LINE_LEVEL: u32 = 1 << 20;
pub const TEGRA_MMC_PRNSTS_SD_ALL_LINES: u32 = 0xF0_0000;

// Host control
pub const TEGRA_MMC_HOSTCTL_4BIT: u8 = 1 << 1;
pub const TEGRA_MMC_HOSTCTL_HIGH_SPEED_EN: u8 = 1 << 2;
pub const TEGRA_MMC_HOSTCTL_8BIT: u8 = 1 << 5;

// Power control
pub const TEGRA_MMC_PWRCTL_SD_BUS_POWER: u8 = 1 << 0;
pub const TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V1_8: u8 = 5 << 1;
pub const TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_V3_3: u8 = 7 << 1;
pub const TEGRA_MMC_PWRCTL_SD_BUS_VOLTAGE_MASK: u8 = 7 << 1;

// Clock control
pub const TEGRA_MMC_CLKCON_INTERNAL_CLOCK_ENABLE: u16 = 1 << 0;
pub const TEGRA_MMC_CLKCON_INTERNAL_CLOCK_STABLE: u16 = 1 << 1;
pub const TEGRA_MMC_CLKCON_SD_CLOCK_ENABLE: u16 = 1 << 2;
pub const TEGRA_MMC_CLKCON_CLKGEN_SELECT: u16 = 1 << 5;
pub const TEGRA_MMC_CLKCON_SDCLK_FREQ_SEL_SHIFT: u16 = 8;
pub const TEGRA_MMC_CLKCON_SDCLK_FREQ_SEL_UPPER_SHIFT: u16 = 6;

// Software reset
pub const TEGRA_MMC_SWRST_SW_RESET_FOR_CMD_LINE: u8 = 1 << 1;
pub const TEGRA_MMC_SWRST_SW_RESET_FOR_DAT_LINE: u8 = 1 << 2;

// Transfer mode
pub const TEGRA_MMC_TRNMOD_DMA_ENABLE: u16 = 1 << 0;
pub const TEGRA_MMC_TRNMOD_BLOCK_COUNT_ENABLE: u16 = 1 << 1;
pub const TEGRA_MMC_TRNMOD_AUTO_CMD12: u16 = 1 << 2;
pub const TEGRA_MMC_TRNMOD_DATA_XFER_DIR_SEL_READ: u16 = 1 << 4;
pub const TEGRA_MMC_TRNMOD_MULTI_BLOCK_SELECT: u16 = 1 << 5;

// Command register
pub const TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_136: u16 = 1;
pub const TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_48: u16 = 2;
pub const TEGRA_MMC_CMDREG_RESP_TYPE_SELECT_48_BUSY: u16 = 3;
pub const TEGRA_MMC_CMDREG_CMD_CRC_CHECK: u16 = 1 << 3;
pub const TEGRA_MMC_CMDREG_CMD_INDEX_CHECK: u16 = 1 << 4;
pub const TEGRA_MMC_CMDREG_DATA_PRESENT_SELECT: u16 = 1 << 5;

// Normal interrupt status
pub const TEGRA_MMC_NORINTSTS_CMD_COMPLETE: u16 = 1 << 0;
pub const TEGRA_MMC_NORINTSTS_XFER_COMPLETE: u16 = 1 << 1;
pub const TEGRA_MMC_NORINTSTS_DMA_INTERRUPT: u16 = 1 << 3;
pub const TEGRA_MMC_NORINTSTS_BUFFER_READ_READY: u16 = 1 << 5;
pub const TEGRA_MMC_NORINTSTS_ERR_INTERRUPT: u16 = 1 << 15;

// Interrupt status enables
pub const TEGRA_MMC_NORINTSTSEN_CMD_COMPLETE: u16 = 1 << 0;
pub const TEGRA_MMC_NORINTSTSEN_XFER_COMPLETE: u16 = 1 << 1;
pub const TEGRA_MMC_NORINTSTSEN_DMA_INTERRUPT: u16 = 1 << 3;
pub const TEGRA_MMC_NORINTSTSEN_BUFFER_READ_READY: u16 = 1 << 5;
pub const TEGRA_MMC_ERRINTSTSEN_ALL: u16 = 0x17F;

// Host control 2
pub const TEGRA_MMC_HOSTCTL2_UHS_MODE_MASK: u16 = 7 << 0;
pub const TEGRA_MMC_HOSTCTL2_1_8V_SIGNALLING_EN: u16 = 1 << 3;
pub const TEGRA_MMC_HOSTCTL2_EXECUTE_TUNING: u16 = 1 << 6;
pub const TEGRA_MMC_HOSTCTL2_SAMPLING_CLOCK_SELECT: u16 = 1 << 7;
pub const TEGRA_MMC_HOSTCTL2_PRESET_VALUE_ENABLE: u16 = 1 << 15;
pub const TEGRA_MMC_HOSTCTL2_HOST_VERSION_4_EN: u16 = 1 << 12;
pub const TEGRA_MMC_HOSTCTL2_ADDRESSING_64BIT_EN: u16 = 1 << 13;

// Capabilities
pub const TEGRA_MMC_CAPAREG_ADDRESSING_64BIT: u32 = 1 << 28;

// Pad autocal and comparator
pub const TEGRA_MMC_SDMEMCOMPPADCTL_PAD_E_INPUT_PWRD: u32 = 1 << 31;
pub const TEGRA_MMC_AUTOCALCFG_AUTO_CAL_START: u32 = 1 << 31;
pub const TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ENABLE: u32 = 1 << 29;
pub const TEGRA_MMC_AUTOCALCFG_AUTO_CAL_ACTIVE: u32 = 1 << 31;

// DLL calibration
pub const TEGRA_MMC_DLLCAL_CFG_EN_CALIBRATE: u32 = 1 << 31;
pub const TEGRA_MMC_DLLCAL_CFG_STATUS_ACTIVE: u32 = 1 << 31;

// Per-controller default tap and trim values
pub const SDMMC_TAP_VALUES: [u32; 4] = [4, 0, 3, 0];
pub const SDMMC_TRIM_VALUES: [u32; 4] = [2, 8, 3, 8];

// Commands issued by the driver itself
pub const MMC_STOP_TRANSMISSION: u8 = 12;

// Poll windows, microseconds
pub const SDMMC_DEFAULT_TIMEOUT_US: u32 = 2_000_000;
pub const SDMMC_DMA_PROGRESS_TIMEOUT_US: u32 = 1_500_000;
pub const SDMMC_AUTOCAL_TIMEOUT_US: u32 = 10_000;
pub const SDMMC_TUNING_BLOCK_TIMEOUT_US: u32 = 5_000;
pub const SDMMC_DLL_CAL_TIMEOUT_US: u32 = 5_000;
pub const SDMMC_DLL_CAL_STA_TIMEOUT_US: u32 = 10_000;
