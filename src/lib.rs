//! Polled, interrupt-free driver for the Tegra T210 SD/MMC host
//! controllers. Platform services (clocks, pinmux, regulators, timer)
//! are supplied through the traits in [`hal`].

#![cfg_attr(not(test), no_std)]

pub mod hal;
pub mod sdmmc;

mod err;

pub use err::SdError;
pub use sdmmc::{BusWidth, ClockMode, Command, Request, RspType, Sdmmc, SdmmcId, SdmmcPower};
