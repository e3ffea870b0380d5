// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code for programming an iCE40 FPGA over SPI, using GPIOs for CRESET_B,
//! CDONE and chip select.
//!
//! This crate provides reset and bitstream load support for iCE40 FPGAs in SPI
//! target configuration mode, and afterwards hands out raw SPI transfers for
//! talking to the loaded design. It is written against the collaborator traits
//! in `drv_ice40_api` ([`PinControl`], [`SpiBus`], and optionally
//! [`DoneHandler`]/[`ResetHandler`] for signals that aren't on our own pins),
//! plus `embedded_hal`'s `DelayMs` for the one delay the protocol needs.
//!
//! To use it,
//!
//! 1. Fill out a [`Config`] with your wiring details.
//! 2. Build a [`Device`] from it and call [`Device::init`] once.
//! 3. Call [`Device::load_bitstream`] with the whole image, or, if the image
//!    doesn't fit in RAM at once, call
//!    [`Device::begin_bitstream_load`], then
//!    [`Device::continue_bitstream_load`] as many times as you need to, then
//!    [`Device::finish_bitstream_load`].
//! 4. Talk to the design with [`Device::send`], [`Device::receive`] and
//!    [`Device::transaction`].
//!
//! If loading fails, CS is released and normal CS gating is restored, and you
//! can simply start over -- loading always begins by putting the FPGA back in
//! reset. There is no retry loop in here; whether retrying against possibly
//! broken hardware is a good idea is the caller's call.
//!
//! ## Chip select
//!
//! During normal operation every transfer is bracketed by CS assertion and
//! release. The configuration sequence needs to drive CS by hand instead (the
//! iCE40 samples it on reset release to pick SPI target mode, and wants some
//! clocks with it deasserted), so the device keeps a gate flag that turns off
//! the automatic bracketing for the duration of a load. The bracketing lives
//! in [`CsGate`], which the device hands to the bus for each transfer, so no
//! transfer path can forget it.

#![cfg_attr(not(test), no_std)]

mod device;
mod gate;
mod loader;
mod signal;

pub use drv_ice40_api::{
    ChannelConfig, Config, ConfigError, DeviceState, Direction, DoneHandler,
    Duplex, Fault, HandlerError, Ice40Error, NoHandler, Pin, PinControl,
    ResetHandler, SpiBus, Step, TransferHooks,
};

pub use device::{Device, DeviceError, TRACE_DEPTH};
pub use gate::CsGate;
pub use loader::{DUMMY_BYTE, SETTLE_MS, TRAILING_PAD_BYTES};
pub use signal::Signal;

/// Events recorded in a device's ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    Initialized,
    Disabled,
    Enabled,
    Done(bool),
    /// CDONE was high immediately after reset release.
    DoneAfterReset,
    BitstreamChunk(usize),
    TrailingClocks,
    Configured,
    ConfigurationFailed,
    /// A load was abandoned; the step is known for transport failures.
    Aborted(Option<Step>),
    /// Driving CS failed in a transfer hook or while aborting. These are not
    /// reported to the caller.
    CsToggleFailed { high: bool },
}
