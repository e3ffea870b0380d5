// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types shared between the iCE40 programming driver, the boards that wire it
//! up, and the build-time configuration tooling.

#![cfg_attr(not(test), no_std)]

use serde::Deserialize;

/// A GPIO line, numbered the way the host's pin controller numbers them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct Pin(pub u16);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Duplex {
    Full,
    Half,
}

/// Settings handed to the SPI bus when a channel is bound. CS is never part
/// of this: the driver gates it itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub clock_hz: u32,
    pub duplex: Duplex,
    pub input_delay_ns: u32,
}

/// Wiring and transport configuration for one iCE40.
///
/// This is `const`-constructible so boards can bake it into flash, and
/// deserializable so build scripts can produce it from TOML.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// SPI controller the FPGA hangs off.
    pub bus: u8,
    /// SPI_SS. Required; `None` is only representable so that `init` can
    /// reject it.
    pub cs: Option<Pin>,
    /// CDONE, if wired to us directly.
    pub done: Option<Pin>,
    /// CRESET_B, if wired to us directly.
    pub reset: Option<Pin>,
    /// Interrupt line from the loaded design, if any.
    pub int: Option<Pin>,
    pub clock_hz_full_duplex: u32,
    pub clock_hz_half_duplex: u32,
    /// Optional third, faster channel for use by the design's runtime
    /// protocol. The configuration sequence never uses it.
    pub clock_hz_turbo: Option<u32>,
    #[serde(default)]
    pub input_delay_ns: u32,
    /// Largest single transfer the bus accepts, in bytes.
    pub max_transfer_size: usize,
}

impl Config {
    /// Checks the invariants every device needs before it can be initialized,
    /// returning the chip select pin on success.
    ///
    /// Missing CDONE/CRESET sources are *not* checked here, since either may be
    /// supplied through a handler instead of a pin.
    pub fn validate(&self) -> Result<Pin, ConfigError> {
        let cs = self.cs.ok_or(ConfigError::NoChipSelect)?;
        if self.max_transfer_size == 0 {
            return Err(ConfigError::ZeroTransferSize);
        }
        Ok(cs)
    }

    pub fn channel(&self, duplex: Duplex) -> ChannelConfig {
        let clock_hz = match duplex {
            Duplex::Full => self.clock_hz_full_duplex,
            Duplex::Half => self.clock_hz_half_duplex,
        };
        ChannelConfig {
            clock_hz,
            duplex,
            input_delay_ns: self.input_delay_ns,
        }
    }

    pub fn turbo_channel(&self) -> Option<ChannelConfig> {
        self.clock_hz_turbo.map(|clock_hz| ChannelConfig {
            clock_hz,
            duplex: Duplex::Full,
            input_delay_ns: self.input_delay_ns,
        })
    }
}

/// Ways a device's configuration can be unusable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No chip select pin was given.
    NoChipSelect,
    /// `max_transfer_size` was zero, so nothing could ever be sent.
    ZeroTransferSize,
    /// Neither a CDONE pin nor a done handler exists.
    NoDoneSignal,
    /// Neither a CRESET_B pin nor a reset handler exists.
    NoResetSignal,
}

/// The part of an operation that was underway when a transport call failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    ConfigurePins,
    BindChannel,
    HoldReset,
    ReleaseReset,
    AssertCs,
    DeassertCs,
    ReadDone,
    DummyClocks,
    Bitstream,
    TrailingClocks,
    Send,
    Receive,
    Transaction,
}

/// Error code returned by a caller-supplied done or reset handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandlerError(pub u32);

/// The collaborator whose call failed, with its error passed through as-is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault<G, S> {
    Gpio(G),
    Spi(S),
    Handler(HandlerError),
}

/// Things that can go wrong driving an iCE40, generic over the GPIO (`G`) and
/// SPI (`S`) error types of the platform.
///
/// The FPGA gives very little feedback: CDONE is the only signal. It being
/// high too early (`HardwareFault`) and it failing to go high at the end
/// (`ConfigurationFailed`) mean different things -- broken wiring versus a bad
/// bitstream or timing -- so they are kept apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ice40Error<G, S> {
    /// The device has not been initialized, or the channel an operation needs
    /// was never bound.
    NotInitialized,
    /// The device's configuration cannot support the operation.
    InvalidConfiguration(ConfigError),
    /// CDONE was asserted right after reset, before any bitstream was sent.
    /// Something is miswired or the part is broken.
    HardwareFault,
    /// We sent the whole bitstream and the trailing clocks, but CDONE did not
    /// go high. This may be a sign that the bitstream is for a different part.
    ConfigurationFailed,
    /// A bitstream load phase was called out of order.
    InvalidState,
    /// A GPIO, SPI or handler call failed during the named step.
    TransportFailure(Step, Fault<G, S>),
}

impl<G, S> From<ConfigError> for Ice40Error<G, S> {
    fn from(e: ConfigError) -> Self {
        Self::InvalidConfiguration(e)
    }
}

/// GPIO primitives provided by the host platform.
pub trait PinControl {
    type Error;

    fn set_direction(
        &mut self,
        pin: Pin,
        direction: Direction,
    ) -> Result<(), Self::Error>;
    fn set_level(&mut self, pin: Pin, high: bool) -> Result<(), Self::Error>;
    fn get_level(&self, pin: Pin) -> bool;
}

/// Callbacks a [`SpiBus`] must run around every transfer on a channel.
pub trait TransferHooks {
    /// Called before the first clock edge of a transfer.
    fn pre_transfer(&mut self);
    /// Called after a transfer completes, whether or not it succeeded.
    fn post_transfer(&mut self);
}

/// An SPI controller. Chip select is not its business: every transfer is
/// bracketed by the caller's [`TransferHooks`] instead.
pub trait SpiBus {
    type Error;
    /// Handle for a set of transfer settings bound on this bus.
    type Channel;

    fn bind(
        &mut self,
        bus: u8,
        config: &ChannelConfig,
    ) -> Result<Self::Channel, Self::Error>;

    /// Clocks out `tx` (or filler, if `None`) while capturing into `rx` (if
    /// any). Implementations must call `hooks.pre_transfer()` first and
    /// `hooks.post_transfer()` last, even when the transfer fails, and are
    /// responsible for enforcing their own maximum transfer size.
    fn transfer<H: TransferHooks>(
        &mut self,
        channel: &Self::Channel,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        hooks: &mut H,
    ) -> Result<(), Self::Error>;
}

/// Reads CDONE for boards where it is not wired to one of our GPIOs, e.g. when
/// it sits behind an I/O expander.
pub trait DoneHandler {
    fn get_done(&mut self) -> Result<bool, HandlerError>;
}

/// Drives CRESET_B for boards where it is not wired to one of our GPIOs.
/// `high == false` holds the FPGA in reset.
pub trait ResetHandler {
    fn set_reset(&mut self, high: bool) -> Result<(), HandlerError>;
}

/// Placeholder handler type for devices with both signals on direct pins.
/// It has no values, so a `Some(NoHandler)` can never be constructed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NoHandler {}

impl DoneHandler for NoHandler {
    fn get_done(&mut self) -> Result<bool, HandlerError> {
        match *self {}
    }
}

impl ResetHandler for NoHandler {
    fn set_reset(&mut self, _high: bool) -> Result<(), HandlerError> {
        match *self {}
    }
}

/// Coarse lifecycle of a device as seen by the driver.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceState {
    /// Constructed, `init` not yet run.
    Unconfigured = 0,
    /// Initialized or configured; transfers gate CS normally.
    Idle = 1,
    /// Held in reset with CS gating off.
    ConfiguringReset = 2,
    /// Released from reset into SPI target configuration mode.
    ConfiguringEnabled = 3,
    /// The last configuration attempt failed. A new one may be started.
    Error = 4,
}
