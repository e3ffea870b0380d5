// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The SPI target configuration sequence.
//!
//! The iCE40 picks its configuration mode by sampling SPI_SS on the rising
//! edge of CRESET_B. If SS is low it waits to be fed a bitstream over SPI;
//! otherwise it goes off and tries to boot from flash, which is not what we
//! want. After that it wants:
//!
//! - at least 1200 us before the first bitstream byte (we give it 2 ms),
//! - 8 clocks with SS high,
//! - the bitstream with SS low,
//! - at least 49 more clocks with SS high, after which CDONE should rise.

use drv_ice40_api::{
    DeviceState, DoneHandler, Ice40Error, Pin, PinControl, ResetHandler,
    SpiBus, Step,
};
use embedded_hal::blocking::delay::DelayMs;
use ringbuf::ringbuf_entry;
use static_assertions::const_assert;

use crate::device::{ChannelKind, Device, DeviceError};
use crate::Trace;

/// Time given to the FPGA after releasing reset, before anything is sent.
pub const SETTLE_MS: u32 = 2;

/// Number of zero bytes clocked out after the bitstream.
pub const TRAILING_PAD_BYTES: usize = 20;

/// Clocked out with SS high ahead of the bitstream. The FPGA ignores the
/// value; it only wants the clocks.
pub const DUMMY_BYTE: u8 = 0xFF;

// The datasheet minimum is 49 clocks; we keep to the more generous 149 used
// by the vendor's own programming code.
const_assert!(TRAILING_PAD_BYTES * 8 >= 149);

const TRAILING_PAD: [u8; TRAILING_PAD_BYTES] = [0; TRAILING_PAD_BYTES];

impl<P, B, D, R> Device<P, B, D, R>
where
    P: PinControl,
    B: SpiBus,
    D: DoneHandler,
    R: ResetHandler,
{
    /// Loads a complete bitstream held in memory.
    ///
    /// On success the FPGA is running the new design and CS gating is back on.
    /// On failure CS gating is back on as well, CS is released, and the device
    /// is in [`DeviceState::Error`]; calling this again starts over from
    /// reset.
    pub fn load_bitstream(
        &mut self,
        delay: &mut impl DelayMs<u32>,
        bitstream: &[u8],
    ) -> Result<(), DeviceError<P, B>> {
        self.load_bitstream_chunks(delay, core::iter::once(bitstream))
    }

    /// Loads a bitstream that arrives in pieces, e.g. from a decompressor.
    /// The pieces may be any size; each is split to fit the bus.
    pub fn load_bitstream_chunks<'a>(
        &mut self,
        delay: &mut impl DelayMs<u32>,
        chunks: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<(), DeviceError<P, B>> {
        self.begin_bitstream_load(delay)?;
        for chunk in chunks {
            self.continue_bitstream_load(chunk)?;
        }
        self.finish_bitstream_load()
    }

    /// Resets the FPGA into SPI target mode and gets it ready to receive a
    /// bitstream.
    ///
    /// Fails with [`Ice40Error::HardwareFault`] if CDONE is already high
    /// after reset, in which case nothing has been sent.
    pub fn begin_bitstream_load(
        &mut self,
        delay: &mut impl DelayMs<u32>,
    ) -> Result<(), DeviceError<P, B>> {
        let Some(cs) = self.bound.as_ref().map(|b| b.cs) else {
            return Err(Ice40Error::NotInitialized);
        };
        let r = self.enter_target_mode(cs, delay);
        r.map_err(|e| self.abort(e))?;
        self.loading = true;
        Ok(())
    }

    /// Sends the next piece of the bitstream. Only valid between
    /// [`Device::begin_bitstream_load`] and
    /// [`Device::finish_bitstream_load`]; fails with
    /// [`Ice40Error::InvalidState`] anywhere else.
    pub fn continue_bitstream_load(
        &mut self,
        data: &[u8],
    ) -> Result<(), DeviceError<P, B>> {
        self.loading_cs()?;
        let r = self.send_bitstream(data);
        r.map_err(|e| self.abort(e))
    }

    /// Sends the trailing clocks and checks CDONE.
    ///
    /// Returns [`Ice40Error::ConfigurationFailed`] if CDONE stays low. In
    /// either case CS gating is re-enabled.
    pub fn finish_bitstream_load(&mut self) -> Result<(), DeviceError<P, B>> {
        let cs = self.loading_cs()?;
        let r = self.send_trailing_clocks(cs);
        let done = r.map_err(|e| self.abort(e))?;

        self.loading = false;
        self.cs_enabled = true;
        if done {
            self.state = DeviceState::Idle;
            ringbuf_entry!(self.trace, Trace::Configured);
            Ok(())
        } else {
            self.state = DeviceState::Error;
            ringbuf_entry!(self.trace, Trace::ConfigurationFailed);
            Err(Ice40Error::ConfigurationFailed)
        }
    }

    fn enter_target_mode(
        &mut self,
        cs: Pin,
        delay: &mut impl DelayMs<u32>,
    ) -> Result<(), DeviceError<P, B>> {
        self.disable()?;

        // SS low across the reset release selects SPI target mode.
        self.pins
            .set_level(cs, false)
            .map_err(Self::gpio_fault(Step::AssertCs))?;
        self.enable()?;

        delay.delay_ms(SETTLE_MS);

        if self.get_done()? {
            ringbuf_entry!(self.trace, Trace::DoneAfterReset);
            return Err(Ice40Error::HardwareFault);
        }

        self.pins
            .set_level(cs, true)
            .map_err(Self::gpio_fault(Step::DeassertCs))?;
        self.transfer(
            ChannelKind::Half,
            Step::DummyClocks,
            Some(&[DUMMY_BYTE][..]),
            None,
        )?;
        self.pins
            .set_level(cs, false)
            .map_err(Self::gpio_fault(Step::AssertCs))
    }

    fn send_bitstream(&mut self, data: &[u8]) -> Result<(), DeviceError<P, B>> {
        for chunk in data.chunks(self.config.max_transfer_size) {
            self.transfer(
                ChannelKind::Half,
                Step::Bitstream,
                Some(chunk),
                None,
            )?;
            ringbuf_entry!(self.trace, Trace::BitstreamChunk(chunk.len()));
        }
        Ok(())
    }

    /// Releases SS, clocks out the pad, and returns what CDONE says.
    fn send_trailing_clocks(
        &mut self,
        cs: Pin,
    ) -> Result<bool, DeviceError<P, B>> {
        self.pins
            .set_level(cs, true)
            .map_err(Self::gpio_fault(Step::DeassertCs))?;
        for chunk in TRAILING_PAD.chunks(self.config.max_transfer_size) {
            self.transfer(
                ChannelKind::Half,
                Step::TrailingClocks,
                Some(chunk),
                None,
            )?;
        }
        ringbuf_entry!(self.trace, Trace::TrailingClocks);
        self.get_done()
    }

    /// Checks that a load is underway, returning the CS pin if so.
    fn loading_cs(&self) -> Result<Pin, DeviceError<P, B>> {
        let Some(bound) = self.bound.as_ref() else {
            return Err(Ice40Error::NotInitialized);
        };
        if !self.loading
            || self.state != DeviceState::ConfiguringEnabled
            || self.cs_enabled
        {
            return Err(Ice40Error::InvalidState);
        }
        Ok(bound.cs)
    }

    /// Puts the bus back into a usable state after a failed load, and hands
    /// back the error that caused it.
    fn abort(&mut self, error: DeviceError<P, B>) -> DeviceError<P, B> {
        if let Some(bound) = self.bound.as_ref() {
            if self.pins.set_level(bound.cs, true).is_err() {
                ringbuf_entry!(
                    self.trace,
                    Trace::CsToggleFailed { high: true }
                );
            }
        }
        self.loading = false;
        self.cs_enabled = true;
        self.state = DeviceState::Error;

        let step = match &error {
            Ice40Error::TransportFailure(step, _) => Some(*step),
            _ => None,
        };
        ringbuf_entry!(self.trace, Trace::Aborted(step));
        error
    }
}
