// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_ice40_api::{Pin, PinControl, TransferHooks};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::{Trace, TRACE_DEPTH};

/// Chip select handling for a single transfer.
///
/// The device builds one of these for every transfer and hands it to the bus,
/// which runs its hooks around the transfer. When the gate is closed
/// (`enabled == false`, i.e. during configuration) the hooks leave CS alone
/// and the bus is just a clock source.
pub struct CsGate<'a, P: PinControl> {
    enabled: bool,
    cs: Pin,
    pins: &'a mut P,
    trace: &'a mut Ringbuf<Trace, TRACE_DEPTH>,
}

impl<'a, P: PinControl> CsGate<'a, P> {
    pub(crate) fn new(
        enabled: bool,
        cs: Pin,
        pins: &'a mut P,
        trace: &'a mut Ringbuf<Trace, TRACE_DEPTH>,
    ) -> Self {
        Self {
            enabled,
            cs,
            pins,
            trace,
        }
    }

    fn drive(&mut self, high: bool) {
        if !self.enabled {
            return;
        }
        // The transfer itself decides success; a CS write that didn't take
        // only gets recorded.
        if self.pins.set_level(self.cs, high).is_err() {
            ringbuf_entry!(*self.trace, Trace::CsToggleFailed { high });
        }
    }
}

impl<P: PinControl> TransferHooks for CsGate<'_, P> {
    fn pre_transfer(&mut self) {
        self.drive(false);
    }

    fn post_transfer(&mut self) {
        self.drive(true);
    }
}
