// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_ice40_api::{
    DoneHandler, Fault, HandlerError, Pin, PinControl, ResetHandler,
};

/// Where a device's CDONE or CRESET_B comes from, decided once at init.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal<H> {
    /// The line is on one of our GPIOs.
    DirectPin(Pin),
    /// The line lives somewhere else (an I/O expander, another task) and a
    /// handler reaches it for us.
    Delegated(H),
}

impl<H> Signal<H> {
    /// Picks the source for a signal. A pin wins over a handler when a board
    /// supplies both.
    pub(crate) fn resolve(
        pin: Option<Pin>,
        handler: Option<H>,
    ) -> Option<Self> {
        match (pin, handler) {
            (Some(pin), _) => Some(Self::DirectPin(pin)),
            (None, Some(handler)) => Some(Self::Delegated(handler)),
            (None, None) => None,
        }
    }
}

impl<H: DoneHandler> Signal<H> {
    pub(crate) fn read<P: PinControl>(
        &mut self,
        pins: &P,
    ) -> Result<bool, HandlerError> {
        match self {
            Self::DirectPin(pin) => Ok(pins.get_level(*pin)),
            Self::Delegated(handler) => handler.get_done(),
        }
    }
}

impl<H: ResetHandler> Signal<H> {
    pub(crate) fn drive<P: PinControl, S>(
        &mut self,
        pins: &mut P,
        high: bool,
    ) -> Result<(), Fault<P::Error, S>> {
        match self {
            Self::DirectPin(pin) => {
                pins.set_level(*pin, high).map_err(Fault::Gpio)
            }
            Self::Delegated(handler) => {
                handler.set_reset(high).map_err(Fault::Handler)
            }
        }
    }
}
