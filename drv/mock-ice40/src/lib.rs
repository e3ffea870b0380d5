// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated board with an iCE40 on it, for testing the programming driver
//! on the host.
//!
//! A [`Board`] hands out the pieces a driver needs -- [`MockPins`],
//! [`MockSpi`], [`MockDone`], [`MockReset`] and [`MockDelay`] -- all sharing
//! one simulation. Every pin write, transfer, handler call and sleep is
//! logged as an [`Event`], and the FPGA reacts to them roughly the way the
//! real part does:
//!
//! - CRESET_B going low puts it in reset and clears anything it received.
//! - CRESET_B rising while SPI_SS is low enters SPI target mode; rising with
//!   SS high means it would go try to boot from flash, and never finishes.
//! - In target mode, bytes clocked with SS low are taken as the image.
//! - Once the image is complete, clocks with SS high are counted, and after
//!   [`CONFIG_CLOCKS`] of them CDONE goes high.
//!
//! Faults can be injected on individual pins, on the bus, and in the
//! handlers.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use drv_ice40_api::{
    ChannelConfig, Direction, DoneHandler, HandlerError, Pin, PinControl,
    ResetHandler, SpiBus, TransferHooks,
};

/// Clocks the iCE40 needs after the last image byte before it asserts CDONE.
pub const CONFIG_CLOCKS: u32 = 49;

/// How the simulated board is wired. `done` and `reset` may be absent, in
/// which case those lines are only reachable through the handlers.
#[derive(Copy, Clone, Debug)]
pub struct Wiring {
    pub cs: Pin,
    pub done: Option<Pin>,
    pub reset: Option<Pin>,
    pub int: Option<Pin>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Direction(Pin, Direction),
    Level(Pin, bool),
    Bind(u8, ChannelConfig),
    Transfer(Transfer),
    DoneHandler(bool),
    ResetHandler(bool),
    Sleep(u32),
}

/// One transfer as seen on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Index of the channel, in bind order.
    pub channel: usize,
    pub tx: Option<Vec<u8>>,
    pub rx_len: usize,
    /// Whether SS was asserted while the clocks ran.
    pub cs_low: bool,
}

/// What the FPGA is doing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Held in reset, or never released.
    Reset,
    /// Released with SS high; looking for a flash that isn't there.
    FlashBoot,
    /// Released with SS low; accepting an image.
    Target,
    /// Image loaded and started.
    Configured,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockPinError {
    Injected(Pin),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MockSpiError {
    Injected,
    TooLong { len: usize, limit: usize },
    NoSuchBus(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MockChannel(usize);

struct Fpga {
    phase: Phase,
    image: Vec<u8>,
    trailing_clocks: u32,
    expected_len: Option<usize>,
}

impl Fpga {
    fn creset(&mut self, high: bool, cs_low: bool) {
        if !high {
            self.phase = Phase::Reset;
            self.image.clear();
            self.trailing_clocks = 0;
        } else if self.phase == Phase::Reset {
            self.phase = if cs_low {
                Phase::Target
            } else {
                Phase::FlashBoot
            };
        }
    }

    fn image_complete(&self) -> bool {
        match self.expected_len {
            Some(n) => self.image.len() >= n,
            None => !self.image.is_empty(),
        }
    }

    fn clock(&mut self, data: &[u8], cs_low: bool) {
        if self.phase != Phase::Target {
            return;
        }
        if cs_low {
            self.image.extend_from_slice(data);
            self.trailing_clocks = 0;
        } else if self.image_complete() {
            let clocks = u32::try_from(data.len() * 8).unwrap_or(u32::MAX);
            self.trailing_clocks = self.trailing_clocks.saturating_add(clocks);
            if self.trailing_clocks >= CONFIG_CLOCKS {
                self.phase = Phase::Configured;
            }
        }
    }
}

struct Sim {
    wiring: Wiring,
    bus: u8,
    levels: BTreeMap<Pin, bool>,
    directions: BTreeMap<Pin, Direction>,
    channels: Vec<ChannelConfig>,
    events: Vec<Event>,
    fpga: Fpga,
    int_level: bool,
    force_done: Option<bool>,
    failing_pins: Vec<Pin>,
    spi_budget: Option<usize>,
    max_transfer: Option<usize>,
    responses: VecDeque<u8>,
    done_handler_error: Option<HandlerError>,
    reset_handler_error: Option<HandlerError>,
}

impl Sim {
    fn cs_low(&self) -> bool {
        // An undriven SS is pulled up on every board we care about.
        !self.levels.get(&self.wiring.cs).copied().unwrap_or(true)
    }

    fn cdone(&self) -> bool {
        self.force_done
            .unwrap_or(self.fpga.phase == Phase::Configured)
    }

    fn set_creset(&mut self, high: bool) {
        let cs_low = self.cs_low();
        self.fpga.creset(high, cs_low);
    }

    fn clock(
        &mut self,
        channel: usize,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
    ) -> Result<(), MockSpiError> {
        let len = tx
            .map_or(0, <[u8]>::len)
            .max(rx.as_ref().map_or(0, |r| r.len()));
        if let Some(limit) = self.max_transfer {
            if len > limit {
                return Err(MockSpiError::TooLong { len, limit });
            }
        }
        if let Some(budget) = self.spi_budget.as_mut() {
            if *budget == 0 {
                return Err(MockSpiError::Injected);
            }
            *budget -= 1;
        }

        let cs_low = self.cs_low();
        self.events.push(Event::Transfer(Transfer {
            channel,
            tx: tx.map(<[u8]>::to_vec),
            rx_len: rx.as_ref().map_or(0, |r| r.len()),
            cs_low,
        }));

        if let Some(rx) = rx {
            for b in rx.iter_mut() {
                *b = self.responses.pop_front().unwrap_or(0);
            }
        }

        let filler;
        let data = match tx {
            Some(tx) => tx,
            None => {
                filler = vec![0; len];
                &filler[..]
            }
        };
        self.fpga.clock(data, cs_low);
        Ok(())
    }
}

/// The simulated board. Cloning it gives another view of the same board.
#[derive(Clone)]
pub struct Board {
    sim: Rc<RefCell<Sim>>,
}

impl Board {
    /// Creates a board whose FPGA hangs off SPI controller `bus`.
    pub fn new(bus: u8, wiring: Wiring) -> Self {
        let sim = Sim {
            wiring,
            bus,
            levels: BTreeMap::new(),
            directions: BTreeMap::new(),
            channels: Vec::new(),
            events: Vec::new(),
            fpga: Fpga {
                phase: Phase::Reset,
                image: Vec::new(),
                trailing_clocks: 0,
                expected_len: None,
            },
            int_level: false,
            force_done: None,
            failing_pins: Vec::new(),
            spi_budget: None,
            max_transfer: None,
            responses: VecDeque::new(),
            done_handler_error: None,
            reset_handler_error: None,
        };
        Self {
            sim: Rc::new(RefCell::new(sim)),
        }
    }

    pub fn pins(&self) -> MockPins {
        MockPins(self.clone())
    }

    pub fn spi(&self) -> MockSpi {
        MockSpi(self.clone())
    }

    pub fn done_handler(&self) -> MockDone {
        MockDone(self.clone())
    }

    pub fn reset_handler(&self) -> MockReset {
        MockReset(self.clone())
    }

    pub fn delay(&self) -> MockDelay {
        MockDelay(self.clone())
    }

    /// Sets the image length the FPGA waits for. Without it, any non-empty
    /// image counts as complete.
    pub fn expect_image_len(&self, len: usize) {
        self.sim.borrow_mut().fpga.expected_len = Some(len);
    }

    /// Pins CDONE to a level regardless of what the FPGA is doing, or hands
    /// it back to the model with `None`.
    pub fn force_done(&self, level: Option<bool>) {
        self.sim.borrow_mut().force_done = level;
    }

    pub fn set_int(&self, high: bool) {
        self.sim.borrow_mut().int_level = high;
    }

    /// Makes every write to `pin` fail from now on.
    pub fn fail_pin(&self, pin: Pin) {
        self.sim.borrow_mut().failing_pins.push(pin);
    }

    /// Lets `n` more transfers through, then fails the rest.
    pub fn fail_spi_after(&self, n: usize) {
        self.sim.borrow_mut().spi_budget = Some(n);
    }

    /// Rejects transfers longer than `limit` bytes.
    pub fn limit_transfers(&self, limit: usize) {
        self.sim.borrow_mut().max_transfer = Some(limit);
    }

    /// Queues bytes to be returned by subsequent reads.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.sim.borrow_mut().responses.extend(bytes);
    }

    pub fn fail_done_handler(&self, code: u32) {
        self.sim.borrow_mut().done_handler_error = Some(HandlerError(code));
    }

    pub fn fail_reset_handler(&self, code: u32) {
        self.sim.borrow_mut().reset_handler_error = Some(HandlerError(code));
    }

    pub fn events(&self) -> Vec<Event> {
        self.sim.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.sim.borrow_mut().events.clear();
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.sim
            .borrow()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Transfer(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    /// Last level written to `pin`, if any.
    pub fn level(&self, pin: Pin) -> Option<bool> {
        self.sim.borrow().levels.get(&pin).copied()
    }

    pub fn direction(&self, pin: Pin) -> Option<Direction> {
        self.sim.borrow().directions.get(&pin).copied()
    }

    pub fn channels(&self) -> Vec<ChannelConfig> {
        self.sim.borrow().channels.clone()
    }

    pub fn phase(&self) -> Phase {
        self.sim.borrow().fpga.phase
    }

    /// Image bytes the FPGA has taken in since it last left reset.
    pub fn received(&self) -> Vec<u8> {
        self.sim.borrow().fpga.image.clone()
    }
}

pub struct MockPins(Board);

impl PinControl for MockPins {
    type Error = MockPinError;

    fn set_direction(
        &mut self,
        pin: Pin,
        direction: Direction,
    ) -> Result<(), MockPinError> {
        let mut sim = self.0.sim.borrow_mut();
        if sim.failing_pins.contains(&pin) {
            return Err(MockPinError::Injected(pin));
        }
        sim.directions.insert(pin, direction);
        sim.events.push(Event::Direction(pin, direction));
        Ok(())
    }

    fn set_level(&mut self, pin: Pin, high: bool) -> Result<(), MockPinError> {
        let mut sim = self.0.sim.borrow_mut();
        if sim.failing_pins.contains(&pin) {
            return Err(MockPinError::Injected(pin));
        }
        sim.levels.insert(pin, high);
        sim.events.push(Event::Level(pin, high));
        if Some(pin) == sim.wiring.reset {
            sim.set_creset(high);
        }
        Ok(())
    }

    fn get_level(&self, pin: Pin) -> bool {
        let sim = self.0.sim.borrow();
        if Some(pin) == sim.wiring.done {
            sim.cdone()
        } else if Some(pin) == sim.wiring.int {
            sim.int_level
        } else {
            sim.levels.get(&pin).copied().unwrap_or(false)
        }
    }
}

pub struct MockSpi(Board);

impl SpiBus for MockSpi {
    type Error = MockSpiError;
    type Channel = MockChannel;

    fn bind(
        &mut self,
        bus: u8,
        config: &ChannelConfig,
    ) -> Result<MockChannel, MockSpiError> {
        let mut sim = self.0.sim.borrow_mut();
        if bus != sim.bus {
            return Err(MockSpiError::NoSuchBus(bus));
        }
        sim.channels.push(*config);
        sim.events.push(Event::Bind(bus, *config));
        Ok(MockChannel(sim.channels.len() - 1))
    }

    fn transfer<H: TransferHooks>(
        &mut self,
        channel: &MockChannel,
        tx: Option<&[u8]>,
        rx: Option<&mut [u8]>,
        hooks: &mut H,
    ) -> Result<(), MockSpiError> {
        // The hooks write pins, so the simulation must not be borrowed
        // across them.
        hooks.pre_transfer();
        let r = self.0.sim.borrow_mut().clock(channel.0, tx, rx);
        hooks.post_transfer();
        r
    }
}

pub struct MockDone(Board);

impl DoneHandler for MockDone {
    fn get_done(&mut self) -> Result<bool, HandlerError> {
        let mut sim = self.0.sim.borrow_mut();
        if let Some(e) = sim.done_handler_error {
            return Err(e);
        }
        let level = sim.cdone();
        sim.events.push(Event::DoneHandler(level));
        Ok(level)
    }
}

pub struct MockReset(Board);

impl ResetHandler for MockReset {
    fn set_reset(&mut self, high: bool) -> Result<(), HandlerError> {
        let mut sim = self.0.sim.borrow_mut();
        if let Some(e) = sim.reset_handler_error {
            return Err(e);
        }
        sim.events.push(Event::ResetHandler(high));
        sim.set_creset(high);
        Ok(())
    }
}

pub struct MockDelay(Board);

impl embedded_hal::blocking::delay::DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.sim.borrow_mut().events.push(Event::Sleep(ms));
    }
}
