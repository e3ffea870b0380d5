// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use drv_ice40_spi_program::{Config, Device, Pin, Trace};
use drv_mock_ice40::{Board, Event, MockPins, MockSpi, Wiring};

pub const BUS: u8 = 1;
pub const CS: Pin = Pin(10);
pub const DONE: Pin = Pin(11);
pub const RESET: Pin = Pin(12);
pub const INT: Pin = Pin(13);

pub const WIRING: Wiring = Wiring {
    cs: CS,
    done: Some(DONE),
    reset: Some(RESET),
    int: Some(INT),
};

pub const CONFIG: Config = Config {
    bus: BUS,
    cs: Some(CS),
    done: Some(DONE),
    reset: Some(RESET),
    int: Some(INT),
    clock_hz_full_duplex: 12_000_000,
    clock_hz_half_duplex: 24_000_000,
    clock_hz_turbo: None,
    input_delay_ns: 0,
    max_transfer_size: 4,
};

/// Bind order used by `init`.
pub const FULL_DUPLEX: usize = 0;
pub const HALF_DUPLEX: usize = 1;

pub type TestDevice = Device<MockPins, MockSpi>;

pub fn setup(config: Config) -> (Board, TestDevice) {
    let board = Board::new(BUS, WIRING);
    let dev = Device::new(config, board.pins(), board.spi());
    (board, dev)
}

/// Sets up and initializes a device, then forgets everything init did so
/// tests only see their own traffic.
pub fn ready(config: Config) -> (Board, TestDevice) {
    let (board, mut dev) = setup(config);
    dev.init().unwrap();
    board.clear_events();
    (board, dev)
}

/// Payloads of the transfers made with SS asserted, which during a load are
/// exactly the bitstream chunks.
pub fn cs_low_payloads(board: &Board) -> Vec<Vec<u8>> {
    board
        .transfers()
        .into_iter()
        .filter(|t| t.cs_low)
        .filter_map(|t| t.tx)
        .collect()
}

pub fn cs_writes(board: &Board) -> Vec<bool> {
    board
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Level(pin, high) if pin == CS => Some(high),
            _ => None,
        })
        .collect()
}

pub fn trace(dev: &TestDevice) -> Vec<Trace> {
    dev.trace().payloads().collect()
}
