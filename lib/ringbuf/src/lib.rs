// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for instrumenting drivers
//!
//! A [`Ringbuf`] records the last `N` events of some `Copy + PartialEq`
//! payload type, typically a driver-specific `Trace` enum. Unlike a log, it
//! never allocates, never formats, and costs a handful of stores per entry, so
//! it can stay enabled in production firmware and be read back from a debugger
//! or from a test after the fact.
//!
//! Ring buffers here are plain values: a driver owns one as a field, and
//! records into it with [`ringbuf_entry!`], which stamps each entry with the
//! source line that produced it:
//!
//! ```
//! use ringbuf::{ringbuf_entry, Ringbuf};
//!
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     Chunk(usize),
//! }
//!
//! let mut trace: Ringbuf<Trace, 8> = Ringbuf::new(Trace::None);
//! for _ in 0..3 {
//!     ringbuf_entry!(trace, Trace::Chunk(256));
//! }
//! assert_eq!(trace.iter().count(), 1);
//! assert_eq!(trace.last().map(|e| e.count), Some(3));
//! ```
//!
//! When the same line records the same payload twice in a row, the most
//! recent entry's `count` is bumped instead of consuming a new slot. Loops
//! that emit identical events (e.g. "sent a 256-byte chunk") therefore show up
//! as one entry with a count rather than flushing everything else out of the
//! buffer.
//!
//! Enabling the `disabled` feature turns [`ringbuf_entry!`] into a no-op while
//! still type-checking its arguments.

#![cfg_attr(not(test), no_std)]

/// One slot of a [`Ringbuf`].
///
/// `generation` is bumped every time the slot is reused, which lets a reader
/// tell a stale slot from a fresh one after the buffer has wrapped. A `count`
/// of zero marks a slot that has never been written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// A ring buffer of the `N` most recent entries of type `T`.
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring buffer whose unused slots hold `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    /// Records `payload` as coming from source line `line`.
    ///
    /// Prefer [`ringbuf_entry!`], which fills in the line for you.
    pub fn entry(&mut self, line: u16, payload: T) {
        if N == 0 {
            return;
        }

        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                // Saturated entries fall through and take a fresh slot.
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        let ndx = match self.last {
            Some(i) if i + 1 < N => i + 1,
            _ => 0,
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }

    /// Returns the most recently written entry, if any.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.map(|i| &self.buffer[i])
    }

    /// Iterates over written entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |i| i + 1);
        self.buffer[start..]
            .iter()
            .chain(self.buffer[..start].iter())
            .filter(|ent| ent.count != 0)
    }

    /// Iterates over the payloads of written entries, oldest first.
    pub fn payloads(&self) -> impl Iterator<Item = T> + '_ {
        self.iter().map(|ent| ent.payload)
    }
}

/// Inserts `payload` into the ring buffer `buf`, tagged with the calling line.
///
/// `buf` is any place expression of type `Ringbuf<T, N>` that can be
/// borrowed mutably, e.g. `self.trace`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before borrowing the buffer, so the payload
        // expression may itself read from the structure that owns `buf`.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}
