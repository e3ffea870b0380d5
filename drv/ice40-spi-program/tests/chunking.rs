// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::*;
use drv_ice40_spi_program::Config;
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

/// Checks that the bitstream went out in order, whole, and in transfers no
/// bigger than the bus allows.
#[track_caller]
fn assert_delivered(
    board: &drv_mock_ice40::Board,
    bitstream: &[u8],
    max: usize,
) -> Result<(), TestCaseError> {
    let chunks = cs_low_payloads(board);
    prop_assert!(
        chunks.iter().all(|c| !c.is_empty() && c.len() <= max),
        "chunk sizes {:?} don't fit in {max}",
        chunks.iter().map(Vec::len).collect::<Vec<_>>(),
    );
    prop_assert_eq!(chunks.concat(), bitstream);
    prop_assert_eq!(board.received(), bitstream);
    Ok(())
}

/// Cuts `bitstream` into consecutive pieces of the given lengths, with
/// whatever is left over as the last piece.
fn cut<'a>(bitstream: &'a [u8], lens: &[usize]) -> Vec<&'a [u8]> {
    let mut rest = bitstream;
    let mut pieces = vec![];
    for &len in lens {
        let (piece, tail) = rest.split_at(len.min(rest.len()));
        pieces.push(piece);
        rest = tail;
    }
    pieces.push(rest);
    pieces
}

proptest! {
    #[test]
    fn one_shot_load(
        max in 1usize..64,
        bitstream in vec(any::<u8>(), 0..512),
    ) {
        let (board, mut dev) = ready(Config {
            max_transfer_size: max,
            ..CONFIG
        });
        board.expect_image_len(bitstream.len());

        prop_assert_eq!(
            dev.load_bitstream(&mut board.delay(), &bitstream),
            Ok(())
        );
        prop_assert_eq!(
            cs_low_payloads(&board).len(),
            bitstream.len().div_ceil(max)
        );
        assert_delivered(&board, &bitstream, max)?;
    }

    #[test]
    fn streamed_load(
        max in 1usize..64,
        bitstream in vec(any::<u8>(), 0..512),
        lens in vec(0usize..100, 0..8),
    ) {
        let (board, mut dev) = ready(Config {
            max_transfer_size: max,
            ..CONFIG
        });
        board.expect_image_len(bitstream.len());

        let pieces = cut(&bitstream, &lens);
        prop_assert_eq!(
            dev.load_bitstream_chunks(&mut board.delay(), pieces),
            Ok(())
        );
        assert_delivered(&board, &bitstream, max)?;
    }
}
