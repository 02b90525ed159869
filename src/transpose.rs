//! Bit-matrix transposition for the OT extension.
//!
//! Row-major bit matrices with LSB-first bit order inside each byte. The
//! extension protocols expand correlations row-wise but consume them
//! column-wise, so batches get transposed once per direction.

use wide::{i8x16, i64x2};

/// Transpose a bit matrix.
///
/// # Panics
/// - If `input.len() != output.len()`
/// - If `rows` is less than 16 or not divisible by 16
/// - If `input.len()` is not divisible by `rows`
/// - If the number of columns, `input.len() * 8 / rows`, is less than 16 or
///   not divisible by 8
pub(crate) fn transpose_bitmatrix(input: &[u8], output: &mut [u8], rows: usize) {
    assert_eq!(input.len(), output.len());
    assert!(rows >= 16, "rows must be at least 16");
    assert_eq!(0, rows % 16, "rows must be divisible by 16");
    assert_eq!(
        0,
        input.len() % rows,
        "input.len() must be divisible by rows"
    );
    let cols = input.len() * 8 / rows;
    assert!(cols >= 16, "columns must be at least 16, got {cols}");
    assert_eq!(0, cols % 8, "columns must be divisible by 8, got {cols}");

    // Work in 16x8 sub-blocks: load one column byte of 16 consecutive rows
    // into an i8x16, then peel off one bit position per iteration.
    // `move_mask` returns the msb of every lane, so the 16 bits of input
    // column `block_col + bit` come out as two bytes, written to output row
    // `block_col + bit` at byte position `block_row / 8`.
    for block_row in (0..rows).step_by(16) {
        for block_col in (0..cols).step_by(8) {
            let mut v = i8x16::from(std::array::from_fn(|i| {
                input[byte_index(block_row + i, block_col, cols)] as i8
            }));
            for bit in (0..8).rev() {
                let msbs = v.move_mask().to_le_bytes();
                let idx = byte_index(block_col + bit, block_row, rows);
                output[idx] = msbs[0];
                output[idx + 1] = msbs[1];
                // i8x16 has no shift impl, so shift as two i64; bits moving
                // across byte boundaries end up in lanes whose msb was
                // already consumed
                let v: &mut i64x2 = bytemuck::must_cast_mut(&mut v);
                *v = *v << 1;
            }
        }
    }
}

/// Byte holding bit (`row`, `col`) of a row-major bit matrix with `cols`
/// columns.
#[inline]
fn byte_index(row: usize, col: usize, cols: usize) -> usize {
    row * cols / 8 + col / 8
}
