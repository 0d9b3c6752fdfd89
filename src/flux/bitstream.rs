/*
    fluxcap

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/flux/bitstream.rs

    Materializes a FluxBuffer into a raw bitstream by quantizing each flux
    interval against a nominal bit cell time.
*/
use crate::{flux::buffer::FluxBuffer, FluxError};
use bit_vec::BitVec;

/// The most bit cells a single flux interval may span. Longer intervals are clamped, as they
/// are either damaged media or unformatted areas and would otherwise produce runaway zero bits.
pub const MAX_CELLS_PER_TRANSITION: u64 = 8;

/// Quantize a flux interval to a whole number of bit cells, rounding to the nearest cell and
/// clamping to the range `[1, MAX_CELLS_PER_TRANSITION]`.
#[inline]
pub fn cell_count(delta_ns: u64, cell_ns: u64) -> u64 {
    ((delta_ns + cell_ns / 2) / cell_ns).clamp(1, MAX_CELLS_PER_TRANSITION)
}

impl FluxBuffer {
    /// Materialize the buffer as a bitstream into `dst`, most significant bit first.
    ///
    /// Each interval becomes `cells - 1` zero bits followed by a one bit, as a flux transition
    /// terminates its bit cell. Conversion stops once `dst` is full.
    ///
    /// Returns the number of bytes of `dst` that were written.
    pub fn write_bitstream(&self, cell_ns: u64, dst: &mut [u8]) -> Result<usize, FluxError> {
        if cell_ns == 0 {
            return Err(FluxError::ParameterError("bit cell time must be non-zero".to_string()));
        }
        dst.fill(0);
        let capacity_bits = dst.len() * 8;
        let mut bit_pos = 0;

        'outer: for delta in self.deltas() {
            let cells = cell_count(*delta, cell_ns);
            for _ in 1..cells {
                if bit_pos >= capacity_bits {
                    break 'outer;
                }
                bit_pos += 1;
            }
            if bit_pos >= capacity_bits {
                break;
            }
            dst[bit_pos / 8] |= 0x80 >> (bit_pos % 8);
            bit_pos += 1;
        }

        if bit_pos >= capacity_bits && bit_pos > 0 {
            log::trace!(
                "FluxBuffer::write_bitstream(): Destination full after {} bits",
                capacity_bits
            );
        }
        Ok(bit_pos.div_ceil(8))
    }

    /// Materialize the entire buffer as a [BitVec], using the same quantization as
    /// [FluxBuffer::write_bitstream].
    pub fn to_bitvec(&self, cell_ns: u64) -> Result<BitVec, FluxError> {
        if cell_ns == 0 {
            return Err(FluxError::ParameterError("bit cell time must be non-zero".to_string()));
        }
        let mut bits = BitVec::with_capacity(self.len() * 3);
        for delta in self.deltas() {
            let cells = cell_count(*delta, cell_ns);
            for _ in 1..cells {
                bits.push(false);
            }
            bits.push(true);
        }
        Ok(bits)
    }

    /// Materialize the buffer using the nominal bit cell time of its classified density.
    pub fn to_bitvec_by_density(&self) -> Result<BitVec, FluxError> {
        self.to_bitvec(self.density().base_cell_ns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfm_intervals_quantize_to_cells() {
        // 4us, 6us and 8us MFM intervals at a 2us cell time.
        let buffer = FluxBuffer::from_deltas(&[4000, 6000, 8000], &[]).unwrap();
        let mut dst = [0u8; 4];
        let written = buffer.write_bitstream(2000, &mut dst).unwrap();
        // 01 001 0001 -> 0100 1000 1
        assert_eq!(written, 2);
        assert_eq!(dst[0], 0b0100_1000);
        assert_eq!(dst[1], 0b1000_0000);

        let bits = buffer.to_bitvec(2000).unwrap();
        assert_eq!(bits.len(), 9);
        assert_eq!(bits.to_bytes(), vec![0b0100_1000, 0b1000_0000]);
    }

    #[test]
    fn cell_count_is_clamped() {
        assert_eq!(cell_count(0, 2000), 1);
        assert_eq!(cell_count(500, 2000), 1);
        assert_eq!(cell_count(2999, 2000), 1);
        assert_eq!(cell_count(3000, 2000), 2);
        assert_eq!(cell_count(1_000_000, 2000), MAX_CELLS_PER_TRANSITION);
    }

    #[test]
    fn write_stops_at_destination_capacity() {
        let buffer = FluxBuffer::from_deltas(&[2000; 100], &[]).unwrap();
        let mut dst = [0u8; 2];
        let written = buffer.write_bitstream(2000, &mut dst).unwrap();
        assert_eq!(written, 2);
        assert_eq!(dst, [0xFF, 0xFF]);
    }

    #[test]
    fn zero_cell_time_is_rejected() {
        let buffer = FluxBuffer::from_deltas(&[2000], &[]).unwrap();
        assert!(buffer.write_bitstream(0, &mut [0u8; 1]).is_err());
        assert!(buffer.to_bitvec(0).is_err());
    }
}
