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
*/

/// ASCII end-of-file marker, which terminates text in some capture formats.
pub(crate) const ASCII_EOF: u8 = 0x1A;

/// Read an ASCII string from the start of `source`, stopping at a NUL byte, an ASCII EOF
/// marker, a non-ASCII byte, or `max_len` bytes.
/// Returns the string (None if empty) and the byte that terminated it (0 at end of input).
pub(crate) fn read_ascii(source: &[u8], max_len: Option<usize>) -> (Option<String>, u8) {
    let mut string = String::new();
    let mut terminating_byte = 0;

    for (i, b) in source.iter().enumerate() {
        if i == max_len.unwrap_or(usize::MAX) {
            break;
        }
        if *b == 0 || *b == ASCII_EOF || !b.is_ascii() {
            terminating_byte = *b;
            break;
        }
        string.push(*b as char);
    }

    if string.is_empty() {
        (None, terminating_byte)
    }
    else {
        (Some(string), terminating_byte)
    }
}

/// Convert a count of sample clock ticks to nanoseconds, rounding to the nearest nanosecond.
#[inline]
pub(crate) fn ticks_to_ns(ticks: u64, ns_per_tick: f64) -> u64 {
    (ticks as f64 * ns_per_tick).round() as u64
}

/// Read a little-endian u16 at `offset`, or None if it would run past the end of `data`.
#[inline]
pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a little-endian u32 at `offset`, or None if it would run past the end of `data`.
#[inline]
pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_ascii_stops_at_nul() {
        let (s, term) = read_ascii(b"name=KryoFlux\0more", None);
        assert_eq!(s.as_deref(), Some("name=KryoFlux"));
        assert_eq!(term, 0);
        let (s, _) = read_ascii(b"\0", None);
        assert!(s.is_none());
        let (s, _) = read_ascii(b"abcdef", Some(3));
        assert_eq!(s.as_deref(), Some("abc"));
    }

    #[test]
    fn little_endian_reads_are_bounds_checked() {
        let data = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16_le(&data, 0), Some(0x1234));
        assert_eq!(read_u32_le(&data, 0), Some(0x5678_1234));
        assert_eq!(read_u16_le(&data, 3), None);
        assert_eq!(read_u32_le(&data, 1), None);
        assert_eq!(read_u16_le(&data, usize::MAX), None);
    }
}
