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

    src/file_parsers/dfi.rs

    A reader and writer for the DiscFerret (DFI) flux image format.

    A DFI image is a short file header followed by one record per track.
    Records carry no geometry; the track location is inferred from record
    order as cylinder = index / 2, head = index % 2.

    Each track is a byte stream of sample clock deltas:
      0xFF           extended delta, a little-endian u16 follows
      0x80 - 0xFE    index marker
      0x00 - 0x7F    plain delta

*/
use crate::{
    file_parsers::{FluxFileFormat, FluxTrackSource},
    flux::FluxBuffer,
    format_ms,
    DiskCh,
    FluxError,
};
use binrw::{binrw, BinRead, BinWrite};
use std::{
    io::{Cursor, Write},
    path::Path,
};

pub const DFI_HEADER_LEN: usize = 8;
pub const DFI_TRACK_HEADER_LEN: usize = 8;
pub const DFI_VERSION: u16 = 2;
/// Default duration of one sample clock tick, for a 100MHz acquisition clock.
pub const DFI_DEFAULT_NS_PER_TICK: u64 = 10;

pub const DFI_EXTENDED_DELTA: u8 = 0xFF;
pub const DFI_INDEX_MARKER: u8 = 0x80;
/// The largest delta, in ticks, that is written as a single byte.
pub const DFI_MAX_SHORT_DELTA: u64 = 126;
/// The largest delta, in ticks, that can be stored.
pub const DFI_MAX_DELTA: u64 = u16::MAX as u64;

#[derive(Debug)]
#[binrw]
#[brw(little, magic = b"DFE2")]
pub struct DfiFileHeader {
    pub version: u16,
    pub flags: u16,
}

#[derive(Debug)]
#[binrw]
#[brw(little, magic = b"TRK0")]
pub struct DfiTrackHeader {
    pub length: u32,
}

/// Encodes and decodes DFI track streams at a fixed sample clock resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DfiCodec {
    ns_per_tick: u64,
}

impl Default for DfiCodec {
    fn default() -> Self {
        DfiCodec {
            ns_per_tick: DFI_DEFAULT_NS_PER_TICK,
        }
    }
}

impl DfiCodec {
    /// Create a codec for a sample clock of `ns_per_tick` nanoseconds per tick.
    pub fn new(ns_per_tick: u64) -> Result<DfiCodec, FluxError> {
        if ns_per_tick == 0 {
            return Err(FluxError::ParameterError("DFI tick duration must be non-zero".to_string()));
        }
        Ok(DfiCodec { ns_per_tick })
    }

    pub fn ns_per_tick(&self) -> u64 {
        self.ns_per_tick
    }

    /// Decode one track stream into a [FluxBuffer].
    pub fn decode_track(&self, data: &[u8]) -> Result<FluxBuffer, FluxError> {
        let mut buffer = FluxBuffer::with_capacity(data.len());
        let mut pos = 0;

        while pos < data.len() {
            let byte = data[pos];
            if byte == DFI_EXTENDED_DELTA {
                let ticks = crate::util::read_u16_le(data, pos + 1).ok_or(FluxError::Truncated)?;
                buffer.append(ticks as u64 * self.ns_per_tick)?;
                pos += 3;
            }
            else if byte & 0x80 != 0 {
                buffer.record_index();
                pos += 1;
            }
            else {
                buffer.append(byte as u64 * self.ns_per_tick)?;
                pos += 1;
            }
        }
        Ok(buffer)
    }

    /// Encode a [FluxBuffer] as a track stream. Deltas longer than 65535 ticks are clamped.
    pub fn encode_track(&self, buffer: &FluxBuffer) -> Vec<u8> {
        let mut out = Vec::with_capacity(buffer.len() + buffer.index_times().len());
        let mut indexes = buffer.index_times().iter().peekable();
        let mut time: u64 = 0;
        let mut clamped = 0;

        for delta in buffer.deltas() {
            while indexes.next_if(|t| **t <= time).is_some() {
                out.push(DFI_INDEX_MARKER);
            }

            let ticks = (delta + self.ns_per_tick / 2) / self.ns_per_tick;
            if ticks <= DFI_MAX_SHORT_DELTA {
                out.push(ticks as u8);
            }
            else {
                if ticks > DFI_MAX_DELTA {
                    clamped += 1;
                }
                out.push(DFI_EXTENDED_DELTA);
                out.extend_from_slice(&(ticks.min(DFI_MAX_DELTA) as u16).to_le_bytes());
            }
            time += delta;
        }

        for t in indexes {
            if *t <= time {
                out.push(DFI_INDEX_MARKER);
            }
            else {
                log::warn!(
                    "DfiCodec::encode_track(): Dropping index pulse at {} past end of track",
                    format_ms!(*t)
                );
            }
        }

        if clamped > 0 {
            log::warn!(
                "DfiCodec::encode_track(): Clamped {} deltas to {} ticks",
                clamped,
                DFI_MAX_DELTA
            );
        }
        out
    }

    fn write_record(out: &mut Cursor<Vec<u8>>, track: &[u8]) -> Result<(), FluxError> {
        DfiTrackHeader {
            length: track.len() as u32,
        }
        .write(out)?;
        out.write_all(track)?;
        Ok(())
    }

    /// Write every track of `source` as a DFI image. Records are written in
    /// `cylinder * 2 + head` order for two heads; absent or unreadable tracks are written as
    /// empty records so that record order still resolves to the right location.
    /// Returns the number of non-empty track records written.
    pub fn write_image<W: Write>(&self, source: &dyn FluxTrackSource, out: &mut W) -> Result<usize, FluxError> {
        let geometry = source.geometry();
        if geometry.h() > 2 {
            return Err(FluxError::ParameterError(format!(
                "DFI images cannot store {} heads",
                geometry.h()
            )));
        }

        let mut cursor = Cursor::new(Vec::new());
        DfiFileHeader {
            version: DFI_VERSION,
            flags: 0,
        }
        .write(&mut cursor)?;

        let mut written = 0;
        for ch in DiskCh::new(geometry.c(), 2).iter() {
            let track = match source.read_track(ch) {
                Ok(buffer) => self.encode_track(&buffer),
                Err(FluxError::TrackNotFound(_)) => Vec::new(),
                Err(e) => {
                    log::warn!("DfiCodec::write_image(): Writing empty record for {}: {}", ch, e);
                    Vec::new()
                }
            };
            if !track.is_empty() {
                written += 1;
            }
            DfiCodec::write_record(&mut cursor, &track)?;
        }

        out.write_all(cursor.get_ref())?;
        log::debug!(
            "DfiCodec::write_image(): Wrote {} of {} tracks, {} bytes",
            written,
            geometry.c() as usize * 2,
            cursor.get_ref().len()
        );
        Ok(written)
    }
}

#[derive(Copy, Clone, Debug)]
struct DfiRecord {
    offset: usize,
    length: usize,
    truncated: bool,
}

/// A DFI image held in memory.
pub struct DfiImage {
    header: DfiFileHeader,
    codec: DfiCodec,
    records: Vec<DfiRecord>,
    data: Vec<u8>,
}

impl DfiImage {
    pub fn extensions() -> Vec<&'static str> {
        vec!["dfi"]
    }

    pub fn detect(bytes: &[u8]) -> bool {
        bytes.starts_with(b"DFE2")
    }

    /// Load a DFI image from a file, using the default sample clock.
    pub fn load(path: impl AsRef<Path>) -> Result<DfiImage, FluxError> {
        let data = std::fs::read(path)?;
        DfiImage::from_bytes(data)
    }

    /// Parse a DFI image using the default sample clock.
    pub fn from_bytes(data: Vec<u8>) -> Result<DfiImage, FluxError> {
        DfiImage::from_bytes_with_codec(data, DfiCodec::default())
    }

    /// Parse a DFI image, decoding tracks with the specified codec.
    pub fn from_bytes_with_codec(data: Vec<u8>, codec: DfiCodec) -> Result<DfiImage, FluxError> {
        let header = DfiFileHeader::read(&mut Cursor::new(&data)).map_err(|e| {
            log::error!("DfiImage::from_bytes(): Failed to read DFI header: {}", e);
            FluxError::from(e)
        })?;
        log::trace!("DFI version: {} flags: {:04X}", header.version, header.flags);

        let mut records = Vec::new();
        let mut pos = DFI_HEADER_LEN;

        while pos + DFI_TRACK_HEADER_LEN <= data.len() {
            let track_header = match DfiTrackHeader::read(&mut Cursor::new(&data[pos..])) {
                Ok(th) => th,
                Err(_) => {
                    log::warn!(
                        "DfiImage::from_bytes(): Bad track record magic at offset {:#X}, stopping",
                        pos
                    );
                    break;
                }
            };
            let offset = pos + DFI_TRACK_HEADER_LEN;
            let length = track_header.length as usize;

            if offset + length > data.len() {
                log::warn!(
                    "DfiImage::from_bytes(): Track record {} at offset {:#X} is truncated",
                    records.len(),
                    pos
                );
                records.push(DfiRecord {
                    offset,
                    length: data.len() - offset,
                    truncated: true,
                });
                break;
            }

            log::trace!(
                "DfiImage::from_bytes(): Track record {} at offset {:#X}, {} bytes",
                records.len(),
                pos,
                length
            );
            records.push(DfiRecord {
                offset,
                length,
                truncated: false,
            });
            pos = offset + length;
        }

        log::debug!("DfiImage::from_bytes(): Found {} track records", records.len());
        Ok(DfiImage {
            header,
            codec,
            records,
            data,
        })
    }

    pub fn header(&self) -> &DfiFileHeader {
        &self.header
    }

    pub fn codec(&self) -> DfiCodec {
        self.codec
    }

    /// Return the number of track records in the image.
    pub fn record_ct(&self) -> usize {
        self.records.len()
    }
}

impl FluxTrackSource for DfiImage {
    fn format(&self) -> FluxFileFormat {
        FluxFileFormat::DiscFerret
    }

    fn geometry(&self) -> DiskCh {
        match self.records.len() {
            0 => DiskCh::new(0, 0),
            1 => DiskCh::new(1, 1),
            n => DiskCh::new(n.div_ceil(2) as u16, 2),
        }
    }

    fn read_track(&self, ch: DiskCh) -> Result<FluxBuffer, FluxError> {
        if ch.h() > 1 {
            return Err(FluxError::TrackNotFound(ch));
        }
        let record = self
            .records
            .get(ch.c() as usize * 2 + ch.h() as usize)
            .ok_or(FluxError::TrackNotFound(ch))?;

        if record.truncated {
            return Err(FluxError::Truncated);
        }
        if record.length == 0 {
            log::debug!("DfiImage::read_track(): Empty record for {}", ch);
            return Err(FluxError::TrackNotFound(ch));
        }

        let buffer = self
            .codec
            .decode_track(&self.data[record.offset..record.offset + record.length])?;
        log::debug!(
            "DfiImage::read_track(): Read track {}: {} transitions, {} index pulses, {}",
            ch,
            buffer.len(),
            buffer.index_times().len(),
            format_ms!(buffer.total_time())
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_decode_priority() {
        init();
        let codec = DfiCodec::new(1).unwrap();
        // 0xFF is always extended, 0xFE and 0x80 are index markers, 0x7F is a plain delta
        let data = [0x7F, 0xFE, 0xFF, 0x00, 0x01, 0x80, 0x05];
        let buffer = codec.decode_track(&data).unwrap();
        assert_eq!(buffer.deltas(), &[0x7F, 0x100, 0x05]);
        assert_eq!(buffer.index_times(), &[0x7F, 0x17F]);
    }

    #[test]
    fn test_decode_truncated_extended() {
        init();
        let codec = DfiCodec::new(1).unwrap();
        assert_eq!(codec.decode_track(&[0x10, 0xFF, 0x01]).err(), Some(FluxError::Truncated));
    }

    #[test]
    fn test_encode_short_and_extended() {
        init();
        let codec = DfiCodec::new(1).unwrap();
        let buffer = FluxBuffer::from_deltas(&[126, 127, 70000], &[0, 253]).unwrap();
        let encoded = codec.encode_track(&buffer);
        assert_eq!(
            encoded,
            vec![0x80, 126, 0xFF, 127, 0x00, 0x80, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_encode_rounds_to_ticks() {
        init();
        let codec = DfiCodec::default();
        let buffer = FluxBuffer::from_deltas(&[4004, 3996, 5], &[]).unwrap();
        let encoded = codec.encode_track(&buffer);
        assert_eq!(encoded, vec![0xFF, 144, 1, 0xFF, 144, 1, 1]);
    }

    #[test]
    fn test_zero_tick_codec_rejected() {
        assert!(matches!(DfiCodec::new(0), Err(FluxError::ParameterError(_))));
    }

    #[test]
    fn test_bad_magic() {
        init();
        assert!(matches!(
            DfiImage::from_bytes(b"DFE1\x02\x00\x00\x00".to_vec()),
            Err(FluxError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_record_scan_stops_at_bad_magic() {
        init();
        let mut data = b"DFE2\x02\x00\x00\x00".to_vec();
        data.extend_from_slice(b"TRK0\x02\x00\x00\x00\x10\x20");
        data.extend_from_slice(b"JUNK\x00\x00\x00\x00");
        let image = DfiImage::from_bytes(data).unwrap();
        assert_eq!(image.record_ct(), 1);
        assert_eq!(image.geometry(), DiskCh::new(1, 1));
    }

    #[test]
    fn test_truncated_record() {
        init();
        let mut data = b"DFE2\x02\x00\x00\x00".to_vec();
        data.extend_from_slice(b"TRK0\x01\x00\x00\x00\x10");
        data.extend_from_slice(b"TRK0\x10\x00\x00\x00\x10\x10");
        let image = DfiImage::from_bytes(data).unwrap();
        assert_eq!(image.record_ct(), 2);
        assert_eq!(image.geometry(), DiskCh::new(1, 2));
        assert!(image.read_track(DiskCh::new(0, 0)).is_ok());
        assert_eq!(image.read_track(DiskCh::new(0, 1)).err(), Some(FluxError::Truncated));
        assert_eq!(
            image.read_track(DiskCh::new(1, 0)).err(),
            Some(FluxError::TrackNotFound(DiskCh::new(1, 0)))
        );
    }
}
