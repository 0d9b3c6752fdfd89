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

    src/file_parsers/scp.rs

    A reader for the SuperCard Pro (SCP) flux image format.

    SCP images hold the raw flux timing of each captured track as a stream
    of 16-bit sample counts, preceded by a table of per-revolution headers.
    A sample count of 0 is an overflow marker that extends the following
    value by 0x10000 ticks.

*/
use crate::{
    file_parsers::{FluxFileFormat, FluxTrackSource},
    flux::{FluxBuffer, MAX_REVOLUTIONS},
    format_ms,
    util::ticks_to_ns,
    DiskCh,
    FluxError,
};
use binrw::{binrw, BinRead};
use bitflags::bitflags;
use std::{
    io::{Cursor, Seek, SeekFrom},
    path::Path,
};

/// The duration of one sample tick at the base capture resolution, in nanoseconds.
pub const BASE_CAPTURE_RES: u32 = 25;
/// The offset of the track offset table, immediately following the file header.
pub const SCP_TRACK_TABLE_OFFSET: usize = 0x10;
/// The offset from which the file checksum is calculated.
pub const SCP_CHECKSUM_OFFSET: usize = 0x10;
pub const SCP_TRACK_COUNT: usize = 168;
pub const MAX_TRACK_NUMBER: usize = SCP_TRACK_COUNT - 1;

bitflags! {
    /// Flags stored in the SCP file header.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct ScpFlags: u8 {
        const INDEX           = 0b0000_0001; // Capture was started at the index pulse
        const TPI_96          = 0b0000_0010; // Drive was 96 TPI (otherwise 48 TPI)
        const RPM_360         = 0b0000_0100; // Drive was 360 RPM (otherwise 300 RPM)
        const NORMALIZED      = 0b0000_1000; // Flux data has been normalized
        const READ_WRITE      = 0b0001_0000; // Image is writable (otherwise read-only)
        const FOOTER          = 0b0010_0000; // An extension footer is present
        const EXTENDED_MODE   = 0b0100_0000; // Extended mode, for tape and hard drive captures
        const NON_SCP_CAPTURE = 0b1000_0000; // Image was created by something other than a SuperCard Pro
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScpDiskManufacturer {
    Cbm = 0x00,
    Atari = 0x10,
    Apple = 0x20,
    Pc = 0x30,
    Tandy = 0x40,
    TI = 0x50,
    Roland = 0x60,
    Amstrad = 0x70,
    Other = 0x80,
    TapeDrive = 0xE0,
    HardDrive = 0xF0,
}

/// The side(s) of the disk present in an SCP image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScpHeadMode {
    /// Both sides, with tracks interleaved as `cylinder * 2 + head`.
    Both,
    /// Side 0 only, with tracks indexed by cylinder.
    Side0,
    /// Side 1 only, with tracks indexed by cylinder.
    Side1,
}

#[derive(Debug)]
#[binrw]
#[brw(little, magic = b"SCP")]
pub struct ScpFileHeader {
    pub version: u8,
    pub disk_type: u8,
    pub revolutions: u8,
    pub start_track: u8,
    pub end_track: u8,
    pub flags: u8,
    pub bit_cell_width: u8,
    pub heads: u8,
    pub resolution: u8,
    pub checksum: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little, magic = b"TRK")]
pub struct ScpTrackHeader {
    pub track_number: u8,
}

/// A revolution header, one per captured revolution following the track header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(little)]
pub struct ScpRevolution {
    /// The duration of the revolution, in sample ticks.
    pub index_time: u32,
    /// The number of 16-bit sample words in the revolution's flux data.
    pub length: u32,
    /// The offset of the flux data, relative to the start of the track header.
    pub data_offset: u32,
}

fn scp_parse_version(version_byte: u8) -> (u8, u8) {
    let major = version_byte >> 4;
    let minor = version_byte & 0x0F;
    (major, minor)
}

fn scp_disk_manufacturer(type_byte: u8) -> Option<ScpDiskManufacturer> {
    let manufacturer = match type_byte & 0xF0 {
        0x00 => ScpDiskManufacturer::Cbm,
        0x10 => ScpDiskManufacturer::Atari,
        0x20 => ScpDiskManufacturer::Apple,
        0x30 => ScpDiskManufacturer::Pc,
        0x40 => ScpDiskManufacturer::Tandy,
        0x50 => ScpDiskManufacturer::TI,
        0x60 => ScpDiskManufacturer::Roland,
        0x70 => ScpDiskManufacturer::Amstrad,
        0x80 => ScpDiskManufacturer::Other,
        0xE0 => ScpDiskManufacturer::TapeDrive,
        0xF0 => ScpDiskManufacturer::HardDrive,
        _ => return None,
    };
    Some(manufacturer)
}

/// Calculate the SCP checksum: a wrapping sum of every byte from offset 0x10 to the end of the
/// file.
pub fn scp_checksum(data: &[u8]) -> u32 {
    data.iter()
        .skip(SCP_CHECKSUM_OFFSET)
        .fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}

/// Decode a stream of little-endian 16-bit sample words into flux intervals, appending them to
/// `buffer`. A word of 0 adds 0x10000 ticks to the pending interval; any other word completes
/// it. An overflow still pending at the end of the stream is discarded.
/// Returns the sum of the decoded intervals in nanoseconds.
pub fn decode_flux_words(data: &[u8], ns_per_tick: u32, buffer: &mut FluxBuffer) -> Result<u64, FluxError> {
    let mut accumulator: u64 = 0;
    let mut revolution_time: u64 = 0;

    for word in data.chunks_exact(2) {
        let value = u16::from_le_bytes([word[0], word[1]]);
        if value == 0 {
            accumulator += 0x10000;
            continue;
        }
        let delta = (accumulator + value as u64) * ns_per_tick as u64;
        buffer.append(delta)?;
        revolution_time += delta;
        accumulator = 0;
    }

    if accumulator > 0 {
        log::warn!(
            "decode_flux_words(): Discarding {} overflow ticks with no terminating sample",
            accumulator
        );
    }
    Ok(revolution_time)
}

/// An SCP image held in memory.
pub struct ScpImage {
    header: ScpFileHeader,
    flags: ScpFlags,
    head_mode: ScpHeadMode,
    ns_per_tick: u32,
    checksum_valid: bool,
    data: Vec<u8>,
}

impl ScpImage {
    pub fn extensions() -> Vec<&'static str> {
        vec!["scp"]
    }

    pub fn detect(bytes: &[u8]) -> bool {
        bytes.starts_with(b"SCP")
    }

    /// Load an SCP image from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<ScpImage, FluxError> {
        let data = std::fs::read(path)?;
        ScpImage::from_bytes(data)
    }

    /// Parse an SCP image from a byte vector. Only the file header and track offset table are
    /// validated here; tracks are decoded on demand by [FluxTrackSource::read_track].
    pub fn from_bytes(data: Vec<u8>) -> Result<ScpImage, FluxError> {
        let mut cursor = Cursor::new(&data);
        let header = ScpFileHeader::read(&mut cursor).map_err(|e| {
            log::error!("ScpImage::from_bytes(): Failed to read SCP header: {}", e);
            FluxError::from(e)
        })?;
        log::trace!("Detected SCP file.");

        let flags = ScpFlags::from_bits_retain(header.flags);
        log::trace!("Header flags: {:?}", flags);

        if flags.contains(ScpFlags::FOOTER) {
            log::trace!("Extension footer is present.");
        }
        else {
            let (major, minor) = scp_parse_version(header.version);
            log::trace!("SCP version {}.{} ({:02X})", major, minor, header.version);
        }

        match scp_disk_manufacturer(header.disk_type) {
            Some(manufacturer) => {
                log::trace!(
                    "Disk manufacturer: {:?} subtype: {:1X}",
                    manufacturer,
                    header.disk_type & 0x0F
                );
            }
            None => {
                log::warn!("Unknown SCP disk type: {:02X}", header.disk_type);
            }
        }

        if flags.contains(ScpFlags::EXTENDED_MODE) {
            log::error!("Extended mode SCP images not supported.");
            return Err(FluxError::UnsupportedFormat("SCP extended mode".to_string()));
        }

        log::trace!(
            "Bit cell width: {}",
            if header.bit_cell_width == 0 {
                16
            }
            else {
                header.bit_cell_width
            }
        );
        if header.bit_cell_width != 0 && header.bit_cell_width != 16 {
            log::error!("Non-standard bit cell width not supported.");
            return Err(FluxError::UnsupportedFormat(format!(
                "SCP bit cell width of {}",
                header.bit_cell_width
            )));
        }

        let head_mode = match header.heads {
            0 => ScpHeadMode::Both,
            1 => ScpHeadMode::Side0,
            2 => ScpHeadMode::Side1,
            _ => {
                log::error!("Unsupported SCP head mode: {}", header.heads);
                return Err(FluxError::InvalidFormat(format!("SCP head mode {}", header.heads)));
            }
        };
        log::trace!("Head mode: {:?}", head_mode);

        if header.start_track > header.end_track || header.end_track as usize > MAX_TRACK_NUMBER {
            log::error!(
                "Invalid SCP track range: {} to {}",
                header.start_track,
                header.end_track
            );
            return Err(FluxError::InvalidFormat(format!(
                "SCP track range {}..={}",
                header.start_track, header.end_track
            )));
        }
        log::trace!(
            "Starting track: {} Ending track: {}",
            header.start_track,
            header.end_track
        );

        let table_len = (header.end_track - header.start_track) as usize + 1;
        if data.len() < SCP_TRACK_TABLE_OFFSET + table_len * 4 {
            log::error!("SCP track offset table is truncated.");
            return Err(FluxError::Truncated);
        }

        let ns_per_tick = BASE_CAPTURE_RES * (header.resolution as u32 + 1);
        log::trace!("Capture resolution: {}ns", ns_per_tick);
        log::trace!("Disk contains {} revolutions per track.", header.revolutions);

        let checksum_valid = if header.checksum == 0 {
            log::trace!("Image has checksum==0. Skipping checksum verification.");
            true
        }
        else {
            let calculated = scp_checksum(&data);
            if calculated != header.checksum {
                log::warn!(
                    "SCP checksum mismatch: header {:08X} calculated {:08X}",
                    header.checksum,
                    calculated
                );
            }
            calculated == header.checksum
        };

        Ok(ScpImage {
            header,
            flags,
            head_mode,
            ns_per_tick,
            checksum_valid,
            data,
        })
    }

    pub fn header(&self) -> &ScpFileHeader {
        &self.header
    }

    pub fn flags(&self) -> ScpFlags {
        self.flags
    }

    pub fn head_mode(&self) -> ScpHeadMode {
        self.head_mode
    }

    /// Return the duration of one sample tick in nanoseconds.
    pub fn ns_per_tick(&self) -> u32 {
        self.ns_per_tick
    }

    /// Return the SCP version as a (major, minor) pair.
    pub fn version(&self) -> (u8, u8) {
        scp_parse_version(self.header.version)
    }

    pub fn disk_manufacturer(&self) -> Option<ScpDiskManufacturer> {
        scp_disk_manufacturer(self.header.disk_type)
    }

    /// Return false if the header carries a checksum that does not match the file contents.
    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid
    }

    /// Resolve a track location into an index into the track offset table.
    fn table_index(&self, ch: DiskCh) -> Option<usize> {
        let track_number = match self.head_mode {
            ScpHeadMode::Both => ch.c() as usize * 2 + ch.h() as usize,
            ScpHeadMode::Side0 if ch.h() == 0 => ch.c() as usize,
            ScpHeadMode::Side1 if ch.h() == 1 => ch.c() as usize,
            _ => return None,
        };
        if track_number < self.header.start_track as usize || track_number > self.header.end_track as usize {
            return None;
        }
        Some(track_number - self.header.start_track as usize)
    }

    /// Return the track header offset for the specified location, or None if the track is not
    /// present in the image.
    fn track_offset(&self, ch: DiskCh) -> Option<usize> {
        let table_index = self.table_index(ch)?;
        let entry = SCP_TRACK_TABLE_OFFSET + table_index * 4;
        let offset = crate::util::read_u32_le(&self.data, entry)?;
        if offset == 0 {
            return None;
        }
        Some(offset as usize)
    }

    /// Read the revolution headers of the track at the specified location.
    pub fn revolutions(&self, ch: DiskCh) -> Result<Vec<ScpRevolution>, FluxError> {
        let offset = self.track_offset(ch).ok_or(FluxError::TrackNotFound(ch))?;
        self.read_track_headers(ch, offset)
    }

    fn read_track_headers(&self, ch: DiskCh, offset: usize) -> Result<Vec<ScpRevolution>, FluxError> {
        let mut cursor = Cursor::new(&self.data);
        cursor.seek(SeekFrom::Start(offset as u64))?;

        let track_header = ScpTrackHeader::read(&mut cursor)?;
        if let Some(expected) = self.table_index(ch).map(|i| i + self.header.start_track as usize) {
            if track_header.track_number as usize != expected {
                log::warn!(
                    "ScpImage::read_track(): Track header number {} does not match expected {} for {}",
                    track_header.track_number,
                    expected,
                    ch
                );
            }
        }

        let mut revolutions = Vec::with_capacity(self.header.revolutions as usize);
        for _ in 0..self.header.revolutions {
            revolutions.push(ScpRevolution::read(&mut cursor)?);
        }
        Ok(revolutions)
    }
}

impl FluxTrackSource for ScpImage {
    fn format(&self) -> FluxFileFormat {
        FluxFileFormat::SuperCardPro
    }

    fn geometry(&self) -> DiskCh {
        let end_track = self.header.end_track as u16;
        match self.head_mode {
            ScpHeadMode::Both => DiskCh::new(end_track / 2 + 1, 2),
            ScpHeadMode::Side0 => DiskCh::new(end_track + 1, 1),
            ScpHeadMode::Side1 => DiskCh::new(end_track + 1, 2),
        }
    }

    fn read_track(&self, ch: DiskCh) -> Result<FluxBuffer, FluxError> {
        let offset = match self.track_offset(ch) {
            Some(offset) => offset,
            None => {
                log::debug!("ScpImage::read_track(): No track data for {}", ch);
                return Err(FluxError::TrackNotFound(ch));
            }
        };

        let mut revolutions = self.read_track_headers(ch, offset)?;
        if revolutions.len() > MAX_REVOLUTIONS {
            log::warn!(
                "ScpImage::read_track(): Track {} has {} revolutions, only reading {}",
                ch,
                revolutions.len(),
                MAX_REVOLUTIONS
            );
            revolutions.truncate(MAX_REVOLUTIONS);
        }

        let capacity = revolutions.iter().map(|r| r.length as usize).sum();
        let mut buffer = FluxBuffer::with_capacity(capacity);

        for (ri, rev) in revolutions.iter().enumerate() {
            let data_start = offset + rev.data_offset as usize;
            let data_end = data_start + rev.length as usize * 2;
            let words = self.data.get(data_start..data_end).ok_or_else(|| {
                log::error!(
                    "ScpImage::read_track(): Revolution {} of track {} runs past end of file",
                    ri,
                    ch
                );
                FluxError::Truncated
            })?;

            buffer.record_index();
            let decoded_time = decode_flux_words(words, self.ns_per_tick, &mut buffer)?;

            let declared_time = ticks_to_ns(rev.index_time as u64, self.ns_per_tick as f64);
            let tolerance = self.ns_per_tick as u64 * rev.length as u64;
            if declared_time.abs_diff(decoded_time) > tolerance {
                log::warn!(
                    "ScpImage::read_track(): Track {} revolution {} declares {} but decodes to {}",
                    ch,
                    ri,
                    format_ms!(declared_time),
                    format_ms!(decoded_time)
                );
            }
            log::trace!(
                "ScpImage::read_track(): Track {} revolution {}: {} words, {}",
                ch,
                ri,
                rev.length,
                format_ms!(decoded_time)
            );
        }

        if !revolutions.is_empty() {
            // Closing index pulse bounding the last revolution.
            buffer.record_index();
        }

        log::debug!(
            "ScpImage::read_track(): Read track {}: {} revolutions, {} transitions, {}",
            ch,
            revolutions.len(),
            buffer.len(),
            format_ms!(buffer.total_time())
        );
        Ok(buffer)
    }
}
