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

    src/file_parsers/kryoflux.rs

    A reader for the KryoFlux raw stream format.

    KryoFlux files (.raw) represent the raw stream of flux transitions for
    a single track on a disk. A set of files, named trackCC.H.raw, is used
    to represent a complete disk image.

*/
use crate::{
    file_parsers::{FluxFileFormat, FluxTrackSource},
    flux::FluxBuffer,
    format_ms,
    util::{read_ascii, ticks_to_ns},
    DiskCh,
    FluxError,
};
use binrw::{binrw, BinRead};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::BTreeMap,
    io::Cursor,
    path::{Path, PathBuf},
};

pub const KFX_DEFAULT_MCK: f64 = ((18432000.0 * 73.0) / 14.0) / 2.0;
pub const KFX_DEFAULT_SCK: f64 = KFX_DEFAULT_MCK / 2.0;
pub const KFX_DEFAULT_ICK: f64 = KFX_DEFAULT_MCK / 16.0;

/// Matches a stream file name, capturing the set prefix, cylinder and head.
static KFX_FILENAME_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)^(.*?)(\d{2})\.(\d)\.raw$").ok());
/// Matches the sample and index clock values in an Info block string.
static KFX_CLOCK_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"sck=(\d+\.\d+), ick=(\d+\.\d+)").ok());

pub const STREAM_INFO_BLOCK_SIZE: usize = 8;
pub const INDEX_BLOCK_SIZE: usize = 12;
pub const STREAM_END_BLOCK_SIZE: usize = 8;

pub enum OobBlock {
    Invalid(u8),
    StreamInfo,
    Index,
    StreamEnd,
    KfInfo,
    Eof,
}

impl From<u8> for OobBlock {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => OobBlock::StreamInfo,
            0x02 => OobBlock::Index,
            0x03 => OobBlock::StreamEnd,
            0x04 => OobBlock::KfInfo,
            0x0D => OobBlock::Eof,
            _ => OobBlock::Invalid(byte),
        }
    }
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct StreamInfoBlock {
    pub stream_pos: u32,
    pub transfer_time_ms: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct IndexBlock {
    pub stream_pos: u32,
    pub sample_counter: u32,
    pub index_counter: u32,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct StreamEndBlock {
    pub stream_pos: u32,
    pub hw_status_code: u32,
}

/// Per-stream decoding state. The sample and index clocks may be overridden by an Info block.
struct KfxStreamParser {
    sck: f64,
    ick: f64,
    flux_ovl: u64,
    stream_pos: u64,
    flux_start: Option<u64>,
    last_index_counter: Option<u32>,
    /// Decoded transitions, as (stream position of encoding, interval in ns).
    fluxes: Vec<(u64, u64)>,
    /// Stream positions of observed index pulses.
    index_positions: Vec<u64>,
}

impl Default for KfxStreamParser {
    fn default() -> Self {
        KfxStreamParser {
            sck: KFX_DEFAULT_SCK,
            ick: KFX_DEFAULT_ICK,
            flux_ovl: 0,
            stream_pos: 0,
            flux_start: None,
            last_index_counter: None,
            fluxes: Vec::new(),
            index_positions: Vec::new(),
        }
    }
}

impl KfxStreamParser {
    fn sample_period_ns(&self) -> f64 {
        1_000_000_000.0 / self.sck
    }

    fn push_flux(&mut self, ticks: u64, encoded_len: u64) {
        let start = self.flux_start.take().unwrap_or(self.stream_pos);
        let delta = ticks_to_ns(ticks + self.flux_ovl, self.sample_period_ns());
        self.fluxes.push((start, delta));
        self.flux_ovl = 0;
        self.stream_pos += encoded_len;
    }

    /// Decode the whole stream. Returns when an Eof block is read or the data is exhausted.
    fn parse(&mut self, data: &[u8]) -> Result<(), FluxError> {
        let mut pos = 0;

        while pos < data.len() {
            let byte = data[pos];
            match byte {
                0x00..=0x07 => {
                    // Flux2
                    let byte2 = *data.get(pos + 1).ok_or(FluxError::Truncated)?;
                    let ticks = u16::from_be_bytes([byte, byte2]) as u64;
                    self.push_flux(ticks, 2);
                    pos += 2;
                }
                0x08 => {
                    // Nop1
                    self.stream_pos += 1;
                    pos += 1;
                }
                0x09 => {
                    // Nop2
                    if pos + 2 > data.len() {
                        return Err(FluxError::Truncated);
                    }
                    self.stream_pos += 2;
                    pos += 2;
                }
                0x0A => {
                    // Nop3
                    if pos + 3 > data.len() {
                        return Err(FluxError::Truncated);
                    }
                    self.stream_pos += 3;
                    pos += 3;
                }
                0x0B => {
                    // Ovl16
                    if self.flux_start.is_none() {
                        self.flux_start = Some(self.stream_pos);
                    }
                    self.flux_ovl = self.flux_ovl.saturating_add(0x10000);
                    self.stream_pos += 1;
                    pos += 1;
                }
                0x0C => {
                    // Flux3
                    let payload = data.get(pos + 1..pos + 3).ok_or(FluxError::Truncated)?;
                    let ticks = u16::from_le_bytes([payload[0], payload[1]]) as u64;
                    self.push_flux(ticks, 3);
                    pos += 3;
                }
                0x0D => {
                    // OOB blocks do not advance the stream position.
                    let header = data.get(pos + 1..pos + 3).ok_or(FluxError::Truncated)?;
                    let block = OobBlock::from(header[0]);
                    if let OobBlock::Eof = block {
                        log::trace!("KfxStreamParser::parse(): EOF block at offset {}", pos);
                        return Ok(());
                    }
                    let size = header[1] as usize;
                    let payload = data.get(pos + 3..pos + 3 + size).ok_or(FluxError::Truncated)?;
                    self.read_oob_block(block, payload, pos)?;
                    pos += 3 + size;
                }
                _ => {
                    // Flux1
                    self.push_flux(byte as u64, 1);
                    pos += 1;
                }
            }
        }

        log::debug!("KfxStreamParser::parse(): Stream ended without EOF block");
        Ok(())
    }

    fn read_oob_block(&mut self, block: OobBlock, payload: &[u8], file_offset: usize) -> Result<(), FluxError> {
        let mut cursor = Cursor::new(payload);
        match block {
            OobBlock::Invalid(oob_byte) => {
                log::warn!(
                    "KfxStreamParser::read_oob_block(): Skipping unknown OOB block type {:02X} at offset {}",
                    oob_byte,
                    file_offset
                );
            }
            OobBlock::StreamInfo if payload.len() < STREAM_INFO_BLOCK_SIZE => {
                Self::skip_short_block("StreamInfo", payload.len(), file_offset);
            }
            OobBlock::Index if payload.len() < INDEX_BLOCK_SIZE => {
                Self::skip_short_block("Index", payload.len(), file_offset);
            }
            OobBlock::StreamEnd if payload.len() < STREAM_END_BLOCK_SIZE => {
                Self::skip_short_block("StreamEnd", payload.len(), file_offset);
            }
            OobBlock::StreamInfo => {
                let sib = StreamInfoBlock::read(&mut cursor)?;
                log::trace!(
                    "StreamInfo block: pos: {} time: {}",
                    sib.stream_pos,
                    sib.transfer_time_ms
                );
                if sib.stream_pos as u64 != self.stream_pos {
                    log::warn!(
                        "StreamInfo position does not match stream position: {} != {}",
                        sib.stream_pos,
                        self.stream_pos
                    );
                }
            }
            OobBlock::Index => {
                let ib = IndexBlock::read(&mut cursor)?;
                log::trace!(
                    "Index block: pos: {} sample_counter: {} index_counter: {}",
                    ib.stream_pos,
                    ib.sample_counter,
                    ib.index_counter
                );
                if let Some(last) = self.last_index_counter {
                    let ticks = ib.index_counter.wrapping_sub(last) as f64;
                    if ticks > 0.0 {
                        let rev_secs = ticks / self.ick;
                        log::debug!(
                            "Index to index: {} ({:.2} RPM)",
                            format_ms!(rev_secs * 1_000_000_000.0),
                            60.0 / rev_secs
                        );
                    }
                }
                self.last_index_counter = Some(ib.index_counter);
                self.index_positions.push(ib.stream_pos as u64);
            }
            OobBlock::StreamEnd => {
                let seb = StreamEndBlock::read(&mut cursor)?;
                log::debug!(
                    "StreamEnd block: end_pos: {} stream_pos: {} hw_status: {:02X}",
                    seb.stream_pos,
                    self.stream_pos,
                    seb.hw_status_code
                );
                if seb.stream_pos as u64 != self.stream_pos {
                    log::warn!(
                        "StreamEnd position does not match stream position: {} != {}",
                        seb.stream_pos,
                        self.stream_pos
                    );
                }
                match seb.hw_status_code {
                    0 => {
                        log::debug!("Hardware status reported OK");
                    }
                    1 => {
                        log::error!("A buffering issue was recorded in the stream. Stream may be corrupt");
                    }
                    2 => {
                        log::warn!("No index signal was detected.");
                    }
                    _ => {
                        log::warn!("Unknown hardware status: {:02X}", seb.hw_status_code);
                    }
                }
            }
            OobBlock::KfInfo => {
                let mut offset = 0;
                while offset < payload.len() {
                    let (str_opt, _terminator) = read_ascii(&payload[offset..], None);
                    match str_opt {
                        Some(s) => {
                            log::debug!("KfInfo str: {}", s);
                            let (sck_opt, ick_opt) = kfx_parse_str(&s);
                            if let Some(sck) = sck_opt {
                                log::debug!("Set SCK to {}", sck);
                                self.sck = sck;
                            }
                            if let Some(ick) = ick_opt {
                                log::debug!("Set ICK to {}", ick);
                                self.ick = ick;
                            }
                            offset += s.len() + 1;
                        }
                        None => offset += 1,
                    }
                }
            }
            OobBlock::Eof => {}
        }
        Ok(())
    }

    fn skip_short_block(name: &str, len: usize, file_offset: usize) {
        log::warn!(
            "KfxStreamParser::read_oob_block(): Skipping {} block with short payload of {} bytes at offset {}",
            name,
            len,
            file_offset
        );
    }

    /// Build the FluxBuffer, placing each index pulse on the transition boundary at its stream
    /// position.
    fn into_buffer(self, capacity: usize) -> Result<FluxBuffer, FluxError> {
        let mut buffer = FluxBuffer::with_capacity(capacity.max(self.fluxes.len()));
        let mut indexes = self.index_positions.iter().peekable();

        for (start, delta) in self.fluxes {
            while indexes.next_if(|pos| **pos <= start).is_some() {
                buffer.record_index();
            }
            buffer.append(delta)?;
        }
        for _ in indexes {
            buffer.record_index();
        }
        Ok(buffer)
    }
}

/// Parse the clock information string embedded in a KryoFlux Info block.
/// ex: 'sck=24027428.5714285, ick=3003428.5714285625'
fn kfx_parse_str(s: &str) -> (Option<f64>, Option<f64>) {
    let Some(re) = KFX_CLOCK_RE.as_ref()
    else {
        return (None, None);
    };

    if let Some(c) = re.captures(s) {
        let sck = c.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
        let ick = c.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
        (sck, ick)
    }
    else {
        (None, None)
    }
}

/// Parse a stream file name into its set prefix (lowercased) and track location.
fn kfx_parse_filename(name: &str) -> Option<(String, DiskCh)> {
    let re = KFX_FILENAME_RE.as_ref()?;
    let caps = re.captures(name)?;
    let prefix = caps.get(1)?.as_str().to_ascii_lowercase();
    let c = caps.get(2)?.as_str().parse::<u16>().ok()?;
    let h = caps.get(3)?.as_str().parse::<u8>().ok()?;
    if h > 1 {
        log::warn!("kfx_parse_filename(): Ignoring stream file with head {}: {}", h, name);
        return None;
    }
    Some((prefix, DiskCh::new(c, h)))
}

#[derive(Clone, Debug)]
enum KfxTrackData {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// A KryoFlux stream set: one raw stream per track, either as files on disk or held in memory.
pub struct KfxStreamSet {
    tracks: BTreeMap<DiskCh, KfxTrackData>,
    geometry: DiskCh,
}

impl KfxStreamSet {
    pub fn extensions() -> Vec<&'static str> {
        vec!["raw"]
    }

    /// Assume stream starts with an OOB header byte.
    pub fn detect(bytes: &[u8]) -> bool {
        bytes.first() == Some(&0x0D)
    }

    /// Parse a single raw stream into a [FluxBuffer].
    pub fn parse_stream(data: &[u8]) -> Result<FluxBuffer, FluxError> {
        let mut parser = KfxStreamParser::default();
        parser.parse(data)?;
        let buffer = parser.into_buffer(data.len())?;
        log::debug!(
            "KfxStreamSet::parse_stream(): {} transitions, {} index pulses, {}",
            buffer.len(),
            buffer.index_times().len(),
            format_ms!(buffer.total_time())
        );
        Ok(buffer)
    }

    /// Build a stream set from in-memory streams.
    pub fn from_streams(streams: impl IntoIterator<Item = (DiskCh, Vec<u8>)>) -> Result<KfxStreamSet, FluxError> {
        let tracks = streams
            .into_iter()
            .map(|(ch, data)| (ch, KfxTrackData::Memory(data)))
            .collect();
        KfxStreamSet::from_tracks(tracks)
    }

    /// Build a stream set from every `trackCC.H.raw` file in a directory.
    /// If the directory holds more than one set, the set whose prefix sorts first is used.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<KfxStreamSet, FluxError> {
        let files = KfxStreamSet::scan_dir(dir.as_ref())?;
        let prefix = match files.keys().next() {
            Some(prefix) => prefix.clone(),
            None => {
                log::error!("KfxStreamSet::from_dir(): No stream files found in {}", dir.as_ref().display());
                return Err(FluxError::InvalidFormat("no KryoFlux stream files found".to_string()));
            }
        };
        if files.len() > 1 {
            log::warn!(
                "KfxStreamSet::from_dir(): Directory contains {} stream sets, using '{}'",
                files.len(),
                prefix
            );
        }
        KfxStreamSet::from_set(files, &prefix)
    }

    /// Resolve a single stream file into the set it belongs to, using the other files in the
    /// same directory with the same name prefix.
    pub fn from_file(path: impl AsRef<Path>) -> Result<KfxStreamSet, FluxError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FluxError::ParameterError(format!("invalid path: {}", path.display())))?;
        let (prefix, _) = kfx_parse_filename(name).ok_or_else(|| {
            log::error!("KfxStreamSet::from_file(): Not a KryoFlux stream file name: {}", name);
            FluxError::InvalidFormat(format!("not a KryoFlux stream file name: {}", name))
        })?;

        let base_path = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let files = KfxStreamSet::scan_dir(base_path)?;
        KfxStreamSet::from_set(files, &prefix)
    }

    fn from_set(
        mut files: BTreeMap<String, BTreeMap<DiskCh, PathBuf>>,
        prefix: &str,
    ) -> Result<KfxStreamSet, FluxError> {
        let set = files.remove(prefix).unwrap_or_default();
        let tracks = set
            .into_iter()
            .map(|(ch, path)| (ch, KfxTrackData::File(path)))
            .collect();
        KfxStreamSet::from_tracks(tracks)
    }

    /// Group the stream files in a directory by set prefix.
    fn scan_dir(dir: &Path) -> Result<BTreeMap<String, BTreeMap<DiskCh, PathBuf>>, FluxError> {
        let mut sets: BTreeMap<String, BTreeMap<DiskCh, PathBuf>> = BTreeMap::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            // Some sets have mixed case filenames (Track00.0.raw, track01.0.raw).
            let Some((prefix, ch)) = path.file_name().and_then(|n| n.to_str()).and_then(kfx_parse_filename)
            else {
                continue;
            };
            log::trace!("KfxStreamSet::scan_dir(): Found stream {} for {}", path.display(), ch);
            sets.entry(prefix).or_default().insert(ch, path);
        }
        Ok(sets)
    }

    fn from_tracks(tracks: BTreeMap<DiskCh, KfxTrackData>) -> Result<KfxStreamSet, FluxError> {
        if tracks.is_empty() {
            return Err(FluxError::InvalidFormat("empty KryoFlux stream set".to_string()));
        }
        let cylinders = tracks.keys().map(|ch| ch.c() + 1).max().unwrap_or(0);
        let heads = tracks.keys().map(|ch| ch.h() + 1).max().unwrap_or(0);
        let geometry = DiskCh::new(cylinders, heads);
        log::debug!(
            "KfxStreamSet::from_tracks(): {} streams, geometry {}",
            tracks.len(),
            geometry
        );
        Ok(KfxStreamSet { tracks, geometry })
    }

    /// Return the number of streams in the set.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Return the path of the stream file for the specified location, if the set is file-backed.
    pub fn track_path(&self, ch: DiskCh) -> Option<&Path> {
        match self.tracks.get(&ch)? {
            KfxTrackData::File(path) => Some(path),
            KfxTrackData::Memory(_) => None,
        }
    }
}

impl FluxTrackSource for KfxStreamSet {
    fn format(&self) -> FluxFileFormat {
        FluxFileFormat::KryofluxStream
    }

    fn geometry(&self) -> DiskCh {
        self.geometry
    }

    fn read_track(&self, ch: DiskCh) -> Result<FluxBuffer, FluxError> {
        match self.tracks.get(&ch) {
            Some(KfxTrackData::Memory(data)) => KfxStreamSet::parse_stream(data),
            Some(KfxTrackData::File(path)) => {
                let data = std::fs::read(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => FluxError::TrackNotFound(ch),
                    _ => FluxError::from(e),
                })?;
                log::trace!("KfxStreamSet::read_track(): Reading {} from {}", ch, path.display());
                KfxStreamSet::parse_stream(&data)
            }
            None => {
                log::debug!("KfxStreamSet::read_track(): No stream for {}", ch);
                Err(FluxError::TrackNotFound(ch))
            }
        }
    }
}
