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

    tests/common/mod.rs

    Common support routines for tests: synthetic capture builders and
    mock track decoders.
*/
#![allow(dead_code)]

use fluxcap::{DecodeOptions, DecodedSector, FluxError, SectorId, TrackDecoder};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Generate a reproducible list of deltas uniformly distributed over `range`.
pub fn random_deltas(seed: u64, count: usize, range: std::ops::RangeInclusive<u64>) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(range.clone())).collect()
}

/// Generate an MFM double density style track: intervals clustered around 4μs, 6μs and 8μs.
pub fn mfm_dd_deltas(seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let base = match rng.gen_range(0..10) {
                0..=5 => 4000,
                6..=8 => 6000,
                _ => 8000,
            };
            base + rng.gen_range(0..400)
        })
        .collect()
}

/// Builds a synthetic SCP image.
pub struct ScpBuilder {
    pub resolution: u8,
    pub heads: u8,
    pub flags: u8,
    pub start_track: u8,
    pub end_track: u8,
    pub revolutions: u8,
    pub with_checksum: bool,
    /// One entry per track offset table entry. None writes a zero offset.
    /// Each track holds one list of 16-bit sample words per revolution.
    pub tracks: Vec<Option<Vec<Vec<u16>>>>,
}

impl Default for ScpBuilder {
    fn default() -> Self {
        ScpBuilder {
            resolution: 0,
            heads: 0,
            flags: 0x01,
            start_track: 0,
            end_track: 0,
            revolutions: 1,
            with_checksum: false,
            tracks: Vec::new(),
        }
    }
}

impl ScpBuilder {
    /// Encode a delta in ticks as SCP sample words, using overflow words as needed.
    pub fn ticks_to_words(ticks: u64) -> Vec<u16> {
        let mut words = vec![0u16; (ticks / 0x10000) as usize];
        words.push((ticks % 0x10000) as u16);
        words
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"SCP");
        out.extend_from_slice(&[
            0x19,
            0x30,
            self.revolutions,
            self.start_track,
            self.end_track,
            self.flags,
            0,
            self.heads,
            self.resolution,
        ]);
        out.extend_from_slice(&[0, 0, 0, 0]);

        let table_len = (self.end_track - self.start_track) as usize + 1;
        let table_offset = out.len();
        out.resize(table_offset + table_len * 4, 0);

        for (ti, track) in self.tracks.iter().enumerate().take(table_len) {
            let Some(revs) = track
            else {
                continue;
            };
            let track_offset = out.len();
            out[table_offset + ti * 4..table_offset + ti * 4 + 4].copy_from_slice(&(track_offset as u32).to_le_bytes());

            out.extend_from_slice(b"TRK");
            out.push(self.start_track + ti as u8);

            let mut data_offset = 4 + revs.len() * 12;
            for words in revs {
                let ticks: u64 = words
                    .iter()
                    .fold((0u64, 0u64), |(total, acc), w| match w {
                        0 => (total, acc + 0x10000),
                        v => (total + acc + *v as u64, 0),
                    })
                    .0;
                out.extend_from_slice(&(ticks as u32).to_le_bytes());
                out.extend_from_slice(&(words.len() as u32).to_le_bytes());
                out.extend_from_slice(&(data_offset as u32).to_le_bytes());
                data_offset += words.len() * 2;
            }
            for words in revs {
                for w in words {
                    out.extend_from_slice(&w.to_le_bytes());
                }
            }
        }

        if self.with_checksum {
            let checksum = out
                .iter()
                .skip(0x10)
                .fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
            out[12..16].copy_from_slice(&checksum.to_le_bytes());
        }
        out
    }
}

/// Encode a delta in sample ticks as KryoFlux stream bytes.
pub fn kfx_flux(ticks: u64) -> Vec<u8> {
    let mut out = vec![0x0B; (ticks / 0x10000) as usize];
    let value = ticks % 0x10000;
    match value {
        0x0E..=0xFF => out.push(value as u8),
        0x00..=0x7FF => out.extend_from_slice(&[(value >> 8) as u8, value as u8]),
        _ => {
            out.push(0x0C);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
    }
    out
}

/// Encode a KryoFlux Index OOB block.
pub fn kfx_index(stream_pos: u32, index_counter: u32) -> Vec<u8> {
    let mut out = vec![0x0D, 0x02, 12];
    out.extend_from_slice(&stream_pos.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&index_counter.to_le_bytes());
    out
}

/// Encode a KryoFlux Eof OOB block.
pub fn kfx_eof() -> Vec<u8> {
    vec![0x0D, 0x0D, 0x0D, 0x0D]
}

/// Build a KryoFlux stream from tick deltas, with an index pulse before each delta position
/// listed in `index_before`.
pub fn kfx_stream(ticks: &[u64], index_before: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut stream_pos = 0u32;
    for (i, t) in ticks.iter().enumerate() {
        if index_before.contains(&i) {
            out.extend(kfx_index(stream_pos, i as u32 * 1000));
        }
        let encoded = kfx_flux(*t);
        stream_pos += encoded.len() as u32;
        out.extend(encoded);
    }
    out.extend(kfx_eof());
    out
}

/// Build a DFI image from raw track records.
pub fn dfi_image(records: &[&[u8]]) -> Vec<u8> {
    let mut out = b"DFE2".to_vec();
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    for record in records {
        out.extend_from_slice(b"TRK0");
        out.extend_from_slice(&(record.len() as u32).to_le_bytes());
        out.extend_from_slice(record);
    }
    out
}

/// A decoder that reports one good sector per complete revolution, and records the options
/// it was called with.
#[derive(Default)]
pub struct RevolutionDecoder {
    pub calls: Mutex<Vec<(usize, DecodeOptions)>>,
}

impl TrackDecoder for RevolutionDecoder {
    fn decode(
        &self,
        transitions: &[u64],
        index_times: &[u64],
        options: &DecodeOptions,
    ) -> Result<Vec<DecodedSector>, FluxError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((transitions.len(), *options));
        }
        if transitions.is_empty() {
            return Err(FluxError::DecodeError("no flux transitions".to_string()));
        }
        Ok((1..index_times.len())
            .map(|s| DecodedSector {
                id: SectorId::new(0, 0, s as u8, 2),
                data: vec![0xE5; 512],
                id_crc_valid: true,
                data_crc_valid: true,
            })
            .collect())
    }
}

/// A decoder that always fails.
pub struct FailingDecoder;

impl TrackDecoder for FailingDecoder {
    fn decode(&self, _: &[u64], _: &[u64], _: &DecodeOptions) -> Result<Vec<DecodedSector>, FluxError> {
        Err(FluxError::DecodeError("no address marks found".to_string()))
    }
}
