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

    src/decoder.rs

    The contract between the disk image assembler and an external track
    decoder, which turns a track's flux timing into addressable sectors.

*/
use crate::{FluxDensity, FluxEncoding, FluxError, SectorId};

/// Options passed to a [TrackDecoder] for a single track.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DecodeOptions {
    /// The revolution to decode, as an index into the track's revolution list. None to let the
    /// decoder choose.
    pub revolution: Option<usize>,
    /// The density to decode at. Either the classifier's result or a caller-supplied hint.
    pub density: FluxDensity,
    /// The encoding detected by the classifier, or [FluxEncoding::Unknown].
    pub encoding: FluxEncoding,
}

/// A sector produced by a [TrackDecoder].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedSector {
    /// The sector ID as read from the sector header.
    pub id: SectorId,
    /// The sector data.
    pub data: Vec<u8>,
    /// Whether the CRC of the sector header was valid.
    pub id_crc_valid: bool,
    /// Whether the CRC of the sector data was valid.
    pub data_crc_valid: bool,
}

impl DecodedSector {
    /// Return true if both the sector header and sector data CRCs were valid.
    pub fn is_good(&self) -> bool {
        self.id_crc_valid && self.data_crc_valid
    }
}

/// A track decoder turns the flux timing of one track into a list of sectors.
///
/// `transitions` holds the absolute time of every flux transition in nanoseconds from the start
/// of the capture, and `index_times` the absolute time of every index pulse. Each index pulse
/// time is also the time of some transition, or 0.
///
/// Decoders are called from worker threads when the `parallel` feature is enabled, and must
/// not share mutable state between tracks.
pub trait TrackDecoder: Send + Sync {
    fn decode(
        &self,
        transitions: &[u64],
        index_times: &[u64],
        options: &DecodeOptions,
    ) -> Result<Vec<DecodedSector>, FluxError>;
}

impl<F> TrackDecoder for F
where
    F: Fn(&[u64], &[u64], &DecodeOptions) -> Result<Vec<DecodedSector>, FluxError> + Send + Sync,
{
    fn decode(
        &self,
        transitions: &[u64],
        index_times: &[u64],
        options: &DecodeOptions,
    ) -> Result<Vec<DecodedSector>, FluxError> {
        self(transitions, index_times, options)
    }
}
