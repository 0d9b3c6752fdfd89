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

//! # fluxcap
//!
//! fluxcap ingests raw flux captures of floppy disks produced by three families of capture
//! hardware:
//!
//! * SuperCard Pro (`.scp`) container images
//! * KryoFlux raw stream sets (`trackCC.H.raw`)
//! * DiscFerret (`.dfi`) images, which can also be written
//!
//! Every reader produces one [FluxBuffer] per track: a list of flux transition intervals in
//! nanoseconds plus the index pulse timestamps observed while the track was captured.
//! A [FluxBuffer] can be classified by the [EncodingClassifier] to guess its encoding and
//! density, materialized into a bitstream, or split into revolutions.
//!
//! The [DiskImageAssembler] drives a [FluxTrackSource] over every track of a capture, hands each
//! track to a [TrackDecoder] implementation and collects the results into a [FluxDiskImage].
//! Missing or damaged tracks produce empty slots rather than failing the whole capture.

pub mod assembler;
pub mod decoder;
pub mod disk_image;
pub mod file_parsers;
pub mod flux;
pub mod types;
mod util;

use thiserror::Error;

/// Global result type for fluxcap operations.
pub type FluxResult<T> = Result<T, FluxError>;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FluxError {
    #[error("An IO error occurred reading or writing the flux image: {0}")]
    IoError(String),
    #[error("The flux image is not valid for the detected format: {0}")]
    InvalidFormat(String),
    #[error("Unsupported flux image feature: {0}")]
    UnsupportedFormat(String),
    #[error("The requested track {0} is not present in the flux image")]
    TrackNotFound(DiskCh),
    #[error("Unexpected end of data while parsing the flux image")]
    Truncated,
    #[error("The flux buffer capacity of {0} transitions was exceeded")]
    CapacityExceeded(usize),
    #[error("Invalid parameters were specified to a library function: {0}")]
    ParameterError(String),
    #[error("The track decoder reported an error: {0}")]
    DecodeError(String),
    #[error("The operation was cancelled")]
    Cancelled,
}

impl FluxError {
    /// Returns true if the error only affects a single track and the remainder of the
    /// capture is still usable.
    pub fn is_track_local(&self) -> bool {
        matches!(
            self,
            FluxError::TrackNotFound(_)
                | FluxError::Truncated
                | FluxError::CapacityExceeded(_)
                | FluxError::DecodeError(_)
        )
    }
}

impl From<std::io::Error> for FluxError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FluxError::Truncated,
            _ => FluxError::IoError(err.to_string()),
        }
    }
}

impl From<binrw::Error> for FluxError {
    fn from(err: binrw::Error) -> Self {
        if err.is_eof() {
            return FluxError::Truncated;
        }
        match err {
            binrw::Error::Backtrace(bt) => (*bt.error).into(),
            binrw::Error::Io(e) => e.into(),
            binrw::Error::BadMagic { pos, .. } => FluxError::InvalidFormat(format!("bad magic at offset {:#X}", pos)),
            e => FluxError::InvalidFormat(e.to_string()),
        }
    }
}

pub use crate::{
    assembler::{AssemblyOptions, DiskImageAssembler},
    decoder::{DecodeOptions, DecodedSector, TrackDecoder},
    disk_image::{DecodedTrack, FluxDiskImage, TrackSlot, TrackStatus},
    file_parsers::{
        detect_format,
        dfi::{DfiCodec, DfiImage},
        kryoflux::KfxStreamSet,
        open_source,
        scp::ScpImage,
        FluxFileFormat,
        FluxTrackSource,
    },
    flux::{
        buffer::{FluxBuffer, RevolutionBounds},
        classifier::{ClassificationReport, EncodingClassifier},
    },
    types::{DiskCh, FluxDensity, FluxEncoding, SectorId},
};
