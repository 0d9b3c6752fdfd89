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

    src/file_parsers/mod.rs

    Flux capture container readers and writers, and the FluxTrackSource
    trait that the disk image assembler consumes.

*/
use crate::{flux::FluxBuffer, DiskCh, FluxError};
use std::path::Path;
use strum::IntoEnumIterator;

pub mod dfi;
pub mod kryoflux;
pub mod scp;

/// The flux capture container formats fluxcap can read.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FluxFileFormat {
    /// A SuperCard Pro flux image. Typically, has extension SCP.
    #[strum(to_string = "SuperCard Pro")]
    SuperCardPro,
    /// A set of KryoFlux raw stream files, one per track. Typically, has extension RAW.
    #[strum(to_string = "KryoFlux Stream")]
    KryofluxStream,
    /// A DiscFerret flux image. Typically, has extension DFI.
    #[strum(to_string = "DiscFerret")]
    DiscFerret,
}

impl FluxFileFormat {
    /// Return the file extensions associated with the format.
    pub fn extensions(&self) -> Vec<&'static str> {
        match self {
            FluxFileFormat::SuperCardPro => scp::ScpImage::extensions(),
            FluxFileFormat::KryofluxStream => kryoflux::KfxStreamSet::extensions(),
            FluxFileFormat::DiscFerret => dfi::DfiImage::extensions(),
        }
    }

    /// Return true if the format can be written by fluxcap.
    pub fn can_write(&self) -> bool {
        matches!(self, FluxFileFormat::DiscFerret)
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        match self {
            FluxFileFormat::SuperCardPro => scp::ScpImage::detect(bytes),
            FluxFileFormat::KryofluxStream => kryoflux::KfxStreamSet::detect(bytes),
            FluxFileFormat::DiscFerret => dfi::DfiImage::detect(bytes),
        }
    }
}

/// Returns a list of advertised file extensions supported by available flux readers.
/// This is a convenience function for use in file dialogs - format detection is not based on
/// file extension, but on file content.
pub fn supported_extensions() -> Vec<&'static str> {
    FluxFileFormat::iter().flat_map(|f| f.extensions()).collect()
}

/// Returns a FluxFileFormat based on the file extension provided. If the extension is not
/// recognized, None is returned.
pub fn format_from_ext(ext: &str) -> Option<FluxFileFormat> {
    let ext = ext.to_lowercase();
    FluxFileFormat::iter().find(|f| f.extensions().contains(&ext.as_str()))
}

/// Detect the container format of a flux capture by its leading magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<FluxFileFormat> {
    FluxFileFormat::iter().find(|f| f.detect(bytes))
}

/// A source of per-track flux data. Each container reader implements this trait so that the
/// disk image assembler can walk any capture without knowing its wire format.
///
/// Implementations must be safe to share between worker threads; reading one track must not
/// affect any other track.
pub trait FluxTrackSource: Send + Sync {
    /// Return the container format of this source.
    fn format(&self) -> FluxFileFormat;
    /// Return the declared geometry of the capture, as a cylinder count and head count.
    fn geometry(&self) -> DiskCh;
    /// Read the flux data of the track at the specified location.
    /// A location with no captured data returns [FluxError::TrackNotFound].
    fn read_track(&self, ch: DiskCh) -> Result<FluxBuffer, FluxError>;
}

/// Open a flux capture on disk. A directory is treated as a KryoFlux stream set; a file is
/// detected by content. A KryoFlux stream file opens the whole set it belongs to.
pub fn open_source(path: impl AsRef<Path>) -> Result<Box<dyn FluxTrackSource>, FluxError> {
    let path = path.as_ref();

    if path.is_dir() {
        log::debug!("open_source(): Opening directory {} as KryoFlux set", path.display());
        return Ok(Box::new(kryoflux::KfxStreamSet::from_dir(path)?));
    }

    let bytes = std::fs::read(path)?;
    let format = detect_format(&bytes).ok_or_else(|| {
        log::error!("open_source(): Unable to detect format of {}", path.display());
        FluxError::UnsupportedFormat(format!("unrecognized flux capture: {}", path.display()))
    })?;
    log::debug!("open_source(): Detected {} capture: {}", format, path.display());

    match format {
        FluxFileFormat::SuperCardPro => Ok(Box::new(scp::ScpImage::from_bytes(bytes)?)),
        FluxFileFormat::DiscFerret => Ok(Box::new(dfi::DfiImage::from_bytes(bytes)?)),
        FluxFileFormat::KryofluxStream => Ok(Box::new(kryoflux::KfxStreamSet::from_file(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_ext() {
        assert_eq!(format_from_ext("SCP"), Some(FluxFileFormat::SuperCardPro));
        assert_eq!(format_from_ext("raw"), Some(FluxFileFormat::KryofluxStream));
        assert_eq!(format_from_ext("dfi"), Some(FluxFileFormat::DiscFerret));
        assert_eq!(format_from_ext("img"), None);
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(b"SCP\x19\x00"), Some(FluxFileFormat::SuperCardPro));
        assert_eq!(detect_format(b"DFE2\x00\x00"), Some(FluxFileFormat::DiscFerret));
        assert_eq!(detect_format(&[0x0D, 0x04, 0x00]), Some(FluxFileFormat::KryofluxStream));
        assert_eq!(detect_format(b"IMD 1.18"), None);
        assert_eq!(detect_format(&[]), None);
    }

    #[test]
    fn test_supported_extensions() {
        let exts = supported_extensions();
        assert!(exts.contains(&"scp"));
        assert!(exts.contains(&"raw"));
        assert!(exts.contains(&"dfi"));
    }
}
