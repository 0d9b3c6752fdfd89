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

    src/assembler.rs

    Drives a FluxTrackSource over every track location of a capture, hands
    each track to a TrackDecoder, and collects the results into a
    FluxDiskImage.

    A track that is absent, unreadable or undecodable produces an empty
    slot; it never fails the assembly as a whole.

*/
use crate::{
    decoder::{DecodeOptions, TrackDecoder},
    disk_image::{DecodedTrack, FluxDiskImage, TrackSlot, TrackStatus},
    file_parsers::{open_source, FluxTrackSource},
    flux::classifier::EncodingClassifier,
    DiskCh,
    FluxDensity,
    FluxError,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Options controlling disk image assembly. Implements the Builder pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct AssemblyOptions {
    #[doc = "The revolution to request from the track decoder."]
    pub revolution: Option<usize>,
    #[doc = "A density to decode at, overriding the classifier."]
    pub density_hint: Option<FluxDensity>,
    #[doc = "Whether to classify each track before decoding it."]
    pub classify: bool,
    #[doc = "A geometry to use instead of the geometry declared by the capture."]
    pub geometry: Option<DiskCh>,
    #[doc = "Whether to decode tracks on a worker pool. Requires the `parallel` feature."]
    pub parallel: bool,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        AssemblyOptions {
            revolution: None,
            density_hint: None,
            classify: true,
            geometry: None,
            parallel: false,
        }
    }
}

impl AssemblyOptions {
    pub fn new() -> AssemblyOptions {
        Default::default()
    }

    /// Set the revolution the track decoder should decode.
    pub fn with_revolution(mut self, revolution: usize) -> AssemblyOptions {
        self.revolution = Some(revolution);
        self
    }

    /// Set a density to pass to the track decoder instead of the classified density.
    pub fn with_density_hint(mut self, density: FluxDensity) -> AssemblyOptions {
        self.density_hint = Some(density);
        self
    }

    /// Set whether each track is classified before decoding. Defaults to true.
    pub fn with_classification(mut self, classify: bool) -> AssemblyOptions {
        self.classify = classify;
        self
    }

    /// Set the geometry to assemble, as a cylinder count and head count.
    pub fn with_geometry(mut self, geometry: impl Into<DiskCh>) -> AssemblyOptions {
        self.geometry = Some(geometry.into());
        self
    }

    /// Set whether tracks are decoded in parallel. Ignored without the `parallel` feature.
    pub fn with_parallel(mut self, parallel: bool) -> AssemblyOptions {
        self.parallel = parallel;
        self
    }
}

/// Assembles a [FluxDiskImage] from a [FluxTrackSource] using a [TrackDecoder].
pub struct DiskImageAssembler<D: TrackDecoder> {
    decoder: D,
    options: AssemblyOptions,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<D: TrackDecoder> DiskImageAssembler<D> {
    pub fn new(decoder: D) -> DiskImageAssembler<D> {
        DiskImageAssembler {
            decoder,
            options: AssemblyOptions::default(),
            cancel_flag: None,
        }
    }

    pub fn with_options(mut self, options: AssemblyOptions) -> DiskImageAssembler<D> {
        self.options = options;
        self
    }

    /// Set a flag that cancels the assembly when set. The flag is checked before each track is
    /// started; tracks not yet started are left as [TrackStatus::Cancelled] slots.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> DiskImageAssembler<D> {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Open the capture at `path` and assemble it.
    pub fn assemble_file(&self, path: impl AsRef<Path>) -> Result<FluxDiskImage, FluxError> {
        let source = open_source(path)?;
        self.assemble(source.as_ref())
    }

    /// Assemble every track of `source` into a [FluxDiskImage].
    /// Fails only if the geometry to assemble is empty.
    pub fn assemble(&self, source: &dyn FluxTrackSource) -> Result<FluxDiskImage, FluxError> {
        let geometry = self.options.geometry.unwrap_or_else(|| source.geometry());
        if geometry.track_ct() == 0 {
            log::error!(
                "DiskImageAssembler::assemble(): Capture has no tracks (geometry {})",
                geometry
            );
            return Err(FluxError::InvalidFormat("capture declares no tracks".to_string()));
        }

        log::debug!(
            "DiskImageAssembler::assemble(): Assembling {} capture, geometry {}",
            source.format(),
            geometry
        );

        let locations: Vec<DiskCh> = geometry.iter().collect();
        let slots = self.process_tracks(source, &locations);

        let mut image = FluxDiskImage::new(source.format(), geometry);
        for slot in slots {
            image.set_slot(slot);
        }

        if image.was_cancelled() {
            log::warn!("DiskImageAssembler::assemble(): Assembly was cancelled");
        }
        log::debug!(
            "DiskImageAssembler::assemble(): Decoded {} of {} tracks, {} sectors",
            image.decoded_track_ct(),
            geometry.track_ct(),
            image.sector_ct()
        );
        Ok(image)
    }

    #[cfg(feature = "parallel")]
    fn process_tracks(&self, source: &dyn FluxTrackSource, locations: &[DiskCh]) -> Vec<TrackSlot> {
        if self.options.parallel {
            locations
                .par_iter()
                .map(|ch| self.process_track(source, *ch))
                .collect()
        }
        else {
            locations.iter().map(|ch| self.process_track(source, *ch)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn process_tracks(&self, source: &dyn FluxTrackSource, locations: &[DiskCh]) -> Vec<TrackSlot> {
        if self.options.parallel {
            log::warn!("DiskImageAssembler::process_tracks(): 'parallel' feature not enabled, decoding sequentially");
        }
        locations.iter().map(|ch| self.process_track(source, *ch)).collect()
    }

    /// Read, classify and decode a single track.
    fn process_track(&self, source: &dyn FluxTrackSource, ch: DiskCh) -> TrackSlot {
        if self.is_cancelled() {
            return TrackSlot::empty(ch, TrackStatus::Cancelled);
        }

        let mut buffer = match source.read_track(ch) {
            Ok(buffer) => buffer,
            Err(FluxError::TrackNotFound(_)) => {
                log::debug!("DiskImageAssembler::process_track(): Track {} not present", ch);
                return TrackSlot::empty(ch, TrackStatus::NotFound);
            }
            Err(e) => {
                log::warn!("DiskImageAssembler::process_track(): Failed to read track {}: {}", ch, e);
                return TrackSlot::empty(ch, TrackStatus::ReadFailed(e.to_string()));
            }
        };

        if self.options.classify {
            EncodingClassifier::classify_buffer(&mut buffer);
        }

        if let Some(rev) = self.options.revolution {
            if rev >= buffer.revolution_ct() {
                log::warn!(
                    "DiskImageAssembler::process_track(): Track {} has no revolution {} ({} index pulses)",
                    ch,
                    rev,
                    buffer.revolution_ct()
                );
            }
        }

        let options = DecodeOptions {
            revolution: self.options.revolution,
            density: self.options.density_hint.unwrap_or(buffer.density()),
            encoding: buffer.encoding(),
        };

        let transitions = buffer.absolute_times();
        match self.decoder.decode(&transitions, buffer.index_times(), &options) {
            Ok(sectors) => {
                log::debug!(
                    "DiskImageAssembler::process_track(): Track {} decoded {} sectors",
                    ch,
                    sectors.len()
                );
                TrackSlot::decoded(DecodedTrack {
                    ch,
                    encoding: buffer.encoding(),
                    density: options.density,
                    bitrate: EncodingClassifier::estimate_bitrate(buffer.deltas()),
                    revolutions: buffer.index_times().len().saturating_sub(1),
                    sectors,
                })
            }
            Err(e) => {
                log::warn!("DiskImageAssembler::process_track(): Failed to decode track {}: {}", ch, e);
                TrackSlot::empty(ch, TrackStatus::DecodeFailed(e.to_string()))
            }
        }
    }
}
