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

    src/disk_image.rs

    The decoded disk image produced by the assembler: one slot per track
    location, each either holding a decoded track or recording why it is
    empty.

*/
use crate::{decoder::DecodedSector, file_parsers::FluxFileFormat, DiskCh, FluxDensity, FluxEncoding};
use std::fmt::{self, Display, Formatter};

/// The outcome of assembling a single track.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackStatus {
    /// The track was read and decoded.
    Decoded,
    /// The capture has no data for this track.
    #[default]
    NotFound,
    /// The track's flux data could not be read.
    ReadFailed(String),
    /// The track decoder returned an error.
    DecodeFailed(String),
    /// The assembly was cancelled before this track was started.
    Cancelled,
}

impl Display for TrackStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrackStatus::Decoded => write!(f, "Decoded"),
            TrackStatus::NotFound => write!(f, "Not found"),
            TrackStatus::ReadFailed(e) => write!(f, "Read failed: {}", e),
            TrackStatus::DecodeFailed(e) => write!(f, "Decode failed: {}", e),
            TrackStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A decoded track.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedTrack {
    pub ch: DiskCh,
    pub encoding: FluxEncoding,
    pub density: FluxDensity,
    /// Estimated bit rate in bits per second.
    pub bitrate: Option<f64>,
    /// The number of revolutions captured for the track.
    pub revolutions: usize,
    pub sectors: Vec<DecodedSector>,
}

impl DecodedTrack {
    /// Return the first sector with the specified sector number.
    pub fn sector(&self, s: u8) -> Option<&DecodedSector> {
        self.sectors.iter().find(|sector| sector.id.s() == s)
    }
}

/// A track location in a [FluxDiskImage].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackSlot {
    pub ch: DiskCh,
    pub status: TrackStatus,
    pub track: Option<DecodedTrack>,
}

impl TrackSlot {
    /// Create an empty slot with the specified status.
    pub fn empty(ch: DiskCh, status: TrackStatus) -> TrackSlot {
        TrackSlot { ch, status, track: None }
    }

    /// Create a slot holding a decoded track.
    pub fn decoded(track: DecodedTrack) -> TrackSlot {
        TrackSlot {
            ch: track.ch,
            status: TrackStatus::Decoded,
            track: Some(track),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_none()
    }
}

/// A disk image assembled from a flux capture: a dense array of track slots in cylinder-major
/// order. Tracks that were absent or failed are present as empty slots.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FluxDiskImage {
    source_format: FluxFileFormat,
    geometry: DiskCh,
    slots: Vec<TrackSlot>,
}

impl FluxDiskImage {
    /// Create an image of the specified geometry with every slot empty.
    pub fn new(source_format: FluxFileFormat, geometry: DiskCh) -> FluxDiskImage {
        FluxDiskImage {
            source_format,
            geometry,
            slots: geometry
                .iter()
                .map(|ch| TrackSlot::empty(ch, TrackStatus::NotFound))
                .collect(),
        }
    }

    pub fn source_format(&self) -> FluxFileFormat {
        self.source_format
    }

    pub fn geometry(&self) -> DiskCh {
        self.geometry
    }

    fn slot_index(&self, ch: DiskCh) -> Option<usize> {
        if ch.c() >= self.geometry.c() || ch.h() >= self.geometry.h() {
            return None;
        }
        Some(ch.to_track_index(self.geometry.h()))
    }

    /// Store a slot at its track location, replacing the previous slot.
    /// Returns false if the location is outside the image geometry.
    pub fn set_slot(&mut self, slot: TrackSlot) -> bool {
        match self.slot_index(slot.ch) {
            Some(idx) => {
                self.slots[idx] = slot;
                true
            }
            None => {
                log::warn!("FluxDiskImage::set_slot(): Track {} is outside image geometry", slot.ch);
                false
            }
        }
    }

    pub fn slot(&self, ch: DiskCh) -> Option<&TrackSlot> {
        self.slot_index(ch).map(|idx| &self.slots[idx])
    }

    pub fn slots(&self) -> &[TrackSlot] {
        &self.slots
    }

    /// Return the decoded track at the specified location, if present.
    pub fn track(&self, ch: DiskCh) -> Option<&DecodedTrack> {
        self.slot(ch).and_then(|slot| slot.track.as_ref())
    }

    /// Iterate over every decoded track.
    pub fn tracks(&self) -> impl Iterator<Item = &DecodedTrack> {
        self.slots.iter().filter_map(|slot| slot.track.as_ref())
    }

    /// Return the locations of every empty slot.
    pub fn empty_slots(&self) -> Vec<DiskCh> {
        self.slots.iter().filter(|s| s.is_empty()).map(|s| s.ch).collect()
    }

    pub fn decoded_track_ct(&self) -> usize {
        self.tracks().count()
    }

    pub fn sector_ct(&self) -> usize {
        self.tracks().map(|t| t.sectors.len()).sum()
    }

    /// Return true if every slot holds a decoded track.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| !s.is_empty())
    }

    /// Return true if any slot was left empty due to cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.slots.iter().any(|s| s.status == TrackStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SectorId;

    fn track(ch: DiskCh, sectors: u8) -> DecodedTrack {
        DecodedTrack {
            ch,
            sectors: (1..=sectors)
                .map(|s| DecodedSector {
                    id: SectorId::new(ch.c(), ch.h(), s, 2),
                    data: vec![0xF6; 512],
                    id_crc_valid: true,
                    data_crc_valid: true,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_image_is_empty() {
        let image = FluxDiskImage::new(FluxFileFormat::SuperCardPro, DiskCh::new(40, 2));
        assert_eq!(image.slots().len(), 80);
        assert_eq!(image.empty_slots().len(), 80);
        assert!(!image.is_complete());
        assert_eq!(image.slot(DiskCh::new(39, 1)).map(|s| s.ch), Some(DiskCh::new(39, 1)));
        assert!(image.slot(DiskCh::new(40, 0)).is_none());
    }

    #[test]
    fn test_set_slot() {
        let mut image = FluxDiskImage::new(FluxFileFormat::DiscFerret, DiskCh::new(2, 2));
        assert!(image.set_slot(TrackSlot::decoded(track(DiskCh::new(1, 0), 9))));
        assert!(!image.set_slot(TrackSlot::decoded(track(DiskCh::new(2, 0), 9))));

        assert_eq!(image.decoded_track_ct(), 1);
        assert_eq!(image.sector_ct(), 9);
        assert_eq!(image.slot(DiskCh::new(1, 0)).map(|s| &s.status), Some(&TrackStatus::Decoded));
        let sector = image.track(DiskCh::new(1, 0)).and_then(|t| t.sector(5));
        assert_eq!(sector.map(|s| s.id), Some(SectorId::new(1, 0, 5, 2)));
        assert!(sector.is_some_and(|s| s.is_good()));
        assert_eq!(
            image.empty_slots(),
            vec![DiskCh::new(0, 0), DiskCh::new(0, 1), DiskCh::new(1, 1)]
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TrackStatus::ReadFailed("boom".to_string()).to_string(), "Read failed: boom");
        assert_eq!(TrackStatus::Cancelled.to_string(), "Cancelled");
    }
}
