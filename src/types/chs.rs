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

//! The `chs` module defines [DiskCh], the physical address of a track, and [SectorId], the
//! four-component sector ID reported by a track decoder.

use std::fmt::Display;

/// The largest sector size a decoder may report. Larger size codes are clamped.
pub const MAXIMUM_SECTOR_SIZE: usize = 8192;

/// A structure representing the physical location of a track: a Cylinder (c) and Head (h).
///
/// Flux containers each locate tracks differently. SCP images store an offset table indexed by
/// `c * 2 + h`, KryoFlux sets encode the location in each stream's filename, and DFI images only
/// imply it by the order of their track records. All of them resolve to a `DiskCh`.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiskCh {
    pub(crate) c: u16,
    pub(crate) h: u8,
}

impl From<(u16, u8)> for DiskCh {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl Display for DiskCh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

impl DiskCh {
    /// Create a new DiskCh structure from a Cylinder (c) and Head (h) specifier.
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }
    /// Return the cylinder (c) field.
    pub fn c(&self) -> u16 {
        self.c
    }
    /// Return the head (h) field.
    pub fn h(&self) -> u8 {
        self.h
    }

    /// Return a new `DiskCh` that represents the next track on disk.
    /// # Arguments:
    /// * `geom` - Any type implementing `Into<DiskCh>`, representing the number of cylinders and heads on the disk.
    /// # Returns:
    /// `Some(DiskCh)` representing the next track on disk.
    /// `None` if the current `DiskCh` is the last track on the disk.
    pub fn next_track(&self, geom: impl Into<DiskCh>) -> Option<DiskCh> {
        let geom = geom.into();
        if self.h < geom.h().saturating_sub(1) {
            // Not at last head, just return next head
            Some(DiskCh::from((self.c, self.h + 1)))
        }
        else if self.c < geom.c().saturating_sub(1) {
            // At last head, but not at last cylinder. Return next cylinder, head 0
            Some(DiskCh::from((self.c + 1, 0)))
        }
        else {
            None
        }
    }

    /// Return the linear track index of this `DiskCh` within a geometry of `heads` heads,
    /// in cylinder-major order.
    pub fn to_track_index(&self, heads: u8) -> usize {
        self.c as usize * heads as usize + self.h as usize
    }

    /// Return the `DiskCh` at the linear track index `idx` within a geometry of `heads` heads.
    /// A head count of zero is treated as one head.
    pub fn from_track_index(idx: usize, heads: u8) -> DiskCh {
        let heads = heads.max(1) as usize;
        DiskCh::new((idx / heads) as u16, (idx % heads) as u8)
    }

    /// Return an iterator over every track location within the geometry `self`, where `self.c()`
    /// is the number of cylinders and `self.h()` is the number of heads.
    pub fn iter(&self) -> DiskChIterator {
        DiskChIterator {
            geom: *self,
            next: (self.c > 0 && self.h > 0).then_some(DiskCh::new(0, 0)),
        }
    }

    /// Return the total number of tracks described by the geometry `self`.
    pub fn track_ct(&self) -> usize {
        self.c as usize * self.h as usize
    }
}

pub struct DiskChIterator {
    geom: DiskCh,
    next: Option<DiskCh>,
}

impl Iterator for DiskChIterator {
    type Item = DiskCh;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next_track(self.geom);
        Some(current)
    }
}

/// A structure representing the four components of Sector ID:
///  - Cylinder (c)
///  - Head (h)
///  - Sector ID (s)
///  - Sector Size (n)
///
/// Sector IDs are reported by a track decoder and are not required to match the physical
/// location of the track they were read from.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorId {
    c: u16,
    h: u8,
    s: u8,
    n: u8,
}

impl Display for SectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} s:{:3} n:{}]", self.c, self.h, self.s, self.n)
    }
}

impl SectorId {
    pub fn new(c: u16, h: u8, s: u8, n: u8) -> Self {
        Self { c, h, s, n }
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
    pub fn s(&self) -> u8 {
        self.s
    }
    pub fn n(&self) -> u8 {
        self.n
    }
    /// Return the size of the 'n' parameter in bytes.
    /// The formula for calculating size from n is (128 * 2^n)
    /// We enforce a maximum size of 8192 bytes for a single sector.
    pub fn n_size(&self) -> usize {
        std::cmp::min(MAXIMUM_SECTOR_SIZE, 128usize.overflowing_shl(self.n as u32).0)
    }
    /// Return the physical track location implied by this sector ID.
    pub fn ch(&self) -> DiskCh {
        DiskCh::new(self.c, self.h)
    }
}
