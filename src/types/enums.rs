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

    enums.rs

    Defines the encoding and density classifications attached to flux tracks.
*/
use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// The data encoding a flux track is believed to carry.
///
/// A freshly read track is `Unknown` until the [EncodingClassifier](crate::EncodingClassifier)
/// annotates it. The classification is a guess made from flux timings alone, not a property
/// recorded by the capture hardware.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FluxEncoding {
    #[default]
    Unknown,
    #[doc = "Frequency Modulation encoding. Used by older 8&quot; diskettes, and duplication tracks on some 5.25&quot; diskettes."]
    Fm,
    #[doc = "Modified Frequency Modulation encoding. Used by almost all 5.25&quot; and 3.5&quot; diskettes."]
    Mfm,
    #[doc = "Group Code Recording encoding. Used by Apple and Commodore diskettes."]
    Gcr,
}

impl Display for FluxEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FluxEncoding::Unknown => write!(f, "Unknown"),
            FluxEncoding::Fm => write!(f, "FM"),
            FluxEncoding::Mfm => write!(f, "MFM"),
            FluxEncoding::Gcr => write!(f, "GCR"),
        }
    }
}

/// The density of data recording on a disk track.
///
/// * `Standard` density: typically referring to FM encoding, typically used by 8" diskettes.
/// * `Double` density: typically referring to MFM encoding at 250/300Kbps. Appeared on 5.25" and 3.5" diskettes.
/// * `High` density: typically referring to MFM encoding at 500Kbps. Appeared on 5.25" and 3.5" diskettes.
/// * `Extended` density: typically referring to MFM encoding at 1Mbps. Appeared on 3.5" diskettes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FluxDensity {
    #[default]
    Unknown,
    Standard,
    Double,
    High,
    Extended,
}

impl Display for FluxDensity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        use FluxDensity::*;
        match self {
            Unknown => write!(f, "Unknown"),
            Standard => write!(f, "Standard"),
            Double => write!(f, "Double"),
            High => write!(f, "High"),
            Extended => write!(f, "Extended"),
        }
    }
}

impl FluxDensity {
    /// Return the nominal bit cell time in nanoseconds for a given density.
    /// An `Unknown` density is assumed to be double density, the most common case.
    pub fn base_cell_ns(&self) -> u64 {
        match self {
            FluxDensity::Standard => 4_000,
            FluxDensity::Double | FluxDensity::Unknown => 2_000,
            FluxDensity::High => 1_000,
            FluxDensity::Extended => 500,
        }
    }

    /// Attempt to determine the density from a measured bit cell time in nanoseconds.
    pub fn from_cell_ns(cell_ns: f64) -> Option<FluxDensity> {
        match cell_ns {
            375.0..625.0 => Some(FluxDensity::Extended),
            750.0..1250.0 => Some(FluxDensity::High),
            1500.0..2500.0 => Some(FluxDensity::Double),
            3000.0..5000.0 => Some(FluxDensity::Standard),
            _ => None,
        }
    }
}
