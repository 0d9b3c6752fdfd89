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

//! This module defines the [EncodingClassifier], which infers the encoding and density of a
//! flux track from its timings alone.
//!
//! The classifier builds a histogram of flux intervals in 1μs bins, finds the dominant local
//! maxima and matches the lowest two against a static rule table. Each encoding produces a
//! characteristic set of interval lengths: MFM double density writes 4, 6 and 8μs intervals,
//! MFM high density 2, 3 and 4μs, and FM single density 8 and 16μs.
//!
//! Two dominant adjacent bins, such as the 2μs and 3μs intervals of MFM high density, can never
//! both be strict local maxima, so a single strict maximum is paired with the tallest remaining
//! bin as a shoulder peak. This also pairs a lone 3μs peak with a strong 4μs bin, which then
//! classifies as MFM high density rather than GCR double density.
//!
//! Classification never fails. A track that matches no rule keeps whatever classification it
//! already had.

use crate::{
    flux::{buffer::FluxBuffer, histogram::FluxHistogram},
    types::{FluxDensity, FluxEncoding},
};
use std::ops::RangeInclusive;

/// Number of 1μs histogram bins, covering intervals from 0 to 20μs.
pub const HISTOGRAM_BINS: usize = 20;
/// At most this many intervals from the start of a track are sampled.
pub const MAX_SAMPLED_TRANSITIONS: usize = 10_000;
/// Tracks with fewer transitions than this are not classified.
pub const MIN_CLASSIFY_TRANSITIONS: usize = 100;
/// At most this many peaks are considered.
pub const MAX_PEAKS: usize = 3;
/// A shoulder peak must hold at least 1/5th of the count of the single strict maximum.
pub const SHOULDER_PEAK_DIVISOR: u32 = 5;

/// One row of the classification table. Peak ranges are inclusive bin indices in microseconds.
/// A rule with no `peak2` range matches on the first peak alone.
#[derive(Debug)]
struct ClassificationRule {
    peak1: RangeInclusive<usize>,
    peak2: Option<RangeInclusive<usize>>,
    encoding: FluxEncoding,
    density: FluxDensity,
}

/// Rules are evaluated in order; the first match wins.
static CLASSIFICATION_RULES: [ClassificationRule; 4] = [
    ClassificationRule {
        peak1: 3..=5,
        peak2: Some(5..=7),
        encoding: FluxEncoding::Mfm,
        density: FluxDensity::Double,
    },
    ClassificationRule {
        peak1: 1..=3,
        peak2: Some(2..=4),
        encoding: FluxEncoding::Mfm,
        density: FluxDensity::High,
    },
    ClassificationRule {
        peak1: 7..=9,
        peak2: Some(14..=18),
        encoding: FluxEncoding::Fm,
        density: FluxDensity::Standard,
    },
    // Fallback: GCR schemes have variable interval lengths but a 3-4μs base.
    ClassificationRule {
        peak1: 2..=4,
        peak2: None,
        encoding: FluxEncoding::Gcr,
        density: FluxDensity::Double,
    },
];

/// The result of analysing a track, as returned by [EncodingClassifier::report].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassificationReport {
    /// Up to three histogram peaks, in microseconds, sorted ascending.
    pub peaks_us: Vec<usize>,
    /// The matched encoding and density, or None if no rule matched.
    pub classification: Option<(FluxEncoding, FluxDensity)>,
    /// The estimated bit rate in bits per second, assuming two bit cells per average interval.
    pub bitrate: Option<f64>,
    /// The base transition time in nanoseconds from a fine-grained histogram, if one could be
    /// determined.
    pub base_transition_ns: Option<u64>,
}

pub struct EncodingClassifier;

impl EncodingClassifier {
    /// Build the 1μs histogram over the first [MAX_SAMPLED_TRANSITIONS] intervals. Intervals of
    /// 20μs or longer are not counted.
    pub fn histogram(deltas: &[u64]) -> [u32; HISTOGRAM_BINS] {
        let mut bins = [0u32; HISTOGRAM_BINS];
        for delta in deltas.iter().take(MAX_SAMPLED_TRANSITIONS) {
            let bin = (*delta / 1000) as usize;
            if bin < HISTOGRAM_BINS {
                bins[bin] += 1;
            }
        }
        bins
    }

    /// Locate up to [MAX_PEAKS] local maxima in a histogram. A bin is a local maximum when its
    /// count is strictly greater than both neighbors, so the outermost bins are never peaks.
    /// When more than [MAX_PEAKS] maxima exist the tallest are kept. The result is sorted by bin.
    ///
    /// Two dominant adjacent bins (MFM high density writes 2μs and 3μs intervals) can never both
    /// be strict maxima. When exactly one strict maximum is found, the tallest remaining bin is
    /// taken as a shoulder peak if it holds at least 1/[SHOULDER_PEAK_DIVISOR] of the maximum's
    /// count.
    pub fn find_peaks(bins: &[u32]) -> Vec<usize> {
        let mut peaks: Vec<usize> = (1..bins.len().saturating_sub(1))
            .filter(|&i| bins[i] > bins[i - 1] && bins[i] > bins[i + 1])
            .collect();

        if peaks.len() == 1 {
            let peak = peaks[0];
            let min_count = (bins[peak] / SHOULDER_PEAK_DIVISOR).max(1);
            let shoulder = (0..bins.len())
                .filter(|&i| i != peak && bins[i] >= min_count)
                .max_by(|a, b| bins[*a].cmp(&bins[*b]).then(b.cmp(a)));
            if let Some(shoulder) = shoulder {
                log::trace!("EncodingClassifier::find_peaks(): Shoulder peak at bin {}", shoulder);
                peaks.push(shoulder);
            }
        }

        // Tallest first; ties resolve to the lower bin.
        peaks.sort_by(|a, b| bins[*b].cmp(&bins[*a]).then(a.cmp(b)));
        peaks.truncate(MAX_PEAKS);
        peaks.sort_unstable();
        peaks
    }

    /// Match sorted peaks against the classification table.
    pub fn match_peaks(peaks: &[usize]) -> Option<(FluxEncoding, FluxDensity)> {
        let peak1 = *peaks.first()?;
        let peak2 = peaks.get(1);

        CLASSIFICATION_RULES
            .iter()
            .find(|rule| {
                rule.peak1.contains(&peak1)
                    && match (&rule.peak2, peak2) {
                        (None, _) => true,
                        (Some(range), Some(p2)) => range.contains(p2),
                        (Some(_), None) => false,
                    }
            })
            .map(|rule| (rule.encoding, rule.density))
    }

    /// Classify a list of flux intervals in nanoseconds.
    /// Returns None if the track is too short or no rule matched.
    pub fn classify(deltas: &[u64]) -> Option<(FluxEncoding, FluxDensity)> {
        if deltas.len() < MIN_CLASSIFY_TRANSITIONS {
            log::debug!(
                "EncodingClassifier::classify(): Only {} transitions, not classifying",
                deltas.len()
            );
            return None;
        }
        let peaks = Self::find_peaks(&Self::histogram(deltas));
        let result = Self::match_peaks(&peaks);
        log::trace!("EncodingClassifier::classify(): peaks: {:?} result: {:?}", peaks, result);
        result
    }

    /// Classify a [FluxBuffer] and annotate it with the result. If no rule matches, the buffer's
    /// existing classification is left unchanged.
    /// Returns true if the buffer was annotated.
    pub fn classify_buffer(buffer: &mut FluxBuffer) -> bool {
        match Self::classify(buffer.deltas()) {
            Some((encoding, density)) => {
                log::debug!(
                    "EncodingClassifier::classify_buffer(): Detected {} encoding, {} density",
                    encoding,
                    density
                );
                buffer.set_classification(encoding, density);
                true
            }
            None => false,
        }
    }

    /// Estimate the bit rate of a track in bits per second from its average interval, assuming
    /// two bit cells per observed interval.
    pub fn estimate_bitrate(deltas: &[u64]) -> Option<f64> {
        let total_time: u64 = deltas.iter().sum();
        if deltas.is_empty() || total_time == 0 {
            return None;
        }
        let avg_interval_ns = total_time as f64 / deltas.len() as f64;
        Some((1.0 / avg_interval_ns) * 1_000_000_000.0 * 2.0)
    }

    /// Produce a full [ClassificationReport] for a list of flux intervals.
    pub fn report(deltas: &[u64]) -> ClassificationReport {
        let peaks_us = Self::find_peaks(&Self::histogram(deltas));
        let classification = match deltas.len() >= MIN_CLASSIFY_TRANSITIONS {
            true => Self::match_peaks(&peaks_us),
            false => None,
        };
        let base_transition_ns = FluxHistogram::new(deltas, 1.0).and_then(|mut h| h.base_transition_ns());

        ClassificationReport {
            peaks_us,
            classification,
            bitrate: Self::estimate_bitrate(deltas),
            base_transition_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deltas_with_peaks(peaks: &[(u64, usize)]) -> Vec<u64> {
        let mut deltas = Vec::new();
        for (us, count) in peaks {
            for i in 0..*count {
                deltas.push(us * 1000 + (i as u64 % 10) * 50);
            }
        }
        deltas
    }

    #[test]
    fn peaks_are_sorted_by_bin() {
        let mut bins = [0u32; HISTOGRAM_BINS];
        bins[8] = 500;
        bins[4] = 900;
        bins[6] = 700;
        bins[12] = 10;
        assert_eq!(EncodingClassifier::find_peaks(&bins), vec![4, 6, 8]);
    }

    #[test]
    fn adjacent_dominant_bins_yield_shoulder_peak() {
        let mut bins = [0u32; HISTOGRAM_BINS];
        bins[2] = 600;
        bins[3] = 300;
        bins[4] = 20;
        assert_eq!(EncodingClassifier::find_peaks(&bins), vec![2, 3]);
    }

    #[test]
    fn shoulder_peak_favors_mfm_hd_over_gcr() {
        let mut bins = [0u32; HISTOGRAM_BINS];
        bins[3] = 600;
        bins[4] = 200;
        assert_eq!(EncodingClassifier::find_peaks(&bins), vec![3, 4]);
        assert_eq!(
            EncodingClassifier::match_peaks(&[3, 4]),
            Some((FluxEncoding::Mfm, FluxDensity::High))
        );
        // Without a shoulder the lone 3μs peak falls through to GCR.
        bins[4] = 100;
        assert_eq!(EncodingClassifier::find_peaks(&bins), vec![3]);
        assert_eq!(
            EncodingClassifier::match_peaks(&[3]),
            Some((FluxEncoding::Gcr, FluxDensity::Double))
        );
    }

    #[test]
    fn edge_bins_are_not_peaks() {
        let mut bins = [0u32; HISTOGRAM_BINS];
        bins[0] = 100;
        bins[19] = 100;
        assert!(EncodingClassifier::find_peaks(&bins).is_empty());
    }

    #[test]
    fn classify_mfm_dd() {
        let deltas = deltas_with_peaks(&[(4, 600), (6, 300), (8, 200)]);
        assert_eq!(
            EncodingClassifier::classify(&deltas),
            Some((FluxEncoding::Mfm, FluxDensity::Double))
        );
    }

    #[test]
    fn classify_mfm_hd() {
        let deltas = deltas_with_peaks(&[(2, 600), (3, 300)]);
        assert_eq!(
            EncodingClassifier::classify(&deltas),
            Some((FluxEncoding::Mfm, FluxDensity::High))
        );
    }

    #[test]
    fn classify_fm_sd() {
        let deltas = deltas_with_peaks(&[(8, 600), (16, 300)]);
        assert_eq!(
            EncodingClassifier::classify(&deltas),
            Some((FluxEncoding::Fm, FluxDensity::Standard))
        );
    }

    #[test]
    fn classify_gcr_fallback() {
        // A single dominant peak at 3us.
        let deltas = deltas_with_peaks(&[(3, 600)]);
        assert_eq!(
            EncodingClassifier::classify(&deltas),
            Some((FluxEncoding::Gcr, FluxDensity::Double))
        );
    }

    #[test]
    fn flat_histogram_leaves_classification_unchanged() {
        let deltas: Vec<u64> = (0..2000).map(|i| (i % 20) * 1000 + 500).collect();
        let mut buffer = FluxBuffer::from_deltas(&deltas, &[]).unwrap();
        buffer.set_classification(FluxEncoding::Mfm, FluxDensity::High);
        assert!(!EncodingClassifier::classify_buffer(&mut buffer));
        assert_eq!(buffer.encoding(), FluxEncoding::Mfm);
        assert_eq!(buffer.density(), FluxDensity::High);
    }

    #[test]
    fn short_tracks_are_not_classified() {
        let deltas = deltas_with_peaks(&[(4, 30), (6, 20)]);
        assert_eq!(EncodingClassifier::classify(&deltas), None);
    }

    #[test]
    fn bitrate_assumes_two_cells_per_interval() {
        // Average interval of 4us -> 250k intervals/s -> 500kbps
        let bitrate = EncodingClassifier::estimate_bitrate(&[4000; 100]).unwrap();
        assert!((bitrate - 500_000.0).abs() < 1.0);
        assert_eq!(EncodingClassifier::estimate_bitrate(&[]), None);
    }

    #[test]
    fn report_includes_peaks_and_classification() {
        let deltas = deltas_with_peaks(&[(4, 600), (6, 300), (8, 200)]);
        let report = EncodingClassifier::report(&deltas);
        assert_eq!(report.peaks_us, vec![4, 6, 8]);
        assert_eq!(report.classification, Some((FluxEncoding::Mfm, FluxDensity::Double)));
        assert!(report.bitrate.is_some());
    }
}
