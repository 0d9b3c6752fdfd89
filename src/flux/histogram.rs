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

//! This module defines a [FluxHistogram] structure, a fine-grained, log-linear histogram of
//! flux intervals used to estimate the base (shortest) transition time of a track.
//!
//! The coarse 1μs histogram used for encoding classification lives in the
//! [classifier](crate::flux::classifier) module. The [FluxHistogram] complements it for
//! reporting, where sub-microsecond resolution matters.

use histogram::{Bucket, Histogram};
use std::ops::RangeInclusive;

/// Grouping power of 3 produces sharp spikes without false maxima.
const GROUPING_POWER: u8 = 3;
/// Max value power of 2^15 = 32768ns, comfortably above the longest FM interval.
const MAX_VALUE_POWER: u8 = 15;

pub struct FluxHistogram {
    histogram: Histogram,
    maxima: Vec<(u64, RangeInclusive<u64>)>,
    total_time: u64,
}

impl FluxHistogram {
    /// Produce a [FluxHistogram] over a fraction of the flux deltas of a track.
    /// # Arguments
    /// * `deltas` - A slice of flux intervals in nanoseconds
    /// * `fraction` - The fraction of the deltas to use in the histogram
    pub fn new(deltas: &[u64], fraction: f64) -> Option<Self> {
        let mut histogram = Histogram::new(GROUPING_POWER, MAX_VALUE_POWER).ok()?;

        let take_count = (deltas.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
        log::trace!("FluxHistogram::new(): Taking {} flux deltas", take_count);
        let mut total_time = 0u64;
        for delta_ns in deltas.iter().take(take_count) {
            total_time = total_time.saturating_add(*delta_ns);
            // Values beyond the max value power are outliers; ignore them.
            _ = histogram.increment(*delta_ns);
        }

        Some(FluxHistogram {
            histogram,
            maxima: Vec::new(),
            total_time,
        })
    }

    /// Return the sum of the intervals sampled into the histogram, in nanoseconds.
    pub fn total_time(&self) -> u64 {
        self.total_time
    }

    /// Locate local maxima in the histogram by bucket. Buckets holding less than `threshold`
    /// (as a fraction of the total count, default 0.5%) are not considered peaks.
    pub fn find_local_maxima(&mut self, threshold: Option<f64>) -> &[(u64, RangeInclusive<u64>)] {
        let mut peaks = vec![];
        let mut previous_bucket: Option<Bucket> = None;
        let mut current_bucket: Option<Bucket> = None;

        let total_count: u64 = self.histogram.into_iter().map(|bucket| bucket.count()).sum();
        let threshold = (total_count as f64 * threshold.unwrap_or(0.005)).round() as u64;

        for bucket in self.histogram.into_iter() {
            if let (Some(prev), Some(curr)) = (previous_bucket.as_ref(), current_bucket.as_ref()) {
                if curr.count() >= prev.count() && curr.count() > bucket.count() && curr.count() >= threshold {
                    peaks.push((curr.count(), curr.start()..=curr.end()));
                }
            }
            previous_bucket = current_bucket.take();
            current_bucket = Some(bucket.clone());
        }

        self.maxima = peaks;
        &self.maxima
    }

    /// Attempt to calculate the base (short) transition time in nanoseconds, as the midpoint of
    /// the first peak. At least two peaks are required for a meaningful result.
    pub fn base_transition_ns(&mut self) -> Option<u64> {
        if self.maxima.is_empty() {
            self.find_local_maxima(None);
        }

        if self.maxima.len() < 2 {
            log::debug!("FluxHistogram::base_transition_ns(): Not enough peaks found");
            return None;
        }

        let first_peak = &self.maxima[0].1;
        Some((first_peak.start() + first_peak.end()) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_transition_of_mfm_track() {
        // Jittered 4/6/8us MFM intervals.
        let deltas: Vec<u64> = (0..3000)
            .map(|i| {
                let base = [4000, 6000, 8000][i % 3];
                base + (i as u64 % 5) * 20
            })
            .collect();
        let mut histogram = FluxHistogram::new(&deltas, 1.0).unwrap();
        assert_eq!(histogram.total_time(), deltas.iter().sum::<u64>());
        let base = histogram.base_transition_ns().unwrap();
        assert!((3500..4600).contains(&base), "base transition {} out of range", base);
    }

    #[test]
    fn single_peak_has_no_base_transition() {
        let deltas = vec![4000u64; 1000];
        let mut histogram = FluxHistogram::new(&deltas, 1.0).unwrap();
        assert_eq!(histogram.base_transition_ns(), None);
    }
}
