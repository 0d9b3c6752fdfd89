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

//! This module defines [FluxBuffer], the canonical in-memory representation of one captured
//! track, independent of the container format it was read from.
//!
//! A [FluxBuffer] stores flux transitions in delta form: each entry is the number of
//! nanoseconds elapsed since the previous transition. Index pulses are stored as absolute
//! timestamps measured from the start of the capture, and each one falls on a transition
//! boundary, i.e. it is equal to a prefix sum of the interval list.

use crate::{
    types::{FluxDensity, FluxEncoding},
    FluxError,
};
use std::ops::Range;

/// The maximum number of revolutions a [FluxBuffer] keeps. Capture tools typically record
/// between 2 and 5 revolutions per track.
pub const MAX_REVOLUTIONS: usize = 8;
/// The maximum number of index timestamps a [FluxBuffer] keeps. `n` revolutions are bounded by
/// `n + 1` index pulses.
pub const MAX_INDEX_PULSES: usize = MAX_REVOLUTIONS + 1;

/// The span of one revolution within a [FluxBuffer], as returned by
/// [FluxBuffer::revolution_bounds].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevolutionBounds {
    /// The range of transition indices belonging to the revolution.
    pub range: Range<usize>,
    /// The index-to-index time of the revolution in nanoseconds.
    pub duration_ns: u64,
}

#[derive(Clone, Debug, Default)]
pub struct FluxBuffer {
    deltas: Vec<u64>,
    capacity: usize,
    total_time: u64,
    index_times: Vec<u64>,
    encoding: FluxEncoding,
    density: FluxDensity,
}

impl FluxBuffer {
    /// Create a new, empty [FluxBuffer] able to hold `capacity` transitions.
    /// Format readers size the buffer from the transition count declared by the container, or
    /// from an upper bound estimated from the encoded data length.
    pub fn with_capacity(capacity: usize) -> Self {
        FluxBuffer {
            deltas: Vec::with_capacity(capacity),
            capacity,
            index_times: Vec::with_capacity(MAX_INDEX_PULSES),
            ..Default::default()
        }
    }

    /// Create a [FluxBuffer] from a list of interval deltas in nanoseconds and a list of absolute
    /// index timestamps. Index timestamps beyond [MAX_INDEX_PULSES] are dropped.
    pub fn from_deltas(deltas: &[u64], index_times: &[u64]) -> Result<Self, FluxError> {
        if index_times.windows(2).any(|w| w[1] < w[0]) {
            return Err(FluxError::ParameterError("index times must be non-decreasing".to_string()));
        }
        let mut buffer = FluxBuffer::with_capacity(deltas.len());
        for delta in deltas {
            buffer.append(*delta)?;
        }
        buffer.index_times = index_times.iter().copied().take(MAX_INDEX_PULSES).collect();
        Ok(buffer)
    }

    /// Append one flux transition interval, in nanoseconds.
    /// Returns [FluxError::CapacityExceeded] if the buffer is already full; transitions are
    /// never silently dropped.
    pub fn append(&mut self, delta_ns: u64) -> Result<(), FluxError> {
        if self.deltas.len() >= self.capacity {
            log::error!(
                "FluxBuffer::append(): Capacity of {} transitions exceeded",
                self.capacity
            );
            return Err(FluxError::CapacityExceeded(self.capacity));
        }
        self.deltas.push(delta_ns);
        self.total_time = self.total_time.saturating_add(delta_ns);
        Ok(())
    }

    /// Record an index pulse at the current end of the buffer, ie, at the sum of all intervals
    /// appended so far.
    /// Returns false if the pulse was dropped because [MAX_INDEX_PULSES] pulses have already
    /// been recorded.
    pub fn record_index(&mut self) -> bool {
        if self.index_times.len() >= MAX_INDEX_PULSES {
            log::warn!(
                "FluxBuffer::record_index(): Dropping index pulse at {}ns, limit of {} reached",
                self.total_time,
                MAX_INDEX_PULSES
            );
            return false;
        }
        self.index_times.push(self.total_time);
        true
    }

    /// Return the transition intervals in nanoseconds.
    pub fn deltas(&self) -> &[u64] {
        &self.deltas
    }

    /// Return the absolute index pulse timestamps in nanoseconds.
    pub fn index_times(&self) -> &[u64] {
        &self.index_times
    }

    /// Return the number of transitions in the buffer.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Return the number of transitions the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the sum of all transition intervals, in nanoseconds.
    pub fn total_time(&self) -> u64 {
        self.total_time
    }

    /// Return the number of revolutions addressable via [FluxBuffer::revolution_bounds].
    pub fn revolution_ct(&self) -> usize {
        self.index_times.len()
    }

    pub fn encoding(&self) -> FluxEncoding {
        self.encoding
    }

    pub fn density(&self) -> FluxDensity {
        self.density
    }

    /// Annotate the buffer with an encoding and density classification.
    pub fn set_classification(&mut self, encoding: FluxEncoding, density: FluxDensity) {
        self.encoding = encoding;
        self.density = density;
    }

    /// Produce the absolute-time view of the buffer: element `i` is the time in nanoseconds at
    /// which transition `i` occurred, measured from the start of the capture.
    pub fn absolute_times(&self) -> Vec<u64> {
        self.deltas
            .iter()
            .scan(0u64, |acc, delta| {
                *acc = acc.saturating_add(*delta);
                Some(*acc)
            })
            .collect()
    }

    /// Return the bounds of revolution `rev`.
    ///
    /// Revolution `n` spans from index timestamp `n - 1` (or the start of the capture, for
    /// `n == 0`) to index timestamp `n`. The start of the range is the first transition beginning
    /// at or after the start time, and the end of the range is one past the first transition
    /// completing at or after the end time, so the intervals in the range sum to the duration
    /// within the length of one interval.
    ///
    /// Returns None if `rev` does not have an index timestamp. If the buffer does not yet
    /// contain the end of the revolution, the range ends at the last transition.
    pub fn revolution_bounds(&self, rev: usize) -> Option<RevolutionBounds> {
        let target_end = *self.index_times.get(rev)?;
        let target_start = match rev {
            0 => 0,
            _ => self.index_times[rev - 1],
        };

        let mut running_time = 0u64;
        let mut start = None;
        let mut end = None;

        // `running_time` is the prefix sum of all intervals before transition `i`.
        for i in 0..=self.deltas.len() {
            if start.is_none() && running_time >= target_start {
                start = Some(i);
            }
            if start.is_some() && running_time >= target_end {
                end = Some(i);
                break;
            }
            if let Some(delta) = self.deltas.get(i) {
                running_time = running_time.saturating_add(*delta);
            }
        }

        let start = start.unwrap_or(self.deltas.len());
        let end = end.unwrap_or(self.deltas.len()).max(start);

        Some(RevolutionBounds {
            range: start..end,
            duration_ns: target_end - target_start,
        })
    }

    /// Return the transition intervals belonging to revolution `rev`.
    pub fn revolution(&self, rev: usize) -> Option<&[u64]> {
        self.revolution_bounds(rev).map(|bounds| &self.deltas[bounds.range])
    }
}
