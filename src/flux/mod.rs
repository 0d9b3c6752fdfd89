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

//! The `flux` module holds the format-independent representation of a captured track,
//! [FluxBuffer](buffer::FluxBuffer), and the analysis built on top of it: encoding
//! classification, bitstream materialization and revolution extraction.

pub mod bitstream;
pub mod buffer;
pub mod classifier;
pub mod histogram;

pub use buffer::{FluxBuffer, RevolutionBounds, MAX_INDEX_PULSES, MAX_REVOLUTIONS};

/// Format a time in nanoseconds as microseconds for logging.
#[doc(hidden)]
#[macro_export]
macro_rules! format_us {
    ($value:expr) => {
        format!("{:.4}μs", $value as f64 / 1_000.0)
    };
}

/// Format a time in nanoseconds as milliseconds for logging.
#[doc(hidden)]
#[macro_export]
macro_rules! format_ms {
    ($value:expr) => {
        format!("{:.4}ms", $value as f64 / 1_000_000.0)
    };
}
