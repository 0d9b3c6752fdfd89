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
mod common;

use common::*;
use fluxcap::{
    AssemblyOptions,
    DecodeOptions,
    DecodedSector,
    DiskCh,
    DiskImageAssembler,
    FluxDensity,
    FluxEncoding,
    FluxError,
    ScpImage,
    TrackStatus,
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// An SCP image of `cylinders` double sided cylinders of MFM double density flux, with two
/// revolutions per track.
fn mfm_scp(cylinders: u8) -> ScpImage {
    let tracks = (0..cylinders as u64 * 2)
        .map(|t| {
            let revs = (0..2)
                .map(|r| {
                    mfm_dd_deltas(t * 2 + r, 3000)
                        .iter()
                        .map(|ns| (ns / 25) as u16)
                        .collect()
                })
                .collect();
            Some(revs)
        })
        .collect();
    let builder = ScpBuilder {
        revolutions: 2,
        end_track: cylinders * 2 - 1,
        tracks,
        ..Default::default()
    };
    ScpImage::from_bytes(builder.build()).unwrap()
}

#[test]
fn test_assemble_classifies_tracks() {
    init();
    let image = mfm_scp(3);
    let decoder = RevolutionDecoder::default();
    let disk = DiskImageAssembler::new(decoder).assemble(&image).unwrap();

    assert!(disk.is_complete());
    assert_eq!(disk.decoded_track_ct(), 6);
    for track in disk.tracks() {
        assert_eq!(track.encoding, FluxEncoding::Mfm);
        assert_eq!(track.density, FluxDensity::Double);
        assert_eq!(track.revolutions, 2);
        // One sector per closed revolution, from the three index pulses.
        assert_eq!(track.sectors.len(), 2);
        let bitrate = track.bitrate.unwrap();
        assert!(bitrate > 300_000.0 && bitrate < 500_000.0, "bitrate {}", bitrate);
    }
}

#[test]
fn test_decoder_receives_absolute_times_and_options() {
    init();
    let image = mfm_scp(1);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    let decoder = move |transitions: &[u64], index_times: &[u64], options: &DecodeOptions| {
        assert!(transitions.windows(2).all(|w| w[0] <= w[1]));
        // Every index pulse after the first is the time of a transition.
        for t in &index_times[1..] {
            assert!(transitions.binary_search(t).is_ok());
        }
        assert_eq!(options.revolution, Some(1));
        assert_eq!(options.density, FluxDensity::High);
        assert_eq!(options.encoding, FluxEncoding::Unknown);
        seen_clone.fetch_add(1, Ordering::Relaxed);
        Ok::<Vec<DecodedSector>, FluxError>(Vec::new())
    };

    let options = AssemblyOptions::new()
        .with_revolution(1)
        .with_density_hint(FluxDensity::High)
        .with_classification(false);
    let disk = DiskImageAssembler::new(decoder)
        .with_options(options)
        .assemble(&image)
        .unwrap();

    assert_eq!(seen.load(Ordering::Relaxed), 2);
    assert_eq!(disk.decoded_track_ct(), 2);
    assert_eq!(disk.sector_ct(), 0);
}

#[test]
fn test_decode_failures_leave_empty_slots() {
    init();
    let image = mfm_scp(2);
    let disk = DiskImageAssembler::new(FailingDecoder).assemble(&image).unwrap();
    assert_eq!(disk.decoded_track_ct(), 0);
    assert_eq!(disk.empty_slots().len(), 4);
    assert!(disk
        .slots()
        .iter()
        .all(|s| matches!(s.status, TrackStatus::DecodeFailed(_))));
}

#[test]
fn test_geometry_override() {
    init();
    let image = mfm_scp(2);
    let options = AssemblyOptions::new().with_geometry((3, 2));
    let disk = DiskImageAssembler::new(RevolutionDecoder::default())
        .with_options(options)
        .assemble(&image)
        .unwrap();
    assert_eq!(disk.geometry(), DiskCh::new(3, 2));
    assert_eq!(disk.decoded_track_ct(), 4);
    assert_eq!(disk.empty_slots(), vec![DiskCh::new(2, 0), DiskCh::new(2, 1)]);
}

#[test]
fn test_cancellation_between_tracks() {
    init();
    let image = mfm_scp(3);
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_clone = cancel.clone();
    // Request cancellation while decoding the second track.
    let calls = Arc::new(AtomicUsize::new(0));
    let decoder = move |_: &[u64], _: &[u64], _: &DecodeOptions| {
        if calls.fetch_add(1, Ordering::Relaxed) == 1 {
            cancel_clone.store(true, Ordering::Relaxed);
        }
        Ok::<Vec<DecodedSector>, FluxError>(Vec::new())
    };

    let disk = DiskImageAssembler::new(decoder)
        .with_cancel_flag(cancel)
        .assemble(&image)
        .unwrap();

    assert!(disk.was_cancelled());
    assert_eq!(disk.decoded_track_ct(), 2);
    let cancelled = disk
        .slots()
        .iter()
        .filter(|s| s.status == TrackStatus::Cancelled)
        .count();
    assert_eq!(cancelled, 4);
}

#[test]
fn test_assemble_file() {
    init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.scp");
    let builder = ScpBuilder {
        end_track: 1,
        tracks: vec![Some(vec![vec![160u16; 500]]), Some(vec![vec![160u16; 500]])],
        ..Default::default()
    };
    std::fs::write(&path, builder.build()).unwrap();

    let disk = DiskImageAssembler::new(RevolutionDecoder::default())
        .assemble_file(&path)
        .unwrap();
    assert_eq!(disk.decoded_track_ct(), 2);

    assert!(DiskImageAssembler::new(RevolutionDecoder::default())
        .assemble_file(dir.path().join("missing.scp"))
        .is_err());
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_matches_sequential() {
    init();
    let image = mfm_scp(4);
    let sequential = DiskImageAssembler::new(RevolutionDecoder::default())
        .assemble(&image)
        .unwrap();
    let parallel = DiskImageAssembler::new(RevolutionDecoder::default())
        .with_options(AssemblyOptions::new().with_parallel(true))
        .assemble(&image)
        .unwrap();
    assert_eq!(sequential, parallel);
}
