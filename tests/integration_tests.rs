//! Integration tests for the lineage tracker.
//!
//! These tests drive complete sequences through the public API and check the
//! relabeled masks, the recorded pairings and the lineage aggregates.

use std::collections::BTreeSet;

use lineage_rs::{
    CancellationFlag, Error, Frame, FrameInput, FrameState, FrameTracker, LabelImage, Track,
    TrackedFrame, TrackerConfig,
};
use tracing_subscriber::EnvFilter;

/// Route library diagnostics to the test output; `RUST_LOG=debug` shows stage events.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Row-major mask of `width x height` with `(label, x_range, y_range)` blocks painted in order.
fn mask(
    width: usize,
    height: usize,
    blocks: &[(u32, std::ops::Range<usize>, std::ops::Range<usize>)],
) -> Vec<u32> {
    let mut labels = vec![0u32; width * height];
    for (label, xs, ys) in blocks {
        for y in ys.clone() {
            for x in xs.clone() {
                labels[y * width + x] = *label;
            }
        }
    }
    labels
}

fn input(index: usize, width: usize, height: usize, labels: &[u32]) -> FrameInput {
    FrameInput::new(index, format!("t{}", index), width, height, labels).expect("valid frame")
}

/// Every labeled pixel refers to a committed object, and object areas add up.
fn assert_conservation(frame: &TrackedFrame) {
    let pixels: BTreeSet<u32> = frame.labels.iter().copied().filter(|&v| v > 0).collect();
    let globals: BTreeSet<u32> = frame.objects.iter().map(|o| o.global_label).collect();
    assert_eq!(pixels, globals, "frame {}: pixel labels differ from objects", frame.index);

    let background = frame.labels.iter().filter(|&&v| v == 0).count();
    let area: usize = frame.objects.iter().map(|o| o.area).sum();
    assert_eq!(area + background, frame.width * frame.height);
}

/// No two previous objects continue as the same current object.
fn assert_partial_injectivity(frames: &[Frame]) {
    for frame in frames {
        let Some(pairing) = frame.pairing() else {
            continue;
        };
        let mut seen = BTreeSet::new();
        for (_, track) in pairing.track_vector.iter() {
            if let Some(target) = track.target() {
                assert!(
                    seen.insert(target),
                    "frame {}: target {} claimed twice",
                    frame.index(),
                    target
                );
            }
        }
    }
}

// =============================================================================
// Test 1: Shifted Block Round Trip
// =============================================================================

#[test]
fn test_integration_shifted_block_keeps_label() {
    let mut tracker = FrameTracker::new(TrackerConfig::default()).expect("valid tracker");

    let first = mask(4, 4, &[(1, 0..2, 0..2)]);
    let second = mask(4, 4, &[(1, 1..3, 0..2)]);

    let image = LabelImage::from_unpadded(4, 4, &first).unwrap();
    assert!(tracker.push_frame(0, "t0", image).unwrap().is_none());
    let image = LabelImage::from_unpadded(4, 4, &second).unwrap();
    let done = tracker.push_frame(1, "t1", image).unwrap().expect("frame 0 finished");
    assert_eq!(done.labels, first);

    let current = &tracker.frames()[1];
    assert_eq!(current.state(), FrameState::Tracked);
    let pairing = current.pairing().expect("paired with frame 0");
    assert_eq!(pairing.overlap.get(1, 1), 2.0);
    assert!(pairing.cost.get(1, 1) < 0.6);
    assert_eq!(pairing.track_vector.len(), 1);
    assert_eq!(pairing.track_vector.get(1), Track::To(1));

    let last = tracker.finish().unwrap().expect("frame 1 finished");
    assert_eq!(last.labels, second);
    assert_eq!(tracker.highest_global_label(), 1);
    assert_conservation(&done);
    assert_conservation(&last);
}

// =============================================================================
// Test 2: Division
// =============================================================================

const W: usize = 24;
const H: usize = 14;

/// Six frames of a 10x10 mother, then two 4x10 daughters inside its outline.
fn division_sequence() -> Vec<FrameInput> {
    let mother = mask(W, H, &[(1, 5..15, 2..12)]);
    let daughters = mask(W, H, &[(1, 5..9, 2..12), (2, 11..15, 2..12)]);
    let mut frames: Vec<FrameInput> = (0..6).map(|i| input(i, W, H, &mother)).collect();
    frames.push(input(6, W, H, &daughters));
    frames
}

#[test]
fn test_integration_division_detected() {
    init_tracing();
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let out = tracker
        .run(division_sequence(), &CancellationFlag::new())
        .unwrap();
    assert_eq!(out.len(), 7);

    let last = tracker.frames().last().unwrap();
    let pairing = last.pairing().unwrap();
    assert_eq!(pairing.division.at(1), 1.0);
    assert_eq!(pairing.division.at(2), 1.0);
    assert_eq!(pairing.track_vector.get(1), Track::Dead);

    let daughters = &out[6];
    assert_eq!(daughters.label_at(6, 5), 2);
    assert_eq!(daughters.label_at(12, 5), 3);
    assert_eq!(tracker.highest_global_label(), 3);
    for frame in &out {
        assert_conservation(frame);
    }
    assert_partial_injectivity(tracker.frames());

    let lineage = tracker.lineage();
    assert_eq!(lineage.divisions.len(), 1);
    assert_eq!(lineage.divisions[0].frame, 6);
    assert_eq!(lineage.divisions[0].mother, 1);
    assert_eq!(lineage.divisions[0].daughters, vec![2, 3]);
    assert_eq!(lineage.deaths[&1], 5);
    assert_eq!(lineage.births[&2], 6);
}

#[test]
fn test_integration_disabled_division_merges_daughters() {
    let config = TrackerConfig {
        enable_division: false,
        ..TrackerConfig::default()
    };
    let mut tracker = FrameTracker::new(config).unwrap();
    let out = tracker
        .run(division_sequence(), &CancellationFlag::new())
        .unwrap();

    let merged = &out[6];
    assert_eq!(merged.objects.len(), 1);
    assert_eq!(merged.objects[0].global_label, 1);
    assert_eq!(merged.objects[0].area, 80);
    assert_eq!(merged.label_at(6, 5), 1);
    assert_eq!(merged.label_at(12, 5), 1);
    assert_eq!(tracker.highest_global_label(), 1);
    assert!(tracker.lineage().divisions.is_empty());
    assert_conservation(merged);
}

/// An 18x10 mother, then three 4x10 daughters spread across its outline.
/// The middle daughter sits on the mother's centroid, the outer two 7 pixels away.
fn three_daughter_sequence() -> Vec<FrameInput> {
    let mother = mask(W, H, &[(1, 3..21, 2..12)]);
    let daughters = mask(W, H, &[(1, 3..7, 2..12), (2, 10..14, 2..12), (3, 17..21, 2..12)]);
    vec![input(0, W, H, &mother), input(1, W, H, &daughters)]
}

#[test]
fn test_integration_division_capped_at_two_daughters() {
    init_tracing();
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let out = tracker
        .run(three_daughter_sequence(), &CancellationFlag::new())
        .unwrap();

    let pairing = tracker.frames()[1].pairing().unwrap();
    // middle daughter is cheapest, the outer ones tie and the first wins
    assert_eq!(pairing.division.at(1), 1.0);
    assert_eq!(pairing.division.at(2), 1.0);
    assert_eq!(pairing.division.at(3), 0.0);
    assert_eq!(pairing.track_vector.get(1), Track::Dead);

    let split = &out[1];
    assert_eq!(split.label_at(4, 5), 2);
    assert_eq!(split.label_at(11, 5), 3);
    assert_eq!(split.label_at(18, 5), 4);
    assert_eq!(tracker.highest_global_label(), 4);
    assert_conservation(split);
    assert_partial_injectivity(tracker.frames());

    let lineage = tracker.lineage();
    assert_eq!(lineage.divisions.len(), 1);
    assert_eq!(lineage.divisions[0].mother, 1);
    assert_eq!(lineage.divisions[0].daughters, vec![2, 3]);
    assert_eq!(lineage.births[&4], 1);
}

#[test]
fn test_integration_uncapped_division_keeps_all_daughters() {
    let config = TrackerConfig {
        limit_division_to_two_daughters: false,
        ..TrackerConfig::default()
    };
    let mut tracker = FrameTracker::new(config).unwrap();
    let out = tracker
        .run(three_daughter_sequence(), &CancellationFlag::new())
        .unwrap();

    let pairing = tracker.frames()[1].pairing().unwrap();
    for d in 1..=3 {
        assert_eq!(pairing.division.at(d), 1.0, "daughter {} not recorded", d);
    }
    assert_eq!(pairing.track_vector.get(1), Track::Dead);
    assert_conservation(&out[1]);

    let lineage = tracker.lineage();
    assert_eq!(lineage.divisions.len(), 1);
    assert_eq!(lineage.divisions[0].daughters, vec![2, 3, 4]);
}

/// Six frames of a flat 22x2 mother (circularity ~0.29), then two 10x2
/// halves with a two pixel gap.
fn elongated_split_sequence() -> Vec<FrameInput> {
    let mother = mask(W, H, &[(1, 1..23, 6..8)]);
    let halves = mask(W, H, &[(1, 1..11, 6..8), (2, 13..23, 6..8)]);
    let mut frames: Vec<FrameInput> = (0..6).map(|i| input(i, W, H, &mother)).collect();
    frames.push(input(6, W, H, &halves));
    frames
}

#[test]
fn test_integration_non_circular_mother_does_not_divide() {
    init_tracing();
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let out = tracker
        .run(elongated_split_sequence(), &CancellationFlag::new())
        .unwrap();

    let mother = tracker.frames()[5].object_by_global_label(1).unwrap();
    assert!(mother.circularity < 0.3);

    let pairing = tracker.frames()[6].pairing().unwrap();
    assert_eq!(pairing.division.nonzero_count(), 0);
    let track = pairing.track_vector.get(1);
    assert_ne!(track, Track::Dead);
    assert!(track.target().is_some());

    // one half continues the mother, the other is born
    let halves = &out[6];
    let globals: BTreeSet<u32> = halves.objects.iter().map(|o| o.global_label).collect();
    assert_eq!(globals, BTreeSet::from([1, 2]));
    assert_eq!(tracker.highest_global_label(), 2);
    assert_conservation(halves);
    assert_partial_injectivity(tracker.frames());

    let lineage = tracker.lineage();
    assert!(lineage.divisions.is_empty());
    assert_eq!(lineage.deaths[&1], 6);
    assert_eq!(lineage.births[&2], 6);
}

#[test]
fn test_integration_short_history_waives_circularity() {
    // the window reaches back before frame 0, so the flat mother may divide
    let config = TrackerConfig {
        frames_to_check_circularity: 6,
        ..TrackerConfig::default()
    };
    let mut tracker = FrameTracker::new(config).unwrap();
    tracker
        .run(elongated_split_sequence(), &CancellationFlag::new())
        .unwrap();

    let pairing = tracker.frames()[6].pairing().unwrap();
    assert_eq!(pairing.division.at(1), 1.0);
    assert_eq!(pairing.division.at(2), 1.0);
    assert_eq!(pairing.track_vector.get(1), Track::Dead);
    assert_eq!(tracker.highest_global_label(), 3);
}

// =============================================================================
// Test 3: Fusion
// =============================================================================

/// Two 10x10 cells side by side, then one cell covering both plus an extra
/// row below them.
fn fusion_sequence() -> Vec<FrameInput> {
    let parents = mask(W, H, &[(1, 2..12, 1..11), (2, 12..22, 1..11)]);
    let fused = mask(W, H, &[(1, 2..22, 1..12)]);
    vec![input(0, W, H, &parents), input(1, W, H, &fused)]
}

#[test]
fn test_integration_fusion_cut_along_parents() {
    init_tracing();
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let out = tracker.run(fusion_sequence(), &CancellationFlag::new()).unwrap();

    let cut = &out[1];
    assert_eq!(cut.objects.len(), 2);
    assert_eq!(cut.label_at(5, 5), 1);
    assert_eq!(cut.label_at(15, 5), 2);
    // the extra row has no direct parent and follows the nearest one
    assert_eq!(cut.label_at(11, 11), 1);
    assert_eq!(cut.label_at(12, 11), 2);
    assert_eq!(cut.objects[0].area, 110);
    assert_eq!(cut.objects[1].area, 110);
    assert_eq!(tracker.highest_global_label(), 2);

    assert_conservation(cut);
    assert_partial_injectivity(tracker.frames());
    assert!(tracker.lineage().fusions.is_empty());
}

#[test]
fn test_integration_enabled_fusion_births_new_cell() {
    let config = TrackerConfig {
        enable_fusion: true,
        ..TrackerConfig::default()
    };
    let mut tracker = FrameTracker::new(config).unwrap();
    let out = tracker.run(fusion_sequence(), &CancellationFlag::new()).unwrap();

    let fused = &out[1];
    assert_eq!(fused.objects.len(), 1);
    assert_eq!(fused.objects[0].global_label, 3);
    assert_eq!(fused.objects[0].area, 220);

    let lineage = tracker.lineage();
    assert_eq!(lineage.fusions.len(), 1);
    assert_eq!(lineage.fusions[0].fused, 3);
    assert_eq!(lineage.fusions[0].parents, vec![1, 2]);
    assert_eq!(lineage.deaths[&1], 0);
    assert_eq!(lineage.deaths[&2], 0);
}

#[test]
fn test_integration_small_fused_share_is_absorbed() {
    init_tracing();
    let config = TrackerConfig {
        min_object_area: 50,
        ..TrackerConfig::default()
    };
    let mut tracker = FrameTracker::new(config).unwrap();

    let parents = mask(W, H, &[(1, 2..12, 1..11), (2, 12..14, 5..7)]);
    let fused = mask(W, H, &[(1, 2..12, 1..11), (1, 12..14, 5..7)]);
    let frames = vec![input(0, W, H, &parents), input(1, W, H, &fused)];
    let out = tracker.run(frames, &CancellationFlag::new()).unwrap();

    let result = &out[1];
    assert_eq!(result.objects.len(), 1);
    assert_eq!(result.objects[0].global_label, 1);
    assert_eq!(result.objects[0].area, 104);
    for y in 5..7 {
        for x in 12..14 {
            assert_eq!(result.label_at(x, y), 1, "pixel ({}, {}) not absorbed", x, y);
        }
    }
    assert_conservation(result);

    let lineage = tracker.lineage();
    assert_eq!(lineage.deaths[&2], 0);
    assert_eq!(lineage.deaths[&1], 1);
}

// =============================================================================
// Test 4: Object Lifecycle
// =============================================================================

#[test]
fn test_integration_appearing_and_vanishing_objects() {
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let a = mask(W, H, &[(1, 1..4, 1..4)]);
    let b = mask(W, H, &[(1, 1..4, 1..4), (2, 18..22, 9..13)]);
    let c = mask(W, H, &[(1, 18..22, 9..13)]);
    let frames = vec![input(0, W, H, &a), input(1, W, H, &b), input(2, W, H, &c)];
    let out = tracker.run(frames, &CancellationFlag::new()).unwrap();

    assert_eq!(out[1].label_at(2, 2), 1);
    assert_eq!(out[1].label_at(19, 10), 2);
    assert_eq!(out[2].label_at(19, 10), 2);
    assert_eq!(out[2].objects.len(), 1);

    let lineage = tracker.lineage();
    assert_eq!(lineage.births[&2], 1);
    assert_eq!(lineage.deaths[&1], 1);
    assert_eq!(lineage.deaths[&2], 2);
    for frame in &out {
        assert_conservation(frame);
    }
}

#[test]
fn test_integration_released_frames_keep_objects() {
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let frames: Vec<FrameInput> = (0..3)
        .map(|i| input(i, W, H, &mask(W, H, &[(1, 2..6, 2..6)])))
        .collect();
    tracker.run(frames, &CancellationFlag::new()).unwrap();

    for frame in tracker.frames() {
        assert_eq!(frame.state(), FrameState::Released);
        assert!(frame.image().is_none());
        assert_eq!(frame.objects().len(), 1);
        assert_eq!(frame.objects()[0].global_label, 1);
    }
    let lineage = tracker.lineage();
    assert!(!lineage.border[&1]);
    assert!(lineage.confidence[&1] > 0.0 && lineage.confidence[&1] <= 1.0);
}

// =============================================================================
// Test 5: Cancellation and Errors
// =============================================================================

#[test]
fn test_integration_cancellation_is_frame_granular() {
    let mut tracker = FrameTracker::new(TrackerConfig::default()).unwrap();
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();

    let frames = (0..5).map(move |i| {
        if i == 2 {
            trigger.cancel();
        }
        input(i, W, H, &mask(W, H, &[(1, 2..6, 2..6)]))
    });
    let err = tracker.run(frames, &cancel).unwrap_err();

    assert!(matches!(err, Error::Cancelled { frame: 2 }));
    assert_eq!(tracker.frames().len(), 2);
    assert_eq!(tracker.frames()[1].state(), FrameState::Tracked);
    assert_eq!(tracker.highest_global_label(), 1);
}

#[test]
fn test_integration_invalid_config_never_starts() {
    let config = TrackerConfig {
        fusion_overlap_threshold: -0.1,
        ..TrackerConfig::default()
    };
    assert!(matches!(FrameTracker::new(config), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_integration_lifecycle_preconditions() {
    let mut frame = Frame::new(0, "empty");
    assert!(matches!(frame.process(), Err(Error::InvalidState { .. })));
    assert!(matches!(frame.bounding_boxes(), Err(Error::InvalidState { .. })));
    assert!(matches!(frame.mark_written(), Err(Error::InvalidState { .. })));

    let image = LabelImage::from_unpadded(2, 2, &[1, 0, 0, 1]).unwrap();
    frame.read(image).unwrap();
    frame.process().unwrap();
    assert!(matches!(frame.release(), Err(Error::InvalidState { .. })));
    assert!(matches!(
        frame.advance(FrameState::Read),
        Err(Error::InvalidTransition { .. })
    ));
}

#[test]
fn test_integration_mismatched_buffer_rejected() {
    let err = FrameInput::new(0, "bad", 3, 3, &[1, 2, 3]).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}
