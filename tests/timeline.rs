use supercut::{LayerId, SupercutError, Timeline, compute_segments};

#[test]
fn segments_are_contiguous_and_match_track_durations() {
    let cases: [(&[f64], f64); 4] = [
        (&[30.0, 45.0, 20.0], 5.0),
        (&[0.5], 0.0),
        (&[181.25, 3.0, 240.0, 12.5, 60.0], 12.0),
        (&[1.0; 12], 0.25),
    ];
    for (durations, offset) in cases {
        let segs = compute_segments(durations, offset).unwrap();
        assert_eq!(segs.len(), durations.len());
        assert_eq!(segs[0].start, offset);
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.duration, durations[i]);
            if i > 0 {
                assert_eq!(seg.start, segs[i - 1].end());
            }
        }
        let total: f64 = durations.iter().sum();
        let end = segs.last().unwrap().end();
        assert!((end - (offset + total)).abs() < 1e-9);
    }
}

#[test]
fn empty_input_yields_no_segments() {
    assert!(compute_segments(&[], 3.0).unwrap().is_empty());
    let t = Timeline::from_timings(LayerId::SongTitle, &[], &[]);
    assert_eq!(t.span(), None);
}

#[test]
fn invalid_inputs_are_rejected_before_any_segment() {
    for (durations, offset) in [
        (vec![10.0], -1.0),
        (vec![10.0, -2.0], 0.0),
        (vec![10.0, 0.0], 0.0),
        (vec![f64::NAN], 0.0),
        (vec![1.0], f64::INFINITY),
    ] {
        let err = compute_segments(&durations, offset).unwrap_err();
        assert!(matches!(err, SupercutError::Validation(_)), "{durations:?} @ {offset}");
    }
}
