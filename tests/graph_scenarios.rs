use std::collections::BTreeMap;
use std::path::PathBuf;

use supercut::{
    GraphContext, LayerId, LayerOverride, MediaKind, Op, ResolvedAssets, Template,
    Timeline, VisualAsset, build, compute_segments, resolve,
};

const TRACKS: [f64; 3] = [30.0, 45.0, 20.0];
const OFFSET: f64 = 5.0;

fn template(overlay_enabled: bool) -> Template {
    let mut t = Template {
        start_offset: OFFSET,
        ..Template::default()
    };
    let overlay = t
        .layers
        .iter_mut()
        .find(|l| l.id == LayerId::Overlay(1))
        .unwrap();
    overlay.enabled = overlay_enabled;
    overlay.source = Some("logo.png".into());
    overlay.size_percent = 50.0;
    overlay.x_percent = 100.0;
    overlay.y_percent = 100.0;
    t
}

fn assets() -> ResolvedAssets {
    let mut layers = BTreeMap::new();
    layers.insert(
        LayerId::Overlay(1),
        VisualAsset {
            path: "logo.png".into(),
            kind: MediaKind::Still,
            width: 400,
            height: 200,
        },
    );
    ResolvedAssets {
        background: Some(VisualAsset {
            path: "bg.jpg".into(),
            kind: MediaKind::Still,
            width: 3840,
            height: 2160,
        }),
        layers,
        audio: vec!["a.mp3".into(), "b.mp3".into(), "c.mp3".into()],
    }
}

fn title_timeline() -> Timeline {
    let timings = compute_segments(&TRACKS, OFFSET).unwrap();
    let images: Vec<Option<PathBuf>> = (0..TRACKS.len())
        .map(|i| Some(PathBuf::from(format!("title_{i}.png"))))
        .collect();
    Timeline::from_timings(LayerId::SongTitle, &timings, &images)
}

fn graph_for(t: &Template) -> supercut::FilterGraph {
    let active = resolve(&t.layers, t.layer_order.as_deref()).unwrap();
    let ctx = GraphContext::from_template(t, OFFSET + TRACKS.iter().sum::<f64>());
    build(&ctx, &active, &[title_timeline()], &assets()).unwrap()
}

#[test]
fn three_tracks_with_offset_gate_one_title_per_segment() {
    let t = template(false);
    let g = graph_for(&t);

    let timeline = title_timeline();
    let spans: Vec<(f64, f64)> = timeline
        .segments
        .iter()
        .map(|s| (s.start, s.duration))
        .collect();
    assert_eq!(spans, vec![(5.0, 30.0), (35.0, 45.0), (80.0, 20.0)]);
    assert_eq!(timeline.span(), Some((5.0, 100.0)));

    let windows: Vec<(i64, i64, f64, Option<f64>)> = g
        .nodes_for(LayerId::SongTitle)
        .filter_map(|n| match &n.op {
            Op::Position {
                x,
                y,
                window: Some(w),
            } => Some((*x, *y, w.start, w.end)),
            _ => None,
        })
        .collect();
    assert_eq!(
        windows,
        vec![
            (0, 210, 5.0, Some(35.0)),
            (0, 210, 35.0, Some(80.0)),
            (0, 210, 80.0, Some(100.0)),
        ]
    );

    let fc = g.to_filter_complex();
    assert!(fc.contains("enable='gte(t,5)*lt(t,35)'"));
    assert!(fc.contains("enable='gte(t,80)*lt(t,100)'"));
    assert!(fc.contains("adelay=delays=5000:all=1"));
    assert!(fc.ends_with("[vout]"));
}

#[test]
fn disabling_a_layer_removes_exactly_its_chain() {
    let with = graph_for(&template(true));
    let without = graph_for(&template(false));

    let overlay_nodes = with.nodes_for(LayerId::Overlay(1)).count();
    assert!(overlay_nodes >= 2);
    assert_eq!(with.nodes.len(), without.nodes.len() + overlay_nodes);
    assert_eq!(without.nodes_for(LayerId::Overlay(1)).count(), 0);

    let rest: Vec<&Op> = with
        .nodes
        .iter()
        .filter(|n| n.layer != Some(LayerId::Overlay(1)))
        .map(|n| &n.op)
        .collect();
    let baseline: Vec<&Op> = without.nodes.iter().map(|n| &n.op).collect();
    assert_eq!(rest, baseline);

    // Bottom-right corner at half size.
    let placed = with
        .nodes_for(LayerId::Overlay(1))
        .find_map(|n| match n.op {
            Op::Position { x, y, .. } => Some((x, y)),
            _ => None,
        })
        .unwrap();
    assert_eq!(placed, (1920 - 200, 0));
}

#[test]
fn chains_follow_ascending_order_index() {
    let g = graph_for(&template(true));
    assert_eq!(
        g.layer_order(),
        vec![LayerId::Background, LayerId::Overlay(1), LayerId::SongTitle]
    );

    let mut t = template(true);
    t.layer_order = Some(vec![
        LayerOverride::new("background", true),
        LayerOverride::new("song-title", true),
        LayerOverride::new("overlay_1", true),
    ]);
    let g = graph_for(&t);
    assert_eq!(
        g.layer_order(),
        vec![LayerId::Background, LayerId::SongTitle, LayerId::Overlay(1)]
    );
}

#[test]
fn override_without_a_layer_leaves_it_out() {
    let mut t = template(true);
    t.layer_order = Some(vec![LayerOverride::new("song-title", true)]);
    let g = graph_for(&t);
    assert_eq!(g.layer_order(), vec![LayerId::Background, LayerId::SongTitle]);
}

#[test]
fn unknown_effect_becomes_an_identity_node() {
    let json = r#"{
        "start_offset": 5,
        "layers": [
            {"id": "background", "order_index": 0},
            {"id": "overlay-1", "order_index": 1, "source": "logo.png", "effect": "sparkle"},
            {"id": "song-title", "order_index": 2, "enabled": false}
        ]
    }"#;
    let t: Template = serde_json::from_str(json).unwrap();
    t.validate().unwrap();
    let active = resolve(&t.layers, None).unwrap();
    let ctx = GraphContext::from_template(&t, 100.0);
    let g = build(&ctx, &active, &[], &assets()).unwrap();

    let ops: Vec<&Op> = g.nodes_for(LayerId::Overlay(1)).map(|n| &n.op).collect();
    assert!(ops.contains(&&Op::Identity));
    assert!(g.to_filter_complex().contains("null[ov1_fx0]"));
}

#[test]
fn active_layer_without_asset_is_missing_asset() {
    let t = template(true);
    let active = resolve(&t.layers, None).unwrap();
    let ctx = GraphContext::from_template(&t, 100.0);
    let mut a = assets();
    a.layers.clear();
    let err = build(&ctx, &active, &[title_timeline()], &a).unwrap_err();
    assert!(matches!(err, supercut::SupercutError::MissingAsset(_)));

    let mut timeline = title_timeline();
    timeline.segments[1].image = None;
    let err = build(&ctx, &active, &[timeline], &assets()).unwrap_err();
    assert!(err.to_string().contains("track 1"));
}
