//! Property-based tests for the voice graph.
//!
//! Random sequences of routing operations must never break the structural
//! invariants: edges always lead to a higher stage, adjacency stays symmetric,
//! every non-root node keeps at least one output, and the simulated backend's
//! send lists mirror the graph.

use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use voicegraph_core::{
    DecodedSample, EffectKind, GraphConfig, Handle, Result, SampleDecoder, SampleEncoding,
    SimulatedBackend, VoiceGraph, WaveFormat,
};

struct ToneDecoder;

impl SampleDecoder for ToneDecoder {
    fn load(&mut self, _path: &Path) -> Result<DecodedSample> {
        Ok(DecodedSample {
            format: WaveFormat::packed(SampleEncoding::Pcm, 2, 8_000, 16),
            data: Arc::from(vec![0_u8; 3_200]),
        })
    }
}

type Graph = VoiceGraph<SimulatedBackend, ToneDecoder>;

fn new_graph(config: GraphConfig) -> Graph {
    let mut graph = VoiceGraph::new(SimulatedBackend::new(), ToneDecoder, config).unwrap();
    graph.load_sound("tone.wav", "tone").unwrap();
    graph
}

#[derive(Debug, Clone)]
enum Op {
    CreateSubmix(Vec<usize>),
    Play,
    ConnectSource(usize, usize),
    ConnectSubmix(usize, usize),
    DisconnectSource(usize, usize),
    DisconnectSubmix(usize, usize),
    DeleteSource(usize),
    DeleteSubmix(usize),
    AddEffect(usize),
    Advance(u16),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let index = 0usize..32;
    prop_oneof![
        3 => prop::collection::vec(index.clone(), 0..3).prop_map(Op::CreateSubmix),
        2 => Just(Op::Play),
        2 => (index.clone(), index.clone()).prop_map(|(a, b)| Op::ConnectSource(a, b)),
        3 => (index.clone(), index.clone()).prop_map(|(a, b)| Op::ConnectSubmix(a, b)),
        1 => (index.clone(), index.clone()).prop_map(|(a, b)| Op::DisconnectSource(a, b)),
        2 => (index.clone(), index.clone()).prop_map(|(a, b)| Op::DisconnectSubmix(a, b)),
        1 => index.clone().prop_map(Op::DeleteSource),
        2 => index.clone().prop_map(Op::DeleteSubmix),
        1 => index.clone().prop_map(Op::AddEffect),
        1 => (0u16..500).prop_map(Op::Advance),
    ]
}

fn pick(handles: &[Handle], index: usize) -> Option<Handle> {
    (!handles.is_empty()).then(|| handles[index % handles.len()])
}

/// Applies one operation. Failures are expected for many random inputs; the
/// properties only care that the graph stays well formed.
fn apply(graph: &mut Graph, op: &Op, deleted: &mut Vec<Handle>) {
    let sources = graph.source_handles();
    let submixes = graph.submix_handles();
    match op {
        Op::CreateSubmix(targets) => {
            let targets: Vec<Handle> = targets.iter().filter_map(|&i| pick(&submixes, i)).collect();
            let _ = graph.create_submix(&targets);
        }
        Op::Play => {
            let _ = graph.play("tone", 1.0);
        }
        Op::ConnectSource(a, b) => {
            if let (Some(src), Some(dst)) = (pick(&sources, *a), pick(&submixes, *b)) {
                let _ = graph.connect_source(src, dst);
            }
        }
        Op::ConnectSubmix(a, b) => {
            if let (Some(src), Some(dst)) = (pick(&submixes, *a), pick(&submixes, *b)) {
                let _ = graph.connect_submix(src, dst);
            }
        }
        Op::DisconnectSource(a, b) => {
            if let (Some(src), Some(dst)) = (pick(&sources, *a), pick(&submixes, *b)) {
                let _ = graph.disconnect_source(src, dst);
            }
        }
        Op::DisconnectSubmix(a, b) => {
            if let (Some(src), Some(dst)) = (pick(&submixes, *a), pick(&submixes, *b)) {
                let _ = graph.disconnect_submix(src, dst);
            }
        }
        Op::DeleteSource(a) => {
            if let Some(handle) = pick(&sources, *a) {
                if graph.delete_node(handle) {
                    deleted.push(handle);
                }
            }
        }
        Op::DeleteSubmix(a) => {
            if let Some(handle) = pick(&submixes, *a) {
                if graph.delete_node(handle) {
                    deleted.push(handle);
                }
            }
        }
        Op::AddEffect(a) => {
            if let Some(handle) = pick(&submixes, *a) {
                let _ = graph.add_effect(handle, EffectKind::Echo, true, None);
            }
        }
        Op::Advance(frames) => {
            graph.backend_mut().advance(u64::from(*frames));
            graph.update();
        }
    }
}

/// Every voice's native send list must equal its output list.
fn sends_match_outputs(graph: &Graph) -> std::result::Result<(), TestCaseError> {
    for handle in graph.source_handles().into_iter().chain(graph.submix_handles()) {
        let voice = graph.voice_id(handle).unwrap();
        let expected: Vec<_> = graph
            .outputs(handle)
            .into_iter()
            .map(|target| graph.voice_id(target).unwrap())
            .collect();
        let sends = &graph.backend().voice(voice).unwrap().sends;
        prop_assert_eq!(sends, &expected, "send list of {} is out of sync", handle);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Any sequence of routing operations keeps the graph well formed.
    #[test]
    fn invariants_hold_after_every_operation(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut graph = new_graph(GraphConfig::default());
        let mut deleted = Vec::new();

        for op in &ops {
            apply(&mut graph, op, &mut deleted);
            if let Err(err) = graph.check_invariants() {
                prop_assert!(false, "after {:?}: {}", op, err);
            }
            sends_match_outputs(&graph)?;
        }

        prop_assert!(graph.contains(Handle::ROOT));
        prop_assert!(graph.outputs(Handle::ROOT).is_empty());
        // One native voice per live node, nothing leaked.
        prop_assert_eq!(
            graph.backend().voice_count(),
            graph.source_count() + graph.submix_count()
        );
    }

    /// Handles of deleted nodes stay dead even after their slots are reused.
    #[test]
    fn deleted_handles_stay_invalid(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut graph = new_graph(GraphConfig::default());
        let mut deleted = Vec::new();
        for op in &ops {
            apply(&mut graph, op, &mut deleted);
        }

        let before = graph.snapshot();
        for &handle in &deleted {
            prop_assert!(!graph.contains(handle));
            prop_assert!(!graph.delete_node(handle));
            prop_assert!(graph.set_volume(handle, 0.5).is_err());
            prop_assert!(graph.connect_submix(handle, Handle::ROOT).is_err());
            prop_assert_eq!(graph.progress(handle), 0.0);
        }
        prop_assert_eq!(graph.snapshot(), before);
    }

    /// Every submix sits strictly below each submix it feeds.
    #[test]
    fn stages_increase_along_edges(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut graph = new_graph(GraphConfig { root_stage: 6, ..GraphConfig::default() });
        let mut deleted = Vec::new();
        for op in &ops {
            apply(&mut graph, op, &mut deleted);
        }

        for handle in graph.submix_handles() {
            let stage = graph.stage(handle).unwrap();
            for target in graph.outputs(handle) {
                prop_assert!(stage < graph.stage(target).unwrap());
            }
        }
    }
}

#[test]
fn exhausting_submix_capacity_keeps_existing_nodes() {
    let mut graph = new_graph(GraphConfig::default());
    let mut parent = Handle::ROOT;
    let mut created = Vec::new();
    for i in 1..256 {
        // Alternate between a flat fan-in and a short chain.
        let targets = if i % 2 == 0 { vec![parent] } else { Vec::new() };
        let handle = graph.create_submix(&targets).unwrap();
        if i % 8 == 0 {
            parent = handle;
        }
        created.push(handle);
    }
    let before = graph.snapshot();

    assert!(graph.create_submix(&[]).is_err());
    assert!(graph.create_submix(&[parent]).is_err());

    assert_eq!(graph.snapshot(), before);
    assert!(created.iter().all(|&handle| graph.contains(handle)));
    graph.check_invariants().unwrap();

    // Freeing one slot makes room again.
    assert!(graph.delete_node(created[0]));
    graph.create_submix(&[]).unwrap();
    graph.check_invariants().unwrap();
}

#[test]
fn deleting_a_hub_submix_leaves_no_dangling_edges() {
    let mut graph = new_graph(GraphConfig::default());
    let hub = graph.create_submix(&[]).unwrap();
    let side = graph.create_submix(&[]).unwrap();
    let feeders: Vec<Handle> = (0..4)
        .map(|i| {
            let targets = if i % 2 == 0 { vec![hub] } else { vec![hub, side] };
            graph.create_submix(&targets).unwrap()
        })
        .collect();
    let source = graph.play("tone", 1.0).unwrap();
    graph.connect_source(source, hub).unwrap();

    assert!(graph.delete_node(hub));
    graph.check_invariants().unwrap();

    let snapshot = graph.snapshot();
    for submix in &snapshot.submixes {
        assert!(!submix.outputs.contains(&hub));
        assert!(!submix.inputs.contains(&hub));
    }
    assert_eq!(graph.outputs(feeders[0]), vec![Handle::ROOT]);
    assert_eq!(graph.outputs(feeders[1]), vec![side]);
    assert_eq!(graph.outputs(source), vec![Handle::ROOT]);
}
