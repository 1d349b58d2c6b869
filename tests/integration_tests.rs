//! Integration tests for trueno-graph-state
//!
//! Drives the full problem lifecycle (init, reset, kernel, extract, release)
//! on small graphs across one and several simulated accelerators.

use std::sync::Arc;
use trueno_graph_state::algorithms::sm::{self, Query};
use trueno_graph_state::{
    BlockPartitioner, CsrGraph, DisabledDyn, DuplicatePartitioner, Flags, Location, NodeId,
    Partition, Partitioner, Platform, PlatformConfig, Problem, SliceLifecycle, SmProblem, SmSlice,
    StateError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn platform(devices: usize) -> Arc<Platform> {
    Platform::new(&PlatformConfig::default().with_devices(devices).with_device_memory(1 << 20))
        .unwrap()
}

fn undirected(nodes: usize, edges: &[(u32, u32)]) -> CsrGraph {
    let edges: Vec<_> = edges
        .iter()
        .map(|&(s, d)| (NodeId(s), NodeId(d), 1.0))
        .collect();
    CsrGraph::from_edge_list_with_nodes(nodes, &edges, false).unwrap()
}

/// Triangle 0-1-2 with a pendant vertex 3 hanging off 2
fn triangle_with_tail() -> CsrGraph {
    undirected(4, &[(0, 1), (1, 2), (2, 0), (2, 3)])
}

fn sm_problem(platform: Arc<Platform>, gpus: Vec<usize>, flags: Flags) -> SmProblem {
    SmProblem::new(platform, gpus, flags).unwrap()
}

/// Reset, run `query` on every slice at the device, and extract from the device
fn run_on_device(problem: &mut SmProblem, query: Query) -> Vec<u64> {
    problem.reset(Location::ALL).unwrap();
    for gpu in 0..problem.num_gpus() {
        let slice = problem.data_slice_mut(gpu).unwrap();
        sm::run(slice, query, Location::DEVICE).unwrap();
    }
    problem.platform().synchronize_all().unwrap();

    let mut out = vec![u64::MAX; problem.num_nodes()];
    problem.extract(&mut out, Location::DEVICE).unwrap();
    out
}

#[test]
fn test_init_reset_yields_zeroed_result() {
    init_tracing();
    // 3 nodes, 2 edges
    let graph = CsrGraph::from_edge_list(&[(NodeId(0), NodeId(1), 1.0), (NodeId(1), NodeId(2), 1.0)])
        .unwrap();
    let mut problem = sm_problem(platform(1), vec![0], Flags::NONE);

    problem.init(&graph, Location::ALL).unwrap();
    problem.reset(Location::ALL).unwrap();

    let slice = problem.data_slice(0).unwrap();
    assert_eq!(slice.lifecycle(), SliceLifecycle::Initialized);
    assert_eq!(slice.state().counts.len(), 3);

    let mut out = vec![7_u64; 3];
    problem.extract(&mut out, Location::DEVICE).unwrap();
    assert_eq!(out, vec![0, 0, 0]);
}

#[test]
fn test_reset_is_idempotent() {
    let platform = platform(1);
    let mut problem = sm_problem(Arc::clone(&platform), vec![0], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();

    let first = run_on_device(&mut problem, Query::Triangle);
    assert_eq!(first, vec![1, 1, 1, 0]);

    problem.reset(Location::ALL).unwrap();
    let allocated = platform.device(0).unwrap().allocated();
    problem.reset(Location::ALL).unwrap();
    assert_eq!(platform.device(0).unwrap().allocated(), allocated);

    let mut out = vec![9_u64; 4];
    problem.extract(&mut out, Location::HOST).unwrap();
    assert_eq!(out, vec![0; 4]);
}

#[test]
fn test_reset_before_init_fails() {
    let mut problem = sm_problem(platform(1), vec![0], Flags::NONE);
    assert!(matches!(
        problem.reset(Location::ALL),
        Err(StateError::InvalidState(_))
    ));
}

#[test]
fn test_release_twice_is_noop_and_frees_device() {
    let platform = platform(1);
    let mut problem = sm_problem(Arc::clone(&platform), vec![0], Flags::BUILD_DYNAMIC);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();
    assert!(platform.device(0).unwrap().allocated() > 0);

    problem.release(Location::ALL).unwrap();
    assert!(!problem.is_initialized());
    assert_eq!(platform.device(0).unwrap().allocated(), 0);

    problem.release(Location::ALL).unwrap();
    assert!(!problem.is_initialized());
}

#[test]
fn test_release_device_then_host() {
    let platform = platform(1);
    let mut problem = sm_problem(Arc::clone(&platform), vec![0], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();

    problem.release(Location::DEVICE).unwrap();
    assert_eq!(platform.device(0).unwrap().allocated(), 0);
    assert!(problem.is_initialized());
    assert_eq!(problem.data_slice(0).unwrap().held(), Location::HOST);

    problem.release(Location::HOST).unwrap();
    assert!(!problem.is_initialized());
}

#[test]
fn test_extract_device_and_host_agree() {
    let mut problem = sm_problem(platform(1), vec![0], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();

    let from_device = run_on_device(&mut problem, Query::Triangle);

    let slice = problem.data_slice_mut(0).unwrap();
    slice
        .state_mut()
        .counts
        .move_to(Location::DEVICE, Location::HOST)
        .unwrap();

    let mut from_host = vec![0_u64; 4];
    problem.extract(&mut from_host, Location::HOST).unwrap();
    assert_eq!(from_device, from_host);
}

#[test]
fn test_extract_rejects_short_output() {
    let mut problem = sm_problem(platform(1), vec![0], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();
    problem.reset(Location::ALL).unwrap();

    let mut out = vec![0_u64; 2];
    assert!(matches!(
        problem.extract(&mut out, Location::DEVICE),
        Err(StateError::InvalidArgument(_))
    ));
}

#[test]
fn test_device_only_target_drops_host_graph() {
    let mut problem = sm_problem(platform(1), vec![0], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::DEVICE).unwrap();

    let slice = problem.data_slice(0).unwrap();
    let csr = &slice.sub_graph().unwrap().csr;
    assert_eq!(csr.held(), Location::DEVICE);
    csr.validate(Location::DEVICE).unwrap();

    let counts = run_on_device(&mut problem, Query::Wedge);
    // Degrees 2,2,3,1
    assert_eq!(counts, vec![1, 1, 3, 0]);
}

#[test]
fn test_slices_charge_their_own_device() {
    let platform = platform(3);
    let graph = triangle_with_tail();
    let mut problem = sm_problem(Arc::clone(&platform), vec![2, 0], Flags::NONE);
    problem.init(&graph, Location::ALL).unwrap();

    assert!(platform.device(0).unwrap().allocated() > 0);
    assert_eq!(platform.device(1).unwrap().allocated(), 0);
    assert!(platform.device(2).unwrap().allocated() > 0);

    for (gpu, ordinal) in [(0, 2), (1, 0)] {
        let slice = problem.data_slice(gpu).unwrap();
        assert_eq!(slice.gpu_idx(), ordinal);
        assert_eq!(slice.num_gpus(), 2);
        assert_eq!(slice.sub_graph().unwrap().csr.device_ordinal(), Some(ordinal));
    }
}

#[test]
fn test_block_partitioned_extract_matches_single_device() {
    init_tracing();
    let graph = undirected(
        10,
        &[
            (0, 1), (1, 2), (2, 3), (3, 4), (4, 5),
            (5, 6), (6, 7), (7, 8), (8, 9), (9, 0),
            (0, 5), (2, 7), (3, 8), (1, 6),
        ],
    );
    let platform = platform(3);

    let mut single = sm_problem(Arc::clone(&platform), vec![0], Flags::NONE);
    single.init(&graph, Location::ALL).unwrap();
    let expected = run_on_device(&mut single, Query::Wedge);

    let mut multi = sm_problem(Arc::clone(&platform), vec![1, 2], Flags::NONE);
    multi.init(&graph, Location::ALL).unwrap();
    assert!(multi.conversion_table().is_some());
    let actual = run_on_device(&mut multi, Query::Wedge);

    assert_eq!(actual, expected);
    assert_eq!(expected[0], 3);
}

#[test]
fn test_duplicate_partitioned_triangles_match_single_device() {
    let graph = triangle_with_tail();
    let platform = platform(2);

    let mut multi: SmProblem = Problem::new(Arc::clone(&platform), vec![0, 1], Flags::NONE)
        .unwrap()
        .with_partitioner(DuplicatePartitioner);
    multi.init(&graph, Location::ALL).unwrap();
    assert!(multi.conversion_table().is_none());
    assert_eq!(multi.partition_table(), &[0, 1, 0, 1]);

    assert_eq!(run_on_device(&mut multi, Query::Triangle), vec![1, 1, 1, 0]);
}

#[test]
fn test_kernel_failure_surfaces_at_reset_barrier() {
    let mut problem = sm_problem(platform(2), vec![0, 1], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();

    let stream = problem.data_slice(1).unwrap().stream().unwrap().clone();
    stream.record(StateError::Synchronization {
        ordinal: 1,
        message: "illegal address".to_string(),
    });

    let err = problem.reset(Location::ALL).unwrap_err();
    assert!(matches!(err, StateError::Synchronization { ordinal: 1, .. }));

    // The pending error is consumed by the barrier
    problem.reset(Location::ALL).unwrap();
}

#[test]
fn test_faulted_device_fails_init() {
    let platform = platform(2);
    platform.device(1).unwrap().set_faulted(true);
    let mut problem = sm_problem(Arc::clone(&platform), vec![0, 1], Flags::NONE);

    let err = problem.init(&triangle_with_tail(), Location::ALL).unwrap_err();
    assert!(matches!(err, StateError::DeviceContext { ordinal: 1, .. }));
    assert!(!problem.is_initialized());
    // Slice 0 was dropped with the failed init
    assert_eq!(platform.device(0).unwrap().allocated(), 0);
}

#[test]
fn test_init_out_of_memory() {
    let platform =
        Platform::new(&PlatformConfig::default().with_device_memory(16)).unwrap();
    let mut problem = sm_problem(Arc::clone(&platform), vec![0], Flags::NONE);

    let err = problem.init(&triangle_with_tail(), Location::ALL).unwrap_err();
    assert!(matches!(err, StateError::OutOfMemory { ordinal: 0, .. }));
    assert_eq!(platform.device(0).unwrap().allocated(), 0);
}

#[test]
fn test_disabled_dynamic_ignores_build_flag() {
    let graph = CsrGraph::from_edge_list(&[
        (NodeId(0), NodeId(1), 1.0),
        (NodeId(0), NodeId(1), 2.0),
        (NodeId(1), NodeId(2), 1.0),
    ])
    .unwrap();
    let mut problem: Problem<SmSlice, DisabledDyn> =
        Problem::new(platform(1), vec![0], Flags::BUILD_DYNAMIC).unwrap();
    problem.init(&graph, Location::ALL).unwrap();

    let sub_graph = problem.data_slice(0).unwrap().sub_graph().unwrap();
    assert_eq!(sub_graph.num_edges(), 3);
    assert_eq!(sub_graph.dynamic, DisabledDyn);
    sub_graph.csr.validate(Location::HOST).unwrap();
}

#[cfg(feature = "dynamic")]
#[test]
fn test_build_dynamic_round_trip_merges_duplicates() {
    use trueno_graph_state::DynamicGraph;

    let graph = CsrGraph::from_edge_list(&[
        (NodeId(0), NodeId(1), 1.0),
        (NodeId(0), NodeId(1), 2.0),
        (NodeId(1), NodeId(2), 3.0),
    ])
    .unwrap();
    let mut problem = sm_problem(platform(1), vec![0], Flags::BUILD_DYNAMIC);
    problem.init(&graph, Location::ALL).unwrap();

    let sub_graph = problem.data_slice(0).unwrap().sub_graph().unwrap();
    assert_eq!(sub_graph.dynamic.num_edges(), 2);
    assert_eq!(sub_graph.num_edges(), 2);

    let triples = sub_graph.csr.edge_triples(Location::DEVICE).unwrap();
    assert_eq!(triples.len(), 2);
    assert_eq!((triples[0].0, triples[0].1), (0, 1));
    assert_eq!(triples[1], (1, 2, 3.0));
}

#[test]
fn test_triangles_rejected_on_renumbered_partition() {
    let mut problem = sm_problem(platform(2), vec![0, 1], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();
    problem.reset(Location::ALL).unwrap();
    assert!(problem.data_slice(0).unwrap().is_renumbered());

    let slice = problem.data_slice_mut(0).unwrap();
    assert!(matches!(
        sm::run(slice, Query::Triangle, Location::DEVICE),
        Err(StateError::InvalidArgument(_))
    ));
    // Wedges only need the root's own edges
    assert_eq!(run_on_device(&mut problem, Query::Wedge), vec![1, 1, 3, 0]);
}

/// Block partitioning with one owner entry missing
#[derive(Debug)]
struct TruncatedPartitioner;

impl Partitioner for TruncatedPartitioner {
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> trueno_graph_state::Result<Partition> {
        let mut partition = BlockPartitioner.partition(graph, num_parts)?;
        partition.partition_table.pop();
        Ok(partition)
    }
}

#[test]
fn test_inconsistent_partition_rejected_at_init() {
    let platform = platform(2);
    let mut problem: SmProblem = Problem::new(Arc::clone(&platform), vec![0, 1], Flags::NONE)
        .unwrap()
        .with_partitioner(TruncatedPartitioner);

    let err = problem.init(&triangle_with_tail(), Location::ALL).unwrap_err();
    assert!(matches!(err, StateError::Partition(_)));
    assert!(!problem.is_initialized());
    assert_eq!(platform.device(0).unwrap().allocated(), 0);

    let mut out = vec![0_u64; 4];
    assert!(problem.extract(&mut out, Location::DEVICE).is_err());
}

#[test]
fn test_release_default_drops_everything() {
    let platform = platform(2);
    let mut problem = sm_problem(Arc::clone(&platform), vec![0, 1], Flags::NONE);
    problem.init(&triangle_with_tail(), Location::ALL).unwrap();

    problem.release(Location::DEFAULT).unwrap();
    assert!(!problem.is_initialized());
    assert_eq!(platform.device(0).unwrap().allocated(), 0);
    assert_eq!(platform.device(1).unwrap().allocated(), 0);
}
