//! End-to-end scenarios for the pose-graph back-end.
//!
//! Drives the real ingestion, deferred-work, and optimization plumbing with
//! fake collaborators: the constraint builder double services its callbacks
//! from a worker thread like a real matcher pipeline, and the recording
//! optimization problem keeps poses fixed while logging how it was driven.

use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use nalgebra::{Matrix6, Vector3};

use dhruva_graph::engine::matching::test_utils::{
    submap_handle, test_trajectory, FakeConstraintBuilder, FakeSubmap,
};
use dhruva_graph::engine::optimization::test_utils::RecordingOptimizationProblem;
use dhruva_graph::{
    ConstraintKind, GraphOptimizer, ImuReading, PoseGraphOptions, RangeData, Rigid3,
    SparsePoseGraph, SubmapId,
};

type TestGraph = SparsePoseGraph<FakeConstraintBuilder, RecordingOptimizationProblem>;

fn options(optimize_every_n_scans: u32) -> PoseGraphOptions {
    PoseGraphOptions {
        optimize_every_n_scans,
        ..Default::default()
    }
}

fn new_graph(
    options: PoseGraphOptions,
) -> (TestGraph, FakeConstraintBuilder, RecordingOptimizationProblem) {
    let builder = FakeConstraintBuilder::new();
    let problem = RecordingOptimizationProblem::new();
    let graph = SparsePoseGraph::new(options, builder.clone(), problem.clone());
    (graph, builder, problem)
}

fn add_scan(graph: &TestGraph, timestamp_us: u64, pose: Rigid3, scenario: &Scenario) {
    graph.add_scan(
        timestamp_us,
        RangeData::empty(),
        pose,
        Matrix6::identity(),
        &scenario.trajectory,
        &scenario.matching,
        &scenario.insertion,
    );
}

/// One ingestion configuration: which trajectory, matched and inserted where.
struct Scenario {
    trajectory: dhruva_graph::TrajectoryHandle,
    matching: dhruva_graph::SubmapHandle,
    insertion: Vec<dhruva_graph::SubmapHandle>,
}

#[test]
fn test_single_trajectory_one_submap_two_scans() {
    let (graph, builder, _problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };

    add_scan(&graph, 0, Rigid3::identity(), &scenario);
    add_scan(&graph, 1000, Rigid3::from_translation(1.0, 0.0, 0.0), &scenario);

    let nodes = graph.trajectory_nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].len(), 2);

    let constraints = graph.constraints();
    assert_eq!(constraints.len(), 2);
    assert!(constraints
        .iter()
        .all(|c| c.kind == ConstraintKind::IntraSubmap));

    let stats = graph.status();
    assert_eq!(stats.num_submaps, 1);
    assert_eq!(stats.num_finished_scans, 2);

    // No finished submaps anywhere: the matcher never got a proposal.
    assert!(builder.proposals().is_empty());

    graph.run_final_optimization();
    assert_eq!(graph.connected_trajectories(), vec![vec![0]]);
}

#[test]
fn test_second_submap_is_seeded_from_local_offset() {
    let (graph, _builder, problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap0 = FakeSubmap::new(Rigid3::from_translation(0.5, 0.0, 0.0));
    let submap1 = FakeSubmap::new(Rigid3::from_translation(1.5, 0.0, 0.0));
    let s0 = submap_handle(&submap0);
    let s1 = submap_handle(&submap1);

    let one_submap = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };
    add_scan(&graph, 0, Rigid3::identity(), &one_submap);
    add_scan(&graph, 1000, Rigid3::from_translation(0.5, 0.0, 0.0), &one_submap);

    let two_submaps = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone(), s1.clone()],
    };
    add_scan(&graph, 2000, Rigid3::from_translation(1.0, 0.0, 0.0), &two_submaps);

    // New submap id (0, 1), seeded at pose_submap0 * local0^-1 * local1.
    let added = problem.added_submaps();
    assert_eq!(added.len(), 2);
    assert_relative_eq!(added[0].1.translation(), Vector3::zeros());
    assert_relative_eq!(
        added[1].1.translation(),
        Vector3::new(1.0, 0.0, 0.0),
        epsilon = 1e-12
    );

    // The third scan contributed one intra constraint per insertion submap.
    let constraints = graph.constraints();
    assert_eq!(constraints.len(), 4);
    let last_two: Vec<SubmapId> = constraints[2..].iter().map(|c| c.submap_id).collect();
    assert!(last_two.contains(&SubmapId {
        trajectory_id: 0,
        submap_index: 0
    }));
    assert!(last_two.contains(&SubmapId {
        trajectory_id: 0,
        submap_index: 1
    }));
}

#[test]
fn test_finished_submap_triggers_old_scan_proposals() {
    let (graph, builder, _problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap0 = FakeSubmap::new(Rigid3::identity());
    let submap1 = FakeSubmap::new(Rigid3::from_translation(1.0, 0.0, 0.0));
    let submap2 = FakeSubmap::new(Rigid3::from_translation(2.0, 0.0, 0.0));
    let s0 = submap_handle(&submap0);
    let s1 = submap_handle(&submap1);
    let s2 = submap_handle(&submap2);

    let only_s0 = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };
    add_scan(&graph, 0, Rigid3::identity(), &only_s0);
    add_scan(&graph, 1000, Rigid3::from_translation(0.5, 0.0, 0.0), &only_s0);

    let s0_and_s1 = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone(), s1.clone()],
    };
    add_scan(&graph, 2000, Rigid3::from_translation(1.0, 0.0, 0.0), &s0_and_s1);

    // Submap 1 completes before the fourth scan arrives.
    submap1.finish();
    let s1_and_s2 = Scenario {
        trajectory: trajectory.clone(),
        matching: s1.clone(),
        insertion: vec![s1.clone(), s2.clone()],
    };
    add_scan(&graph, 3000, Rigid3::from_translation(1.5, 0.0, 0.0), &s1_and_s2);

    // Scans 0 and 1 were never inserted into submap 1: both get a local
    // proposal against it. Scans 2 and 3 are in its node set and are skipped.
    let proposals = builder.proposals();
    assert_eq!(proposals.len(), 2);
    let mut scan_indices: Vec<usize> = proposals.iter().map(|p| p.scan_index).collect();
    scan_indices.sort_unstable();
    assert_eq!(scan_indices, vec![0, 1]);
    assert!(proposals.iter().all(|p| {
        p.submap_id
            == SubmapId {
                trajectory_id: 0,
                submap_index: 1,
            }
            && p.relative_pose.is_some()
    }));
}

#[test]
fn test_cross_trajectory_global_match_connects_components() {
    let (graph, builder, _problem) = new_graph(PoseGraphOptions {
        optimize_every_n_scans: 0,
        global_sampling_ratio: 1.0,
        ..Default::default()
    });
    builder.accept_global_matches(true);

    // Trajectory A builds and finishes a submap.
    let trajectory_a = test_trajectory();
    let a0 = FakeSubmap::new(Rigid3::identity());
    let a1 = FakeSubmap::new(Rigid3::from_translation(1.0, 0.0, 0.0));
    let ha0 = submap_handle(&a0);
    let ha1 = submap_handle(&a1);
    let a_first = Scenario {
        trajectory: trajectory_a.clone(),
        matching: ha0.clone(),
        insertion: vec![ha0.clone()],
    };
    add_scan(&graph, 0, Rigid3::identity(), &a_first);
    let a_both = Scenario {
        trajectory: trajectory_a.clone(),
        matching: ha0.clone(),
        insertion: vec![ha0.clone(), ha1.clone()],
    };
    add_scan(&graph, 1000, Rigid3::from_translation(0.5, 0.0, 0.0), &a_both);

    a0.finish();
    add_scan(&graph, 2000, Rigid3::from_translation(1.0, 0.0, 0.0), &a_both);

    // An independent trajectory B ingests one scan; with sampling ratio 1 a
    // global match against A's finished submap is proposed and accepted.
    let trajectory_b = test_trajectory();
    let b0 = FakeSubmap::new(Rigid3::identity());
    let hb0 = submap_handle(&b0);
    let b_first = Scenario {
        trajectory: trajectory_b.clone(),
        matching: hb0.clone(),
        insertion: vec![hb0.clone()],
    };
    add_scan(&graph, 3000, Rigid3::identity(), &b_first);

    assert!(builder.num_global_proposals() >= 1);

    graph.run_final_optimization();
    assert_eq!(graph.connected_trajectories(), vec![vec![0, 1]]);
    assert!(graph
        .constraints()
        .iter()
        .any(|c| c.kind == ConstraintKind::InterSubmap));
}

#[test]
fn test_optimization_trigger_buffers_and_drains_fifo() {
    let (graph, builder, problem) = new_graph(options(3));
    builder.hold_callbacks();

    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };

    // The fourth scan crosses the threshold and allocates the queue.
    for i in 0..4u64 {
        add_scan(
            &graph,
            i * 1000,
            Rigid3::from_translation(i as f64 * 0.1, 0.0, 0.0),
            &scenario,
        );
    }
    assert_eq!(graph.status().deferred_work_items, Some(0));
    assert_eq!(problem.solve_calls(), 0);

    // Further ingestion is buffered, not processed.
    add_scan(&graph, 4000, Rigid3::from_translation(0.4, 0.0, 0.0), &scenario);
    let stats = graph.status();
    assert_eq!(stats.deferred_work_items, Some(1));
    assert_eq!(stats.num_trajectory_nodes, 5);
    assert_eq!(stats.num_constraints, 4);
    assert_eq!(stats.num_finished_scans, 4);

    // Matcher goes idle: the solve runs and the buffered item drains.
    builder.release_callbacks();
    let deadline = Instant::now() + Duration::from_secs(5);
    while graph.status().deferred_work_items.is_some() {
        assert!(Instant::now() < deadline, "queue never drained");
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = graph.status();
    assert_eq!(stats.num_constraints, 5);
    assert_eq!(stats.num_finished_scans, 5);
    assert_eq!(problem.solve_calls(), 1);
}

#[test]
fn test_final_optimization_raises_and_restores_iteration_cap() {
    let (graph, _builder, problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };
    add_scan(&graph, 0, Rigid3::identity(), &scenario);

    graph.run_final_optimization();

    assert_eq!(problem.solve_calls(), 1);
    // Raised to the final cap, then restored to the periodic cap.
    let defaults = PoseGraphOptions::default();
    assert_eq!(
        problem.iteration_caps(),
        vec![
            defaults.max_num_final_iterations,
            defaults.optimization.max_num_iterations
        ]
    );
}

#[test]
fn test_periodic_optimization_disabled_stays_synchronous() {
    let (graph, _builder, problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };

    for i in 0..10u64 {
        add_scan(
            &graph,
            i * 1000,
            Rigid3::from_translation(i as f64 * 0.1, 0.0, 0.0),
            &scenario,
        );
        assert_eq!(graph.status().deferred_work_items, None);
    }
    assert_eq!(problem.solve_calls(), 0);
    assert_eq!(graph.status().num_finished_scans, 10);
}

#[test]
fn test_degenerate_covariance_yields_finite_information() {
    let (graph, _builder, _problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);

    let mut covariance = Matrix6::identity();
    covariance[(5, 5)] = 0.0;
    graph.add_scan(
        0,
        RangeData::empty(),
        Rigid3::identity(),
        covariance,
        &trajectory,
        &s0,
        &[s0.clone()],
    );

    let constraints = graph.constraints();
    assert_eq!(constraints.len(), 1);
    assert!(constraints[0]
        .pose
        .sqrt_information
        .iter()
        .all(|v| v.is_finite()));
}

#[test]
fn test_stationary_trajectory_extrapolation_matches_snapshot() {
    let (graph, _builder, problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };

    for i in 0..3u64 {
        add_scan(&graph, i * 1000, Rigid3::identity(), &scenario);
    }
    graph.run_final_optimization();

    // Every submap is covered by the snapshot: nothing is extrapolated.
    let transforms = graph.submap_transforms(&trajectory);
    let added = problem.added_submaps();
    assert_eq!(transforms.len(), added.len());
    for (transform, (_, seeded)) in transforms.iter().zip(added.iter()) {
        assert_relative_eq!(transform.translation(), seeded.translation(), epsilon = 1e-12);
    }
}

#[test]
fn test_next_trajectory_node_index_counts_flat_scans() {
    let (graph, _builder, _problem) = new_graph(options(0));
    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    let scenario = Scenario {
        trajectory: trajectory.clone(),
        matching: s0.clone(),
        insertion: vec![s0.clone()],
    };

    assert_eq!(graph.next_trajectory_node_index(), 0);
    add_scan(&graph, 0, Rigid3::identity(), &scenario);
    assert_eq!(graph.next_trajectory_node_index(), 1);
    add_scan(&graph, 1000, Rigid3::identity(), &scenario);
    assert_eq!(graph.next_trajectory_node_index(), 2);
}

#[test]
fn test_imu_data_routes_to_problem_series() {
    let (graph, _builder, problem) = new_graph(options(0));
    let trajectory = test_trajectory();

    graph.add_imu_data(
        &trajectory,
        ImuReading {
            timestamp_us: 500,
            linear_acceleration: Vector3::new(0.0, 0.0, 9.81),
            angular_velocity: Vector3::new(0.0, 0.0, 0.1),
        },
    );

    let imu = problem.added_imu();
    assert_eq!(imu.len(), 1);
    assert_eq!(imu[0].0, 0);
    assert_eq!(imu[0].1.timestamp_us, 500);

    // The trajectory id assigned via IMU registration is reused by add_scan.
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    graph.add_scan(
        1000,
        RangeData::empty(),
        Rigid3::identity(),
        Matrix6::identity(),
        &trajectory,
        &s0,
        &[s0.clone()],
    );
    assert_eq!(graph.status().num_trajectories, 1);
}

#[test]
fn test_repeated_final_optimization_keeps_poses_stable() {
    // Real solver end to end: consistent constraints must leave poses alone.
    let builder = FakeConstraintBuilder::new();
    let problem = GraphOptimizer::new(PoseGraphOptions::default().optimization);
    let graph = SparsePoseGraph::new(options(0), builder.clone(), problem);

    let trajectory = test_trajectory();
    let submap = FakeSubmap::new(Rigid3::identity());
    let s0 = submap_handle(&submap);
    for i in 0..3u64 {
        graph.add_scan(
            i * 1000,
            RangeData::empty(),
            Rigid3::from_translation(i as f64, 0.0, 0.0),
            Matrix6::identity(),
            &trajectory,
            &s0,
            &[s0.clone()],
        );
    }

    graph.run_final_optimization();
    let first: Vec<Rigid3> = graph.trajectory_nodes()[0].iter().map(|n| n.pose).collect();

    graph.run_final_optimization();
    let second: Vec<Rigid3> = graph.trajectory_nodes()[0].iter().map(|n| n.pose).collect();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_relative_eq!(a.translation(), b.translation(), epsilon = 1e-6);
        assert_relative_eq!(a.rotation().angle_to(&b.rotation()), 0.0, epsilon = 1e-6);
    }
}
