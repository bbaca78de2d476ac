//! Benchmarks for the scheduler state machine

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cosim_core::{Block, NodeId, Schedule, StepSequence};
use cosim_runtime::{NodeState, SchedulerState, Transition};
use cosim_wire::StepRelease;

fn bench_scheduler_full_run(c: &mut Criterion) {
    let blocks: Vec<Block> = (0..8)
        .map(|b| (0..4).map(|n| format!("n{}_{}", b, n)).collect::<Block>())
        .collect();
    let schedule = Schedule::new(blocks).unwrap();
    let steps = StepSequence::new(vec![0.1; 100]).unwrap();
    let nodes: Vec<NodeId> = schedule.nodes().cloned().collect();

    c.bench_function("scheduler_full_run", |b| {
        b.iter(|| {
            let mut state = SchedulerState::new(schedule.clone(), steps.clone());
            let mut transition = Transition::Idle;
            for node in &nodes {
                transition = state.on_connect(node);
            }
            while let Transition::Release(release) = transition {
                let members = state.schedule().blocks()[release.block].members().to_vec();
                for node in &members {
                    transition = state.on_ack(node, release.release);
                }
            }
            black_box(state.completed_blocks())
        })
    });
}

fn bench_node_gating(c: &mut Criterion) {
    let inputs: Vec<String> = (0..16).map(|i| format!("in_{}", i)).collect();

    c.bench_function("node_gating", |b| {
        b.iter(|| {
            let mut state = NodeState::new(inputs.iter().cloned(), false);
            state.grant(StepRelease::new(1.0, 1.0), None);
            for name in &inputs {
                state.collect(name, 1.0);
            }
            black_box(state.begin_step())
        })
    });
}

criterion_group!(benches, bench_scheduler_full_run, bench_node_gating);
criterion_main!(benches);
