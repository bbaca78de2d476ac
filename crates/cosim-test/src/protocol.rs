//! Protocol checks over complete runs

use std::collections::HashMap;

use cosim_core::{NodeId, Schedule};

use crate::scenario::ScenarioResult;

/// Every block of a step ran after all earlier blocks of that step and
/// before any later block started the step
pub fn blocks_in_order(result: &ScenarioResult, schedule: &Schedule) -> bool {
    let mut done: HashMap<&NodeId, usize> = HashMap::new();

    for record in &result.timeline {
        let Some(position) = schedule.position_of(&record.node) else {
            return false;
        };
        let round = done.get(&record.node).copied().unwrap_or(0);

        for (other, block) in schedule.blocks().iter().enumerate() {
            let required = match other.cmp(&position) {
                std::cmp::Ordering::Less => round + 1,
                std::cmp::Ordering::Greater => round,
                std::cmp::Ordering::Equal => continue,
            };
            if block
                .members()
                .iter()
                .any(|m| done.get(m).copied().unwrap_or(0) != required)
            {
                return false;
            }
        }

        *done.entry(&record.node).or_default() += 1;
    }
    true
}

/// Time seen by the nodes never goes backwards
pub fn clock_is_monotone(result: &ScenarioResult) -> bool {
    result.times().windows(2).all(|w| w[0] <= w[1])
}

/// Every node stepped exactly once per entry of the step sequence
pub fn every_node_stepped(result: &ScenarioResult, steps: usize) -> bool {
    result.nodes.values().all(|r| r.steps_executed == steps as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use cosim_core::{ScheduleConfig, TopologyConfig};
    use cosim_runtime::{StepContext, Topology};
    use proptest::prelude::*;

    use crate::fixtures::{self, PAIR_TOPOLOGY, TRIO_TOPOLOGY};
    use crate::scenario::ScenarioHarness;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_sequencing() {
        let topology = fixtures::three_participant().unwrap();
        let schedule = topology.schedule().clone();
        let result = ScenarioHarness::new(topology).run().await.unwrap();

        let releases = &result.scheduler.releases;
        assert_eq!(releases.iter().filter(|r| r.block == 0).count(), 2);
        assert_eq!(releases.iter().filter(|r| r.block == 1).count(), 2);
        assert!(blocks_in_order(&result, &schedule));
        assert!(every_node_stepped(&result, 2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inputs_reach_consumer() {
        let result = ScenarioHarness::new(fixtures::three_participant().unwrap())
            .with_value(4.2)
            .run()
            .await
            .unwrap();

        for step in result.trace("C") {
            assert_eq!(step.inputs.get("ta"), Some(&4.2));
            assert_eq!(step.inputs.get("tb"), Some(&4.2));
        }

        // A is schedule-first and steps before anything reached it
        let a = result.trace("A");
        assert_eq!(a.len(), 2);
        assert!(a[0].inputs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_clock_increments_before_each_step() {
        let result = ScenarioHarness::new(fixtures::pair_with_steps(&[2.0, 3.0, 5.0]).unwrap())
            .run()
            .await
            .unwrap();

        assert_eq!(result.times(), vec![2.0, 2.0, 5.0, 5.0, 10.0, 10.0]);
        assert_eq!(result.scheduler.final_time, 10.0);
        assert!(clock_is_monotone(&result));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_attribute_rename() {
        let result = ScenarioHarness::new(
            fixtures::topology(fixtures::RENAME_TOPOLOGY, fixtures::RENAME_SCHEDULE).unwrap(),
        )
        .with_value(7.0)
        .run()
        .await
        .unwrap();

        let n = result.trace("N");
        assert_eq!(n.len(), 1);
        assert_eq!(n[0].inputs.get("in"), Some(&7.0));
        assert!(n[0].inputs.get("out").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_undeclared_attribute_is_not_published() {
        let topology = || fixtures::topology(fixtures::RENAME_TOPOLOGY, fixtures::RENAME_SCHEDULE).unwrap();

        let baseline = ScenarioHarness::new(topology())
            .with_step_fn("P", |ctx: &mut StepContext<'_>| {
                ctx.update_attribute("out", 1.0);
            })
            .run()
            .await
            .unwrap();

        let accepted = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&accepted);
        let with_undeclared = ScenarioHarness::new(topology())
            .with_step_fn("P", move |ctx: &mut StepContext<'_>| {
                ctx.update_attribute("out", 1.0);
                flag.store(ctx.update_attribute("ghost", 1.0), Ordering::SeqCst);
            })
            .run()
            .await
            .unwrap();

        assert!(!accepted.load(Ordering::SeqCst));
        assert_eq!(with_undeclared.broker.published, baseline.broker.published);
        assert_eq!(with_undeclared.nodes[&NodeId::new("P")].stats.attributes_published, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_single_block_runs_members_together() {
        let schedule = ScheduleConfig {
            steps: vec![1.0, 1.0, 1.0],
            schedule: vec![vec!["A".into(), "B".into()]],
        };
        let topology =
            Topology::new(TopologyConfig::from_json_str(PAIR_TOPOLOGY).unwrap(), &schedule).unwrap();
        let result = ScenarioHarness::new(topology).run().await.unwrap();

        assert_eq!(result.scheduler.completed_blocks, 3);
        assert_eq!(result.times(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_block_members_step_concurrently() {
        const SLOW_STEP: Duration = Duration::from_millis(300);

        let schedule = ScheduleConfig {
            steps: vec![1.0],
            schedule: vec![vec!["A".into(), "B".into(), "C".into()]],
        };
        let topology =
            Topology::new(TopologyConfig::from_json_str(TRIO_TOPOLOGY).unwrap(), &schedule).unwrap();
        let slow = |_: &mut StepContext<'_>| std::thread::sleep(SLOW_STEP);

        let started = Instant::now();
        let result = ScenarioHarness::new(topology)
            .with_step_fn("A", slow)
            .with_step_fn("B", slow)
            .with_step_fn("C", slow)
            .run()
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.total_steps(), 3);
        // one slow step at a time would need at least twice as long
        assert!(elapsed < SLOW_STEP * 2, "block took {:?}", elapsed);
    }

    fn layouts() -> impl Strategy<Value = Vec<Vec<NodeId>>> {
        prop_oneof![
            Just(vec![vec![NodeId::new("A")], vec![NodeId::new("B")]]),
            Just(vec![vec![NodeId::new("B")], vec![NodeId::new("A")]]),
            Just(vec![vec![NodeId::new("A"), NodeId::new("B")]]),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_run_terminates(
            layout in layouts(),
            steps in prop::collection::vec(0.0f64..5.0, 0..4),
        ) {
            let schedule = ScheduleConfig { steps: steps.clone(), schedule: layout.clone() };
            let topology = Topology::new(
                TopologyConfig::from_json_str(PAIR_TOPOLOGY).unwrap(),
                &schedule,
            )
            .unwrap();

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let result = runtime.block_on(ScenarioHarness::new(topology).run()).unwrap();

            prop_assert_eq!(
                result.scheduler.completed_blocks,
                (steps.len() * layout.len()) as u64
            );
            prop_assert_eq!(result.scheduler.releases.len(), steps.len() * layout.len());
            prop_assert!(every_node_stepped(&result, steps.len()));
            prop_assert!(clock_is_monotone(&result));
        }
    }
}
