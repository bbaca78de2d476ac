//! cosim Demo
//!
//! Loads a topology and a schedule, wires every participant on an
//! in-process broker and runs them in lockstep. Each participant logs its
//! inputs and publishes a fixed value on every output at every step.
//!
//! ```text
//! cosim-demo [--topology PATH] [--schedule PATH] [--value X]
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use cosim_broker::{Broker, MemoryBroker};
use cosim_runtime::{NodeRuntime, Scheduler, StepContext, Topology};

const DEFAULT_TOPOLOGY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/topology.json");
const DEFAULT_SCHEDULE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/schedule.json");
const DEFAULT_VALUE: f64 = 4.2;

struct Args {
    topology: PathBuf,
    schedule: PathBuf,
    value: f64,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        topology: PathBuf::from(DEFAULT_TOPOLOGY),
        schedule: PathBuf::from(DEFAULT_SCHEDULE),
        value: DEFAULT_VALUE,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().ok_or_else(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--topology" => args.topology = PathBuf::from(value()?),
            "--schedule" => args.schedule = PathBuf::from(value()?),
            "--value" => {
                let raw = value()?;
                args.value = raw
                    .parse()
                    .map_err(|_| format!("--value expects a number, got {}", raw))?;
            }
            "-h" | "--help" => {
                println!("usage: cosim-demo [--topology PATH] [--schedule PATH] [--value X]");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument {}", other)),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let topology = Topology::load(&args.topology, &args.schedule)?;
    tracing::info!(
        topology = %args.topology.display(),
        schedule = %args.schedule.display(),
        "starting co-simulation"
    );

    let memory = Arc::new(MemoryBroker::new());
    topology.apply(&*memory)?;
    let broker: Arc<dyn Broker> = memory.clone();

    let scheduler = tokio::spawn(Scheduler::new(topology.scheduler_config(), Arc::clone(&broker)).run());

    let mut nodes = Vec::new();
    for config in topology.node_configs() {
        let outputs = config.outputs.clone();
        let id = config.id.clone();
        let value = args.value;
        let participant = move |ctx: &mut StepContext<'_>| {
            tracing::info!(
                node = %id,
                time = ctx.current_time(),
                duration = ctx.step_duration(),
                inputs = ?ctx.inputs(),
                "step"
            );
            for output in &outputs {
                ctx.update_attribute(output, value);
            }
        };
        nodes.push(tokio::spawn(NodeRuntime::new(config, Arc::clone(&broker), participant).run()));
    }

    let report = scheduler.await??;
    for node in nodes {
        let node = node.await??;
        tracing::info!(node = %node.node, steps = node.steps_executed, "node finished");
    }

    let stats = memory.stats();
    tracing::info!(
        final_time = report.final_time,
        blocks = report.completed_blocks,
        anomalies = report.anomalies.len(),
        published = stats.published,
        delivered = stats.delivered,
        "co-simulation finished"
    );
    Ok(())
}
