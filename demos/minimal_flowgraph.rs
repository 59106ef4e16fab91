//! Example: NullSource -> Head -> NullSink built through the block registry
//!
//! Usage:
//!   cargo run --release --example minimal_flowgraph -- -n 1000000 --workers 2

use clap::Parser;
use flowgraph::runtime::registry::global_block_registry;
use flowgraph::{ExecutionPolicy, Graph, Head, Scheduler, SchedulerConfig, property_map};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of samples the Head block lets through
    #[arg(short, long, default_value = "1000000")]
    n: u64,

    /// Sample type (parameterization) of every block
    #[arg(short, long, default_value = "f32")]
    sample_type: String,

    /// Worker threads (0 = run on the calling thread)
    #[arg(short, long, default_value = "0")]
    workers: usize,

    /// List the registered block types and exit
    #[arg(long)]
    list: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let registry = global_block_registry();

    if args.list {
        for block in registry.provided_blocks() {
            let params = registry.known_block_parameterizations(&block);
            println!("{block}: {}", params.join(", "));
        }
        return Ok(());
    }

    info!("=== Minimal Flowgraph ===");
    let mut graph = Graph::new();
    let source = graph.emplace_block("flowgraph::NullSource", &args.sample_type, &property_map! {})?;
    let head = graph.emplace_block(
        "flowgraph::Head",
        &args.sample_type,
        &property_map! { "num_items" => args.n },
    )?;
    let sink = graph.emplace_block("flowgraph::NullSink", &args.sample_type, &property_map! {})?;
    graph.connect(source, "out", head, "in")?;
    graph.connect(head, "out", sink, "in")?;

    let policy = match args.workers {
        0 => ExecutionPolicy::SingleThreaded,
        workers => ExecutionPolicy::MultiThreaded { workers },
    };
    let mut scheduler = Scheduler::new(
        graph,
        SchedulerConfig::default().with_execution_policy(policy),
    );
    info!("Running on {} thread(s)", scheduler.num_threads());
    scheduler.run_and_wait()?;

    let graph = scheduler.graph();
    let head_block = graph.block(head).ok_or("head block missing")?;
    info!(
        "{} finished after {} work calls",
        head_block.unique_name(),
        head_block.work_calls()
    );
    if args.sample_type == "f32" {
        if let Some(head) = graph.block_as::<Head<f32>>(head) {
            info!("Passed {} of {} samples", head.published(), head.num_items());
        }
    }
    Ok(())
}
