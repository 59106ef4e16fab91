//! Example: stopping an endless flowgraph from another thread
//!
//! A NullSource feeds a NullSink forever. A second thread asks the
//! scheduler for its state, then requests `REQUESTED_STOP`.
//!
//! Usage:
//!   cargo run --release --example stop_flowgraph -- --after-ms 500

use std::thread;
use std::time::Duration;

use clap::Parser;
use flowgraph::runtime::message::send_message;
use flowgraph::{
    Command, ExecutionPolicy, Graph, NullSink, NullSource, Scheduler, SchedulerConfig,
    property, property_map,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Delay before the stop request, in milliseconds
    #[arg(short, long, default_value = "500")]
    after_ms: u64,

    /// Worker threads (0 = run on the calling thread)
    #[arg(short, long, default_value = "0")]
    workers: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut graph = Graph::new();
    let source = graph.add_block(NullSource::<f32>::default())?;
    let sink = graph.add_block(NullSink::<f32>::default())?;
    graph.connect(source, "out", sink, "in")?;

    let policy = match args.workers {
        0 => ExecutionPolicy::SingleThreaded,
        workers => ExecutionPolicy::MultiThreaded { workers },
    };
    let mut scheduler = Scheduler::new(
        graph,
        SchedulerConfig::default().with_execution_policy(policy),
    );

    let msg_in = scheduler.msg_in();
    let delay = Duration::from_millis(args.after_ms);
    let controller = thread::spawn(move || {
        thread::sleep(delay / 2);
        if let Err(e) = send_message(&msg_in, Command::Get, "", property::LIFECYCLE_STATE, property_map! {}) {
            warn!("State query failed: {}", e);
        }
        thread::sleep(delay / 2);
        info!("Requesting stop");
        if let Err(e) = send_message(
            &msg_in,
            Command::Set,
            "",
            property::LIFECYCLE_STATE,
            property_map! { "state" => "REQUESTED_STOP" },
        ) {
            warn!("Stop request failed: {}", e);
        }
    });

    scheduler.run_and_wait()?;
    let _ = controller.join();

    for reply in scheduler.msg_out().drain() {
        match &reply.data {
            Ok(data) => info!("Reply {}: {}", reply, flowgraph::Value::Map(data.clone())),
            Err(e) => warn!("Reply {}: {}", reply, e),
        }
    }

    let graph = scheduler.graph();
    if let Some(source) = graph.block_as::<NullSource<f32>>(source) {
        info!("Source produced {} samples before stopping", source.produced());
    }
    info!("Final state: {}", scheduler.state());
    Ok(())
}
