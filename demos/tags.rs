//! Example: tags travelling with samples
//!
//! A repeating VectorSource publishes a ramp with a tag on its first and
//! last sample, Head cuts the stream, and a VectorSink records where each
//! tag arrived.
//!
//! Usage:
//!   cargo run --example tags -- --len 8 --items 20

use clap::Parser;
use flowgraph::{Graph, Head, Scheduler, Tag, VectorSink, VectorSource, property_map};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Length of the ramp
    #[arg(short, long, default_value = "8")]
    len: u32,

    /// Total samples to collect
    #[arg(short, long, default_value = "20")]
    items: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let len = args.len.max(1);
    let ramp: Vec<u32> = (0..len).collect();
    let tags = vec![
        Tag::new(0, property_map! { "marker" => "start", "period" => len }),
        Tag::new(i64::from(len - 1), property_map! { "marker" => "end" }),
    ];

    let mut graph = Graph::new();
    let source = graph.add_block(VectorSource::new(ramp).with_repeat(true).with_tags(tags))?;
    let head = graph.add_block(Head::<u32>::new(args.items))?;
    let sink = graph.add_block(VectorSink::<u32>::new())?;
    graph.connect(source, "out", head, "in")?;
    graph.connect(head, "out", sink, "in")?;

    let mut scheduler = Scheduler::single_threaded(graph);
    scheduler.run_and_wait()?;

    let sink = scheduler
        .graph()
        .block_as::<VectorSink<u32>>(sink)
        .ok_or("sink missing")?;
    info!("Samples: {:?}", sink.data());
    for tag in sink.tags() {
        info!("{}", tag);
    }
    Ok(())
}
