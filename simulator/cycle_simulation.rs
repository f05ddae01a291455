// Cycle simulation - the four node cycle with every protocol event collected
//
// Usage:
//   cargo run --example cycle_simulation

use std::collections::BTreeMap;
use std::time::Duration;

use log::info;
use simple_logger::SimpleLogger;

use yy_ring::yy_graph::graph_from_edges;
use yy_ring::{CollectorEventSink, Event, Network, NodeConfig};

fn main() -> yy_ring::Result<()> {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let graph = graph_from_edges(&[(1, 3), (3, 5), (5, 9), (9, 1)]);
    let events = CollectorEventSink::new();
    let config = NodeConfig {
        poll_interval_ms: 20,
        ..NodeConfig::default()
    };

    let network = Network::start_with_sinks(graph, config, BTreeMap::new(), |_| {
        Box::new(events.clone())
    })?;
    network.wait_ready()?;

    network.submit(1, 5, "hello, five")?;
    if let Some(delivered) = network.next_delivery(Duration::from_secs(5)) {
        info!("delivered: {:?}", delivered);
    }
    let reports = network.shutdown()?;

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  Four node cycle                                       ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    for (id, report) in &reports {
        println!(
            "  {:>3}  {:<8} rounds:{}  parent:{:?}",
            id,
            report.role.as_str(),
            report.rounds,
            report.parent
        );
    }

    println!("\nRole changes:");
    for id in reports.keys() {
        let changes: Vec<String> = events
            .for_node(*id)
            .into_iter()
            .filter_map(|e| match e {
                Event::RoleChanged { round, to, .. } => Some(format!("{}@{}", to.as_str(), round)),
                _ => None,
            })
            .collect();
        println!("  {:>3}  {}", id, changes.join(" "));
    }

    println!("\nEvent counts:\n  {:?}", events.count_by_type());
    Ok(())
}
