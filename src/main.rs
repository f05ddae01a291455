use std::collections::BTreeMap;
use std::time::Duration;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simple_logger::SimpleLogger;

use yy_ring::yy_graph::{draw_ids, Topology};
use yy_ring::{Delivered, MemoryFiles, Network, NodeConfig, Role};

fn main() -> yy_ring::Result<()> {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let seed: u64 = rand::thread_rng().gen();
    info!("starting, seed {}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    // a ladder: two rows of four, rungs between them
    let ids = draw_ids(8, 100, &mut rng)?;
    let mut edges: Vec<_> = ids[..4].windows(2).map(|w| (w[0], w[1])).collect();
    edges.extend(ids[4..].windows(2).map(|w| (w[0], w[1])));
    edges.extend((0..4).map(|i| (ids[i], ids[i + 4])));
    let graph = Topology::Edges { edges }.build(&[])?;

    let far = ids[7];
    let files = BTreeMap::from([(far, MemoryFiles::new().with_file("motd.txt", "welcome to the ring"))]);
    let config = NodeConfig {
        poll_interval_ms: 20,
        ..NodeConfig::default()
    };
    let network = Network::start(graph, config, files)?;
    network.wait_ready()?;

    let everyone = network.list_nodes(ids[0])?;
    info!("ring as seen from {}: {:?}", ids[0], everyone);

    for from in &ids {
        network.submit(*from, far, &format!("hello from {}", from))?;
    }
    network.request_file(ids[0], far, "motd.txt")?;
    network.request_file(ids[1], far, "missing.txt")?;

    for _ in 0..ids.len() + 2 {
        match network.next_delivery(Duration::from_secs(5)) {
            Some(Delivered::Text { at, from, body }) => info!("{} <- {}: {}", at, from, body),
            Some(Delivered::File {
                at,
                from,
                filename,
                contents,
            }) => info!("{} <- {}: {} = {:?}", at, from, filename, contents),
            None => {
                warn!("delivery timed out");
                break;
            }
        }
    }

    let reports = network.shutdown()?;
    for report in reports.values().filter(|r| r.role == Role::Leader) {
        info!(
            "leader {} after {} rounds, ring {:?}",
            report.id,
            report.rounds,
            report.ring.waypoints()
        );
    }
    Ok(())
}
