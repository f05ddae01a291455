// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/cycle4.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/ladder.yaml --seed 1234

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simple_logger::SimpleLogger;

use yy_ring::yy_graph::edge_count;
use yy_ring::{
    Delivered, Error, MemoryFiles, Network, NodeId, Role, ScenarioAction, ScenarioFile,
};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .env()
        .init()
        .unwrap();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <scenario.yaml | directory/> [--seed SEED]", args[0]);
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/cycle4.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/ladder.yaml --seed 1234", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);

    let seed: Option<u64> = if args.len() >= 4 && args[2] == "--seed" {
        Some(args[3].parse().unwrap_or_else(|e| {
            eprintln!("Invalid seed {}: {}", args[3], e);
            std::process::exit(1);
        }))
    } else {
        None
    };

    let scenarios = if path.is_file() {
        vec![path.to_path_buf()]
    } else if path.is_dir() {
        scenario_files(path)
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    };

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", path.display());
        std::process::exit(1);
    }

    let mut failed = 0;
    for (i, scenario_path) in scenarios.iter().enumerate() {
        if scenarios.len() > 1 {
            println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        }
        match run_scenario_file(scenario_path, seed) {
            Ok(true) => println!("\n✓ Scenario complete!\n"),
            Ok(false) => {
                println!("\n✗ Scenario had failed checks\n");
                failed += 1;
            }
            Err(e) => {
                error!("{}: {}", scenario_path.display(), e);
                println!("\n✗ Scenario aborted: {}\n", e);
                failed += 1;
            }
        }
    }

    if scenarios.len() > 1 {
        println!("╔════════════════════════════════════════════════════════╗");
        println!(
            "║  {} of {} scenarios passed{}║",
            scenarios.len() - failed,
            scenarios.len(),
            " ".repeat(30)
        );
        println!("╚════════════════════════════════════════════════════════╝\n");
    }

    if failed > 0 {
        std::process::exit(1);
    }
}

fn scenario_files(dir: &Path) -> Vec<PathBuf> {
    let mut scenarios = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }
    scenarios.sort();
    scenarios
}

/// Tracks pass/fail of individual checks
struct Checks {
    failed: usize,
}

impl Checks {
    fn check(&mut self, ok: bool, what: &str) {
        if ok {
            println!("  ✓ {}", what);
        } else {
            println!("  ✗ {}", what);
            self.failed += 1;
        }
    }
}

fn run_scenario_file(path: &Path, seed_override: Option<u64>) -> Result<bool, Error> {
    println!("Loading scenario from: {}", path.display());
    let scenario = ScenarioFile::load(path)?;

    println!("\n╔════════════════════════════════════════════════════════╗");
    let name = scenario.meta.name.clone().unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    println!("║  {}{}║", name, " ".repeat(54_usize.saturating_sub(name.len())));
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }
    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let seed = seed_override
        .or(scenario.seed)
        .unwrap_or_else(|| rand::thread_rng().gen());
    info!("seed {}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let (ids, graph) = scenario.build_graph(&mut rng)?;
    let config = scenario.node_config();

    let mut files: BTreeMap<NodeId, MemoryFiles> = BTreeMap::new();
    for entry in &scenario.files {
        let id = entry.node.resolve(&ids)?;
        let store = files.entry(id).or_default();
        for (name, contents) in &entry.files {
            store.insert(name.clone(), contents.clone());
        }
    }

    println!("Configuration:");
    println!("  Seed: {}", seed);
    println!("  Nodes: {}", graph.len());
    println!("  Links: {}", edge_count(&graph));
    println!("  Ids: {:?}", ids);
    println!("  Poll interval: {} ms", config.poll_interval_ms);
    println!("\nStarting network...\n");

    let started = Instant::now();
    let network = Network::start(graph.clone(), config, files)?;
    network.wait_ready()?;
    println!("Setup finished in {:?}\n", started.elapsed());

    let mut checks = Checks { failed: 0 };

    println!("Actions:");
    for action in &scenario.actions {
        let expected = match action {
            ScenarioAction::Send { from, to, body } => {
                let (from, to) = (from.resolve(&ids)?, to.resolve(&ids)?);
                network.submit(from, to, body)?;
                Delivered::Text {
                    at: to,
                    from,
                    body: body.clone(),
                }
            }
            ScenarioAction::RequestFile {
                from,
                to,
                filename,
                expect_contents,
            } => {
                let (from, to) = (from.resolve(&ids)?, to.resolve(&ids)?);
                network.request_file(from, to, filename)?;
                Delivered::File {
                    at: from,
                    from: to,
                    filename: filename.clone(),
                    contents: expect_contents.clone(),
                }
            }
        };

        let got = network.next_delivery(DELIVERY_TIMEOUT);
        checks.check(got.as_ref() == Some(&expected), &describe(&expected));
        if got.is_none() {
            // nothing else will arrive in order after a lost delivery
            break;
        }
    }

    let (reports, errors) = network.shutdown_all();

    println!("\nSetup results:");
    for (id, e) in &errors {
        checks.check(false, &format!("node {} stopped cleanly ({})", id, e));
    }
    let leaders: Vec<_> = reports.values().filter(|r| r.role == Role::Leader).collect();
    let min_id = ids.iter().min().copied();
    checks.check(
        leaders.len() == 1 && Some(leaders[0].id) == min_id,
        &format!("single leader {:?}", min_id),
    );
    checks.check(
        reports.values().filter(|r| r.role == Role::Pruned).count() == graph.len() - 1,
        "every other node pruned",
    );
    checks.check(
        leaders.first().and_then(|l| l.graph.as_ref()) == Some(&graph),
        "aggregated graph equals the input",
    );

    let max_rounds = reports.values().map(|r| r.rounds).max().unwrap_or(0);
    println!("  election rounds: {}", max_rounds);
    if let Some(leader) = leaders.first() {
        let hops: usize = leader.ring.paths.iter().map(|p| p.len() - 1).sum();
        println!("  ring: {:?} ({} hops)", leader.ring.waypoints(), hops);
        checks.check(
            reports.values().all(|r| r.ring == leader.ring),
            "every node holds the same ring",
        );
    }

    Ok(checks.failed == 0)
}

fn describe(delivered: &Delivered) -> String {
    match delivered {
        Delivered::Text { at, from, body } => format!("{} -> {}: {:?}", from, at, body),
        Delivered::File {
            at,
            from,
            filename,
            contents: Some(_),
        } => format!("{} fetched {} from {}", at, filename, from),
        Delivered::File {
            at, from, filename, ..
        } => format!("{} told {} has no {}", at, from, filename),
    }
}
