use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hoptree::alias::{
    AliasHintCollector, DnsProber, HintMap, HintResolver, NullProber, ProbeExecutor,
};
use hoptree::cli::Args;
use hoptree::config::Config;
use hoptree::export::{export_json, generate_report};
use hoptree::state::{IpTable, SubnetSiteSet, UpdateResult, read_sites};
use hoptree::tree::{GraftPolicy, NetworkTree};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => Config::load(path)?.apply_args(&args),
        None => Config::from(&args),
    };

    let mut set = load_set(&args.input)?;
    let mut tree = NetworkTree::build(&mut set, config.max_depth);
    if !set.is_empty() {
        warn!("{} subnet(s) could not be placed in the tree", set.len());
    }

    if let Some(ref path) = args.graft {
        let mut foreign = load_set(path)?;
        let report = tree.graft(&mut foreign, GraftPolicy::default());
        if report.rejected > 0 {
            warn!(
                "{} subnet(s) from {} do not fit the trunk",
                report.rejected,
                path.display()
            );
        }
    }

    let table = IpTable::new();
    let hints = HintMap::new();

    if config.hints_enabled {
        let executor: Arc<dyn ProbeExecutor> = if config.dns_enabled {
            Arc::new(DnsProber::new(config.dns_timeout))
        } else {
            Arc::new(NullProber)
        };
        let mut collector =
            AliasHintCollector::new(config.clone(), table.clone(), hints.clone(), executor);
        info!(
            "Collecting alias-resolution hints (largest interface set: {})",
            tree.largest_interface_set()
        );
        tree.collect_alias_resolution_hints(&mut collector).await;
    }

    tree.infer_routers(&HintResolver::new(table, hints, config.max_ip_id_gap));

    if let Some(ref path) = args.subnets_out {
        tree.output_subnets(path)?;
    }
    if let Some(ref path) = args.aliases_out {
        tree.output_aliases(path)?;
    }

    let stdout = std::io::stdout().lock();
    if args.json {
        export_json(&tree, stdout)?;
        println!();
    } else {
        generate_report(&tree, stdout).context("Failed to write report")?;
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    // RUST_LOG still wins over -v
    let default = if verbose { "hoptree=debug" } else { "hoptree=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Read and deduplicate a subnet file
fn load_set(path: &Path) -> Result<SubnetSiteSet> {
    let sites =
        read_sites(path).with_context(|| format!("Failed to read subnets from {}", path.display()))?;

    let total = sites.len();
    let mut set = SubnetSiteSet::new();
    let mut merged = 0;
    for site in sites {
        if set.add_site(site) != UpdateResult::NewSubnet {
            merged += 1;
        }
    }
    info!(
        "{}: {} subnet(s) read, {} merged into others",
        path.display(),
        total,
        merged
    );
    Ok(set)
}
