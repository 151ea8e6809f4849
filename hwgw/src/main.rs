//! HWGW controller CLI.
//!
//! Runs the reservation directory and one or more batch pipelines against
//! the simulated fleet, or inspects target scores and thread plans.

#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use hwgw::pipeline::CyclePipeline;
use hwgw::planner::calculate_plan;
use hwgw::targets::score_targets;
use hwgw_common::config::HwgwConfig;
use hwgw_common::rpc::PortBus;
use hwgw_common::sim::{SimWorld, TargetSpec};
use hwgw_common::types::{HostId, RoleHosts};
use hwgw_common::world::Oracle;
use hwgwd::{Directory, DirectoryClient, DirectoryService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "hwgw")]
#[command(author, version, about = "HWGW batch controller - directory + pipelines")]
struct Cli {
    /// Path to TOML configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the directory service and batch pipelines to completion
    Run {
        /// Number of concurrent pipelines
        #[arg(short, long, default_value = "1")]
        pipelines: u32,

        /// Work cycles per pipeline
        #[arg(long, default_value = "1")]
        cycles: u32,
    },
    /// Score every target for the best available host triple
    Targets {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the thread plan for one target
    Plan {
        /// Target host name
        target: String,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Demo fleet: a handful of purchased workers plus classic early targets.
fn demo_world(cfg: &HwgwConfig) -> SimWorld {
    SimWorld::builder()
        .seed(cfg.sim.seed)
        .time_scale(cfg.sim.time_scale)
        .player_level(100.0)
        .level_per_op(0.5)
        .host("home", 32.0, 1)
        .host("pserv-0", 256.0, 2)
        .host("pserv-1", 256.0, 1)
        .host("pserv-2", 128.0, 1)
        .host("pserv-3", 128.0, 1)
        .host("pserv-4", 64.0, 1)
        .host("pserv-5", 64.0, 1)
        .target(TargetSpec {
            name: "n00dles".into(),
            max_money: 1_750_000.0,
            min_security: 1.0,
            security: 1.0,
            money: 1_750_000.0,
            base_hack: Duration::from_secs(4),
            steal_per_thread: 0.002,
            growth: 0.06,
        })
        .target(TargetSpec {
            name: "foodnstuff".into(),
            max_money: 2_000_000.0,
            min_security: 3.0,
            security: 10.0,
            money: 1_000_000.0,
            base_hack: Duration::from_secs(9),
            steal_per_thread: 0.002,
            growth: 0.01,
        })
        .target(TargetSpec {
            name: "joesguns".into(),
            max_money: 2_500_000.0,
            min_security: 5.0,
            security: 15.0,
            money: 625_000.0,
            base_hack: Duration::from_secs(6),
            steal_per_thread: 0.0025,
            growth: 0.02,
        })
        .build()
}

/// Highest-RAM rooted hosts outside the exclusion list, largest first as
/// hack, grow, weaken.
fn demo_triple(world: &SimWorld, cfg: &HwgwConfig) -> Option<RoleHosts> {
    let mut hosts: Vec<HostId> = world
        .hosts()
        .into_iter()
        .filter(|h| !cfg.directory.excluded_hosts.contains(h) && world.has_root(h))
        .collect();
    hosts.sort_by(|a, b| {
        world
            .host_ram(b)
            .total_cmp(&world.host_ram(a))
            .then_with(|| a.cmp(b))
    });
    let mut top = hosts.into_iter();
    match (top.next(), top.next(), top.next()) {
        (Some(hack), Some(grow), Some(weaken)) => Some(RoleHosts { weaken, grow, hack }),
        _ => None,
    }
}

async fn cmd_run(cfg: &HwgwConfig, pipelines: u32, cycles: u32) -> Result<()> {
    let world = Arc::new(demo_world(cfg));
    let bus = PortBus::new();

    let service = DirectoryService::new(world.clone(), bus.clone(), cfg);
    let (stop, service_task) = service.spawn();
    let router = Directory::<SimWorld>::router();

    let mut tasks = Vec::new();
    for n in 0..pipelines {
        let process = world.spawn_origin();
        let client = DirectoryClient::new(bus.clone(), process.origin(), &cfg.rpc, &router);
        let pipeline = CyclePipeline::new(world.clone(), client, cfg);
        info!(pipeline = n, origin = process.origin(), "pipeline starting");
        tasks.push(tokio::spawn(async move {
            let result = pipeline.run(Some(cycles)).await;
            process.exit();
            result
        }));
    }

    for task in tasks {
        task.await??;
    }

    stop.send(true)?;
    service_task.await?;
    info!("all pipelines finished");
    Ok(())
}

fn cmd_targets(cfg: &HwgwConfig, json: bool) -> Result<()> {
    let world = demo_world(cfg);
    let Some(triple) = demo_triple(&world, cfg) else {
        bail!("fewer than three worker hosts in the fleet");
    };
    let scores = score_targets(&world, &triple, cfg.pipeline.hack_thread_cap);

    if json {
        println!("{}", serde_json::to_string_pretty(&scores)?);
        return Ok(());
    }
    println!(
        "{:<16} {:>12} {:>14} {:>8} {:>12} {:>6} {:>6} {:>6}",
        "target", "score", "money/batch", "chance", "weaken", "hack", "grow", "weak"
    );
    for s in &scores {
        println!(
            "{:<16} {:>12.6} {:>14.0} {:>8.2} {:>12} {:>6} {:>6} {:>6}",
            s.target,
            s.score,
            s.money_per_batch,
            s.chance,
            humantime::format_duration(s.weaken_time).to_string(),
            s.plan.threads.hack,
            s.plan.threads.grow,
            s.plan.threads.weaken,
        );
    }
    Ok(())
}

fn cmd_plan(cfg: &HwgwConfig, target: &str, json: bool) -> Result<()> {
    let world = demo_world(cfg);
    let Some(triple) = demo_triple(&world, cfg) else {
        bail!("fewer than three worker hosts in the fleet");
    };
    let target = HostId::new(target);
    let Some(plan) = calculate_plan(&world, &target, &triple, cfg.pipeline.hack_thread_cap)
    else {
        bail!("no feasible plan for '{target}'");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    println!("target:        {target}");
    println!("hosts:         weaken={} grow={} hack={}", triple.weaken, triple.grow, triple.hack);
    println!(
        "threads:       hack={} grow={} weaken={}",
        plan.threads.hack, plan.threads.grow, plan.threads.weaken
    );
    println!("total ram:     {:.1} GB", plan.total_ram);
    println!("num possible:  {}", plan.num_possible);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cfg = HwgwConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { pipelines, cycles } => cmd_run(&cfg, pipelines, cycles).await,
        Command::Targets { json } => cmd_targets(&cfg, json),
        Command::Plan { target, json } => cmd_plan(&cfg, &target, json),
    }
}
