use anyhow::{
    Context,
    anyhow,
};
use clap::Parser;
use slot_settlement::{
    gateway::SettlementGateway,
    init_tracing,
    machine::{
        Machine,
        PlayerId,
        Seed,
    },
    simulated::{
        Faults,
        SimulatedSettlement,
        SimulationConfig,
    },
};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about = "Simulated slot machine settlement authority", long_about = None)]
struct Args {
    #[arg(short, long)]
    port: Option<u16>,

    /// Length of one chain round in milliseconds.
    #[arg(long = "round-ms", default_value_t = 2_800)]
    round_ms: u64,

    /// Hex encoded 32 byte chain seed; random when omitted.
    #[arg(long)]
    seed: Option<String>,

    #[arg(long)]
    player: Option<String>,

    #[arg(long = "reject-all")]
    reject_all: bool,

    #[arg(long = "no-layout")]
    no_layout: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

fn parse_seed(raw: &str) -> anyhow::Result<Seed> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .with_context(|| format!("Failed to decode seed '{raw}'"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow!("seed must be 32 bytes, got {}", bytes.len()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = SimulationConfig {
        round_duration: Duration::from_millis(args.round_ms),
        faults: Faults {
            reject_all: args.reject_all,
            layout_unavailable: args.no_layout,
            ..Faults::default()
        },
        ..SimulationConfig::default()
    };
    if let Some(raw) = &args.seed {
        config.chain_seed = parse_seed(raw).context("parsing --seed")?;
    }
    if let Some(name) = &args.player {
        config.player = PlayerId::from_name(name);
    }
    tracing::info!(
        player = %config.player,
        round_ms = args.round_ms,
        "starting simulated settlement authority"
    );

    let machine = Machine::standard().context("loading default reel layout")?;
    let settlement = SimulatedSettlement::new(machine, config);
    let gateway = SettlementGateway::new(settlement, args.port)?;
    tracing::info!("Serving settlement gateway at {}", gateway.base_url());

    handle_interupt().await;
    drop(gateway);
    tracing::info!("Exiting settlement gateway");
    Ok(())
}
