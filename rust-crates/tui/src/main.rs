use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use reel_engine::config::EngineConfig;
use reels_tui::app::{
    self,
    AppConfig,
    GatewayChoice,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const CONFIG_FILE: &str = "engine.json";

fn print_usage_and_exit() -> ! {
    println!(
        "Usage: reels [--offline | --gateway-url <url>] [--config <path>]\n\
         [--data-dir <path>] [--bell]\n\
         \n\
         Flags:\n\
           --offline            Settle spins against an in-process simulated chain (default)\n\
           --gateway-url <url>  Settle spins through a running settlement gateway\n\
           --config <path>      Engine config JSON (defaults to <data-dir>/{CONFIG_FILE})\n\
           --data-dir <path>    Where spins and logs are kept (defaults to ~/.reels)\n\
           --bell               Ring the terminal bell on reel stops and wins"
    );
    std::process::exit(0);
}

struct CliArgs {
    gateway: GatewayChoice,
    config: Option<PathBuf>,
    data_dir: PathBuf,
    bell: bool,
}

fn default_data_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".reels"))
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn parse_cli_args() -> Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut offline = false;
    let mut gateway_url: Option<String> = None;
    let mut config: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut bell = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--offline" => offline = true,
            "--gateway-url" => {
                let url = args
                    .next()
                    .ok_or_else(|| eyre!("--gateway-url requires a URL argument"))?;
                if gateway_url.is_some() {
                    return Err(eyre!("--gateway-url may only be specified once"));
                }
                gateway_url = Some(url);
            }
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--config requires a path argument"))?;
                if config.is_some() {
                    return Err(eyre!("--config may only be specified once"));
                }
                config = Some(expand(&path));
            }
            "--data-dir" => {
                let dir = args
                    .next()
                    .ok_or_else(|| eyre!("--data-dir requires a path argument"))?;
                if data_dir.is_some() {
                    return Err(eyre!("--data-dir may only be specified once"));
                }
                data_dir = Some(expand(&dir));
            }
            "--bell" => bell = true,
            "--help" | "-h" => print_usage_and_exit(),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    let gateway = match (offline, gateway_url) {
        (true, Some(_)) => {
            return Err(eyre!("--offline and --gateway-url are mutually exclusive"));
        }
        (_, Some(url)) => GatewayChoice::Remote(url),
        (_, None) => GatewayChoice::Offline,
    };
    let data_dir = match data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    Ok(CliArgs {
        gateway,
        config,
        data_dir,
        bell,
    })
}

/// The terminal belongs to the UI, so logs go to a daily file under the data directory.
fn init_file_logging(data_dir: &Path) -> WorkerGuard {
    let appender = rolling::daily(data_dir.join("logs"), "reels.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    guard
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = parse_cli_args()?;
    std::fs::create_dir_all(&args.data_dir)
        .wrap_err_with(|| format!("creating {}", args.data_dir.display()))?;
    let _guard = init_file_logging(&args.data_dir);
    tracing::info!("starting reels client");

    let config_path = args
        .config
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE));
    let engine = EngineConfig::load(&config_path).map_err(|err| eyre!("{err}"))?;
    app::run_app(AppConfig {
        gateway: args.gateway,
        engine,
        data_dir: Some(args.data_dir),
        bell: args.bell,
    })
    .await
}
