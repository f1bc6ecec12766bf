use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use platform_health::cli::{CheckArgs, Cli, Command, ConfigArgs, ServerArgs};
use platform_health::config::Config;
use platform_health::core::context::{ComponentPath, ProbeContext};
use platform_health::core::provider::{Container, Provider};
use platform_health::core::providers::system::SystemProvider;
use platform_health::core::types::Status;
use platform_health::render::{render, RenderOptions};
use platform_health::server::{default_server_id, serve, PlatformHealthService};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // One process-wide TLS crypto provider; tonic, kube and the tls probe all
    // link rustls and would otherwise leave the choice ambiguous.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse_args();
    init_tracing(&cli);

    let code = match cli.command {
        Command::Check(args) => run_check(args).await,
        Command::Server(args) => run_server(args).await,
    };
    std::process::exit(code);
}

fn init_tracing(cli: &Cli) {
    let default_directive = match &cli.command {
        Command::Check(args) if args.quiet > 0 => "platform_health=warn",
        _ => "platform_health=info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn search_paths(config: &ConfigArgs) -> Vec<PathBuf> {
    if config.config_path.is_empty() {
        Config::default_search_paths()
    } else {
        config.config_path.clone()
    }
}

fn load_root(config_args: &ConfigArgs) -> Result<(Config, SystemProvider), i32> {
    let (config, path) = match Config::load(&search_paths(config_args), &config_args.config_name) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("ph: {e}");
            return Err(1);
        }
    };
    tracing::debug!(config = %path.display(), "configuration loaded");

    let root = match SystemProvider::root(&config.components) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("ph: invalid configuration: {e}");
            return Err(1);
        }
    };
    report_child_errors(&root);
    Ok((config, root))
}

/// Resolution problems do not stop the aggregator, but they should not pass
/// silently either.
fn report_child_errors(container: &dyn Container) {
    for error in container.child_errors() {
        warn!("{error}");
    }
    for child in container.children() {
        if let Some(nested) = child.as_container() {
            report_child_errors(nested);
        }
    }
}

async fn run_check(args: CheckArgs) -> i32 {
    let Ok((_, root)) = load_root(&args.config) else {
        return 1;
    };

    let paths: Vec<ComponentPath> = args
        .components
        .iter()
        .filter_map(|p| p.parse().ok())
        .filter(|p: &ComponentPath| !p.is_empty())
        .collect();

    let ctx = ProbeContext::new(args.parallelism, args.fail_fast).with_component_paths(paths);

    // Watchdog: the whole request shares one deadline.
    let watchdog = {
        let ctx = ctx.clone();
        let timeout = args.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("request deadline of {} reached", humantime::format_duration(timeout));
            ctx.cancel();
        })
    };

    let result = root.probe(&ctx).await;
    watchdog.abort();

    let options = RenderOptions {
        format: args.output_format,
        flat: args.flat,
        compact: args.compact,
        quiet: args.quiet,
        color: args.color,
    };
    match render(&result, &options) {
        Ok(output) if output.is_empty() => {}
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("ph: {e}");
            return 1;
        }
    }

    match result.status {
        Status::Healthy => 0,
        _ => 1,
    }
}

async fn run_server(args: ServerArgs) -> i32 {
    let Ok((config, root)) = load_root(&args.config) else {
        return 1;
    };

    let port = args.port.unwrap_or(config.server.port);
    let server_id = config
        .server
        .id
        .clone()
        .unwrap_or_else(|| default_server_id(port));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let root: Arc<dyn Provider> = Arc::new(root);
    let service = PlatformHealthService::new(root, server_id);

    match serve(addr, service).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ph: server error: {e}");
            1
        }
    }
}
