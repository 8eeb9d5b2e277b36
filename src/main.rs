//! boshstemcells CLI - short URLs for BOSH stemcells
//!
//! Run `boshstemcells --help` for usage information.

use boshstemcells::config::{Config, LogFormat, DEFAULT_CONFIG_TOML};
use boshstemcells::detect::Autodetector;
use boshstemcells::router::{ResolveError, StemcellPath, StemcellResolver};
use boshstemcells::web::WebServer;
use boshstemcells::StemcellError;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "boshstemcells",
    about = "Short URLs for BOSH stemcells, with IaaS autodetection",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl Cli {
    /// Run bare, the binary serves
    fn take_command(&mut self) -> Commands {
        self.command.take().unwrap_or(Commands::Serve { bind: None })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the redirect server
    Serve {
        /// Address to bind to (overrides the config file and PORT)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Print the URL a path redirects to
    Resolve {
        /// Request path, e.g. /aws/trusty/3468.1
        path: String,

        /// X-Forwarded-For value used by /auto
        #[arg(long)]
        forwarded_for: Option<String>,
    },

    /// Detect the IaaS an address belongs to
    Detect {
        /// IPv4 or IPv6 address
        ip: IpAddr,
    },

    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();
    let command = cli.take_command();

    // Writing the config file must not require an existing one
    if let Commands::Init { force } = command {
        return init_config(cli.config, force).await;
    }

    let config = load_config(cli.config.as_deref()).await?;

    init_logging(&config, cli.verbose);

    match command {
        Commands::Serve { bind } => run_server(config, bind).await?,
        Commands::Resolve {
            path,
            forwarded_for,
        } => resolve_path(config, path, forwarded_for).await?,
        Commands::Detect { ip } => detect_ip(config, ip).await?,
        Commands::Init { .. } => unreachable!("handled before loading configuration"),
    }

    Ok(())
}

/// Setup logging from the config level, raised by -v flags
fn init_logging(config: &Config, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        1 => EnvFilter::from_default_env().add_directive(Level::DEBUG.into()),
        _ => EnvFilter::from_default_env().add_directive(Level::TRACE.into()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

/// The given config file, else the default one when it exists, then `PORT`
async fn load_config(path: Option<&std::path::Path>) -> Result<Config, StemcellError> {
    let config = match path {
        Some(path) => Config::load(path).await?,
        None => {
            let default_path = Config::default_path();
            if default_path.exists() {
                Config::load(&default_path).await?
            } else {
                Config::default()
            }
        }
    };

    Ok(config.with_env_overrides()?)
}

fn build_resolver(config: &Config) -> Result<StemcellResolver, StemcellError> {
    let detector = Autodetector::from_config(&config.detect)?;
    Ok(StemcellResolver::new(
        config.catalog.clone(),
        Arc::new(detector),
    ))
}

/// Run the HTTP redirect server
async fn run_server(mut config: Config, bind: Option<String>) -> Result<(), StemcellError> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let resolver = build_resolver(&config)?;
    let server = WebServer::new(config.server.clone(), resolver);

    info!(
        bind = %server.bind_address(),
        static_dir = %config.server.static_dir.display(),
        "Serving stemcell redirects"
    );
    server.run().await?;

    Ok(())
}

/// Resolve a single path and print the outcome the server would give
async fn resolve_path(
    config: Config,
    path: String,
    forwarded_for: Option<String>,
) -> Result<(), StemcellError> {
    let resolver = build_resolver(&config)?;
    let path = StemcellPath::parse(&path);

    match resolver.resolve(&path, forwarded_for.as_deref()).await {
        Ok(target) => {
            println!("301 {}", target.location);
        }
        Err(ResolveError::AutodetectFailed) => {
            println!("404 {}", ResolveError::AutodetectFailed);
        }
        Err(e @ (ResolveError::MissingProvider | ResolveError::UnknownProvider(_))) => {
            println!("404 ({})", e);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Run the detection chain for one address
async fn detect_ip(config: Config, ip: IpAddr) -> Result<(), StemcellError> {
    let detector = Autodetector::from_config(&config.detect)?;

    match detector.detect(ip).await? {
        Some(cloud) => println!("{}", cloud),
        None => println!("{}: no IaaS detected", ip),
    }

    Ok(())
}

/// Initialize configuration
async fn init_config(path: Option<PathBuf>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.unwrap_or_else(Config::default_path);

    if path.exists() && !force {
        return Err(format!(
            "Configuration already exists at {} (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, DEFAULT_CONFIG_TOML).await?;

    println!("Wrote configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_invocation_serves() {
        let mut cli = Cli::try_parse_from(["boshstemcells"]).unwrap();
        assert!(matches!(cli.take_command(), Commands::Serve { bind: None }));
    }

    #[test]
    fn test_subcommands_parse() {
        let mut cli = Cli::try_parse_from(["boshstemcells", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        assert!(matches!(cli.take_command(), Commands::Serve { bind: Some(b) } if b == "127.0.0.1:9000"));

        let mut cli = Cli::try_parse_from(["boshstemcells", "-v", "init", "--force"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.take_command(), Commands::Init { force: true }));

        let mut cli =
            Cli::try_parse_from(["boshstemcells", "resolve", "/auto", "--forwarded-for", "10.0.0.1"])
                .unwrap();
        assert!(matches!(
            cli.take_command(),
            Commands::Resolve { path, forwarded_for: Some(f) } if path == "/auto" && f == "10.0.0.1"
        ));

        assert!(Cli::try_parse_from(["boshstemcells", "detect", "not-an-ip"]).is_err());
    }
}
