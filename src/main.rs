use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use admission_core::webhook::policies::load_policy_file;
use admission_core::webhook::{
    describe_webhook, DefaultDecision, Dispatcher, WebhookRegistry, WebhookServer,
};
use admission_core::{telemetry, Error};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the admission webhook server
    Run(RunArgs),
    /// List the webhooks a policy file registers
    Routes(RoutesArgs),
    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Address to listen on
    #[arg(long, env = "WEBHOOK_LISTEN_ADDR", default_value = "0.0.0.0:8443")]
    listen_addr: SocketAddr,

    /// PEM certificate chain served to the API server
    #[arg(long, env = "WEBHOOK_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key matching --tls-cert
    #[arg(long, env = "WEBHOOK_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<String>,

    /// YAML file declaring the policies to mount
    #[arg(long, env = "WEBHOOK_POLICY_FILE")]
    policy_file: Option<PathBuf>,

    /// Answer when a webhook has no opinion: allow, deny or empty
    #[arg(long, env = "WEBHOOK_DEFAULT_DECISION")]
    default_decision: DefaultDecision,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Parser, Debug)]
struct RoutesArgs {
    /// YAML file declaring the policies to mount
    #[arg(long, env = "WEBHOOK_POLICY_FILE")]
    policy_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("admission-webhook v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Routes(routes_args) => run_routes(routes_args),
        Commands::Run(run_args) => run_server(run_args).await,
    }
}

/// Build the registry from an optional policy file
fn build_registry(policy_file: Option<&Path>) -> Result<WebhookRegistry, Error> {
    let mut builder = WebhookRegistry::builder();
    if let Some(path) = policy_file {
        for policy in load_policy_file(path)? {
            builder = builder.register(policy)?;
        }
    }
    Ok(builder.build())
}

fn run_routes(args: RoutesArgs) -> Result<(), Error> {
    let registry = build_registry(Some(&args.policy_file))?;
    println!("Registered webhooks: {}", registry.len());
    for webhook in registry.iter() {
        println!();
        println!("{}", describe_webhook(webhook, "  "));
    }
    Ok(())
}

/// Install the global subscriber; returns whether OTLP export is on
fn init_tracing(format: LogFormat) -> Result<bool, Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let (json_layer, text_layer) = match format {
        LogFormat::Json => (Some(fmt::layer().json().with_target(true)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    // Only enable OTEL if an endpoint is provided
    match std::env::var(telemetry::OTLP_ENDPOINT_ENV) {
        Ok(endpoint) => {
            let otel_layer = telemetry::init_telemetry(&registry, &endpoint)?;
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized ({})", endpoint);
            Ok(true)
        }
        Err(_) => {
            registry.init();
            info!(
                "OpenTelemetry tracing disabled ({} not set)",
                telemetry::OTLP_ENDPOINT_ENV
            );
            Ok(false)
        }
    }
}

async fn run_server(args: RunArgs) -> Result<(), Error> {
    let otel_enabled = init_tracing(args.log_format)?;

    info!(
        "Starting admission webhook v{} (default decision: {})",
        env!("CARGO_PKG_VERSION"),
        args.default_decision
    );

    let registry = build_registry(args.policy_file.as_deref())?;
    if registry.is_empty() {
        warn!("No webhooks registered; readiness will fail and every review path returns 404");
    }

    let dispatcher = Dispatcher::new(Arc::new(registry), args.default_decision);
    let mut server = WebhookServer::new(dispatcher)?;
    if let (Some(cert), Some(key)) = (args.tls_cert, args.tls_key) {
        server = server.with_tls(cert, key);
    }

    let result = server.start(args.listen_addr).await;

    if otel_enabled {
        telemetry::shutdown_telemetry();
    }
    result
}
