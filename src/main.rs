use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

pub mod app;
pub mod cidr;
pub mod config;
pub mod outputs;
pub mod stack;
pub mod stacks;
pub mod writer;

#[derive(Parser)]
#[command(name = "iaac-synth")]
#[command(about = "Synthesize the ECR, networking, shared and application Terraform stacks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one Terraform JSON document per stack plus a manifest
    Synth {
        /// Output directory
        #[arg(short, long, default_value = "cdktf.out")]
        output: PathBuf,

        /// YAML file overriding resource sizing
        #[arg(short, long)]
        sizing: Option<PathBuf>,
    },

    /// Print every stack output and the stacks that read it
    Bindings {
        /// YAML file overriding resource sizing
        #[arg(short, long)]
        sizing: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Synth { output, sizing } => synth(&output, sizing.as_ref()).await,
        Commands::Bindings { sizing } => bindings(sizing.as_ref()).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

async fn synth(output: &PathBuf, sizing: Option<&PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(sizing).await?;
    let (app, outputs) = app::compose(&settings)?;

    app.synth(output)
        .with_context(|| format!("Unable to synthesize into {}", output.display()))?;
    info!(
        environment = %settings.environment_name,
        application_url = %outputs.application_url.expression,
        "Stacks ready for terraform"
    );

    return Ok(());
}

async fn bindings(sizing: Option<&PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(sizing).await?;
    let (app, _) = app::compose(&settings)?;

    for report in app.bindings() {
        let consumers: Vec<&str> = report.consumers.iter().map(|stack| stack.id).collect();
        println!(
            "{}.{} -> {}",
            report.binding.producer.id,
            report.binding.name,
            if consumers.is_empty() {
                String::from("(operator)")
            } else {
                consumers.join(", ")
            }
        );
    }

    return Ok(());
}

/// Reads the process environment once. `.env.{APP_ENV}` fills in anything
/// the environment does not already set.
async fn load_settings(sizing: Option<&PathBuf>) -> anyhow::Result<config::Settings> {
    let environment_name = std::env::var("APP_ENV")
        .unwrap_or_else(|_| String::from(config::DEFAULT_ENVIRONMENT_NAME));
    if let Ok(path) = dotenvy::from_filename(format!(".env.{}", environment_name)) {
        info!(path = %path.display(), "Loaded environment file");
    }

    let vars: HashMap<String, String> = std::env::vars().collect();
    let region = config::resolve_region(vars.get("AWS_REGION").cloned()).await;

    let sizing = match sizing {
        Some(path) => config::parse_sizing(path)?,
        None => config::Sizing::default(),
    };

    let settings = config::Settings::from_lookup(|name| vars.get(name).cloned(), region, sizing)?;
    info!(
        project = %settings.project_name,
        environment = %settings.environment_name,
        region = %settings.region,
        "Loaded settings"
    );

    return Ok(settings);
}
