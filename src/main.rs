use clap::Parser;
use serde::Serialize;
use slice_pipeline::config::{CliCommand, SliceArgs};
use slice_pipeline::core::pipeline::SliceRequest;
use slice_pipeline::utils::error::SliceError;
use slice_pipeline::utils::{logger, validation::Validate};
use slice_pipeline::{CliConfig, ProcessEngine, SlicePipeline, SlicerConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting slice-pipeline CLI");
    if cli.verbose {
        tracing::debug!("CLI arguments: {:?}", cli);
    }

    let config = match cli.load_config().and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    if cli.monitor {
        tracing::info!("🔍 Stage monitoring enabled");
    }

    let outcome = match &cli.command {
        CliCommand::Profiles => list_profiles(config),
        CliCommand::Profile { id } => show_profile(config, id),
        CliCommand::Slice(args) => slice(config, args, cli.monitor).await,
    };

    if let Err(e) = outcome {
        tracing::error!(
            "❌ Slicing failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

        std::process::exit(e.exit_code());
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SliceError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_profiles(config: SlicerConfig) -> Result<(), SliceError> {
    let store = slice_pipeline::ProfileStore::new(config.paths.profiles_dir);
    let summaries = store.list()?;
    tracing::info!("📋 {} profiles in {}", summaries.len(), store.base_path().display());
    print_json(&summaries)
}

fn show_profile(config: SlicerConfig, id: &str) -> Result<(), SliceError> {
    let store = slice_pipeline::ProfileStore::new(config.paths.profiles_dir);
    print_json(&store.get(id)?)
}

async fn slice(config: SlicerConfig, args: &SliceArgs, monitor: bool) -> Result<(), SliceError> {
    let request = SliceRequest {
        profile: args.profile.clone(),
        overrides: args.overrides()?,
    };

    let engine = ProcessEngine::from_config(&config);
    let pipeline = SlicePipeline::new(config, engine).with_monitoring(monitor);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping the engine");
            ctrl_c_token.cancel();
        }
    });

    let result = pipeline.slice_mesh(&args.mesh, &request, &cancel).await?;

    tracing::info!("✅ Slicing completed successfully!");
    tracing::info!("📁 G-code saved to: {}", result.output_path.display());
    print_json(&result)
}
