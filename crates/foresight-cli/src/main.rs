//! Foresight - LLM ensemble forecasting from the command line.
//!
//! Asks several language models the same forecasting question repeatedly,
//! extracts a probability from every answer and aggregates the ensemble.
//!
//! # Exit Codes
//!
//! - `0`: Success
//! - `1`: Configuration, usage or connection error
//! - `2`: The run finished without a single successful response

mod cli;
mod progress_bar;
mod report;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use foresight_core::{extract_details, extract_with_strategy, is_refusal, Aggregator};
use foresight_runtime::{
    build_forecast_prompt, open_cache, DryRunBackend, EnsembleScheduler, ModelBackend,
    ModelRegistry, OpenRouterBackend, ProgressSink, QueryClient, QueryOptions, ResponseCache,
    RunUsage, RuntimeConfig, RuntimeError,
};

use cli::{CacheAction, Cli, Command, ModelsArgs, RunArgs};
use progress_bar::BarProgress;
use report::{ForecastReport, PromptRecord, ReportMetadata};

const EXIT_NO_SUCCESS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    init_logging(cli.log_level());

    match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the logging system. `RUST_LOG` overrides the flag-derived level.
fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn dispatch(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Command::Run(args) => handle_run(cli, args).await,
        Command::Extract { file } => handle_extract(file.as_deref()),
        Command::Models(args) => handle_models(cli, args).await,
        Command::Cache { action } => handle_cache(cli, *action).await,
        Command::Check { model } => handle_check(cli, model).await,
        Command::InitConfig => {
            let yaml = RuntimeConfig::default()
                .to_yaml()
                .context("Failed to render default config")?;
            print!("{}", yaml);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load `--config`, else `./foresight.yaml` when present, else defaults.
fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let config = match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::load_default()
            .context("Failed to load foresight.yaml")?
            .unwrap_or_default(),
    };
    Ok(config)
}

fn provider_backend(config: &RuntimeConfig) -> Result<Arc<dyn ModelBackend>> {
    let backend = OpenRouterBackend::from_config(&config.api)
        .context("Failed to set up the model provider")?;
    Ok(Arc::new(backend))
}

async fn handle_run(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    let started = Instant::now();
    let mut config = load_config(cli.config.as_deref())?;

    let registry = ModelRegistry::from_config(&config.registry);
    let group = match &args.group {
        Some(name) => Some(
            registry
                .group(name)
                .ok_or_else(|| anyhow!("Unknown model group '{}'", name))?
                .to_vec(),
        ),
        None => None,
    };
    args.apply_to(&mut config, group.as_deref());
    config.validate_for_run().context("Invalid run configuration")?;

    let backend: Arc<dyn ModelBackend> = if args.dry_run {
        Arc::new(DryRunBackend::new())
    } else {
        provider_backend(&config)?
    };

    let cache = open_cache(&config)
        .await
        .context("Failed to open response cache")?;
    let client = Arc::new(QueryClient::from_config(
        backend,
        &config,
        cache.clone(),
    ));

    let mut options = QueryOptions::from(&config.ensemble);
    options.use_cache = config.cache.enabled;
    options.force_refresh = args.refresh;

    let ensemble = &config.ensemble;
    let question = args.question();
    let prompt = build_forecast_prompt(&question);

    if !cli.quiet {
        println!("🔮 Running ensemble forecast");
        println!("   Backend: {}", client.backend_name());
        println!("   Models: {}", ensemble.models.join(", "));
        println!(
            "   Iterations: {} per model, concurrency {}",
            ensemble.iterations_per_model, ensemble.concurrency_limit
        );
    }

    let total = ensemble.models.len() as u64 * u64::from(ensemble.iterations_per_model);
    let bar = Arc::new(if cli.quiet {
        BarProgress::hidden()
    } else {
        BarProgress::new(total)
    });
    let scheduler = EnsembleScheduler::new(client.clone())
        .with_options(options)
        .with_progress(bar.clone() as Arc<dyn ProgressSink>);

    let outcome = scheduler
        .run(
            &ensemble.models,
            &prompt,
            ensemble.iterations_per_model,
            ensemble.concurrency_limit,
        )
        .await;

    let (results, code) = match outcome {
        Ok(results) => {
            bar.finish("done");
            (results, ExitCode::SUCCESS)
        }
        Err(RuntimeError::NoSuccessfulCalls { results }) => {
            bar.finish("no successful responses");
            error!(calls = results.len(), "No model returned a usable response");
            (results, ExitCode::from(EXIT_NO_SUCCESS))
        }
        Err(e) => return Err(e).context("Ensemble run failed"),
    };

    if let (Some(cache), Some(path)) = (&cache, &config.cache.path) {
        match cache.save_snapshot(path).await {
            Ok(saved) => info!(entries = saved, path = %path.display(), "Saved response cache"),
            Err(e) => warn!(error = %e, path = %path.display(), "Failed to save response cache"),
        }
    }

    let statistics = Aggregator::new()
        .with_calibration(config.calibration)
        .aggregate(&results);

    let report = ForecastReport {
        metadata: ReportMetadata {
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            backend: client.backend_name().to_string(),
            models: ensemble.models.clone(),
            iterations_per_model: ensemble.iterations_per_model,
            concurrency_limit: ensemble.concurrency_limit,
            temperature: ensemble.temperature,
            max_tokens: ensemble.max_tokens,
            web_search: ensemble.enable_web_search,
            calibration: config.calibration,
            duration_seconds: started.elapsed().as_secs_f64(),
        },
        prompt: PromptRecord {
            question,
            text: prompt,
        },
        statistics,
        usage: RunUsage::from_results(&results),
        results,
    };

    print!("{}", report::format_summary(&report));

    if let Some(path) = &args.output {
        report::write_json_report(&report, path)?;
        println!("\n📝 Report written to {}", path.display());
    }

    Ok(code)
}

fn handle_extract(file: Option<&Path>) -> Result<ExitCode> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    match extract_with_strategy(&text) {
        Some(found) => println!("{:.1}% ({})", found.probability, found.strategy),
        None => println!("not found"),
    }

    if is_refusal(&text) {
        println!("⚠️  The response looks like a refusal");
    }

    if let Some(details) = extract_details(&text) {
        println!(
            "{}",
            serde_json::to_string_pretty(&details).context("Failed to render details")?
        );
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_models(cli: &Cli, args: &ModelsArgs) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let registry = ModelRegistry::from_config(&config.registry);

    if args.remote {
        let listed = match provider_backend(&config) {
            Ok(backend) => backend.list_models().await.map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };
        match listed {
            Ok(models) => {
                for id in models {
                    println!("{}", id);
                }
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) => warn!(error = %format!("{:#}", e), "Provider listing failed, showing registry"),
        }
    }

    let models: Vec<_> = match &args.group {
        Some(name) => registry
            .group(name)
            .ok_or_else(|| anyhow!("Unknown model group '{}'", name))?
            .iter()
            .map(|id| registry.get(id))
            .collect(),
        None => registry.models().cloned().collect(),
    };

    for info in models.iter().filter(|m| !args.free || m.is_free) {
        println!(
            "{:<50} {:<12} {:>6} tokens{}",
            info.id,
            info.category,
            info.max_tokens,
            if info.is_free { "  free" } else { "" }
        );
    }

    if args.group.is_none() && !args.free {
        let groups: Vec<&str> = registry.group_names().collect();
        println!("\nGroups: {}", groups.join(", "));
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_cache(cli: &Cli, action: CacheAction) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let Some(path) = config.cache.path.as_deref() else {
        bail!("No cache snapshot configured; set cache.path in the config file");
    };

    let cache = ResponseCache::new(config.cache.max_entries, config.cache.ttl);
    let loaded = cache
        .load_snapshot(path)
        .await
        .with_context(|| format!("Failed to read cache snapshot {}", path.display()))?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await;
            println!("📦 Cache snapshot: {}", path.display());
            println!("   Active entries: {}", stats.active_entries);
            println!("   Expired entries: {}", stats.expired_entries);
            for (model, count) in &stats.by_model {
                println!("     {:<50} {}", model, count);
            }
        }
        CacheAction::Clear => {
            cache.clear().await;
            cache
                .save_snapshot(path)
                .await
                .with_context(|| format!("Failed to write cache snapshot {}", path.display()))?;
            println!("🧹 Removed {} cached responses", loaded);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_check(cli: &Cli, model: &str) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let client = QueryClient::from_config(provider_backend(&config)?, &config, None);

    println!("🔌 Testing {} via {}...", model, client.backend_name());
    if client.test_connection(model).await {
        println!("✅ Connection OK");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("❌ Connection failed");
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use foresight_core::{CallResult, TokenUsage};
    use foresight_runtime::ForecastQuestion;

    #[tokio::test]
    async fn test_dry_run_leaves_cache_snapshot_untouched() {
        let dir = std::env::temp_dir().join(format!("foresight-dry-run-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let snapshot = dir.join("cache.json");
        let config_path = dir.join("foresight.yaml");
        let report_path = dir.join("report.json");

        let prompt = build_forecast_prompt(&ForecastQuestion::new("Will it rain?"));
        let cache = ResponseCache::default();
        cache
            .set(
                "a/one",
                &prompt,
                CallResult::success("a/one", "HAUPTPROGNOSE: 99%", Some(99.0), TokenUsage::default()),
            )
            .await;
        cache.save_snapshot(&snapshot).await.unwrap();
        let before = std::fs::read(&snapshot).unwrap();

        std::fs::write(
            &config_path,
            format!("cache:\n  path: {}\n", snapshot.display()),
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "foresight",
            "--quiet",
            "--config",
            config_path.to_str().unwrap(),
            "run",
            "-q",
            "Will it rain?",
            "-m",
            "a/one",
            "-i",
            "2",
            "--dry-run",
            "-o",
            report_path.to_str().unwrap(),
        ])
        .unwrap();
        let Command::Run(args) = &cli.command else {
            panic!("expected run");
        };
        assert!(handle_run(&cli, args).await.is_ok());

        assert_eq!(std::fs::read(&snapshot).unwrap(), before);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        let results = report["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r["source"] == "api"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
