//! Command-line argument parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use foresight_runtime::{ForecastQuestion, RuntimeConfig};

/// Foresight - ensemble probability forecasts from many language models.
///
/// Asks several models the same forecasting question many times and
/// aggregates the answers into one calibrated estimate.
///
/// # Examples
///
/// ```bash
/// # Offline run against the deterministic dry-run backend
/// foresight run --dry-run -q "Will the ECB cut rates before 2027?" -m a/one -m b/two
///
/// # Real run over a model group, writing a JSON report
/// foresight run -q "..." --group flagship_free --iterations 5 -o report.json
///
/// # Extract a probability from saved model output
/// foresight extract answer.txt
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ./foresight.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors and results
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run an ensemble forecast
    Run(RunArgs),

    /// Extract a probability from a model response (file or stdin)
    Extract {
        /// File holding the response text; stdin when omitted
        file: Option<PathBuf>,
    },

    /// List known models
    Models(ModelsArgs),

    /// Inspect or clear the response cache snapshot
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Send a tiny prompt to check the backend connection
    Check {
        /// Model to test with
        #[arg(short, long, default_value = "openai/gpt-4o-mini")]
        model: String,
    },

    /// Print the default configuration as YAML
    InitConfig,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry counts per model
    Stats,
    /// Remove every entry
    Clear,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ModelsArgs {
    /// Only list the members of this group
    #[arg(short, long)]
    pub group: Option<String>,

    /// Only list free models
    #[arg(long)]
    pub free: bool,

    /// Ask the provider for its model list
    #[arg(long, conflicts_with_all = ["group", "free"])]
    pub remote: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// The forecasting question
    #[arg(short, long)]
    pub question: String,

    /// Resolution criteria
    #[arg(long)]
    pub definition: Option<String>,

    /// Timeframe the question resolves in
    #[arg(long)]
    pub timeframe: Option<String>,

    /// Background material for the models
    #[arg(long)]
    pub context: Option<String>,

    /// Model to query (repeatable); overrides the configured list
    #[arg(short, long = "model")]
    pub models: Vec<String>,

    /// Model group from the registry, added after any --model entries
    #[arg(short, long)]
    pub group: Option<String>,

    /// Iterations per model
    #[arg(short, long)]
    pub iterations: Option<u32>,

    /// Maximum queries in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Sampling temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Completion token budget before model floors
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Never request web search
    #[arg(long)]
    pub no_search: bool,

    /// Bypass the response cache entirely
    #[arg(long, conflicts_with = "refresh")]
    pub no_cache: bool,

    /// Ignore cached answers but store the fresh ones
    #[arg(long)]
    pub refresh: bool,

    /// Use the offline dry-run backend instead of the provider.
    /// Dry runs never read or write the response cache.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the JSON report here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the log level based on verbosity flags.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Validate arguments that clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Run(run) => run.validate(),
            Command::Check { model } if model.trim().is_empty() => {
                Err("Model must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl RunArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.question.trim().is_empty() {
            return Err("Question must not be empty".to_string());
        }

        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err("Model ids must not be empty".to_string());
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.iterations == Some(0) {
            return Err("Iterations must be at least 1".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_tokens == Some(0) {
            return Err("Max tokens must be at least 1".to_string());
        }

        Ok(())
    }

    /// The question block for the prompt builder.
    pub fn question(&self) -> ForecastQuestion {
        let mut question = ForecastQuestion::new(self.question.trim());
        question.definition = self.definition.clone();
        question.timeframe = self.timeframe.clone();
        question.context = self.context.clone();
        question
    }

    /// Merge flags over `config`. Flags win.
    ///
    /// `group_members` resolves `--group`; it is passed in so the lookup can
    /// use the registry built from the same config.
    pub fn apply_to(&self, config: &mut RuntimeConfig, group_members: Option<&[String]>) {
        let ensemble = &mut config.ensemble;

        if !self.models.is_empty() || group_members.is_some() {
            let mut models = self.models.clone();
            models.extend(group_members.unwrap_or_default().iter().cloned());
            ensemble.models = models;
        }
        if let Some(iterations) = self.iterations {
            ensemble.iterations_per_model = iterations;
        }
        if let Some(concurrency) = self.concurrency {
            ensemble.concurrency_limit = concurrency;
        }
        if let Some(temperature) = self.temperature {
            ensemble.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            ensemble.max_tokens = max_tokens;
        }
        if self.no_search {
            ensemble.enable_web_search = false;
        }
        if self.no_cache || self.dry_run {
            config.cache.enabled = false;
        }
    }
}
