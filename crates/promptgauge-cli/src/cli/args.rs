use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptgauge",
    version,
    about = "Evaluation runs and regression gates for LLM prompt versions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a suite against its configured models and evaluators
    Run(RunArgs),
    /// Re-run evaluators over an existing run's outputs
    Evaluate(EvaluateArgs),
    /// Compare the latest completed runs of two prompt versions
    Compare(CompareArgs),
    /// List recorded runs
    Runs(RunsArgs),
    /// Summarize the latest completed run per prompt version
    Versions(VersionsArgs),
    /// List available evaluators
    Evaluators,
    /// Record a human annotation on an output
    Annotate(AnnotateArgs),
    /// Report evaluator agreement against human annotations
    Accuracy(AccuracyArgs),
    Version,
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    #[arg(long, default_value = "suite.yaml")]
    pub config: PathBuf,
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,

    /// use the scripted offline client instead of real providers
    #[arg(long)]
    pub offline: bool,

    /// skip the comparison against the previous run of the same version
    #[arg(long)]
    pub no_compare: bool,

    /// output format: text|json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct EvaluateArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub run_id: i64,

    /// evaluators to run; defaults to all registered
    #[arg(long, value_delimiter = ',')]
    pub evaluators: Vec<String>,

    /// use the scripted offline client instead of real providers
    #[arg(long)]
    pub offline: bool,
}

#[derive(Parser, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,

    /// prompt version serving as the baseline
    #[arg(long)]
    pub baseline: String,

    /// prompt version under test
    #[arg(long)]
    pub current: String,

    /// pass-rate drop in percentage points that flags a regression
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Parser, Clone)]
pub struct RunsArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub prompt_version: Option<String>,

    /// filter by status: pending|running|completed|failed
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long, default_value_t = 20)]
    pub limit: u32,
}

#[derive(Parser, Clone)]
pub struct VersionsArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,
}

#[derive(Parser, Clone)]
pub struct AnnotateArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,

    #[arg(long)]
    pub output_id: i64,

    /// evaluator dimension being annotated, e.g. hallucination
    #[arg(long = "type")]
    pub annotation_type: String,

    /// human verdict, e.g. correct / incorrect / pass / fail
    #[arg(long)]
    pub label: String,

    #[arg(long)]
    pub notes: Option<String>,

    #[arg(long)]
    pub created_by: Option<String>,
}

#[derive(Parser, Clone)]
pub struct AccuracyArgs {
    #[arg(long, default_value = ".promptgauge/gauge.db")]
    pub db: PathBuf,
}
