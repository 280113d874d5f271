use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use lumen_core::{GenerationRequest, LoadOptions, PerformanceMode};
use lumen_hwprof::ThermalState;

#[derive(Parser)]
#[command(name = "lumen", author, version, about = "On-device LLM inference host", long_about = None)]
pub struct Cli {
    /// Tracing filter directives, e.g. `lumen_core=debug`. Falls back to RUST_LOG.
    #[arg(long, global = true, env = "LUMEN_LOG")]
    pub log_filter: Option<String>,

    /// Raise the default log level (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn default_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a single completion for a prompt and exit.
    Run(RunArgs),
    /// Interactive multi-turn chat over one session.
    Chat(ChatArgs),
    /// Print the embedding vector of a text as JSON.
    Embed(EmbedArgs),
    /// Show the device profile and the recommended engine settings.
    Profile(ProfileArgs),
}

#[derive(Args, Clone)]
pub struct ModelArgs {
    /// Path to the model file.
    #[arg(short, long)]
    pub model: PathBuf,

    /// Backend plugin library.
    #[arg(long, env = "LUMEN_PLUGIN")]
    pub plugin: Option<PathBuf>,

    /// Engine config JSON (defaults to the file under the Lumen data dir, if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub quantization: Option<String>,

    #[arg(long)]
    pub context_size: Option<usize>,

    #[arg(long)]
    pub threads: Option<usize>,

    /// performance | balanced | powersave | low-memory
    #[arg(long)]
    pub mode: Option<PerformanceMode>,

    /// Derive context size, mode and thread ceiling from the device profile.
    #[arg(long)]
    pub auto_tune: bool,
}

impl ModelArgs {
    pub fn load_options(&self) -> LoadOptions {
        let mut opts = LoadOptions::new(&self.model);
        if let Some(q) = &self.quantization {
            opts = opts.quantization(q.clone());
        }
        if let Some(n) = self.context_size {
            opts = opts.context_size(n);
        }
        if let Some(n) = self.threads {
            opts = opts.thread_count(n);
        }
        opts
    }
}

#[derive(Args, Clone, Default)]
pub struct SamplingArgs {
    #[arg(long)]
    pub max_tokens: Option<usize>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub top_k: Option<u32>,

    #[arg(long)]
    pub top_p: Option<f32>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop sequence; repeat for several.
    #[arg(long = "stop")]
    pub stop: Vec<String>,

    /// Force sparse attention on or off for the request.
    #[arg(long)]
    pub sparse: Option<bool>,
}

impl SamplingArgs {
    pub fn request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_k: self.top_k,
            top_p: self.top_p,
            seed: self.seed,
            stop: self.stop.clone(),
            use_sparse_attention: self.sparse,
            cancel: None,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,

    /// Print performance metrics as JSON after the completion.
    #[arg(long)]
    pub stats: bool,

    pub prompt: String,
}

#[derive(Args)]
pub struct ChatArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub sampling: SamplingArgs,
}

#[derive(Args)]
pub struct EmbedArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    pub text: String,
}

#[derive(Args)]
pub struct ProfileArgs {
    /// Re-probe the hardware and rewrite the cache if it changed.
    #[arg(long)]
    pub refresh: bool,

    /// Battery level in 0.0..=1.0 for the mode recommendation.
    #[arg(long, default_value_t = 1.0)]
    pub battery: f32,

    /// nominal | fair | serious | critical
    #[arg(long, default_value = "nominal")]
    pub thermal: ThermalState,
}
