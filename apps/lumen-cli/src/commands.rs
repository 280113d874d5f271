use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use lumen_core::{
    EngineConfig, Generation, PerformanceMode, SessionHandle, SessionInfo, SessionManager,
};
use lumen_hwprof::{
    engine_config_path, hwprof_profile_path, load_or_detect, recommended_mode, recommended_model,
    tune_engine_config, validate_or_redetect, ThermalState,
};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{ChatArgs, EmbedArgs, ModelArgs, ProfileArgs, RunArgs, SamplingArgs};
use crate::plugin::{PluginBackend, load_plugin_once};

type Manager = SessionManager<PluginBackend>;

/// Defaults < config file < `LUMEN_*` env < device profile (with `--auto-tune`) < `--mode`.
pub fn engine_config(args: &ModelArgs) -> Result<EngineConfig> {
    let mut cfg = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => {
            let path = engine_config_path();
            if path.exists() {
                EngineConfig::from_file(&path)?
            } else {
                EngineConfig::from_env()
            }
        }
    };
    if args.auto_tune {
        let profile = load_or_detect(&hwprof_profile_path()).context("device profile")?;
        cfg = tune_engine_config(cfg, &profile, 1.0, ThermalState::Nominal);
        info!(tier = %profile.tier, mode = %cfg.default_mode, "engine config tuned for device");
    }
    if let Some(mode) = args.mode {
        cfg.default_mode = mode;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Open the plugin, build the manager and load the model.
fn open_session(args: &ModelArgs) -> Result<(Arc<Manager>, SessionInfo)> {
    let cfg = engine_config(args)?;
    load_plugin_once(args.plugin.as_deref()).map_err(|e| anyhow!(e))?;

    let manager = Arc::new(Manager::new(cfg));
    let info = manager
        .load_model(args.load_options())
        .with_context(|| format!("load {}", args.model.display()))?;
    info!(
        handle = %info.handle,
        quantization = %info.quantization,
        context_size = info.context_size,
        threads = info.thread_count,
        "session ready"
    );
    Ok((manager, info))
}

/// Ctrl-C cancels an in-flight generation; with nothing running it exits.
fn install_interrupt(manager: &Arc<Manager>) -> Result<()> {
    let m = Arc::clone(manager);
    ctrlc::set_handler(move || {
        if !m.cancel_generation(m.current_handle()) {
            std::process::exit(130);
        }
    })
    .context("install Ctrl-C handler")
}

fn stream_reply(
    manager: &Manager,
    handle: SessionHandle,
    sampling: &SamplingArgs,
    prompt: &str,
) -> lumen_core::Result<Generation> {
    let mut out = io::stdout().lock();
    let res = manager.generate_stream(handle, sampling.request(prompt), |delta| {
        let _ = out.write_all(delta.as_bytes());
        let _ = out.flush();
    });
    let _ = writeln!(out);
    res
}

pub fn run(args: RunArgs) -> Result<()> {
    let (manager, info) = open_session(&args.model)?;
    install_interrupt(&manager)?;

    let reply = stream_reply(&manager, info.handle, &args.sampling, &args.prompt)?;
    info!(
        tokens = reply.tokens_generated,
        finish = ?reply.finish,
        tps = format!("{:.1}", reply.tokens_per_second),
        "completion finished"
    );

    if args.stats {
        let metrics = manager.performance_metrics(info.handle)?;
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    }
    manager.free_model(info.handle);
    Ok(())
}

pub fn embed(args: EmbedArgs) -> Result<()> {
    let (manager, info) = open_session(&args.model)?;
    let vector = manager.embed(info.handle, &args.text)?;
    println!("{}", serde_json::to_string(&vector)?);
    manager.free_model(info.handle);
    Ok(())
}

pub fn profile(args: ProfileArgs) -> Result<()> {
    let path = hwprof_profile_path();
    let profile = if args.refresh {
        validate_or_redetect(&path)?
    } else {
        load_or_detect(&path)?
    };
    let out = json!({
        "profile": profile,
        "recommendedMode": recommended_mode(&profile, args.battery, args.thermal),
        "recommendedModel": recommended_model(&profile),
        "cachePath": path,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Slash commands understood by the chat loop.
#[derive(Debug, PartialEq)]
enum ChatCommand {
    Quit,
    Clear,
    Boundary,
    Stats,
    Mode(PerformanceMode),
    Help,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<ChatCommand> {
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let cmd = match parts.next().unwrap_or("") {
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "clear" => ChatCommand::Clear,
        "boundary" => ChatCommand::Boundary,
        "stats" => ChatCommand::Stats,
        "help" => ChatCommand::Help,
        "mode" => match parts.next().map(str::parse::<PerformanceMode>) {
            Some(Ok(mode)) => ChatCommand::Mode(mode),
            Some(Err(e)) => ChatCommand::Unknown(e),
            None => ChatCommand::Unknown("usage: /mode <performance|balanced|powersave|low-memory>".into()),
        },
        other => ChatCommand::Unknown(format!("unknown command /{other}")),
    };
    Some(cmd)
}

const CHAT_HELP: &str = "/clear  /mode <m>  /stats  /boundary  /quit";

pub fn chat(args: ChatArgs) -> Result<()> {
    let (manager, info) = open_session(&args.model)?;
    install_interrupt(&manager)?;
    let handle = info.handle;
    eprintln!("chatting with {} ({CHAT_HELP})", info.model_path.display());

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("> ");
        io::stderr().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(cmd) = parse_command(line) {
            match cmd {
                ChatCommand::Quit => break,
                ChatCommand::Clear => {
                    manager.clear_kv_cache(handle);
                    eprintln!("context cleared");
                }
                ChatCommand::Boundary => manager.add_message_boundary(handle),
                ChatCommand::Stats => {
                    let m = manager.metrics_or_default(handle);
                    eprintln!("{}", serde_json::to_string_pretty(&m)?);
                }
                ChatCommand::Mode(mode) => match manager.adjust_performance_mode(handle, mode) {
                    Some(rt) => eprintln!("mode {mode}: {} threads, batch {}", rt.threads, rt.batch_size),
                    None => eprintln!("no model loaded"),
                },
                ChatCommand::Help => eprintln!("{CHAT_HELP}"),
                ChatCommand::Unknown(msg) => eprintln!("{msg}"),
            }
            continue;
        }

        match stream_reply(&manager, handle, &args.sampling, line) {
            Ok(_) => {}
            Err(lumen_core::EngineError::Cancelled) => eprintln!("[cancelled]"),
            Err(e) => warn!("generation failed: {e}"),
        }
        manager.add_message_boundary(handle);
    }

    manager.free_model(handle);
    Ok(())
}
