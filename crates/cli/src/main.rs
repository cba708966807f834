//! Intent Engine CLI
//!
//! A thin wrapper around intent-engine-core: one-shot classification of a
//! single text, or an interactive session that carries the dialog context
//! from turn to turn.

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use intent_engine_core::{Context, IntentEngine, IntentResult, LlmSlotFiller, NormalizingPreprocessor, RuleSet};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "intent-engine")]
#[command(about = "Classify text into intents and fill slots using declarative rules")]
struct Args {
    /// Text to classify; omit to start an interactive session
    text: Option<String>,

    /// Config directory (default: ./config, then the user config dir)
    #[arg(long = "config")]
    config_dir: Option<PathBuf>,

    /// Initial request context as JSON, e.g. '{"last_intent":"refund"}'
    #[arg(long)]
    context: Option<String>,

    /// Use a registered slot filler by name instead of the default
    #[arg(long = "slot-filler")]
    slot_filler: Option<String>,

    /// Enable a gated recognizer (repeatable), e.g. --trigger outage_report
    #[arg(long = "trigger")]
    triggers: Vec<String>,

    /// Fill missing required slots with the LLM configured in [llm]
    #[arg(long = "use-llm")]
    use_llm: bool,

    /// Per-recognizer timeout in milliseconds (overrides [engine])
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Normalize full-width characters and whitespace before matching
    #[arg(long)]
    normalize: bool,

    /// Enable verbose debug output
    #[arg(long, short = 'v')]
    verbose: bool,
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// `--config`, else `./config`, else `<user config dir>/intent-engine`
fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        if dir.is_dir() {
            return Ok(dir.to_path_buf());
        }
        bail!("Config directory not found: {}", dir.display());
    }

    let mut tried = vec![PathBuf::from("config")];
    if let Some(user_dir) = dirs::config_dir() {
        tried.push(user_dir.join("intent-engine"));
    }

    tried.iter().find(|dir| dir.is_dir()).cloned().ok_or_else(|| {
        let list: Vec<String> = tried.iter().map(|p| p.display().to_string()).collect();
        anyhow!("No config directory found (tried: {}); pass --config", list.join(", "))
    })
}

fn build_context(args: &Args) -> Result<Context> {
    let mut ctx = match &args.context {
        Some(json) => serde_json::from_str::<Context>(json).context("Invalid --context JSON")?,
        None => Context::new(),
    };
    if let Some(name) = &args.slot_filler {
        ctx.slot_filler = Some(name.clone());
    }
    ctx.triggers.extend(args.triggers.iter().cloned());
    Ok(ctx)
}

fn build_engine(args: &Args, dir: &Path) -> Result<IntentEngine> {
    let rules = RuleSet::load_dir(dir).with_context(|| format!("Failed to load config from {}", dir.display()))?;
    let rules = Arc::new(rules);

    let mut builder = IntentEngine::builder(Arc::clone(&rules));
    if let Some(ms) = args.timeout_ms {
        builder = builder.recognizer_timeout(Duration::from_millis(ms));
    }
    if args.normalize {
        builder = builder.preprocessor(Box::new(NormalizingPreprocessor));
    }
    if args.use_llm {
        let settings = rules
            .llm()
            .ok_or_else(|| anyhow!("--use-llm requires an [llm] section in {}", dir.display()))?;
        builder = builder.fallback(Arc::new(LlmSlotFiller::from_settings(settings)?));
    }

    builder.build().context("Failed to build intent engine")
}

// ============================================================================
// Output
// ============================================================================

fn render(result: &IntentResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

// ============================================================================
// Interactive Session
// ============================================================================

fn run_session(engine: &IntentEngine, mut ctx: Context) -> Result<()> {
    println!("intent-engine: type a message (:reset clears the dialog, q to quit)");
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();

        match line {
            "" => continue,
            "q" | "quit" | "exit" => break,
            ":reset" => {
                ctx.reset_dialog();
                println!("dialog reset");
                continue;
            }
            ":context" => {
                println!("{}", serde_json::to_string_pretty(&ctx)?);
                continue;
            }
            _ => {}
        }

        let result = engine.process_turn(line, &mut ctx);
        println!("{}", render(&result)?);
        println!("# {}", result.reasoning());
    }

    Ok(())
}

fn main() -> Result<()> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let dir = resolve_config_dir(args.config_dir.as_deref())?;
    let engine = build_engine(&args, &dir)?;
    let ctx = build_context(&args)?;

    match &args.text {
        Some(text) => {
            let result = engine.process(text, &ctx);
            println!("{}", render(&result)?);
            eprintln!("{}", result.reasoning());
        }
        None => run_session(&engine, ctx)?,
    }

    Ok(())
}
