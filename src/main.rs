//! triage - staged repair of failing end-to-end tests
//!
//! Reads a failure context from JSON, runs the orchestrator against the
//! configured backend and prints the recommended fix.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use triage::{
    create_llm_client, ErrorContext, LlmConfig, OrchestrationResult, Orchestrator,
    SingleShotFixer, TriageError, TriageSettings,
};

#[derive(Parser)]
#[command(name = "triage")]
#[command(version)]
#[command(about = "Diagnose a failing end-to-end test and propose a fix", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding .triage/settings.json (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the staged pipeline on one failure
    Fix {
        /// JSON file with the failure context
        #[arg(short, long, value_name = "FILE")]
        context: PathBuf,

        /// Maximum fix/review rounds
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Minimum final confidence (0-100)
        #[arg(long)]
        min_confidence: Option<u8>,

        /// Accept the first sufficiently confident fix without review
        #[arg(long)]
        no_review: bool,

        /// Do not fall back to a single-shot fix when the pipeline fails
        #[arg(long)]
        no_fallback: bool,

        /// Wall-clock budget for the whole run in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Backend to use: openai or claude
        #[arg(long, env = "TRIAGE_PROVIDER")]
        provider: Option<String>,

        /// Model identifier passed to the backend
        #[arg(long)]
        model: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as JSON
    Config,
}

struct FixArgs {
    context: PathBuf,
    max_iterations: Option<u32>,
    min_confidence: Option<u8>,
    no_review: bool,
    no_fallback: bool,
    timeout_ms: Option<u64>,
    provider: Option<String>,
    model: Option<String>,
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for results
    let filter = if cli.verbose {
        "triage=debug,info"
    } else {
        "triage=info,warn"
    };

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let outcome = match cli.command {
        Commands::Fix {
            context,
            max_iterations,
            min_confidence,
            no_review,
            no_fallback,
            timeout_ms,
            provider,
            model,
            json,
        } => {
            let args = FixArgs {
                context,
                max_iterations,
                min_confidence,
                no_review,
                no_fallback,
                timeout_ms,
                provider,
                model,
                json,
            };
            run_fix(&cli.project, args).await
        }
        Commands::Config => show_config(&cli.project),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    }
}

fn load_settings(project: &Path) -> triage::Result<TriageSettings> {
    let settings = TriageSettings::load(project)?;
    settings.validate()?;
    Ok(settings)
}

fn show_config(project: &Path) -> triage::Result<i32> {
    let settings = load_settings(project)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(0)
}

async fn run_fix(project: &Path, args: FixArgs) -> triage::Result<i32> {
    let mut settings = TriageSettings::load(project)?;

    let orchestrator_config = &mut settings.orchestrator;
    if let Some(n) = args.max_iterations {
        orchestrator_config.max_iterations = n;
    }
    if let Some(c) = args.min_confidence {
        orchestrator_config.min_confidence = c;
    }
    if let Some(ms) = args.timeout_ms {
        orchestrator_config.total_timeout_ms = ms;
    }
    if args.no_review {
        orchestrator_config.require_review = false;
    }
    if args.no_fallback {
        orchestrator_config.fallback_to_single_shot = false;
    }
    if let Some(provider) = args.provider {
        let provider = provider.to_lowercase();
        if provider != settings.llm.provider && args.model.is_none() {
            // The configured model belongs to the other backend
            settings.llm.model = match provider.as_str() {
                "claude" => "sonnet".to_string(),
                _ => LlmConfig::default().model,
            };
        }
        settings.llm.provider = provider;
    }
    if let Some(model) = args.model {
        settings.llm.model = model;
    }
    settings.validate()?;

    let context = ErrorContext::load(&args.context)?;

    let client =
        create_llm_client(&settings.llm).map_err(|e| TriageError::backend(e.to_string()))?;
    if !client.available().await {
        return Err(TriageError::backend(format!(
            "{} backend is not available (check {} or the CLI install)",
            settings.llm.provider, settings.llm.api_key_env
        )));
    }

    let min_confidence = settings.orchestrator.min_confidence;
    let orchestrator = Orchestrator::new(Arc::clone(&client), settings.orchestrator)
        .with_fallback(Arc::new(
            SingleShotFixer::new(client).with_min_confidence(min_confidence),
        ));

    if !args.json {
        println!(
            "{} {} ({})",
            "Triage:".cyan().bold(),
            context.test_name,
            context.test_file
        );
    }

    let result = orchestrator.orchestrate(&context).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(if result.success { 0 } else { 1 })
}

fn print_summary(result: &OrchestrationResult) {
    let Some(fix) = &result.fix else {
        println!(
            "\n{} {}",
            "FAILED".red().bold(),
            result.error.as_deref().unwrap_or("no fix produced")
        );
        println!(
            "   iterations: {}, time: {}ms",
            result.iterations, result.total_time_ms
        );
        return;
    };

    println!(
        "\n{} {} (confidence {}, {} approach, {} iteration(s), {}ms)",
        "OK".green().bold(),
        fix.summary.bold(),
        fix.confidence,
        result.approach,
        result.iterations,
        result.total_time_ms
    );

    if !fix.reasoning.is_empty() {
        println!("\n{}\n   {}", "Reasoning:".cyan(), fix.reasoning);
    }

    for (i, change) in fix.proposed_changes.iter().enumerate() {
        let location = match change.line {
            Some(line) => format!("{}:{}", change.file, line),
            None => change.file.clone(),
        };
        println!("\n{} #{} {}", "Change".cyan().bold(), i + 1, location.bold());
        for line in change.old_code.lines() {
            println!("   {}", format!("- {}", line).red());
        }
        for line in change.new_code.lines() {
            println!("   {}", format!("+ {}", line).green());
        }
        if !change.justification.is_empty() {
            println!("   {}", change.justification.dimmed());
        }
    }
}
