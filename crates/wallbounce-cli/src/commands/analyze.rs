//! Implementation of the `wallbounce analyze` command.
//!
//! Runs one analysis and prints the consensus. With `--stream`, events
//! are printed as they arrive and pending approval requests are
//! reviewed interactively on the terminal.

use std::io::Write as _;

use tokio_util::sync::CancellationToken;
use wallbounce_core::approval::Decision;
use wallbounce_core::dispatch::DispatchMode;
use wallbounce_core::events::EventPayload;
use wallbounce_core::orchestrator::{AnalysisReport, AnalyzeOptions, Orchestrator};
use wallbounce_core::provider::TaskType;

use super::{build_orchestrator, exit_code_for, Paths, EXIT_CONFIG};

#[derive(clap::Args)]
pub struct AnalyzeArgs {
    /// The query to analyze
    pub query: String,

    /// Task tier: basic, premium, or critical
    #[arg(long, default_value = "basic")]
    pub task_type: String,

    /// Dispatch mode: parallel or sequential
    #[arg(long)]
    pub mode: Option<String>,

    /// Sequential chain depth (1-5)
    #[arg(long)]
    pub depth: Option<u32>,

    /// Minimum successful providers
    #[arg(long)]
    pub min_providers: Option<usize>,

    /// Continue an existing session (create one with `sessions new`)
    #[arg(long)]
    pub session: Option<String>,

    /// Print events as they arrive
    #[arg(long)]
    pub stream: bool,

    /// Include thinking events in streamed output
    #[arg(long)]
    pub include_thinking: bool,

    /// Cancel still-running providers once success is guaranteed
    #[arg(long)]
    pub eager: bool,

    /// Retry with more providers on low consensus
    #[arg(long)]
    pub auto_escalate: bool,

    /// Sandbox for tool calls: read-only, isolated, or full-access
    #[arg(long)]
    pub sandbox: Option<String>,
}

/// Execute the `wallbounce analyze` command. Returns the process exit code.
pub async fn execute(paths: &Paths, args: AnalyzeArgs) -> i32 {
    let orchestrator = match build_orchestrator(paths).await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return code,
    };

    let opts = match resolve_options(&orchestrator, &args) {
        Ok(opts) => opts,
        Err(message) => {
            eprintln!("error: {message}");
            return EXIT_CONFIG;
        }
    };

    // Ctrl-C cancels the analysis; providers are signaled and a
    // terminal `canceled` event is emitted.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ncanceling...");
                cancel.cancel();
            }
        });
    }

    let result = if args.stream {
        run_streaming(&orchestrator, &args, opts, cancel).await
    } else {
        orchestrator.analyze(&args.query, &opts, &cancel).await
    };

    match result {
        Ok(report) => {
            print_report(&report);
            0
        }
        Err(err) => {
            let failure = err.report();
            eprintln!("analysis failed ({}): {}", failure.kind, failure.message);
            for detail in &failure.details {
                eprintln!("  {}: {} ({})", detail.provider_id, detail.message, detail.reason_code);
            }
            exit_code_for(&err)
        }
    }
}

async fn run_streaming(
    orchestrator: &std::sync::Arc<Orchestrator>,
    args: &AnalyzeArgs,
    opts: AnalyzeOptions,
    cancel: CancellationToken,
) -> Result<AnalysisReport, wallbounce_core::error::AnalysisError> {
    let include_thinking = opts.include_thinking;
    let stream = orchestrator.analyze_stream(&args.query, opts, "cli", cancel);

    while let Some(event) = stream.events.recv().await {
        match &event.payload {
            EventPayload::Thinking { provider_id, content } => {
                if include_thinking {
                    eprintln!("[{}] thinking: {} ({})", event.sequence, content, provider_id);
                }
            }
            EventPayload::ProviderResponse {
                provider_id,
                confidence,
                latency_ms,
                errored,
                ..
            } => {
                let status = if *errored { "errored" } else { "ok" };
                eprintln!(
                    "[{}] {provider_id}: {status} (confidence {confidence:.2}, {latency_ms}ms)",
                    event.sequence
                );
            }
            EventPayload::ApprovalRequested {
                request_id,
                tool_name,
                risk_level,
            } => {
                eprintln!(
                    "[{}] approval required for tool '{tool_name}' (risk {risk_level})",
                    event.sequence
                );
                resolve_interactively(orchestrator, request_id, tool_name);
            }
            EventPayload::ApprovalResolved { request_id, state } => {
                eprintln!("[{}] approval {request_id}: {state}", event.sequence);
            }
            EventPayload::ConsensusUpdate { stage, detail } => {
                eprintln!("[{}] consensus {stage}: {detail}", event.sequence);
            }
            EventPayload::Warning { code, message } => {
                eprintln!("[{}] warning {code}: {message}", event.sequence);
            }
            EventPayload::Dropped {
                covers_from,
                covers_to,
            } => {
                eprintln!("[{}] (events {covers_from}-{covers_to} dropped)", event.sequence);
            }
            EventPayload::FinalAnswer { .. } | EventPayload::Error { .. } | EventPayload::Canceled => {}
        }
    }

    match stream.result.await {
        Ok(result) => result,
        Err(join_err) => {
            tracing::error!(error = %join_err, "Analysis task failed to join");
            Err(wallbounce_core::error::AnalysisError::Internal {
                correlation_id: stream.analysis_id,
                message: join_err.to_string(),
            })
        }
    }
}

/// Prompt the operator for an approval decision on stderr/stdin.
fn resolve_interactively(
    orchestrator: &std::sync::Arc<Orchestrator>,
    request_id: &str,
    tool_name: &str,
) {
    eprint!("  approve '{tool_name}'? [y/N] > ");
    let _ = std::io::stderr().flush();

    let mut input = String::new();
    let decision = match std::io::stdin().read_line(&mut input) {
        Ok(_) if matches!(input.trim().to_lowercase().as_str(), "y" | "yes") => Decision::Approve,
        _ => Decision::Deny,
    };

    match orchestrator.resolve_approval(request_id, decision) {
        Ok(state) => eprintln!("  -> {}", state.as_str()),
        Err(e) => eprintln!("  -> {e}"),
    }
}

fn resolve_options(
    orchestrator: &Orchestrator,
    args: &AnalyzeArgs,
) -> Result<AnalyzeOptions, String> {
    let mut opts = orchestrator.options();

    opts.task_type = TaskType::parse(&args.task_type)
        .ok_or_else(|| format!("unknown task type '{}'", args.task_type))?;
    if let Some(mode) = &args.mode {
        opts.mode =
            DispatchMode::parse(mode).ok_or_else(|| format!("unknown mode '{mode}'"))?;
    }
    if let Some(depth) = args.depth {
        opts.depth = depth;
    }
    if let Some(min) = args.min_providers {
        opts.min_providers = min;
    }
    if let Some(sandbox) = &args.sandbox {
        opts.sandbox_level = wallbounce_core::approval::SandboxLevel::parse(sandbox)
            .ok_or_else(|| format!("unknown sandbox level '{sandbox}'"))?;
    }
    opts.session_id = args.session.clone();
    opts.include_thinking = args.include_thinking;
    if args.eager {
        opts.eager = true;
    }
    if args.auto_escalate {
        opts.auto_escalate = true;
    }
    Ok(opts)
}

fn print_report(report: &AnalysisReport) {
    println!("{}", report.consensus.content);
    eprintln!();
    eprintln!(
        "winner: {} | confidence: {:.2} | quality: {} | state: {}",
        report.consensus.winner_provider_id,
        report.consensus.confidence,
        report.consensus.quality.as_str(),
        report.state.as_str(),
    );
    eprintln!(
        "providers: {} | tokens: {} in / {} out | {}ms",
        report.consensus.votes.len(),
        report.usage.input_tokens,
        report.usage.output_tokens,
        report.elapsed_ms,
    );
    if let (Some(session), Some(turn)) = (&report.session_id, report.turn_index) {
        eprintln!("session: {session} (turn {turn})");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}
