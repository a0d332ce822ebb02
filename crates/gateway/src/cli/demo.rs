//! The fixed demo turn: one question on one conversation, streamed to
//! stdout, followed by the token usage, the compact trace, and where the
//! turn ended up.

use std::io::Write;

use ct_conversations::legacy;

use crate::bootstrap::Runtime;
use crate::runtime::{CancelToken, Persistence, TurnInput, TurnOutcome};

pub const CONVERSATION_ID: &str = "conv-001";
pub const QUESTION: &str = "Give me 3 name ideas for a gym app with AI.";

/// Run the demo turn against a wired runtime.
///
/// Ctrl-C cancels the stream; what arrived so far is kept or dropped
/// according to the configured persist policy.
pub async fn run(runtime: &Runtime) -> anyhow::Result<()> {
    // Older deployments stored one document per turn; fold them in first so
    // history and turn numbering see them.
    match legacy::import_flat_turns(
        &runtime.store,
        CONVERSATION_ID,
        runtime.config.store.cross_partition_queries,
    )
    .await
    {
        Ok(report) if report.imported > 0 => {
            tracing::info!(imported = report.imported, "flat turns imported");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "flat turn import skipped"),
    }

    let cancel = CancelToken::new();
    let on_ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\ncancelling...");
                cancel.cancel();
            }
        })
    };

    println!("=== OUTPUT ===");
    let mut stdout = std::io::stdout();
    let mut sink = move |delta: &str| {
        print!("{delta}");
        stdout.flush().ok();
    };

    let input = TurnInput::new(CONVERSATION_ID, QUESTION);
    let result = runtime
        .orchestrator
        .run_turn(&input, Some(&mut sink), Some(cancel))
        .await;
    on_ctrl_c.abort();
    println!();

    let outcome = result?;
    print!("{}", render_report(&outcome)?);

    if let Some(reason) = &outcome.interruption {
        eprintln!("stream interrupted: {reason}");
    }
    Ok(())
}

/// Everything printed after the streamed output.
pub fn render_report(outcome: &TurnOutcome) -> serde_json::Result<String> {
    let mut out = String::new();
    out.push_str("=== TOKENS ===\n");
    out.push_str(&serde_json::to_string_pretty(&outcome.record.tokens)?);
    out.push_str("\n=== TRACE (compact) ===\n");
    out.push_str(&serde_json::to_string_pretty(&outcome.record.trace)?);
    out.push('\n');
    out.push_str(&persistence_line(outcome));
    out.push('\n');
    Ok(out)
}

fn persistence_line(outcome: &TurnOutcome) -> String {
    let turn = &outcome.record.turn_id;
    match &outcome.persistence {
        Persistence::Persisted => format!("saved: {CONVERSATION_ID} turn {turn}"),
        Persistence::Failed(reason) => format!("NOT saved ({reason}); output above is unaffected"),
        Persistence::Skipped => "NOT saved (conversation store unavailable)".to_string(),
    }
}
