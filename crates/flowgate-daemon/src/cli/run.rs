//! `flowgated run`: the long-lived daemon loop.
//!
//! Starts the trigger watchers, reports lifecycle events, sweeps usage
//! windows on an interval, and shuts down cleanly on Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use console::style;
use flowgate_core::quota::{AccessGate, UsageStore};
use flowgate_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub async fn run(state: &AppState, json: bool) -> Result<()> {
    let cancel = CancellationToken::new();

    // Subscribe before starting so WatcherStarted events are not missed.
    let reporter = tokio::spawn(report_events(
        state.engine.event_bus().subscribe(),
        cancel.clone(),
        json,
    ));

    state.engine.start().await?;

    let sweeper = spawn_sweeper(
        Arc::clone(&state.gate),
        Duration::from_secs(state.config.sweep_interval_secs.max(1)),
        cancel.clone(),
    );

    if !json {
        let status = state.engine.get_status().await;
        println!();
        println!(
            "  {} Flowgate watching {}",
            style("⚡").bold(),
            style(state.watch_root().display()).cyan()
        );
        println!(
            "  {} workflow(s), {} tool(s) registered",
            style(status.workflow_count).bold(),
            style(state.registry.len()).bold()
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
        println!();
    }

    shutdown_signal().await;
    tracing::info!("shutdown requested");

    state.engine.stop().await;
    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "usage sweep task ended abnormally");
    }
    if let Err(e) = reporter.await {
        tracing::warn!(error = %e, "event reporter ended abnormally");
    }

    if !json {
        println!("\n  Stopped.");
    }
    Ok(())
}

/// Zero elapsed daily/monthly windows every `interval` until cancelled.
pub fn spawn_sweeper<S: UsageStore>(
    gate: Arc<AccessGate<S>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("usage sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match gate.sweep_resets(Utc::now()).await {
                        Ok(0) => {}
                        Ok(reset) => tracing::info!(reset, "usage windows reset"),
                        Err(e) => tracing::warn!(error = %e, "usage sweep failed"),
                    }
                }
            }
        }
    })
}

/// Print run outcomes for the operator until cancelled.
async fn report_events(
    mut events: broadcast::Receiver<WorkflowEvent>,
    cancel: CancellationToken,
    json: bool,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            received = events.recv() => received,
        };
        match event {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            },
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event reporter lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::RunCompleted {
            workflow_name,
            trigger_resource,
            actions_completed,
            duration_ms,
            ..
        } => println!(
            "  {} {} {} ({} action(s), {}ms)",
            style("✓").green(),
            style(workflow_name).cyan(),
            trigger_resource.display(),
            actions_completed,
            duration_ms
        ),
        WorkflowEvent::RunFailed {
            workflow_name,
            trigger_resource,
            action_index,
            action_kind,
            error,
            ..
        } => println!(
            "  {} {} {} failed at #{} {}: {}",
            style("✗").red(),
            style(workflow_name).cyan(),
            trigger_resource.display(),
            action_index + 1,
            action_kind,
            style(error).red()
        ),
        WorkflowEvent::ActionSkipped { action_kind, .. } => println!(
            "  {} skipped unregistered action '{}'",
            style("!").yellow(),
            action_kind
        ),
        _ => {}
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::quota::InMemoryUsageStore;
    use flowgate_types::tier::{Tier, default_tier_policies};

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let gate = Arc::new(AccessGate::new(
            Arc::new(InMemoryUsageStore::new()),
            default_tier_policies(),
        ));
        gate.register_identity("0xabc", Tier::Free, None).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(gate, Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn reporter_exits_when_bus_closes() {
        let (tx, rx) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(report_events(rx, cancel, true));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter did not exit")
            .unwrap();
    }
}
