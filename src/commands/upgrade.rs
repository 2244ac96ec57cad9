//! `cou upgrade`: build the plan and run it.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::ReleaseCatalog;
use crate::commands::analyze_and_plan;
use crate::config::UpgradeContext;
use crate::engine::{Engine, RunOutcome};
use crate::error::CouError;
use crate::juju::JujuCliClient;
use crate::ui;

pub async fn execute(ctx: &UpgradeContext, quiet: bool) -> Result<(), CouError> {
    let catalog = ReleaseCatalog::load()?;
    let client = JujuCliClient::new(
        ctx.model_name.clone(),
        ctx.settings.juju_data.clone(),
        ctx.settings.call_timeout,
    );

    let (_snapshot, mut plan) = analyze_and_plan(&client, &catalog, ctx, quiet).await?;
    if !quiet {
        print!("{}", plan.render());
    }

    let engine = Engine::new(&client, &catalog, ctx, !ctx.auto_approve);
    let (soft, hard) = engine.cancellation_tokens();
    tokio::spawn(watch_signals(soft, hard));

    match engine.execute(&mut plan).await {
        RunOutcome::Completed => {
            if !quiet {
                ui::print_success("Upgrade completed.");
            }
            Ok(())
        }
        RunOutcome::Failed(failure) => {
            ui::print_error(&format!("Upgrade failed: {failure}"));
            Err(CouError::UpgradeFailed(failure.to_string()))
        }
        RunOutcome::CancelledSafely => Err(CouError::Cancelled),
        RunOutcome::Aborted => Err(CouError::Aborted),
    }
}

/// Interrupt and terminate are handled identically: the first occurrence
/// cancels softly, the second abandons running steps.
async fn watch_signals(soft: CancellationToken, hard: CancellationToken) {
    next_signal().await;
    warn!("stopping the upgrade safely; running steps may take a while to finish");
    eprintln!("Canceling upgrade... (press ctrl+c again to stop immediately)");
    soft.cancel();

    next_signal().await;
    warn!("stopping the upgrade immediately");
    hard.cancel();
}

#[cfg(unix)]
async fn next_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate =
        signal(SignalKind::terminate()).expect("installing a SIGTERM handler cannot fail");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn next_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
