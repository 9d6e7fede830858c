use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use botguard::orchestrator::{ScanObserver, ScanOutcome};
use botguard::score::RiskRecord;
use botguard::session::ScanSession;
use botguard::{AppContext, config::Settings};

struct LogObserver;

impl ScanObserver for LogObserver {
    fn on_page_loaded(&self, _session: &ScanSession, total_members: usize) {
        info!(total_members, "page loaded");
    }
    fn on_fingerprint_progress(&self, _session: &ScanSession, fingerprinted: usize) {
        info!(fingerprinted, "fingerprint progress");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let group_id: u64 = std::env::args()
        .nth(1)
        .context("usage: bgd <group_id>")?
        .parse()
        .context("group_id must be a number")?;

    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings)?;

    let perms = ctx.permissions();
    let can_ban = perms.can_ban(group_id).await.unwrap_or(false);
    let can_kick = perms.can_kick(group_id).await.unwrap_or(false);
    info!(group_id, can_ban, can_kick, "operator permissions");

    let outcome = ctx
        .orchestrator()
        .start(group_id, Arc::new(LogObserver))
        .await?;

    match outcome {
        ScanOutcome::Completed(records) => print_summary(&records),
        ScanOutcome::Cancelled => info!("scan stopped"),
    }
    Ok(())
}

fn print_summary(records: &[RiskRecord]) {
    info!(flagged = records.len(), "scan finished");
    for r in records.iter().take(25) {
        info!(
            user_id = r.member.user_id,
            name = %r.member.display_name,
            score = r.score,
            name_repeats = r.breakdown.name_repeat_count,
            cluster_size = r.breakdown.cluster_size,
            "risk record",
        );
    }
}
