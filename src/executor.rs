//! src/executor.rs
//! Wykonanie zrecenzowanej paczki akcji ban/kick.
//!
//! Ściśle sekwencyjnie — nigdy równolegle: ETA ma sens, limity hosta są
//! respektowane, a anulowanie w środku paczki zostawia czystą granicę między
//! kontami obsłużonymi i nietkniętymi. Pojedyncza porażka nie przerywa
//! paczki; host-side akcje są nieodwracalne, więc niczego nie cofamy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::services::{Member, ModerationService};
use crate::session::ScanSession;

/// Szacunkowy czas jednej akcji przed pierwszym pomiarem.
const ETA_SEED_PER_ITEM: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Ban,
    Kick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure(String),
}

/// Paczka zatwierdzona przez operatora. `results` wypełnia executor.
#[derive(Debug)]
pub struct ActionJob {
    pub group_id: u64,
    pub kind: ActionKind,
    pub items: Vec<Member>,
    pub results: HashMap<u64, ActionOutcome>,
}

impl ActionJob {
    pub fn new(group_id: u64, kind: ActionKind, items: Vec<Member>) -> Self {
        Self { group_id, kind, items, results: HashMap::new() }
    }
}

/// Postęp przed każdą pozycją: indeks 0-based, ETA dla reszty paczki.
#[derive(Debug, Clone)]
pub struct ActionProgress {
    pub index: usize,
    pub total: usize,
    pub member_id: u64,
    pub eta: Duration,
}

#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub member: Member,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ActionReport {
    pub success_count: usize,
    pub total_count: usize,
    pub failures: Vec<ActionFailure>,
    pub finished_at: DateTime<Utc>,
}

pub struct ActionExecutor {
    moderation: Arc<dyn ModerationService>,
    session: Arc<ScanSession>,
}

impl ActionExecutor {
    pub fn new(moderation: Arc<dyn ModerationService>, session: Arc<ScanSession>) -> Self {
        Self { moderation, session }
    }

    /// Przetwarza `job.items` po kolei; `on_progress` dostaje zdarzenie przed
    /// każdą pozycją. Anulowanie sesji zatrzymuje paczkę przed kolejnym
    /// kontem — pozycje nieobsłużone nie dostają wpisu w `results`.
    pub async fn execute<F>(&self, job: &mut ActionJob, mut on_progress: F) -> ActionReport
    where
        F: FnMut(&ActionProgress) + Send,
    {
        let total = job.items.len();
        let started = Instant::now();
        let mut processed: usize = 0;
        let mut success_count: usize = 0;
        let mut failures: Vec<ActionFailure> = Vec::new();

        for (index, member) in job.items.iter().enumerate() {
            if self.session.is_cancelled() {
                warn!(
                    group_id = job.group_id,
                    done = processed,
                    total,
                    "action batch cancelled mid-way",
                );
                break;
            }

            // ETA: średni czas na pozycję × ile zostało (z bieżącą włącznie)
            let avg = if processed == 0 {
                ETA_SEED_PER_ITEM
            } else {
                started.elapsed() / processed as u32
            };
            on_progress(&ActionProgress {
                index,
                total,
                member_id: member.user_id,
                eta: avg * (total - index) as u32,
            });

            let result = match job.kind {
                ActionKind::Ban => self.moderation.ban(job.group_id, member.user_id).await,
                ActionKind::Kick => self.moderation.kick(job.group_id, member.user_id).await,
            };

            match result {
                Ok(()) => {
                    success_count += 1;
                    job.results.insert(member.user_id, ActionOutcome::Success);
                    // konto obsłużone — precz ze wszystkich cache'ów sesji
                    self.session.purge_member(member.user_id).await;
                }
                Err(e) => {
                    let reason = e.action_reason();
                    warn!(
                        group_id = job.group_id,
                        user_id = member.user_id,
                        reason = %reason,
                        "action failed; continuing batch",
                    );
                    job.results
                        .insert(member.user_id, ActionOutcome::Failure(reason.clone()));
                    failures.push(ActionFailure { member: member.clone(), reason });
                }
            }
            processed += 1;
        }

        let report = ActionReport {
            success_count,
            total_count: total,
            failures,
            finished_at: Utc::now(),
        };
        info!(
            group_id = job.group_id,
            success = report.success_count,
            failed = report.failures.len(),
            total = report.total_count,
            "action batch finished",
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ApiError, ApiResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock moderacji: pozycje z `fail_ids` kończą się błędem hosta.
    struct ScriptedModeration {
        fail_ids: Vec<u64>,
        calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ModerationService for ScriptedModeration {
        async fn ban(&self, _group_id: u64, user_id: u64) -> ApiResult<()> {
            self.calls.lock().unwrap().push(user_id);
            if self.fail_ids.contains(&user_id) {
                return Err(ApiError::Status { status: 400, reason: "User not in group".into() });
            }
            Ok(())
        }
        async fn kick(&self, group_id: u64, user_id: u64) -> ApiResult<()> {
            self.ban(group_id, user_id).await
        }
    }

    fn member(id: u64) -> Member {
        Member {
            user_id: id,
            display_name: format!("n{id}"),
            username: format!("u{id}"),
            role_id: 1,
        }
    }

    #[tokio::test]
    async fn all_success_batch_reports_full_count() {
        let session = Arc::new(ScanSession::new(1));
        let m = Arc::new(ScriptedModeration { fail_ids: vec![], calls: Mutex::new(vec![]) });
        let exec = ActionExecutor::new(m.clone(), session);
        let mut job = ActionJob::new(1, ActionKind::Ban, (1..=5).map(member).collect());

        let report = exec.execute(&mut job, |_| {}).await;
        assert_eq!(report.success_count, 5);
        assert_eq!(report.total_count, 5);
        assert!(report.failures.is_empty());
        // ściśle sekwencyjnie, w kolejności paczki
        assert_eq!(*m.calls.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn single_failure_does_not_abort_batch() {
        let session = Arc::new(ScanSession::new(1));
        let m = Arc::new(ScriptedModeration { fail_ids: vec![3], calls: Mutex::new(vec![]) });
        let exec = ActionExecutor::new(m.clone(), session);
        let mut job = ActionJob::new(1, ActionKind::Kick, (1..=5).map(member).collect());

        let report = exec.execute(&mut job, |_| {}).await;
        assert_eq!(report.success_count, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].member.user_id, 3);
        assert_eq!(report.failures[0].reason, "User not in group");
        assert_eq!(m.calls.lock().unwrap().len(), 5);
        assert_eq!(job.results.get(&3), Some(&ActionOutcome::Failure("User not in group".into())));
    }

    #[tokio::test]
    async fn success_purges_member_from_session_caches() {
        let session = Arc::new(ScanSession::new(1));
        session.insert_members(&[member(1)]);
        session.insert_fingerprints(vec![crate::fingerprint::Fingerprint {
            member_id: 1,
            hash: Some(9),
        }]);
        let m = Arc::new(ScriptedModeration { fail_ids: vec![], calls: Mutex::new(vec![]) });
        let exec = ActionExecutor::new(m, session.clone());
        let mut job = ActionJob::new(1, ActionKind::Ban, vec![member(1)]);

        exec.execute(&mut job, |_| {}).await;
        assert!(!session.contains_member(1));
        assert_eq!(session.fingerprint_count(), 0);
    }

    #[tokio::test]
    async fn first_progress_event_uses_seed_eta() {
        let session = Arc::new(ScanSession::new(1));
        let m = Arc::new(ScriptedModeration { fail_ids: vec![], calls: Mutex::new(vec![]) });
        let exec = ActionExecutor::new(m, session);
        let mut job = ActionJob::new(1, ActionKind::Ban, (1..=3).map(member).collect());

        let mut etas: Vec<Duration> = Vec::new();
        exec.execute(&mut job, |p| etas.push(p.eta)).await;
        assert_eq!(etas.len(), 3);
        // pierwsza pozycja: 2 s × 3 pozostałe
        assert_eq!(etas[0], Duration::from_secs(6));
        // dalej ETA schodzi na zmierzoną średnią (mock odpowiada natychmiast)
        assert!(etas[1] < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_leaves_clean_boundary() {
        let session = Arc::new(ScanSession::new(1));
        let m = Arc::new(ScriptedModeration { fail_ids: vec![], calls: Mutex::new(vec![]) });
        let exec = ActionExecutor::new(m.clone(), session.clone());
        let mut job = ActionJob::new(1, ActionKind::Ban, (1..=5).map(member).collect());

        let mut seen = 0usize;
        let session_for_cb = session.clone();
        let report = exec
            .execute(&mut job, move |_| {
                seen += 1;
                if seen == 2 {
                    session_for_cb.cancel();
                }
            })
            .await;

        // pozycje 1 i 2 obsłużone, reszta nietknięta i bez wpisów w results
        assert_eq!(report.success_count, 2);
        assert_eq!(m.calls.lock().unwrap().len(), 2);
        assert_eq!(job.results.len(), 2);
        assert!(!job.results.contains_key(&3));
    }
}
