//! src/orchestrator.rs
//! Orkiestrator skanu: paginacja → fingerprinting w ograniczonej
//! równoległości → jedno klastrowanie + scoring na pełnym zbiorze.
//!
//! Jedna aktywna sesja: `start()` anuluje i zastępuje poprzednią.
//! Klastrowanie dopiero po zebraniu wszystkich fingerprintów — liczenie
//! przyrostowe dawałoby artefakty na granicach stron.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::cluster;
use crate::config::ScanConfig;
use crate::fingerprint::{Fingerprint, FingerprintService};
use crate::paginator::MemberPaginator;
use crate::score::{RiskRecord, score};
use crate::services::{GroupService, Member, MembershipService, lowest_rank_role};
use crate::session::{ScanSession, ScanState};

// Bezpiecznik na ucieczkę kursora — normalnie kończy nas pusty next_cursor.
const MAX_PAGES: u32 = 10_000;

/// Zdarzenia postępu dla warstwy UI. Domyślnie no-op. Callback dostaje uchwyt
/// sesji — stamtąd można synchronicznie zawołać `cancel()`.
pub trait ScanObserver: Send + Sync {
    fn on_page_loaded(&self, _session: &ScanSession, _total_members: usize) {}
    fn on_fingerprint_progress(&self, _session: &ScanSession, _fingerprinted: usize) {}
    fn on_scan_complete(&self, _session: &ScanSession, _records: &[RiskRecord]) {}
}

pub struct NoopObserver;
impl ScanObserver for NoopObserver {}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(Vec<RiskRecord>),
    /// Anulowanie to nie błąd — UI pokazuje "zatrzymano", nie "awarię".
    Cancelled,
}

pub struct ScanOrchestrator {
    group: Arc<dyn GroupService>,
    membership: Arc<dyn MembershipService>,
    fingerprints: Arc<FingerprintService>,
    cfg: ScanConfig,
    active: Mutex<Option<Arc<ScanSession>>>,
}

impl ScanOrchestrator {
    pub fn new(
        group: Arc<dyn GroupService>,
        membership: Arc<dyn MembershipService>,
        fingerprints: Arc<FingerprintService>,
        cfg: ScanConfig,
    ) -> Self {
        Self {
            group,
            membership,
            fingerprints,
            cfg,
            active: Mutex::new(None),
        }
    }

    /// Uchwyt do bieżącej sesji (dla executora akcji i UI).
    pub async fn session(&self) -> Option<Arc<ScanSession>> {
        self.active.lock().await.clone()
    }

    /// Anuluje bieżący skan, jeśli jakiś trwa.
    pub async fn cancel_active(&self) {
        if let Some(s) = self.active.lock().await.as_ref() {
            s.cancel();
        }
    }

    /// Startuje skan grupy. Poprzednia sesja zostaje anulowana i wyczyszczona.
    pub async fn start(
        &self,
        group_id: u64,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanOutcome> {
        let session = self.supersede(group_id).await;
        session.set_state(ScanState::Scanning);

        match self.run_scan(group_id, &session, observer).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                session.set_state(ScanState::Failed);
                warn!(group_id, error = %e, "scan failed");
                Err(e)
            }
        }
    }

    async fn supersede(&self, group_id: u64) -> Arc<ScanSession> {
        let session = Arc::new(ScanSession::new(group_id));
        let prev = {
            let mut guard = self.active.lock().await;
            guard.replace(session.clone())
        };
        if let Some(prev) = prev {
            info!(group_id = prev.group_id, "superseding previous scan session");
            prev.cancel();
            prev.clear().await;
        }
        session
    }

    async fn run_scan(
        &self,
        group_id: u64,
        session: &Arc<ScanSession>,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanOutcome> {
        let group_info = self
            .group
            .get_group_info(group_id)
            .await
            .context("group info fetch failed")?;
        let roles = self
            .group
            .list_roles(group_id)
            .await
            .context("role list fetch failed")?;
        let lowest = lowest_rank_role(&roles)
            .ok_or_else(|| anyhow!("group {group_id} has no roles"))?
            .clone();
        info!(
            group_id,
            group = %group_info.name,
            member_count = group_info.member_count,
            candidate_role = %lowest.name,
            "scan started",
        );

        let mut paginator = MemberPaginator::new(self.membership.clone(), &self.cfg);
        // kandydaci w kolejności napotkania — od niej zależy klastrowanie
        let mut candidates: Vec<Member> = Vec::new();
        let mut inflight: VecDeque<JoinHandle<()>> = VecDeque::new();

        let mut cursor: Option<String> = None;
        let mut pages: u32 = 0;
        loop {
            // (a) flaga przed pobraniem strony
            if session.is_cancelled() {
                return self.finish_cancelled(session, inflight).await;
            }
            let page = paginator
                .fetch_page(group_id, cursor.as_deref())
                .await
                .context("member page fetch failed")?;
            pages += 1;

            session.insert_members(&page.members);
            let page_candidates: Vec<Member> = page
                .members
                .iter()
                .filter(|m| m.role_id == lowest.id)
                .cloned()
                .collect();
            candidates.extend(page_candidates.iter().cloned());
            observer.on_page_loaded(session, session.member_count());

            // (b) flaga przed dispatchowaniem batcha fingerprintów
            if session.is_cancelled() {
                return self.finish_cancelled(session, inflight).await;
            }
            if !page_candidates.is_empty() {
                let svc = self.fingerprints.clone();
                let sess = session.clone();
                let obs = observer.clone();
                let handle = tokio::spawn(async move {
                    let fps = svc.fingerprint(&page_candidates).await;
                    sess.insert_fingerprints(fps);
                    obs.on_fingerprint_progress(&sess, sess.fingerprint_count());
                });
                inflight.push_back(handle);
                // powyżej limitu czekamy na najstarszy task zamiast puchnąć
                if inflight.len() > self.cfg.max_inflight {
                    if let Some(oldest) = inflight.pop_front() {
                        if let Err(e) = oldest.await {
                            warn!(error = %e, "fingerprint task panicked");
                        }
                    }
                }
            }

            match page.next_cursor {
                Some(c) if pages < MAX_PAGES => cursor = Some(c),
                Some(_) => {
                    warn!(group_id, pages, "page ceiling reached; stopping pagination");
                    break;
                }
                None => break,
            }
        }

        // dociągnij wiszące taski — klastrujemy dopiero na komplecie
        for handle in inflight.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "fingerprint task panicked");
            }
        }

        // (c) flaga przed klastrowaniem
        if session.is_cancelled() {
            return self.finish_cancelled(session, VecDeque::new()).await;
        }

        let fingerprints = ordered_fingerprints(session, &candidates);
        let clusters = cluster(&fingerprints, self.cfg.hamming_max);
        let records = score(&candidates, &clusters, self.cfg.min_score);
        session.set_risk_records(records.clone()).await;
        session.set_state(ScanState::Completed);
        info!(
            group_id,
            pages,
            candidates = candidates.len(),
            clusters = clusters.len(),
            flagged = records.len(),
            "scan complete",
        );
        observer.on_scan_complete(session, &records);
        Ok(ScanOutcome::Completed(records))
    }

    /// Anulowanie: praca w locie może się dokończyć, jej wynik idzie do kosza
    /// razem z cache'ami sesji.
    async fn finish_cancelled(
        &self,
        session: &Arc<ScanSession>,
        mut inflight: VecDeque<JoinHandle<()>>,
    ) -> Result<ScanOutcome> {
        for handle in inflight.drain(..) {
            let _ = handle.await;
        }
        session.set_state(ScanState::Cancelled);
        session.clear().await;
        info!(group_id = session.group_id, "scan cancelled");
        Ok(ScanOutcome::Cancelled)
    }
}

/// Fingerprinty w kolejności napotkania kandydatów (DashMap nie gwarantuje
/// porządku, a od porządku zależy wynik klastrowania).
fn ordered_fingerprints(session: &ScanSession, candidates: &[Member]) -> Vec<Fingerprint> {
    candidates
        .iter()
        .filter_map(|m| session.fingerprint(m.user_id))
        .collect()
}
