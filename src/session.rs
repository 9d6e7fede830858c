//! src/session.rs
//! Sesja skanu: robocze cache'e, flaga anulowania, maszyna stanów.
//!
//! Jedna aktywna sesja naraz — orkiestrator unieważnia poprzednią przy
//! starcie nowej. Po udanej akcji ban/kick członek znika ze wszystkich
//! cache'ów, żeby nie wrócił na listę kandydatów.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::fingerprint::Fingerprint;
use crate::score::RiskRecord;
use crate::services::Member;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Scanning = 1,
    Completed = 2,
    Cancelled = 3,
    Failed = 4,
}

impl ScanState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ScanState::Scanning,
            2 => ScanState::Completed,
            3 => ScanState::Cancelled,
            4 => ScanState::Failed,
            _ => ScanState::Idle,
        }
    }
}

#[derive(Debug)]
pub struct ScanSession {
    pub group_id: u64,
    pub started_at: DateTime<Utc>,
    state: AtomicU8,
    cancelled: AtomicBool,
    members: DashMap<u64, Member>,
    fingerprints: DashMap<u64, Fingerprint>,
    risk: RwLock<Vec<RiskRecord>>,
    // kursor renderowania: UI dobiera tylko nowe rekordy, monotonicznie
    render_cursor: AtomicUsize,
}

impl ScanSession {
    pub fn new(group_id: u64) -> Self {
        Self {
            group_id,
            started_at: Utc::now(),
            state: AtomicU8::new(ScanState::Idle as u8),
            cancelled: AtomicBool::new(false),
            members: DashMap::new(),
            fingerprints: DashMap::new(),
            risk: RwLock::new(Vec::new()),
            render_cursor: AtomicUsize::new(0),
        }
    }

    /* ---------------- stan / anulowanie ---------------- */

    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, s: ScanState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Kooperacyjne anulowanie: nowa praca nie rusza, praca w locie się
    /// dokończy, a jej wynik zostanie odrzucony.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /* ---------------- cache'e robocze ---------------- */

    pub fn insert_members(&self, members: &[Member]) {
        for m in members {
            self.members.insert(m.user_id, m.clone());
        }
    }

    pub fn insert_fingerprints(&self, fps: Vec<Fingerprint>) {
        for f in fps {
            self.fingerprints.insert(f.member_id, f);
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn fingerprint(&self, user_id: u64) -> Option<Fingerprint> {
        self.fingerprints.get(&user_id).map(|f| f.clone())
    }

    pub fn contains_member(&self, user_id: u64) -> bool {
        self.members.contains_key(&user_id)
    }

    pub async fn set_risk_records(&self, records: Vec<RiskRecord>) {
        let mut guard = self.risk.write().await;
        *guard = records;
        self.render_cursor.store(0, Ordering::Release);
    }

    pub async fn risk_records(&self) -> Vec<RiskRecord> {
        self.risk.read().await.clone()
    }

    /// Rekordy, których UI jeszcze nie widziało; przesuwa kursor.
    pub async fn drain_new_records(&self) -> Vec<RiskRecord> {
        let guard = self.risk.read().await;
        let from = self.render_cursor.swap(guard.len(), Ordering::AcqRel);
        guard.get(from..).unwrap_or(&[]).to_vec()
    }

    /// Usuwa członka ze WSZYSTKICH cache'ów sesji (po udanej akcji).
    pub async fn purge_member(&self, user_id: u64) {
        self.members.remove(&user_id);
        self.fingerprints.remove(&user_id);
        let mut guard = self.risk.write().await;
        if let Some(pos) = guard.iter().position(|r| r.member.user_id == user_id) {
            guard.remove(pos);
            // kursor nie może wskazywać za koniec ani przeskoczyć rekordu
            let _ = self
                .render_cursor
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                    (c > pos).then(|| c - 1)
                });
        }
    }

    /// Czyści wszystko — sesja anulowana, zastąpiona albo zamknięta.
    pub async fn clear(&self) {
        self.members.clear();
        self.fingerprints.clear();
        self.risk.write().await.clear();
        self.render_cursor.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{RiskBreakdown, RiskRecord};

    fn record(id: u64, score: u8) -> RiskRecord {
        RiskRecord {
            member: Member {
                user_id: id,
                display_name: format!("n{id}"),
                username: format!("u{id}"),
                role_id: 1,
            },
            score,
            breakdown: RiskBreakdown { name_repeat_count: 0, cluster_size: 0 },
        }
    }

    #[tokio::test]
    async fn render_cursor_is_monotonic() {
        let s = ScanSession::new(1);
        s.set_risk_records(vec![record(1, 90), record(2, 50)]).await;
        assert_eq!(s.drain_new_records().await.len(), 2);
        assert!(s.drain_new_records().await.is_empty());
    }

    #[tokio::test]
    async fn purge_removes_from_every_cache() {
        let s = ScanSession::new(1);
        let m = Member { user_id: 7, display_name: "x".into(), username: "x".into(), role_id: 1 };
        s.insert_members(std::slice::from_ref(&m));
        s.insert_fingerprints(vec![Fingerprint { member_id: 7, hash: Some(1) }]);
        s.set_risk_records(vec![record(7, 40)]).await;

        s.purge_member(7).await;
        assert!(!s.contains_member(7));
        assert_eq!(s.fingerprint_count(), 0);
        assert!(s.risk_records().await.is_empty());
    }

    #[tokio::test]
    async fn purge_behind_cursor_keeps_drain_consistent() {
        let s = ScanSession::new(1);
        s.set_risk_records(vec![record(1, 90), record(2, 80), record(3, 70)]).await;
        // UI widziało już całość
        assert_eq!(s.drain_new_records().await.len(), 3);
        s.purge_member(1).await;
        // nic nowego do pokazania, ale i nic nie zostało przeskoczone
        assert!(s.drain_new_records().await.is_empty());
    }

    #[test]
    fn cancel_flag_latches() {
        let s = ScanSession::new(1);
        assert!(!s.is_cancelled());
        s.cancel();
        assert!(s.is_cancelled());
        assert_eq!(s.state(), ScanState::Idle);
    }
}
