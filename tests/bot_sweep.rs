//! Pełny przebieg: skan grupy → wybór rekordów → paczka akcji → raport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use botguard::config::ScanConfig;
use botguard::executor::{ActionExecutor, ActionJob, ActionKind};
use botguard::fingerprint::FingerprintService;
use botguard::orchestrator::{NoopObserver, ScanOrchestrator, ScanOutcome};
use botguard::services::{
    ApiError, ApiResult, GroupInfo, GroupService, Member, MemberPage, MembershipService,
    ModerationService, Role, Thumbnail, ThumbnailService, ThumbnailState,
};
use botguard::session::ScanState;

struct MockGroup;

#[async_trait]
impl GroupService for MockGroup {
    async fn get_group_info(&self, group_id: u64) -> ApiResult<GroupInfo> {
        Ok(GroupInfo { id: group_id, name: "Sweep Target".into(), member_count: 8 })
    }
    async fn list_roles(&self, _group_id: u64) -> ApiResult<Vec<Role>> {
        Ok(vec![
            Role { id: 1, name: "Member".into(), rank: 1 },
            Role { id: 2, name: "Owner".into(), rank: 255 },
        ])
    }
}

struct SinglePage {
    members: Vec<Member>,
}

#[async_trait]
impl MembershipService for SinglePage {
    async fn list_members(
        &self,
        _group_id: u64,
        _cursor: Option<&str>,
        _page_size: u32,
    ) -> ApiResult<MemberPage> {
        Ok(MemberPage { members: self.members.clone(), next_cursor: None })
    }
}

struct PendingThumbs;

#[async_trait]
impl ThumbnailService for PendingThumbs {
    async fn resolve_image(&self, _user_id: u64) -> ApiResult<Thumbnail> {
        // Pending nie rozwiąże się w trakcie skanu — hash = None
        Ok(Thumbnail { state: ThumbnailState::Pending, url: None })
    }
}

/// Moderacja: konto 3 "już usunięte" — host zwraca błąd, to normalna porażka.
struct FlakyModeration {
    calls: AtomicUsize,
    log: Mutex<Vec<u64>>,
}

#[async_trait]
impl ModerationService for FlakyModeration {
    async fn ban(&self, _group_id: u64, user_id: u64) -> ApiResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(user_id);
        if user_id == 3 {
            return Err(ApiError::Status { status: 400, reason: "User is not in group".into() });
        }
        Ok(())
    }
    async fn kick(&self, group_id: u64, user_id: u64) -> ApiResult<()> {
        self.ban(group_id, user_id).await
    }
}

fn member(id: u64, name: &str) -> Member {
    Member { user_id: id, display_name: name.into(), username: format!("u{id}"), role_id: 1 }
}

#[tokio::test]
async fn scan_review_and_ban_batch_updates_session() {
    // 5 klonów "FreeRobux2024" + 1 zwykły członek poniżej progu
    let mut members: Vec<Member> = (1..=5).map(|id| member(id, "FreeRobux2024")).collect();
    members.push(member(6, "Regular"));

    let cfg = ScanConfig { page_delay_ms: 1, retry_delay_ms: 1, ..ScanConfig::default() };
    let orch = ScanOrchestrator::new(
        Arc::new(MockGroup),
        Arc::new(SinglePage { members }),
        Arc::new(FingerprintService::new(Arc::new(PendingThumbs)).unwrap()),
        cfg,
    );

    let outcome = orch.start(7, Arc::new(NoopObserver)).await.unwrap();
    let ScanOutcome::Completed(records) = outcome else {
        panic!("expected completed scan");
    };
    // nc=5 => 35 pkt; "Regular" (0 pkt) odpada
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.score == 35));

    // operator zatwierdza całość do bana
    let session = orch.session().await.unwrap();
    let items: Vec<Member> = records.iter().map(|r| r.member.clone()).collect();
    let moderation = Arc::new(FlakyModeration {
        calls: AtomicUsize::new(0),
        log: Mutex::new(vec![]),
    });
    let exec = ActionExecutor::new(moderation.clone(), session.clone());
    let mut job = ActionJob::new(7, ActionKind::Ban, items);

    let mut progress_events = 0usize;
    let report = exec.execute(&mut job, |_| progress_events += 1).await;

    assert_eq!(report.total_count, 5);
    assert_eq!(report.success_count, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].member.user_id, 3);
    assert_eq!(report.failures[0].reason, "User is not in group");
    assert_eq!(progress_events, 5);
    // każde konto dostało dokładnie jedną próbę, po kolei
    assert_eq!(moderation.calls.load(Ordering::SeqCst), 5);
    assert_eq!(*moderation.log.lock().unwrap(), vec![1, 2, 3, 4, 5]);

    // sukcesy zniknęły z sesji; porażka została do ponownej recenzji
    assert_eq!(session.state(), ScanState::Completed);
    assert!(!session.contains_member(1));
    assert!(session.contains_member(3));
    let remaining = session.risk_records().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].member.user_id, 3);
}
