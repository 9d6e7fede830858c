//! src/paginator.rs
//! Paginacja listy członków kursorem, z retry i pauzą między stronami.
//!
//! Zwykły błąd sieci: do 3 prób co 1 s, trzecia porażka jest terminalna dla
//! skanu. HTTP 429: stały cooldown, bez zużywania budżetu prób — limit hosta
//! to nie awaria.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::services::{ApiError, ApiResult, MemberPage, MembershipService};

pub struct MemberPaginator {
    svc: Arc<dyn MembershipService>,
    page_size: u32,
    retry_attempts: u32,
    retry_delay: Duration,
    rate_limit_cooldown: Duration,
    page_delay: Duration,
    fetched_any: bool,
}

impl MemberPaginator {
    pub fn new(svc: Arc<dyn MembershipService>, cfg: &ScanConfig) -> Self {
        Self {
            svc,
            page_size: cfg.page_size,
            retry_attempts: cfg.retry_attempts.max(1),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            rate_limit_cooldown: Duration::from_millis(cfg.rate_limit_cooldown_ms),
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            fetched_any: false,
        }
    }

    /// Pobiera jedną stronę. Przed każdą stroną poza pierwszą czeka
    /// `page_delay`, żeby nie dobić limitów hosta.
    pub async fn fetch_page(&mut self, group_id: u64, cursor: Option<&str>) -> ApiResult<MemberPage> {
        if self.fetched_any {
            sleep(self.page_delay).await;
        }

        let mut attempt: u32 = 0;
        loop {
            match self.svc.list_members(group_id, cursor, self.page_size).await {
                Ok(page) => {
                    self.fetched_any = true;
                    debug!(
                        group_id,
                        members = page.members.len(),
                        has_next = page.next_cursor.is_some(),
                        "page fetched",
                    );
                    return Ok(page);
                }
                // 429 nie liczy się do prób — odczekaj i jedź dalej
                Err(ApiError::RateLimited) => {
                    warn!(group_id, "rate limited while paging; cooling down");
                    sleep(self.rate_limit_cooldown).await;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry_attempts {
                        warn!(group_id, attempt, error = %e, "page fetch failed terminally");
                        return Err(e);
                    }
                    warn!(group_id, attempt, error = %e, "page fetch failed; retrying");
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}
