//! src/permissions.rs
//! Uprawnienia operatora (ban/kick) z cache TTL 5 min — UI pyta o nie przy
//! każdym odświeżeniu panelu, host nie musi tego widzieć za każdym razem.
//! Cache'ujemy tylko udane odpowiedzi; błąd przechodzi do wołającego,
//! a UI blokuje przyciski zamiast strzelać akcjami skazanymi na porażkę.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::executor::ActionKind;
use crate::services::{ApiResult, PermissionService};

const PERMISSION_TTL_SECS: u64 = 5 * 60;
const PERMISSION_CACHE_CAPACITY: u64 = 256;

pub struct PermissionCache {
    svc: Arc<dyn PermissionService>,
    cache: Cache<(u64, ActionKind), bool>,
}

impl PermissionCache {
    pub fn new(svc: Arc<dyn PermissionService>) -> Self {
        Self {
            svc,
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(PERMISSION_TTL_SECS))
                .max_capacity(PERMISSION_CACHE_CAPACITY)
                .build(),
        }
    }

    pub async fn can_ban(&self, group_id: u64) -> ApiResult<bool> {
        self.lookup(group_id, ActionKind::Ban).await
    }

    pub async fn can_kick(&self, group_id: u64) -> ApiResult<bool> {
        self.lookup(group_id, ActionKind::Kick).await
    }

    /// Czy operator może w ogóle wykonać `kind` w tej grupie.
    pub async fn can_perform(&self, group_id: u64, kind: ActionKind) -> ApiResult<bool> {
        self.lookup(group_id, kind).await
    }

    async fn lookup(&self, group_id: u64, kind: ActionKind) -> ApiResult<bool> {
        if let Some(v) = self.cache.get(&(group_id, kind)) {
            return Ok(v);
        }
        let allowed = match kind {
            ActionKind::Ban => self.svc.can_ban(group_id).await?,
            ActionKind::Kick => self.svc.can_kick(group_id).await?,
        };
        self.cache.insert((group_id, kind), allowed);
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingPerms {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PermissionService for CountingPerms {
        async fn can_ban(&self, _group_id: u64) -> ApiResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        async fn can_kick(&self, _group_id: u64) -> ApiResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(false)
        }
    }

    #[tokio::test]
    async fn repeated_checks_hit_cache() {
        let svc = Arc::new(CountingPerms { calls: AtomicU32::new(0) });
        let perms = PermissionCache::new(svc.clone());

        assert!(perms.can_ban(7).await.unwrap());
        assert!(perms.can_ban(7).await.unwrap());
        assert!(!perms.can_kick(7).await.unwrap());
        assert!(!perms.can_kick(7).await.unwrap());
        // po jednym strzale na (grupa, akcja)
        assert_eq!(svc.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn groups_are_cached_independently() {
        let svc = Arc::new(CountingPerms { calls: AtomicU32::new(0) });
        let perms = PermissionCache::new(svc.clone());
        let _ = perms.can_ban(1).await;
        let _ = perms.can_ban(2).await;
        assert_eq!(svc.calls.load(Ordering::SeqCst), 2);
    }
}
