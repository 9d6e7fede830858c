//! src/services.rs
//! Kontrakty usług hosta (grupa/role, członkowie, moderacja, miniatury).
//!
//! Silnik skanera rozmawia z platformą wyłącznie przez te traity —
//! konkretny klient HTTP jest w `http.rs`, testy podstawiają mocki.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/* ===========================
   Typy domenowe
   =========================== */

/// Członek grupy. Klucz tożsamości = `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: u64,
    pub display_name: String,
    pub username: String,
    pub role_id: u64,
}

/// Rola w grupie; `rank` rośnie wraz z uprawnieniami (najniższy rank = szeregowy).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: u64,
    pub name: String,
    pub rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: u64,
    pub name: String,
    pub member_count: u64,
}

/// Jedna strona listy członków (paginacja kursorem).
#[derive(Debug, Clone, Default)]
pub struct MemberPage {
    pub members: Vec<Member>,
    pub next_cursor: Option<String>,
}

/// Stan miniatury po stronie hosta. `Pending` może się rozwiązać później —
/// nie czekamy, traktujemy jak brak obrazka (hash = None).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailState {
    Completed,
    Blocked,
    Pending,
    Error,
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub state: ThumbnailState,
    pub url: Option<String>,
}

/* ===========================
   Błędy warstwy API
   =========================== */

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// HTTP 429 — wołający decyduje o cooldownie.
    #[error("rate limited by host API")]
    RateLimited,
    /// Odpowiedź poza 2xx; `reason` to kod/komunikat z ciała błędu hosta,
    /// jeśli dało się go wyciągnąć.
    #[error("host API returned {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response payload: {0}")]
    Decode(String),
}

impl ApiError {
    /// Powód do raportu akcji: kod/komunikat hosta,
    /// a gdy go brak — generyczne "Unknown Error".
    pub fn action_reason(&self) -> String {
        match self {
            ApiError::Status { reason, .. } if !reason.trim().is_empty() => reason.clone(),
            ApiError::RateLimited => "Rate limited".to_string(),
            _ => "Unknown Error".to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/* ===========================
   Kontrakty usług
   =========================== */

#[async_trait]
pub trait GroupService: Send + Sync {
    async fn get_group_info(&self, group_id: u64) -> ApiResult<GroupInfo>;
    async fn list_roles(&self, group_id: u64) -> ApiResult<Vec<Role>>;
}

#[async_trait]
pub trait MembershipService: Send + Sync {
    async fn list_members(
        &self,
        group_id: u64,
        cursor: Option<&str>,
        page_size: u32,
    ) -> ApiResult<MemberPage>;
}

#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn ban(&self, group_id: u64, user_id: u64) -> ApiResult<()>;
    async fn kick(&self, group_id: u64, user_id: u64) -> ApiResult<()>;
}

#[async_trait]
pub trait ThumbnailService: Send + Sync {
    async fn resolve_image(&self, user_id: u64) -> ApiResult<Thumbnail>;
}

/// Uprawnienia operatora w grupie (cache z TTL w `permissions.rs`).
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn can_ban(&self, group_id: u64) -> ApiResult<bool>;
    async fn can_kick(&self, group_id: u64) -> ApiResult<bool>;
}

/// Rola o najniższym ranku — tylko jej członkowie wchodzą do analizy botów
/// (administracja i role podniesione są wykluczone z założenia).
pub fn lowest_rank_role(roles: &[Role]) -> Option<&Role> {
    roles.iter().min_by_key(|r| r.rank)
}
