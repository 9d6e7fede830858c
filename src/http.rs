//! src/http.rs
//! Domyślna implementacja kontraktów z `services.rs` nad REST-em hosta.
//!
//! Odpowiedzi schodzą przez typowane DTO (serde, camelCase) i są walidowane
//! na granicy — żadnego grzebania w luźnym JSON-ie głębiej w silniku.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::Settings;
use crate::services::{
    ApiError, ApiResult, GroupInfo, GroupService, Member, MemberPage, MembershipService,
    ModerationService, PermissionService, Role, Thumbnail, ThumbnailService, ThumbnailState,
};

pub struct HostClient {
    http: reqwest::Client,
    base: Url,
    thumb_base: Url,
}

impl HostClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(settings.api.timeout_ms.unwrap_or(10_000));
        let http = reqwest::Client::builder()
            .user_agent(
                settings
                    .api
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| "BotGuard/0.1".into()),
            )
            .connect_timeout(Duration::from_millis(2_000))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            http,
            base: Url::parse(&settings.api.base_url)?,
            thumb_base: Url::parse(&settings.api.thumb_base_url)?,
        })
    }

    fn endpoint(&self, base: &Url, segments: &[&str]) -> ApiResult<Url> {
        let mut url = base.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .map_err(|_| ApiError::Decode("api base url cannot be a base".into()))?;
            parts.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    /// 2xx przechodzi; 429 => `RateLimited`; reszta => `Status` z powodem
    /// wyciągniętym z ciała błędu hosta (jeśli jest).
    async fn check(resp: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        let reason = resp
            .json::<ErrorsBody>()
            .await
            .ok()
            .and_then(|b| b.errors.into_iter().next())
            .map(|e| e.message)
            .unwrap_or_default();
        Err(ApiError::Status { status: status.as_u16(), reason })
    }
}

/* ===========================
   DTO drutowe
   =========================== */

#[derive(Debug, Deserialize)]
struct ErrorsBody {
    #[serde(default)]
    errors: Vec<ErrorDto>,
}

#[derive(Debug, Deserialize)]
struct ErrorDto {
    #[allow(dead_code)]
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfoDto {
    id: u64,
    name: String,
    member_count: u64,
}

#[derive(Debug, Deserialize)]
struct RolesBody {
    roles: Vec<RoleDto>,
}

#[derive(Debug, Deserialize)]
struct RoleDto {
    id: u64,
    name: String,
    rank: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberPageBody {
    data: Vec<MemberDto>,
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberDto {
    user: MemberUserDto,
    role: MemberRoleDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberUserDto {
    user_id: u64,
    username: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct MemberRoleDto {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ThumbBody {
    data: Vec<ThumbDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbDto {
    state: String,
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionsBody {
    ban_members: bool,
    remove_members: bool,
}

impl From<MemberDto> for Member {
    fn from(d: MemberDto) -> Self {
        Member {
            user_id: d.user.user_id,
            display_name: d.user.display_name,
            username: d.user.username,
            role_id: d.role.id,
        }
    }
}

fn thumbnail_from_dto(d: ThumbDto) -> Thumbnail {
    let state = match d.state.as_str() {
        "Completed" => ThumbnailState::Completed,
        "Blocked" => ThumbnailState::Blocked,
        "Pending" => ThumbnailState::Pending,
        _ => ThumbnailState::Error,
    };
    Thumbnail { state, url: d.image_url }
}

/* ===========================
   Implementacje kontraktów
   =========================== */

#[async_trait]
impl GroupService for HostClient {
    async fn get_group_info(&self, group_id: u64) -> ApiResult<GroupInfo> {
        let url = self.endpoint(&self.base, &["groups", &group_id.to_string()])?;
        let resp = Self::check(self.http.get(url).send().await?).await?;
        let dto: GroupInfoDto = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(GroupInfo { id: dto.id, name: dto.name, member_count: dto.member_count })
    }

    async fn list_roles(&self, group_id: u64) -> ApiResult<Vec<Role>> {
        let url = self.endpoint(&self.base, &["groups", &group_id.to_string(), "roles"])?;
        let resp = Self::check(self.http.get(url).send().await?).await?;
        let body: RolesBody = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(body
            .roles
            .into_iter()
            .map(|r| Role { id: r.id, name: r.name, rank: r.rank })
            .collect())
    }
}

#[async_trait]
impl MembershipService for HostClient {
    async fn list_members(
        &self,
        group_id: u64,
        cursor: Option<&str>,
        page_size: u32,
    ) -> ApiResult<MemberPage> {
        let mut url = self.endpoint(&self.base, &["groups", &group_id.to_string(), "users"])?;
        url.query_pairs_mut()
            .append_pair("limit", &page_size.to_string())
            .append_pair("sortOrder", "Asc");
        if let Some(c) = cursor {
            url.query_pairs_mut().append_pair("cursor", c);
        }
        let resp = Self::check(self.http.get(url).send().await?).await?;
        let body: MemberPageBody = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        debug!(group_id, members = body.data.len(), "members page decoded");
        // pusty string kursora znaczy to samo co brak
        let next_cursor = body.next_page_cursor.filter(|c| !c.is_empty());
        Ok(MemberPage {
            members: body.data.into_iter().map(Member::from).collect(),
            next_cursor,
        })
    }
}

#[async_trait]
impl ModerationService for HostClient {
    async fn ban(&self, group_id: u64, user_id: u64) -> ApiResult<()> {
        let url = self.endpoint(
            &self.base,
            &["groups", &group_id.to_string(), "bans", &user_id.to_string()],
        )?;
        Self::check(self.http.post(url).send().await?).await?;
        Ok(())
    }

    async fn kick(&self, group_id: u64, user_id: u64) -> ApiResult<()> {
        let url = self.endpoint(
            &self.base,
            &["groups", &group_id.to_string(), "users", &user_id.to_string()],
        )?;
        Self::check(self.http.delete(url).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl ThumbnailService for HostClient {
    async fn resolve_image(&self, user_id: u64) -> ApiResult<Thumbnail> {
        let mut url = self.endpoint(&self.thumb_base, &["users", "avatar-headshot"])?;
        url.query_pairs_mut()
            .append_pair("userIds", &user_id.to_string())
            .append_pair("size", "150x150")
            .append_pair("format", "Png");
        let resp = Self::check(self.http.get(url).send().await?).await?;
        let body: ThumbBody = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let dto = body
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Decode("empty thumbnail batch".into()))?;
        Ok(thumbnail_from_dto(dto))
    }
}

#[async_trait]
impl PermissionService for HostClient {
    async fn can_ban(&self, group_id: u64) -> ApiResult<bool> {
        Ok(self.fetch_permissions(group_id).await?.ban_members)
    }

    async fn can_kick(&self, group_id: u64) -> ApiResult<bool> {
        Ok(self.fetch_permissions(group_id).await?.remove_members)
    }
}

impl HostClient {
    async fn fetch_permissions(&self, group_id: u64) -> ApiResult<PermissionsBody> {
        let url = self.endpoint(&self.base, &["groups", &group_id.to_string(), "permissions"])?;
        let resp = Self::check(self.http.get(url).send().await?).await?;
        resp.json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}
