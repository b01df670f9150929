//! Cursor-paginated list endpoints.
//!
//! List endpoints return pages of objects and accept an `after` cursor: the
//! id of the last object seen. Some deployments reject these calls outright,
//! so a failed page is treated as the end of the list.

use std::future::Future;

use cordgate_protocol::{unix_seconds, value_to_string};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{ApiClient, ApiError};

const MEMBER_PAGE_LIMIT: &str = "100";

/// Fetch pages until one is empty, the cursor is missing, or the cursor
/// stops advancing.
pub async fn collect_pages<T, F, Fut>(mut fetch: F, cursor_of: impl Fn(&T) -> String) -> Vec<T>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut after: Option<String> = None;

    loop {
        let page = match fetch(after.clone()).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "List request failed, treating as empty page");
                Vec::new()
            }
        };
        let Some(last) = page.last() else {
            break;
        };
        let cursor = cursor_of(last);
        if after.as_deref() == Some(cursor.as_str()) {
            break;
        }
        items.extend(page);

        if cursor.is_empty() {
            break;
        }
        after = Some(cursor);
    }
    items
}

fn objects(page: Value) -> Vec<Map<String, Value>> {
    match page {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    map.remove(key)
        .filter(|v| !v.is_null())
        .map(|v| value_to_string(&v))
}

fn take_time(map: &mut Map<String, Value>, key: &str) -> Option<i64> {
    take_string(map, key).and_then(|ts| unix_seconds(&ts))
}

// ============================================================================
// Guilds
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuildInfo {
    pub guild_id: String,
    pub guild_name: String,
    pub join_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GuildInfo {
    fn from_map(mut map: Map<String, Value>) -> Self {
        Self {
            guild_id: take_string(&mut map, "id").unwrap_or_default(),
            guild_name: take_string(&mut map, "name").unwrap_or_default(),
            join_time: take_time(&mut map, "joined_at"),
            extra: map,
        }
    }
}

// ============================================================================
// Members
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberInfo {
    pub member_id: String,
    pub member_name: String,
    pub roles: Vec<String>,
    pub join_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MemberInfo {
    fn from_map(mut map: Map<String, Value>) -> Self {
        let user = map.get("user").cloned().unwrap_or_default();
        let user_field = |key: &str| user.get(key).map(value_to_string);

        let member_id = user_field("id")
            .or_else(|| take_string(&mut map, "id"))
            .unwrap_or_default();
        let member_name = take_string(&mut map, "nick")
            .or_else(|| user_field("username"))
            .or_else(|| take_string(&mut map, "name"))
            .unwrap_or_default();
        let roles = match map.remove("roles") {
            Some(Value::Array(roles)) => roles.iter().map(value_to_string).collect(),
            _ => Vec::new(),
        };
        let join_time =
            take_time(&mut map, "joined_at").or_else(|| take_time(&mut map, "join_time"));

        Self {
            member_id,
            member_name,
            roles,
            join_time,
            extra: map,
        }
    }
}

impl ApiClient {
    /// Every guild the bot has joined.
    pub async fn guild_list(&self) -> Vec<GuildInfo> {
        collect_pages(
            |after| async move {
                let query: Vec<(&str, String)> =
                    after.map(|a| ("after", a)).into_iter().collect();
                let page = self.get_json("/users/@me/guilds", &query).await?;
                Ok(objects(page).into_iter().map(GuildInfo::from_map).collect())
            },
            |guild: &GuildInfo| guild.guild_id.clone(),
        )
        .await
    }

    /// Every member of `guild_id`.
    pub async fn guild_member_list(&self, guild_id: &str) -> Vec<MemberInfo> {
        let path = format!("/guilds/{guild_id}/members");
        let path = path.as_str();
        collect_pages(
            |after| async move {
                let mut query = vec![("limit", MEMBER_PAGE_LIMIT.to_string())];
                query.extend(after.map(|a| ("after", a)));
                let page = self.get_json(path, &query).await?;
                Ok(objects(page).into_iter().map(MemberInfo::from_map).collect())
            },
            |member: &MemberInfo| member.member_id.clone(),
        )
        .await
    }
}
