use chrono::{Duration, Utc};
use hyper::header::{AUTHORIZATION, COOKIE, HeaderMap};
use ulid::Ulid;

use crate::error::{ServiceError, ServiceResult};
use crate::storage::RoadmapStore;
use crate::types::Session;

/// Default session lifetime, matching a one-day session cookie.
pub const DEFAULT_SESSION_TTL_HOURS: u32 = 24;

/// Mint a session token bound to `user`, dropping sessions older than `ttl`.
pub async fn issue_session(
    store: &dyn RoadmapStore,
    user: &str,
    ttl: Duration,
) -> ServiceResult<Session> {
    let user = user.trim();
    if user.is_empty() {
        return Err(ServiceError::InvalidInput("User id is required".into()));
    }
    let pruned = store.prune_sessions(Utc::now() - ttl).await?;
    if pruned > 0 {
        tracing::debug!(pruned, "Expired sessions removed");
    }
    let session = store
        .insert_session(Session {
            token: Ulid::new().to_string(),
            user: user.to_string(),
            created_at: Utc::now(),
        })
        .await?;
    tracing::info!(user, "Session issued");
    Ok(session)
}

/// Resolve the calling user from the session cookie or a bearer token.
/// Sessions older than `ttl` are revoked on sight.
pub async fn caller(
    store: &dyn RoadmapStore,
    headers: &HeaderMap,
    cookie_name: &str,
    ttl: Duration,
) -> ServiceResult<String> {
    let Some(token) = session_token(headers, cookie_name) else {
        return Err(ServiceError::Unauthorized);
    };
    match store.find_session(&token).await? {
        Some(session) if session.created_at + ttl >= Utc::now() => Ok(session.user),
        Some(session) => {
            store.remove_session(&session.token).await?;
            tracing::debug!(user = %session.user, "Expired session revoked");
            Err(ServiceError::Unauthorized)
        }
        None => {
            tracing::debug!("Unknown session token");
            Err(ServiceError::Unauthorized)
        }
    }
}

fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim().to_string());

    from_cookie
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
        })
        .filter(|t| !t.is_empty())
}
