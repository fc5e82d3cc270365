//! Per-request identity context. Authentication middleware (outside this crate) inserts an
//! `Identity` into request extensions; otherwise the `X-Timezone` header or UTC is used.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Header consulted when no upstream identity is present.
pub const TIMEZONE_HEADER: &str = "X-Timezone";

#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub timezone: Tz,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            user_id: None,
            timezone: Tz::UTC,
        }
    }
}

impl Identity {
    pub fn with_timezone(timezone: Tz) -> Self {
        Identity {
            user_id: None,
            timezone,
        }
    }

    /// Timezone-qualified timestamp, e.g. "2024-03-01T09:30:00+09:00".
    pub fn format_timestamp(&self, at: &DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }
        let timezone = parts
            .headers
            .get(TIMEZONE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| match s.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    tracing::warn!(timezone = %s, "unknown timezone header, using UTC");
                    None
                }
            })
            .unwrap_or(Tz::UTC);
        Ok(Identity::with_timezone(timezone))
    }
}
