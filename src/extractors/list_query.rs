//! Extract list options (`limit`, `offset`, `include`) and column filters from the query string.

use crate::error::AppError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};

/// Suffix marking a NULL test: `?professor_id__isnull=true`.
pub const ISNULL_SUFFIX: &str = "__isnull";

#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// `include=a,b` and repeated `include=` keys, in order.
    pub include: Vec<String>,
    /// Remaining key/value pairs, unvalidated.
    pub filters: Vec<(String, String)>,
}

impl ListQuery {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, AppError> {
        let mut out = ListQuery::default();
        for (k, v) in pairs {
            match k.as_str() {
                "limit" => out.limit = Some(parse_count("limit", &v)?),
                "offset" => out.offset = Some(parse_count("offset", &v)?),
                "include" => out.include.extend(
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                _ => out.filters.push((k, v)),
            }
        }
        Ok(out)
    }
}

fn parse_count(name: &str, v: &str) -> Result<u32, AppError> {
    v.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{} must be a non-negative integer", name)))
}

#[async_trait]
impl<S> FromRequestParts<S> for ListQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        ListQuery::from_pairs(pairs)
    }
}
