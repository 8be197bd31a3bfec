use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::AppError;

/// Header the upstream auth layer sets to the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The calling user, when the upstream auth layer identified one.
/// A present but malformed header is rejected rather than treated as anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal(pub Option<Uuid>);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Principal(None));
        };
        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(|id| Principal(Some(id)))
            .ok_or(AppError::Unauthorized)
    }
}
