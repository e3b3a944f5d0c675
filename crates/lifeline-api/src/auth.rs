//! Bearer-token authentication extractors.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use tracing::debug;

use lifeline_core::{Error, Principal};

use crate::{ApiError, AppState};

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extractor that requires a valid bearer token.
///
/// ```ignore
/// async fn my_handler(auth: RequireAuth) -> impl IntoResponse {
///     let caller = auth.principal.user_id;
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireAuth {
    pub principal: Principal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))?;

        match state.identity.authenticate(token).await {
            Ok(principal) => Ok(RequireAuth { principal }),
            Err(Error::Unauthorized(msg)) => {
                debug!(reason = %msg, "Rejected bearer token");
                Err(ApiError::Unauthorized("Invalid or expired token".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Extractor that requires an authenticated administrator.
#[derive(Debug, Clone)]
pub struct RequireAdmin {
    pub principal: Principal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state).await?;
        if !auth.principal.is_admin() {
            return Err(ApiError::Forbidden(
                "administrator role required".to_string(),
            ));
        }
        Ok(RequireAdmin {
            principal: auth.principal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc123"))), Some("abc123"));
        assert_eq!(bearer_token(&parts(Some("Bearer   "))), None);
        assert_eq!(bearer_token(&parts(Some("Basic abc123"))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
