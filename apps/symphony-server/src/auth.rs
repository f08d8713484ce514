//! Auth extraction from `X-Api-Key` / `X-User-Id` headers.
//!
//! The api key identifies the app (validated against the apps
//! directory, active=true); the user id is the app's external user id,
//! creating a profile row on first use. Auth is optional at extraction
//! time; endpoints that require it call `require()`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use symphony_core::store::AppScope;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub scope: Option<AppScope>,
    pub app_name: Option<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self {
            scope: None,
            app_name: None,
        }
    }

    /// Scope for endpoints that demand authentication.
    pub fn require(&self) -> Result<&AppScope, ApiError> {
        self.scope
            .as_ref()
            .ok_or_else(|| ApiError::Unauthorized("missing X-Api-Key header".to_string()))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = match header(parts, "x-api-key") {
            Some(api_key) => api_key.to_string(),
            None => return Ok(AuthContext::anonymous()),
        };

        let app = state
            .directory
            .find_by_api_key(&api_key)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?
            .ok_or_else(|| ApiError::Unauthorized("invalid api key".to_string()))?;
        if !app.active {
            return Err(ApiError::Forbidden("app is deactivated".to_string()));
        }

        let mut scope = AppScope::new(app.id.as_str());
        if let Some(external_user_id) = header(parts, "x-user-id") {
            let profile = state
                .directory
                .ensure_user(&app.id, external_user_id)
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            scope = scope.with_user(profile.external_user_id);
        }

        Ok(AuthContext {
            scope: Some(scope),
            app_name: Some(app.name),
        })
    }
}
