use super::sessions::ActiveSession;
use super::state::AppState;
use axum::http::{header, header::HeaderMap, StatusCode};

pub(super) type AuthRejection = (StatusCode, serde_json::Value);

pub(super) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

pub(super) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ActiveSession, AuthRejection> {
    authenticate_token(state, headers)
        .await
        .map(|(_, active)| active)
}

/// Like [`authenticate`], also handing back the bearer token.
pub(super) async fn authenticate_token<'h>(
    state: &AppState,
    headers: &'h HeaderMap,
) -> Result<(&'h str, ActiveSession), AuthRejection> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            serde_json::json!({ "error": "Missing bearer token" }),
        ));
    };

    match state.sessions.get(token).await {
        Some(active) => Ok((token, active)),
        None => Err(expired_session()),
    }
}

fn expired_session() -> AuthRejection {
    (
        StatusCode::UNAUTHORIZED,
        serde_json::json!({ "error": "Invalid or expired session" }),
    )
}

pub(super) async fn authenticate_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ActiveSession, AuthRejection> {
    let active = authenticate(state, headers).await?;
    if !active.session.is_admin() {
        return Err((
            StatusCode::FORBIDDEN,
            serde_json::json!({ "error": "Administrator session required" }),
        ));
    }
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extract_bearer_token_happy_path() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn extract_bearer_token_rejects_missing_or_empty() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        let mut headers2 = HeaderMap::new();
        headers2.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers2), None);
    }

    #[test]
    fn extract_bearer_token_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
