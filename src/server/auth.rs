//! API key check for protected routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use super::state::AppState;
use super::ApiError;

/// Accepts `Authorization: <key>` or `Authorization: Bearer <key>`.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(value) = request.headers().get(AUTHORIZATION) else {
        log::warn!("No API key provided");
        return Err(ApiError::Unauthorized("API key missing"));
    };
    let presented = value.to_str().unwrap_or_default();
    let token = presented.strip_prefix("Bearer ").unwrap_or(presented).trim();

    if !keys_match(token, &state.settings.api_key) {
        log::warn!("Invalid API key provided");
        return Err(ApiError::Unauthorized("Invalid API key"));
    }
    Ok(next.run(request).await)
}

fn keys_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison_is_exact() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secreT", "secret"));
        assert!(!keys_match("secret ", "secret"));
        assert!(!keys_match("", "secret"));
    }
}
