use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// API-key authentication for `/api/*`: `X-API-Key` or a Bearer token.
/// Disabled unless configured.
pub async fn api_key_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let auth = state.services.store.snapshot().rpc.authentication.clone();
    if !auth.enable || auth.api_key.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| {
            request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(ToString::to_string)
        });

    if provided.as_deref() == Some(auth.api_key.as_str()) {
        next.run(request).await
    } else {
        unauthorized("Unauthorized: invalid API key", false)
    }
}

/// HTTP Basic authentication for the web root. Disabled unless configured.
pub async fn basic_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let auth = state.services.store.snapshot().rpc.authentication.clone();
    if !auth.enable || auth.web_username.is_empty() || auth.web_password.is_empty() {
        return next.run(request).await;
    }

    let ok = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(decode_basic)
        .is_some_and(|(user, pass)| user == auth.web_username && pass == auth.web_password);

    if ok {
        next.run(request).await
    } else {
        unauthorized("Unauthorized", true)
    }
}

fn unauthorized(message: &str, challenge: bool) -> Response {
    let mut builder = Response::builder().status(StatusCode::UNAUTHORIZED);
    if challenge {
        builder = builder.header(header::WWW_AUTHENTICATE, "Basic realm=\"livecap\"");
    }
    builder
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

/// Decode a Basic credential pair.
fn decode_basic(encoded: &str) -> Option<(String, String)> {
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        let (user, pass) = decode_basic("dXNlcjpwYXNz").unwrap();
        assert_eq!(user, "user");
        assert_eq!(pass, "pass");
        assert!(decode_basic("bm9jb2xvbg==").is_none());
        assert!(decode_basic("!!!").is_none());
    }
}
