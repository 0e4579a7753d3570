//! Cross-Site Request Forgery (CSRF) protection middleware.
//!
//! Uses the double-submit cookie pattern: a random token is issued in a cookie on safe
//! requests and mutating requests must echo it back, either in a header or in a form
//! field named like the cookie. Nothing is stored server-side.

use super::wants_json;
use crate::{config::CsrfConfig, error::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, uri::Scheme, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// Generates a new URL-safe token from the OS random source.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two tokens without short-circuiting on the first differing byte.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let (provided, expected) = (provided.as_bytes(), expected.as_bytes());
    if provided.len() != expected.len() {
        return false;
    }
    provided.iter().zip(expected).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

/// GET, HEAD, OPTIONS and TRACE never need a token.
pub fn is_safe_method(method: &Method) -> bool {
    ["GET", "HEAD", "OPTIONS", "TRACE"].iter().any(|m| method.as_str().eq_ignore_ascii_case(m))
}

/// The CSRF token for the current request.
///
/// Attached to the request by [`csrf_middleware`]; handlers extract it to embed the
/// token into rendered forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    value: String,
    field_name: String,
}

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Name of the form field that carries the token.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Hidden `<input>` for server-rendered forms.
    pub fn hidden_field(&self) -> String {
        // Cookie names and base64url never need HTML escaping.
        format!(r#"<input type="hidden" name="{}" value="{}">"#, self.field_name, self.value)
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CsrfToken>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("CSRF middleware is not installed for this route")))
    }
}

/// `Set-Cookie` value owed to the response of a request that got a fresh token.
#[derive(Debug, Clone)]
struct PendingCookie(HeaderValue);

/// Issues and validates double-submit tokens.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie_name: String,
    header_name: HeaderName,
    secure_cookie: Option<bool>,
    trust_proxy_headers: bool,
    max_form_bytes: usize,
}

impl CsrfGuard {
    pub fn new(cfg: &CsrfConfig, trust_proxy_headers: bool) -> anyhow::Result<Self> {
        let header_name = HeaderName::from_bytes(cfg.header_name.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid CSRF header name {:?}: {}", cfg.header_name, e))?;
        Ok(Self {
            cookie_name: cfg.cookie_name.clone(),
            header_name,
            secure_cookie: cfg.secure_cookie,
            trust_proxy_headers,
            max_form_bytes: cfg.max_form_bytes,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }

    /// The non-empty token carried by the request's cookie, if any.
    pub fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| name.trim() == self.cookie_name)
            .map(|(_, value)| value.trim().trim_matches('"'))
            // Path-scoped duplicates may be sent empty ahead of the real cookie
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Returns the request's token, issuing one if the client has none yet.
    ///
    /// Repeated calls on the same request return the same token. A freshly issued token
    /// is remembered on the request so the middleware can emit its `Set-Cookie`.
    pub fn ensure_token<B>(&self, req: &mut Request<B>) -> CsrfToken {
        if let Some(token) = req.extensions().get::<CsrfToken>() {
            return token.clone();
        }
        let token = match self.cookie_token(req.headers()) {
            Some(value) => self.token(value),
            None => {
                let token = self.token(generate_token());
                match self.set_cookie_header(token.as_str(), self.is_secure(req)) {
                    Some(cookie) => {
                        req.extensions_mut().insert(PendingCookie(cookie));
                    }
                    None => tracing::warn!("could not encode CSRF cookie header"),
                }
                token
            }
        };
        req.extensions_mut().insert(token.clone());
        token
    }

    fn token(&self, value: String) -> CsrfToken {
        CsrfToken { value, field_name: self.cookie_name.clone() }
    }

    /// Session-scoped cookie: `Path=/; HttpOnly; SameSite=Lax`, plus `Secure` over TLS.
    pub fn set_cookie_header(&self, token: &str, secure: bool) -> Option<HeaderValue> {
        let secure = if secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!("{}={}; Path=/; HttpOnly; SameSite=Lax{}", self.cookie_name, token, secure))
            .ok()
    }

    fn is_secure<B>(&self, req: &Request<B>) -> bool {
        if let Some(forced) = self.secure_cookie {
            return forced;
        }
        if req.uri().scheme() == Some(&Scheme::HTTPS) {
            return true;
        }
        self.trust_proxy_headers
            && req
                .headers()
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().eq_ignore_ascii_case("https"))
                .unwrap_or(false)
    }

    /// Double-submit check.
    ///
    /// Safe methods always pass. Otherwise the cookie must be present and either the
    /// configured header or `form_value` must equal it.
    pub fn validate(&self, method: &Method, headers: &HeaderMap, form_value: Option<&str>) -> bool {
        if is_safe_method(method) {
            return true;
        }
        let Some(cookie) = self.cookie_token(headers) else {
            return false;
        };
        let header_ok = headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .map(|v| tokens_match(v, &cookie))
            .unwrap_or(false);
        header_ok || form_value.map(|v| tokens_match(v, &cookie)).unwrap_or(false)
    }
}

fn is_urlencoded_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// First value of `name` in an `application/x-www-form-urlencoded` body.
fn form_field(body: &[u8], name: &str) -> Option<String> {
    let body = std::str::from_utf8(body).ok()?;
    let decode = |s: &str| urlencoding::decode(&s.replace('+', " ")).ok().map(|v| v.into_owned());
    body.split('&').filter(|pair| !pair.is_empty()).find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if decode(key)? == name {
            decode(value)
        } else {
            None
        }
    })
}

/// Response for a request that failed the CSRF check.
///
/// Deliberately does not say which part of the check failed.
#[derive(Debug, Clone, Copy)]
pub struct CsrfRejection {
    /// Render the JSON error envelope instead of plain text.
    pub json: bool,
}

impl IntoResponse for CsrfRejection {
    fn into_response(self) -> Response {
        if self.json {
            return AppError::Forbidden("invalid CSRF token".to_string()).into_response();
        }
        (StatusCode::FORBIDDEN, [(header::CACHE_CONTROL, "no-store")], "Forbidden: invalid CSRF token")
            .into_response()
    }
}

/// CSRF protection middleware.
///
/// Safe methods get a token (issuing the cookie when missing) and pass through.
/// Mutating methods must echo the cookie token in the configured header or, for
/// url-encoded forms, in the form field named like the cookie. The buffered form body
/// is handed on to the handler unchanged.
pub async fn csrf_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let guard = &state.csrf;

    if is_safe_method(req.method()) {
        guard.ensure_token(&mut req);
        let pending = req.extensions().get::<PendingCookie>().cloned();
        let mut res = next.run(req).await;
        if let Some(PendingCookie(cookie)) = pending {
            state.metrics.inc_csrf_issued();
            res.headers_mut().append(header::SET_COOKIE, cookie);
        }
        return res;
    }

    let json = wants_json(req.headers());
    if guard.validate(req.method(), req.headers(), None) {
        guard.ensure_token(&mut req);
        return next.run(req).await;
    }

    if guard.cookie_token(req.headers()).is_some() && is_urlencoded_form(req.headers()) {
        let (parts, body) = req.into_parts();
        match axum::body::to_bytes(body, guard.max_form_bytes).await {
            Ok(bytes) => {
                let field = form_field(&bytes, guard.cookie_name());
                if guard.validate(&parts.method, &parts.headers, field.as_deref()) {
                    let mut req = Request::from_parts(parts, Body::from(bytes));
                    guard.ensure_token(&mut req);
                    return next.run(req).await;
                }
                reject(&state, &parts.method, parts.uri.path(), json)
            }
            Err(e) => {
                tracing::debug!("could not buffer form body for CSRF check: {}", e);
                reject(&state, &parts.method, parts.uri.path(), json)
            }
        }
    } else {
        reject(&state, req.method(), req.uri().path(), json)
    }
}

fn reject(state: &AppState, method: &Method, path: &str, json: bool) -> Response {
    state.metrics.inc_csrf_rejected();
    tracing::debug!(%method, path, "CSRF validation failed");
    CsrfRejection { json }.into_response()
}
