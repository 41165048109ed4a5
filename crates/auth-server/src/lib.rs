use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use reqwest::Url;
use serde::Deserialize;
use tracing::{info, warn};

pub mod state;

pub use state::AuthState;

/// Extensions the gateway waves through without any check; the web UI's
/// static assets are not worth a token round-trip.
const STATIC_EXTENSIONS: &[&str] = &[".js", ".css", ".png", ".ico", ".json", ".map", ".svg"];

/// Where to reach the operator when an unknown address knocks.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Public domain used to build authorize/revoke links.
    pub domain: String,
    /// Full ntfy topic URL; `None` disables push alerts.
    pub ntfy_url: Option<String>,
}

#[derive(Clone)]
pub struct AuthServerState {
    pub auth: AuthState,
    config: Arc<GatewayConfig>,
    http: reqwest::Client,
}

pub fn create_router(auth: AuthState, config: GatewayConfig) -> Router {
    let state = AuthServerState {
        auth,
        config: Arc::new(config),
        http: reqwest::Client::new(),
    };

    Router::new()
        .route("/auth-ip", get(auth_ip_handler))
        .route("/revoke-ip", get(revoke_ip_handler))
        .route("/validate", get(validate_handler))
        .with_state(state)
}

/// Outcome of one `/validate` check, kept separate from the HTTP mapping so
/// the decision table is testable on its own.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// Static asset, no check applies.
    StaticAsset,
    /// Address has never been authorized.
    Unauthorized,
    /// Address is fine but carried no token; redirect to the same URI with a
    /// freshly-issued one.
    RedirectWithToken(String),
    /// Address and token both check out.
    Allowed,
    /// Address is fine but the token is not its own.
    Forbidden,
}

/// Applies the gateway rules to one original request URI.
pub fn decide(auth: &AuthState, client_ip: &str, original_uri: &str) -> ValidateOutcome {
    let url = match Url::parse("http://gateway.invalid")
        .and_then(|base| base.join(original_uri))
    {
        Ok(url) => url,
        Err(_) => return ValidateOutcome::Forbidden,
    };

    let path = url.path().to_lowercase();
    if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return ValidateOutcome::StaticAsset;
    }

    if !auth.is_authorized(client_ip) {
        return ValidateOutcome::Unauthorized;
    }

    let received = url
        .query_pairs()
        .find(|(key, _)| key == "secure")
        .map(|(_, value)| value.into_owned());

    match received {
        None => {
            let token = auth.issue_token(client_ip);
            let mut redirect = url;
            redirect
                .query_pairs_mut()
                .append_pair("secure", &token);
            let location = match redirect.query() {
                Some(query) => format!("{}?{query}", redirect.path()),
                None => redirect.path().to_string(),
            };
            ValidateOutcome::RedirectWithToken(location)
        }
        Some(token) if auth.validate_token(client_ip, &token) => ValidateOutcome::Allowed,
        Some(_) => ValidateOutcome::Forbidden,
    }
}

#[derive(Debug, Deserialize)]
struct IpParam {
    ip: Option<String>,
}

async fn auth_ip_handler(
    State(state): State<AuthServerState>,
    Query(params): Query<IpParam>,
) -> Result<String, StatusCode> {
    let ip = params.ip.filter(|ip| !ip.is_empty()).ok_or(StatusCode::BAD_REQUEST)?;

    state.auth.authorize(&ip);
    info!("Access granted for IP: {ip}");

    Ok(format!("IP {ip} authorized successfully!"))
}

async fn revoke_ip_handler(
    State(state): State<AuthServerState>,
    Query(params): Query<IpParam>,
) -> Result<String, StatusCode> {
    let ip = params.ip.filter(|ip| !ip.is_empty()).ok_or(StatusCode::BAD_REQUEST)?;

    state.auth.revoke(&ip);
    info!("Access revoked for IP: {ip}");

    Ok(format!("Authorization for IP {ip} has been revoked."))
}

/// nginx `auth_request`-style check. The proxied request's URI arrives in
/// `X-Original-URI`; the verdict travels back purely as a status code (plus
/// a `Location` header for the token-issuing redirect).
async fn validate_handler(
    State(state): State<AuthServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let client_ip = client_ip(&headers, &peer);
    let original_uri = headers
        .get("x-original-uri")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("/");

    match decide(&state.auth, &client_ip, original_uri) {
        ValidateOutcome::StaticAsset | ValidateOutcome::Allowed => {
            StatusCode::OK.into_response()
        }
        ValidateOutcome::Unauthorized => {
            warn!("Access attempt from unauthorized IP: {client_ip}");
            notify_unauthorized(&state, &client_ip);
            StatusCode::UNAUTHORIZED.into_response()
        }
        ValidateOutcome::RedirectWithToken(location) => {
            match header::HeaderValue::from_str(&location) {
                Ok(value) => (
                    StatusCode::TEMPORARY_REDIRECT,
                    [(header::LOCATION, value)],
                )
                    .into_response(),
                Err(_) => StatusCode::FORBIDDEN.into_response(),
            }
        }
        ValidateOutcome::Forbidden => (
            StatusCode::FORBIDDEN,
            "Forbidden: Invalid token for this IP.",
        )
            .into_response(),
    }
}

/// First `X-Forwarded-For` hop when the gateway sits behind a proxy,
/// otherwise the socket peer.
fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Fire-and-forget operator alert carrying one-tap authorize/revoke links.
fn notify_unauthorized(state: &AuthServerState, client_ip: &str) {
    let Some(ntfy_url) = state.config.ntfy_url.clone() else {
        return;
    };
    let domain = state.config.domain.clone();
    let http = state.http.clone();
    let client_ip = client_ip.to_string();

    tokio::spawn(async move {
        let auth_link = format!("https://{domain}/api/auth/auth-ip?ip={client_ip}");
        let revoke_link = format!("https://{domain}/api/auth/revoke-ip?ip={client_ip}");
        let actions =
            format!("view, Authorize IP, {auth_link}; view, Revoke IP, {revoke_link}");

        let result = http
            .post(&ntfy_url)
            .header("Title", "Security Alert - tvbridge")
            .header("Priority", "high")
            .header("Tags", "warning,lock")
            .header("Action", actions)
            .body(format!("Access attempt from unauthorized IP: {client_ip}"))
            .send()
            .await;

        if let Err(err) = result {
            warn!("ntfy alert failed: {err}");
        }
    });
}
