//! Endpoint-scored CORS.
//!
//! Endpoints register path patterns (exact, prefix, suffix, contains);
//! the highest-scoring match decides the policy, falling back to the
//! global CORS configuration. `bypass_auth` entries are consulted by the
//! authentication middleware and audited at INFO. OPTIONS preflights
//! short-circuit with 204.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use moon_common::{MoonError, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::{CorsConfig, CorsEndpointConfig};
use crate::state::AppState;

/// How an endpoint path pattern matches a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    Exact,
    Prefix,
    Suffix,
    Contains,
}

impl PatternType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(PatternType::Exact),
            "prefix" => Ok(PatternType::Prefix),
            "suffix" => Ok(PatternType::Suffix),
            "contains" => Ok(PatternType::Contains),
            other => Err(MoonError::Validation(format!(
                "unknown cors pattern_type '{}'",
                other
            ))),
        }
    }
}

/// One resolved CORS policy: either the global one or an endpoint entry.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: u32,
}

/// One registered endpoint pattern.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub path: String,
    pub pattern: PatternType,
    pub policy: CorsPolicy,
    pub bypass_auth: bool,
}

impl EndpointPolicy {
    /// Match score; higher wins. `None` when the pattern does not match.
    pub fn score(&self, path: &str) -> Option<usize> {
        let clean = self.path.as_str();
        match self.pattern {
            PatternType::Exact => (path == clean).then(|| 1000 + clean.len()),
            PatternType::Prefix => path.starts_with(clean).then(|| 500 + clean.len()),
            PatternType::Suffix => path.ends_with(clean).then(|| 300 + clean.len()),
            PatternType::Contains => path.contains(clean).then(|| 100 + clean.len()),
        }
    }
}

/// The endpoint CORS registry plus the global fallback.
#[derive(Debug)]
pub struct CorsMatcher {
    enabled: bool,
    global: CorsPolicy,
    endpoints: Vec<EndpointPolicy>,
}

impl CorsMatcher {
    pub fn from_config(config: &CorsConfig) -> Result<Self> {
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| endpoint_from_config(e, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            enabled: config.enabled,
            global: CorsPolicy {
                allowed_origins: config.allowed_origins.clone(),
                allowed_methods: config.allowed_methods.clone(),
                allowed_headers: config.allowed_headers.clone(),
                allow_credentials: config.allow_credentials,
                max_age: config.max_age,
            },
            endpoints,
        })
    }

    /// The best-scoring endpoint entry for this path.
    pub fn match_endpoint(&self, path: &str) -> Option<&EndpointPolicy> {
        self.endpoints
            .iter()
            .filter_map(|e| e.score(path).map(|score| (score, e)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, e)| e)
    }

    /// The policy to apply: endpoint match first, then global when CORS
    /// is enabled.
    pub fn policy_for(&self, path: &str) -> Option<&CorsPolicy> {
        if let Some(endpoint) = self.match_endpoint(path) {
            return Some(&endpoint.policy);
        }
        self.enabled.then_some(&self.global)
    }

    /// Whether the auth middleware should skip authentication for this
    /// path. Audited at INFO by the caller.
    pub fn bypasses_auth(&self, path: &str) -> bool {
        self.match_endpoint(path).map(|e| e.bypass_auth).unwrap_or(false)
    }
}

fn endpoint_from_config(entry: &CorsEndpointConfig, global: &CorsConfig) -> Result<EndpointPolicy> {
    let or_global = |own: &Vec<String>, fallback: &Vec<String>| {
        if own.is_empty() {
            fallback.clone()
        } else {
            own.clone()
        }
    };
    Ok(EndpointPolicy {
        path: entry.path.clone(),
        pattern: PatternType::parse(&entry.pattern_type)?,
        policy: CorsPolicy {
            allowed_origins: or_global(&entry.allowed_origins, &global.allowed_origins),
            allowed_methods: or_global(&entry.allowed_methods, &global.allowed_methods),
            allowed_headers: or_global(&entry.allowed_headers, &global.allowed_headers),
            allow_credentials: entry.allow_credentials,
            max_age: global.max_age,
        },
        bypass_auth: entry.bypass_auth,
    })
}

/// Resolves the Access-Control-Allow-Origin value for a request origin.
fn allow_origin_value(policy: &CorsPolicy, origin: Option<&str>) -> Option<String> {
    let wildcard = policy.allowed_origins.iter().any(|o| o == "*");
    match origin {
        Some(origin) => {
            if wildcard {
                // Credentials forbid the literal wildcard.
                if policy.allow_credentials {
                    Some(origin.to_string())
                } else {
                    Some("*".to_string())
                }
            } else if policy.allowed_origins.iter().any(|o| o == origin) {
                Some(origin.to_string())
            } else {
                None
            }
        }
        None => wildcard.then(|| "*".to_string()),
    }
}

fn apply_headers(response: &mut Response, policy: &CorsPolicy, allow_origin: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    if policy.allow_credentials {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
}

/// The outermost pipeline middleware: resolves the CORS policy, answers
/// preflights with 204, and decorates responses.
pub async fn cors_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = state.relative_path(req.uri().path());
    let Some(policy) = state.cors.policy_for(&path).cloned() else {
        return next.run(req).await;
    };

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let allow_origin = allow_origin_value(&policy, origin.as_deref());

    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        if let Some(allow_origin) = allow_origin {
            apply_headers(&mut response, &policy, &allow_origin);
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&policy.allowed_methods.join(", ")) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
            }
            if let Ok(value) = HeaderValue::from_str(&policy.allowed_headers.join(", ")) {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
            }
            if let Ok(value) = HeaderValue::from_str(&policy.max_age.to_string()) {
                headers.insert(header::ACCESS_CONTROL_MAX_AGE, value);
            }
        }
        return response;
    }

    let mut response = next.run(req).await;
    if let Some(allow_origin) = allow_origin {
        apply_headers(&mut response, &policy, &allow_origin);
    }
    response
}

/// INFO audit entry for an auth bypass, called by the auth middleware.
pub fn audit_bypass(path: &str) {
    info!(path = %path, "authentication bypassed by cors endpoint policy");
}
