//! Labeled request templates and the built-in workload mixes

use super::RequestContext;
use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// HTTP methods used by request templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

pub type PathBuilder = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;
pub type BodyBuilder = Arc<dyn Fn(&RequestContext) -> Vec<u8> + Send + Sync>;

/// One weighted request shape issued by the load generator
#[derive(Clone)]
pub struct EndpointTemplate {
    pub label: String,
    pub weight: u32,
    pub method: HttpMethod,
    path: PathBuilder,
    body: Option<BodyBuilder>,
    accept_conflict: bool,
}

impl EndpointTemplate {
    pub fn new<F>(label: impl Into<String>, weight: u32, method: HttpMethod, path: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            weight,
            method,
            path: Arc::new(path),
            body: None,
            accept_conflict: false,
        }
    }

    /// GET template with a fixed path
    pub fn get(label: impl Into<String>, weight: u32, path: &'static str) -> Self {
        Self::new(label, weight, HttpMethod::Get, move |_| path.to_string())
    }

    /// Attach a JSON body builder
    pub fn with_body<F>(mut self, body: F) -> Self
    where
        F: Fn(&RequestContext) -> Vec<u8> + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    /// Treat 409 Conflict as completed work (create-style templates)
    pub fn accepting_conflict(mut self) -> Self {
        self.accept_conflict = true;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn build_path(&self, ctx: &RequestContext) -> String {
        (self.path)(ctx)
    }

    pub fn build_body(&self, ctx: &RequestContext) -> Option<Vec<u8>> {
        self.body.as_ref().map(|b| b(ctx))
    }

    /// Status classification for this label
    pub fn is_success(&self, status: u16) -> bool {
        (200..300).contains(&status) || (self.accept_conflict && status == 409)
    }
}

impl fmt::Debug for EndpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointTemplate")
            .field("label", &self.label)
            .field("weight", &self.weight)
            .field("method", &self.method)
            .field("has_body", &self.body.is_some())
            .field("accept_conflict", &self.accept_conflict)
            .finish()
    }
}

/// Read-only mix: db 40, queries 25, json 20, users 15
pub fn read_mix() -> Vec<EndpointTemplate> {
    vec![
        EndpointTemplate::get("db", 40, "/db"),
        EndpointTemplate::new("queries", 25, HttpMethod::Get, |ctx| {
            format!("/queries?count={}", ctx.random_in(1, 20))
        }),
        EndpointTemplate::get("json", 20, "/json"),
        EndpointTemplate::new("users", 15, HttpMethod::Get, |ctx| {
            format!("/users?limit=10&offset={}", ctx.random_in(0, 100) * 10)
        }),
    ]
}

/// Mixed read/write workload including create and update templates
pub fn write_mix() -> Vec<EndpointTemplate> {
    vec![
        EndpointTemplate::get("db", 30, "/db"),
        EndpointTemplate::new("queries", 20, HttpMethod::Get, |ctx| {
            format!("/queries?count={}", ctx.random_in(1, 20))
        }),
        EndpointTemplate::get("json", 15, "/json"),
        EndpointTemplate::new("users", 15, HttpMethod::Get, |ctx| {
            format!("/users?limit=10&offset={}", ctx.random_in(0, 100) * 10)
        }),
        EndpointTemplate::new("create_user", 10, HttpMethod::Post, |_| "/users".to_string())
            .with_body(|ctx| {
                let seq = ctx.next_sequence();
                serde_json::json!({
                    "name": format!("load-{}-{}", ctx.run_id(), seq),
                    "email": format!("load-{}-{}@bench.local", ctx.run_id(), seq),
                    "age": 20 + (seq % 50),
                })
                .to_string()
                .into_bytes()
            })
            .accepting_conflict(),
        EndpointTemplate::new("update_user", 10, HttpMethod::Put, |ctx| {
            format!("/users/{}", ctx.random_id())
        })
        .with_body(|ctx| {
            serde_json::json!({ "age": ctx.random_in(18, 90) })
                .to_string()
                .into_bytes()
        }),
    ]
}

/// Resolve a named mix
pub fn named_mix(name: &str) -> Result<Vec<EndpointTemplate>, ConfigError> {
    match name {
        "read" => Ok(read_mix()),
        "write" => Ok(write_mix()),
        other => Err(ConfigError::UnknownMix(other.to_string())),
    }
}

/// Replace template weights with configured values
///
/// Labels missing from `overrides` keep their weight; the resulting table
/// is validated when the selector is built.
pub fn apply_weights(
    templates: Vec<EndpointTemplate>,
    overrides: &BTreeMap<String, u32>,
) -> Result<Vec<EndpointTemplate>, ConfigError> {
    for label in overrides.keys() {
        if !templates.iter().any(|t| &t.label == label) {
            return Err(ConfigError::UnknownLabel(label.clone()));
        }
    }

    Ok(templates
        .into_iter()
        .map(|t| match overrides.get(&t.label) {
            Some(&w) => t.with_weight(w),
            None => t,
        })
        .collect())
}
