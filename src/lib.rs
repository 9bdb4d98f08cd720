//! # SPA Prerender
//!
//! Build-time prerenderer that consumes the output of an application build
//! (browser bundle + server-side rendering bundle) and writes one static
//! `index.html` per known route.
//!
//! The prerenderer never matches live traffic. It expands a finite route list
//! once, renders each concrete route sequentially, and stops at the first
//! fatal error.

pub mod config;
pub mod prerender;
pub mod render;
pub mod routes;
pub mod unbundle;
pub mod utils;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::TargetSpecifier;
pub use render::{BindRender, Render, RenderRequest};
pub use routes::{DeclaredRoute, ManifestRouteSource, RouteSource};

/// Parameter name (with its leading `:`) → ordered values to substitute.
pub type ParameterValuesMap = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// PrerenderPlan
// ---------------------------------------------------------------------------

/// Describes WHAT to prerender.
#[derive(Debug, Clone)]
pub struct PrerenderPlan {
    /// Path to the workspace descriptor (`angular.json`).
    pub config: PathBuf,
    /// Target whose `outputPath` holds the browser build and `index.html`.
    pub browser_target: TargetSpecifier,
    /// Target whose `outputPath` holds the server bundle (`main.js`).
    pub server_target: TargetSpecifier,
}

// ---------------------------------------------------------------------------
// PrerenderOptions
// ---------------------------------------------------------------------------

/// Describes HOW to prerender.
#[derive(Debug, Clone, Default)]
pub struct PrerenderOptions {
    /// Routes skipped on exact string match.
    pub exclude_routes: Vec<String>,
    /// Values for each parameter segment, keyed with its marker (`:id`).
    pub parameter_values_map: ParameterValuesMap,
    /// Narrate resolved paths and intermediate decisions.
    pub is_verbose: bool,
    /// Write every rendered route regardless of the captured status.
    pub should_ignore_status_code: bool,
    /// Copy the original `index.html` to `start.html` before the `/` route
    /// overwrites it.
    pub should_preserve_index_html: bool,
    /// Identity token for an express-style capture (`status(code)`).
    pub express_response_token: Option<String>,
    /// Identity token for a hapi-style capture (`code(code)`).
    pub hapi_response_token: Option<String>,
}

// ---------------------------------------------------------------------------
// PrerenderReport
// ---------------------------------------------------------------------------

/// Why a route did not produce an `index.html`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The pattern contains a `**` wildcard segment.
    Wildcard,
    /// The pattern is listed in `exclude_routes`.
    Excluded,
    /// The pattern uses a parameter with no entry in the values map.
    UnboundParameter(String),
    /// The render captured a status of 300 or above.
    Status(u16),
}

/// Terminal state of a single route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteOutcome {
    Written { path: PathBuf, status: u16 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReport {
    pub route: String,
    pub outcome: RouteOutcome,
}

/// Summary of a finished run. Filtered patterns come first (in declaration
/// order), followed by every concrete route in render order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrerenderReport {
    /// Whether the server entry had to be unbundled.
    pub unbundled: bool,
    pub routes: Vec<RouteReport>,
}

impl PrerenderReport {
    /// Routes that produced an `index.html`.
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().filter_map(|r| match r.outcome {
            RouteOutcome::Written { .. } => Some(r.route.as_str()),
            RouteOutcome::Skipped(_) => None,
        })
    }

    /// Routes that were filtered out or gated by their status.
    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.routes.iter().filter_map(|r| match &r.outcome {
            RouteOutcome::Skipped(reason) => Some((r.route.as_str(), reason)),
            RouteOutcome::Written { .. } => None,
        })
    }
}

// ---------------------------------------------------------------------------
// PrerenderError
// ---------------------------------------------------------------------------

/// Errors that abort the run.
#[derive(Debug, Error)]
pub enum PrerenderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing property `{property}` for target `{target}` of project `{project}`")]
    MissingProperty {
        project: String,
        target: String,
        property: String,
    },

    #[error("No module table found in `{path}` although it contains {sites} token loads")]
    TokenTableNotFound { path: PathBuf, sites: usize },

    #[error("Token `{token}` in `{path}` has no entry in the module table")]
    UnresolvedToken { path: PathBuf, token: String },

    #[error("Route `{route}` uses parameter `{parameter}` which has no values")]
    MissingBinding { route: String, parameter: String },

    #[error("Rendering `{route}` failed: {message}")]
    Render { route: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Prerender every renderable route of the application described by `plan`.
///
/// The pipeline:
/// 1. Resolves the browser and server output paths from the workspace config
/// 2. Unbundles token loads in the server entry and binds it via `binder`
/// 3. Reads the base `index.html` and the declared routes from `source`
/// 4. Filters and expands the routes
/// 5. Renders and writes each concrete route, one at a time
pub async fn prerender<B, S>(
    plan: PrerenderPlan,
    opts: PrerenderOptions,
    binder: &B,
    source: &S,
) -> Result<PrerenderReport, PrerenderError>
where
    B: BindRender,
    S: RouteSource,
{
    prerender::execute_prerender(plan, opts, binder, source).await
}
