//! Route discovery, filtering and parameter expansion.
//!
//! Filtering and resolution are pure: same input → same output, no I/O.
//! Only [`ManifestRouteSource`] touches the filesystem.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::{is_parameter_segment, is_wildcard_route, parameter_segments};
use crate::{ParameterValuesMap, PrerenderError, SkipReason};

/// Pattern used when no routes are declared at all.
pub const DEFAULT_ROUTE: &str = "/";

/// File name looked up next to the `tsConfig` when no manifest is given.
pub const DEFAULT_MANIFEST: &str = "routes.json";

// ---------------------------------------------------------------------------
// Route Source
// ---------------------------------------------------------------------------

/// A route as declared by the application. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredRoute {
    pub path: String,
}

/// Provides the application's declared route patterns.
///
/// `ts_config` is the resolved `tsConfig` of the browser target, which is
/// what static route analysis starts from. An empty list is valid.
pub trait RouteSource {
    fn declared_routes(
        &self,
        ts_config: &Path,
    ) -> impl Future<Output = Result<Vec<DeclaredRoute>, PrerenderError>> + Send;
}

/// Reads declared routes from a JSON array of `{ "path": ... }` objects.
#[derive(Debug, Clone, Default)]
pub struct ManifestRouteSource {
    /// Explicit manifest. Must exist when set.
    manifest: Option<PathBuf>,
}

impl ManifestRouteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manifest(mut self, manifest: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }
}

impl RouteSource for ManifestRouteSource {
    fn declared_routes(
        &self,
        ts_config: &Path,
    ) -> impl Future<Output = Result<Vec<DeclaredRoute>, PrerenderError>> + Send {
        let explicit = self.manifest.clone();
        let implicit = ts_config
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_MANIFEST);

        async move {
            let path = match explicit {
                Some(path) => path,
                None => {
                    if !tokio::fs::try_exists(&implicit).await? {
                        warn!(
                            "No route manifest found at \"{}\", assuming no declared routes.",
                            implicit.display()
                        );
                        return Ok(Vec::new());
                    }
                    implicit
                }
            };

            let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
                PrerenderError::Config(format!(
                    "failed to read route manifest '{}': {e}",
                    path.display()
                ))
            })?;
            let routes: Vec<DeclaredRoute> = serde_json::from_str(&source)?;
            Ok(routes)
        }
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Result of [`filter_routes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredRoutes {
    /// Patterns that may be resolved, in declaration order.
    pub renderable: Vec<String>,
    /// Patterns dropped by policy, in declaration order.
    pub skipped: Vec<(String, SkipReason)>,
}

/// Drop wildcard routes, explicitly excluded routes and routes with an
/// unbound parameter. The first matching condition wins and is logged.
pub fn filter_routes(
    routes: &[String],
    exclude_routes: &[String],
    parameter_values_map: &ParameterValuesMap,
) -> FilteredRoutes {
    let mut filtered = FilteredRoutes::default();

    for route in routes {
        let reason = if is_wildcard_route(route) {
            warn!("The route at \"{route}\" will not be rendered because it contains a wildcard.");
            Some(SkipReason::Wildcard)
        } else if exclude_routes.contains(route) {
            warn!("The route at \"{route}\" was excluded.");
            Some(SkipReason::Excluded)
        } else if let Some(segment) =
            parameter_segments(route).find(|s| !parameter_values_map.contains_key(*s))
        {
            warn!(
                "The route at \"{route}\" will not be rendered because it contains a segment with an unspecified parameter \"{segment}\"."
            );
            Some(SkipReason::UnboundParameter(segment.to_string()))
        } else {
            None
        };

        match reason {
            Some(reason) => filtered.skipped.push((route.clone(), reason)),
            None => filtered.renderable.push(route.clone()),
        }
    }

    filtered
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Expand every route against the parameter values map.
///
/// Routes keep their order. Within one route the expansion is the cartesian
/// product of its distinct parameters, leftmost parameter varying slowest.
/// A parameter that occurs several times takes the same value everywhere.
pub fn resolve_routes(
    routes: &[String],
    parameter_values_map: &ParameterValuesMap,
) -> Result<Vec<String>, PrerenderError> {
    let mut resolved = Vec::with_capacity(routes.len());
    for route in routes {
        resolved.extend(resolve_route(route, parameter_values_map)?);
    }
    Ok(resolved)
}

fn resolve_route(
    route: &str,
    parameter_values_map: &ParameterValuesMap,
) -> Result<Vec<String>, PrerenderError> {
    let segments: Vec<&str> = route.split('/').collect();

    let mut axes: Vec<(&str, &[String])> = Vec::new();
    for &segment in segments.iter().filter(|s| is_parameter_segment(s)) {
        if axes.iter().any(|(name, _)| *name == segment) {
            continue;
        }
        let values = parameter_values_map
            .get(segment)
            .ok_or_else(|| PrerenderError::MissingBinding {
                route: route.to_string(),
                parameter: segment.to_string(),
            })?;
        axes.push((segment, values.as_slice()));
    }

    if axes.is_empty() {
        return Ok(vec![route.to_string()]);
    }

    let mut combinations: Vec<Vec<&str>> = vec![Vec::new()];
    for &(_, values) in &axes {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push(value.as_str());
                    next
                })
            })
            .collect();
    }

    Ok(combinations
        .iter()
        .map(|combination| {
            segments
                .iter()
                .map(|segment| {
                    axes.iter()
                        .position(|(name, _)| name == segment)
                        .map_or(*segment, |axis| combination[axis])
                })
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
