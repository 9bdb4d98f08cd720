//! Core prerender pipeline.
//!
//! This module orchestrates a full run:
//! 1. Resolve the browser and server output paths from the workspace config
//! 2. Unbundle the server entry and bind it into a render function
//! 3. Read the base document and the declared routes
//! 4. Filter and expand the routes
//! 5. Render and write each concrete route, strictly one after another
//!
//! Any error aborts the run. Policy exclusions and non-2xx statuses are
//! skips, not errors.

use std::path::Path;

use tracing::{info, warn};

use crate::config::{Workspace, OUTPUT_PATH, TS_CONFIG};
use crate::render::capture::StatusCell;
use crate::render::{response_providers, BindRender, Render, RenderRequest};
use crate::routes::{filter_routes, resolve_routes, RouteSource, DEFAULT_ROUTE};
use crate::unbundle::unbundle_tokens;
use crate::utils::{route_to_output_dir, INDEX_HTML, START_HTML};
use crate::{
    PrerenderError, PrerenderOptions, PrerenderPlan, PrerenderReport, RouteOutcome, RouteReport,
    SkipReason,
};

/// File name of the server entry inside the server output path.
pub const SERVER_ENTRY: &str = "main.js";

/// Narration that only shows up with `is_verbose`.
macro_rules! verbose {
    ($opts:expr, $($arg:tt)+) => {
        if $opts.is_verbose {
            info!($($arg)+);
        }
    };
}

/// Execute the prerender pipeline.
pub async fn execute_prerender<B, S>(
    plan: PrerenderPlan,
    opts: PrerenderOptions,
    binder: &B,
    source: &S,
) -> Result<PrerenderReport, PrerenderError>
where
    B: BindRender,
    S: RouteSource,
{
    let mut report = PrerenderReport::default();

    verbose!(opts, "The path of the workspace config file is \"{}\".", plan.config.display());

    let workspace = Workspace::load(&plan.config).await?;
    let browser_output_path = workspace.resolve_path(&plan.browser_target, OUTPUT_PATH)?;
    let server_output_path = workspace.resolve_path(&plan.server_target, OUTPUT_PATH)?;

    verbose!(
        opts,
        "The resolved output path of the browser target is \"{}\".",
        browser_output_path.display()
    );
    verbose!(
        opts,
        "The resolved output path of the server target is \"{}\".",
        server_output_path.display()
    );

    // Unbundle before anything is rendered: a bundle with unresolvable
    // tokens cannot be trusted for any route.
    let main = server_output_path.join(SERVER_ENTRY);
    verbose!(opts, "The path of the main.js file is \"{}\".", main.display());

    let unbundled = unbundle_tokens(&main).await?;
    report.unbundled = unbundled.rewritten;
    if unbundled.rewritten {
        verbose!(
            opts,
            "The main.js contains bundled tokens which have been replaced with classic require statements."
        );
    }

    let renderer = binder.bind(&unbundled.path)?;

    let document = read_document(&browser_output_path, &opts).await?;

    let ts_config = workspace.resolve_path(&plan.browser_target, TS_CONFIG)?;
    verbose!(
        opts,
        "The path of the tsconfig.json file used to retrieve the routes is \"{}\".",
        ts_config.display()
    );

    let mut routes: Vec<String> = source
        .declared_routes(&ts_config)
        .await?
        .into_iter()
        .map(|route| route.path)
        .collect();

    if routes.is_empty() {
        warn!("No routes could be retrieved thus the default route at \"/\" will be added.");
        routes.push(DEFAULT_ROUTE.to_string());
    }

    let filtered = filter_routes(&routes, &opts.exclude_routes, &opts.parameter_values_map);
    report
        .routes
        .extend(filtered.skipped.into_iter().map(|(route, reason)| RouteReport {
            route,
            outcome: RouteOutcome::Skipped(reason),
        }));

    let resolved = resolve_routes(&filtered.renderable, &opts.parameter_values_map)?;

    for route in resolved {
        let outcome =
            render_route(&route, &document, &browser_output_path, &opts, &renderer).await?;
        report.routes.push(RouteReport { route, outcome });
    }

    Ok(report)
}

/// Read the base document. A `start.html` kept by an earlier run is the
/// original shell, since that run overwrote `index.html` with the root route.
async fn read_document(
    browser_output_path: &Path,
    opts: &PrerenderOptions,
) -> Result<String, PrerenderError> {
    let start = browser_output_path.join(START_HTML);
    if opts.should_preserve_index_html && tokio::fs::try_exists(&start).await? {
        verbose!(opts, "The preserved start.html file at \"{}\" is used as the document.", start.display());
        return Ok(tokio::fs::read_to_string(&start).await?);
    }

    let index = browser_output_path.join(INDEX_HTML);
    verbose!(opts, "The path of the index.html file is \"{}\".", index.display());
    Ok(tokio::fs::read_to_string(&index).await?)
}

/// Render a single concrete route and persist it unless its status gates it.
async fn render_route<R: Render>(
    route: &str,
    document: &str,
    browser_output_path: &Path,
    opts: &PrerenderOptions,
    renderer: &R,
) -> Result<RouteOutcome, PrerenderError> {
    let path = route_to_output_dir(browser_output_path, route);
    tokio::fs::create_dir_all(&path).await?;

    let status = StatusCell::new();
    let request = RenderRequest::new(
        document,
        route,
        response_providers(
            opts.express_response_token.as_deref(),
            opts.hapi_response_token.as_deref(),
            &status,
        ),
    );
    let html = renderer.render(request).await?;
    let status_code = status.get();

    if !opts.should_ignore_status_code && status_code >= 300 {
        warn!("The route at \"{route}\" was skipped because its status code was {status_code}.");
        return Ok(RouteOutcome::Skipped(SkipReason::Status(status_code)));
    }

    if path == browser_output_path {
        if opts.should_preserve_index_html {
            info!("The index.html file will be preserved as start.html because it would otherwise be overwritten.");
            tokio::fs::write(browser_output_path.join(START_HTML), document).await?;
        } else {
            warn!("The index.html file will be overwritten by the following route. This can be prevented by using the --preserve-index-html flag.");
        }
    }

    let file = path.join(INDEX_HTML);
    tokio::fs::write(&file, html).await?;
    info!("The route at \"{route}\" was rendered successfully.");

    Ok(RouteOutcome::Written {
        path: file,
        status: status_code,
    })
}
