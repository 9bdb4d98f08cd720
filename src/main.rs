use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use spa_prerender::{
    prerender, ManifestRouteSource, ParameterValuesMap, PrerenderOptions, PrerenderPlan,
    TargetSpecifier,
};
use spa_prerender::render::NodeBinder;

#[derive(Debug, Parser)]
#[command(name = "spa-prerender")]
#[command(about = "Prerender every route of a single-page application to static HTML", long_about = None)]
struct Cli {
    /// Path to the workspace config file.
    #[arg(long, default_value = "angular.json")]
    config: PathBuf,

    /// Target of the browser build, optionally with a configuration (`build:production`).
    #[arg(long, default_value = "build")]
    browser_target: TargetSpecifier,

    /// Target of the server build.
    #[arg(long, default_value = "server")]
    server_target: TargetSpecifier,

    /// Routes to skip, comma separated.
    #[arg(long, value_delimiter = ',')]
    exclude_routes: Vec<String>,

    /// Values for route parameters as JSON, e.g. '{":id":["1","2"]}'.
    #[arg(long, default_value = "{}")]
    parameter_values: String,

    /// JSON route manifest. Defaults to `routes.json` next to the tsConfig.
    #[arg(long)]
    routes: Option<PathBuf>,

    /// Node binary used to run the server bundle.
    #[arg(long, default_value = "node")]
    node: PathBuf,

    /// Express response token as `module#export`.
    #[arg(long)]
    express_response_token: Option<String>,

    /// Hapi response token as `module#export`.
    #[arg(long)]
    hapi_response_token: Option<String>,

    /// Write every route regardless of its status code.
    #[arg(long)]
    ignore_status_code: bool,

    /// Keep the original index.html as start.html.
    #[arg(long)]
    preserve_index_html: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(err) = run(cli).await {
        error!("{:#}", err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let parameter_values_map: ParameterValuesMap = serde_json::from_str(&cli.parameter_values)
        .context("--parameter-values must be a JSON object of string arrays")?;

    let plan = PrerenderPlan {
        config: cli.config,
        browser_target: cli.browser_target,
        server_target: cli.server_target,
    };
    let opts = PrerenderOptions {
        exclude_routes: cli.exclude_routes,
        parameter_values_map,
        is_verbose: cli.verbose,
        should_ignore_status_code: cli.ignore_status_code,
        should_preserve_index_html: cli.preserve_index_html,
        express_response_token: cli.express_response_token,
        hapi_response_token: cli.hapi_response_token,
    };

    let mut source = ManifestRouteSource::new();
    if let Some(manifest) = cli.routes {
        source = source.with_manifest(manifest);
    }

    let report = prerender(plan, opts, &NodeBinder::new(cli.node), &source)
        .await
        .context("prerendering failed")?;

    tracing::info!(
        "Prerendered {} routes, skipped {}.",
        report.written().count(),
        report.skipped().count()
    );

    Ok(())
}
