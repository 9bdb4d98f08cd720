//! Node render binder.
//!
//! Runs the server entry in a `node` child process, one process per route.
//! The embedded driver script `require`s the entry, picks the render function
//! it exports, wires up the capture providers, and prints the result as JSON.
//!
//! Provider tokens are written `module#export` and resolved from the entry's
//! directory, so they hit the same package instance as the unbundled entry.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::render::{BindRender, Capture, Render, RenderRequest};
use crate::PrerenderError;

/// Driver executed with `node -e`. Reads one request from stdin.
///
/// The process exits once the response is flushed: handles the app leaves
/// open (timers, keep-alive agents) must not keep the child alive.
pub const DRIVER: &str = r#"
const { dirname } = require('path');
const chunks = [];
process.stdin.on('data', (chunk) => chunks.push(chunk));
process.stdin.on('end', async () => {
    try {
        const request = JSON.parse(Buffer.concat(chunks).toString('utf8'));
        const entry = require(request.entry);
        if (typeof entry.enableProdMode === 'function') {
            try { entry.enableProdMode(); } catch (_) { /* already enabled */ }
        }
        const render = (entry.AppServerModuleNgFactory === undefined)
            ? (options) => entry.renderModule(entry.AppServerModule, options)
            : (options) => entry.renderModuleFactory(entry.AppServerModuleNgFactory, options);
        let status = null;
        const extraProviders = request.providers.map(({ module, export: name, setter }) => {
            const exports = require(require.resolve(module, { paths: [ dirname(request.entry) ] }));
            const capture = {};
            capture[setter] = (value) => {
                status = value;
                return capture;
            };
            return { provide: (name === null) ? exports : exports[name], useValue: capture };
        });
        const html = await render({ document: request.document, extraProviders, url: request.url });
        process.stdout.write(JSON.stringify({ html, status }), () => process.exit(0));
    } catch (err) {
        process.stderr.write(String((err && err.stack) || err), () => process.exit(1));
    }
});
"#;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    entry: &'a Path,
    document: &'a str,
    url: &'a str,
    providers: Vec<DriverProvider<'a>>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct DriverProvider<'a> {
    module: &'a str,
    export: Option<&'a str>,
    setter: &'static str,
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
    html: String,
    #[serde(default)]
    status: Option<u16>,
}

/// Split `module#export` into its parts. A bare module is its own token.
fn parse_token(token: &str) -> (&str, Option<&str>) {
    match token.split_once('#') {
        Some((module, export)) if !export.is_empty() => (module, Some(export)),
        Some((module, _)) => (module, None),
        None => (token, None),
    }
}

fn driver_request<'a>(entry: &'a Path, request: &'a RenderRequest) -> DriverRequest<'a> {
    DriverRequest {
        entry,
        document: &request.document,
        url: &request.url,
        providers: request
            .extra_providers
            .iter()
            .map(|binding| {
                let (module, export) = parse_token(&binding.token);
                DriverProvider {
                    module,
                    export,
                    setter: match binding.capture {
                        Capture::Express(_) => "status",
                        Capture::Hapi(_) => "code",
                    },
                }
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeBinder {
    node: PathBuf,
}

impl NodeBinder {
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }
}

impl Default for NodeBinder {
    fn default() -> Self {
        Self::new("node")
    }
}

impl BindRender for NodeBinder {
    type Renderer = NodeRenderer;

    fn bind(&self, entry: &Path) -> Result<NodeRenderer, PrerenderError> {
        let entry = if entry.is_absolute() {
            entry.to_path_buf()
        } else {
            std::env::current_dir()?.join(entry)
        };
        Ok(NodeRenderer {
            node: self.node.clone(),
            entry,
        })
    }
}

/// A server entry bound to a `node` binary.
#[derive(Debug, Clone)]
pub struct NodeRenderer {
    node: PathBuf,
    entry: PathBuf,
}

impl NodeRenderer {
    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

impl Render for NodeRenderer {
    fn render(
        &self,
        request: RenderRequest,
    ) -> impl Future<Output = Result<String, PrerenderError>> + Send {
        let node = self.node.clone();
        let entry = self.entry.clone();

        async move {
            let route = request.url.clone();
            let fail = |message: String| PrerenderError::Render {
                route: route.clone(),
                message,
            };

            let payload = serde_json::to_vec(&driver_request(&entry, &request))?;

            let mut child = Command::new(&node)
                .arg("-e")
                .arg(DRIVER)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| fail(format!("failed to spawn '{}': {e}", node.display())))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await?;
            }

            let output = child.wait_with_output().await?;
            if !output.status.success() {
                return Err(fail(format!(
                    "node exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }

            let response: DriverResponse = serde_json::from_slice(&output.stdout)
                .map_err(|e| fail(format!("invalid driver output: {e}")))?;

            if let Some(status) = response.status {
                debug!("The route at \"{route}\" reported status {status}.");
                for binding in &request.extra_providers {
                    binding.capture.record(status);
                }
            }

            Ok(response.html)
        }
    }
}
