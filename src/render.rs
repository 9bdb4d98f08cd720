//! Render contract between the orchestrator and the rendered application.
//!
//! A [`BindRender`] turns the (unbundled) server entry into a [`Render`],
//! which maps one [`RenderRequest`] to an HTML string.

pub mod capture;
pub mod node;

use std::future::Future;
use std::path::Path;

use crate::render::capture::{ExpressResponse, HapiResponse, StatusCell};
use crate::PrerenderError;

pub use node::{NodeBinder, NodeRenderer};

/// A capture capability handed to the application.
#[derive(Debug, Clone)]
pub enum Capture {
    Express(ExpressResponse),
    Hapi(HapiResponse),
}

impl Capture {
    /// Record a status through whichever setter this capture exposes.
    pub fn record(&self, code: u16) {
        match self {
            Capture::Express(res) => {
                res.status(code);
            }
            Capture::Hapi(res) => {
                res.code(code);
            }
        }
    }
}

/// One `(identity token, capability)` pair of the injection list.
#[derive(Debug, Clone)]
pub struct ProviderBinding {
    pub token: String,
    pub capture: Capture,
}

/// Everything the application needs to render one route.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// The browser build's `index.html`.
    pub document: String,
    /// The concrete route.
    pub url: String,
    pub extra_providers: Vec<ProviderBinding>,
}

impl RenderRequest {
    /// Build a request from possibly empty groups of providers.
    pub fn new(
        document: impl Into<String>,
        url: impl Into<String>,
        extra_providers: Vec<Vec<ProviderBinding>>,
    ) -> Self {
        Self {
            document: document.into(),
            url: url.into(),
            extra_providers: extra_providers.into_iter().flatten().collect(),
        }
    }
}

/// Build the capture providers for one route. Absent tokens contribute an
/// empty group.
pub fn response_providers(
    express_token: Option<&str>,
    hapi_token: Option<&str>,
    cell: &StatusCell,
) -> Vec<Vec<ProviderBinding>> {
    vec![
        express_token
            .map(|token| ProviderBinding {
                token: token.to_string(),
                capture: Capture::Express(ExpressResponse::new(cell.clone())),
            })
            .into_iter()
            .collect(),
        hapi_token
            .map(|token| ProviderBinding {
                token: token.to_string(),
                capture: Capture::Hapi(HapiResponse::new(cell.clone())),
            })
            .into_iter()
            .collect(),
    ]
}

/// Renders a single route to HTML.
pub trait Render {
    fn render(
        &self,
        request: RenderRequest,
    ) -> impl Future<Output = Result<String, PrerenderError>> + Send;
}

/// Binds a server entry module into a [`Render`].
pub trait BindRender {
    type Renderer: Render;

    fn bind(&self, entry: &Path) -> Result<Self::Renderer, PrerenderError>;
}
