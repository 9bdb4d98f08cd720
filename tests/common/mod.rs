//! Shared fixtures for prerender integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use spa_prerender::render::Capture;
use spa_prerender::{
    BindRender, DeclaredRoute, PrerenderError, PrerenderPlan, Render, RenderRequest, RouteSource,
    TargetSpecifier,
};
use tempfile::TempDir;

pub const SHELL: &str = "<html><body><app-root></app-root></body></html>";

pub const WORKSPACE: &str = r#"{
    "defaultProject": "app",
    "projects": {
        "app": {
            "architect": {
                "build": { "options": { "outputPath": "dist/browser", "tsConfig": "tsconfig.app.json" } },
                "server": { "options": { "outputPath": "dist/server" } }
            }
        }
    }
}"#;

/// A server entry without any token loads.
pub const PLAIN_MAIN: &str = "module.exports = { renderModule() {} };\n";

/// A server entry that loads a package through a bundler token.
pub const TOKEN_MAIN: &str = r#"/***/ 0:
/*!*********************!*\
  !*** ./src/main.ts ***!
  \*********************/
/***/ (function(module, exports, __webpack_require__) {
const tokens = __webpack_require__(/*! express tokens */ 9);
/***/ }),

/***/ 9:
/*!*****************************************!*\
  !*** ./node_modules/express-tokens/index.js ***!
  \*****************************************/
/***/ (function(module, exports) {
exports.RESPONSE = {};
/***/ })
"#;

/// A built workspace in a temp dir.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new(main_js: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        std::fs::write(root.join("angular.json"), WORKSPACE).unwrap();
        std::fs::create_dir_all(root.join("dist/browser")).unwrap();
        std::fs::create_dir_all(root.join("dist/server")).unwrap();
        std::fs::write(root.join("dist/browser/index.html"), SHELL).unwrap();
        std::fs::write(root.join("dist/server/main.js"), main_js).unwrap();
        Self { dir }
    }

    pub fn plan(&self) -> PrerenderPlan {
        PrerenderPlan {
            config: self.dir.path().join("angular.json"),
            browser_target: TargetSpecifier::new("build"),
            server_target: TargetSpecifier::new("server"),
        }
    }

    pub fn browser(&self) -> PathBuf {
        self.dir.path().join("dist/browser")
    }

    pub fn server(&self) -> PathBuf {
        self.dir.path().join("dist/server")
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.browser().join(relative))
            .unwrap_or_else(|e| panic!("Failed to read {relative}: {e}"))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.browser().join(relative).exists()
    }
}

/// The HTML the mock renderer produces for a route of `document`.
pub fn render_document(document: &str, url: &str) -> String {
    document.replacen(
        "<app-root></app-root>",
        &format!("<app-root>rendered {url}</app-root>"),
        1,
    )
}

/// The HTML the mock renderer produces for a route of [`SHELL`].
pub fn rendered(url: &str) -> String {
    render_document(SHELL, url)
}

// ---------------------------------------------------------------------------
// Route source
// ---------------------------------------------------------------------------

pub struct StaticRoutes(pub Vec<&'static str>);

impl RouteSource for StaticRoutes {
    async fn declared_routes(&self, _ts_config: &Path) -> Result<Vec<DeclaredRoute>, PrerenderError> {
        Ok(self
            .0
            .iter()
            .map(|path| DeclaredRoute { path: path.to_string() })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Mock render binder
// ---------------------------------------------------------------------------

/// Records the bound entry and every rendered url. Routes listed in
/// `statuses` report that status through every capture they receive. The
/// output is the request's document with the url filled in.
#[derive(Default)]
pub struct MockBinder {
    pub bound: Mutex<Option<PathBuf>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub statuses: BTreeMap<String, u16>,
    pub fail_on: Option<String>,
}

impl MockBinder {
    pub fn with_status(mut self, route: &str, status: u16) -> Self {
        self.statuses.insert(route.to_string(), status);
        self
    }

    pub fn failing_on(mut self, route: &str) -> Self {
        self.fail_on = Some(route.to_string());
        self
    }

    pub fn bound(&self) -> Option<PathBuf> {
        self.bound.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct MockRenderer {
    calls: Arc<Mutex<Vec<String>>>,
    statuses: BTreeMap<String, u16>,
    fail_on: Option<String>,
}

impl BindRender for MockBinder {
    type Renderer = MockRenderer;

    fn bind(&self, entry: &Path) -> Result<MockRenderer, PrerenderError> {
        *self.bound.lock().unwrap() = Some(entry.to_path_buf());
        Ok(MockRenderer {
            calls: Arc::clone(&self.calls),
            statuses: self.statuses.clone(),
            fail_on: self.fail_on.clone(),
        })
    }
}

impl Render for MockRenderer {
    async fn render(&self, request: RenderRequest) -> Result<String, PrerenderError> {
        self.calls.lock().unwrap().push(request.url.clone());

        if self.fail_on.as_deref() == Some(request.url.as_str()) {
            return Err(PrerenderError::Render {
                route: request.url,
                message: "bootstrap failed".into(),
            });
        }

        if let Some(&status) = self.statuses.get(&request.url) {
            for binding in &request.extra_providers {
                match &binding.capture {
                    Capture::Express(res) => {
                        res.status(status);
                    }
                    Capture::Hapi(res) => {
                        res.code(status);
                    }
                }
            }
        }

        Ok(render_document(&request.document, &request.url))
    }
}
