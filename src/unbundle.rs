//! Token unbundling for compiled server bundles.
//!
//! A code-splitting bundler replaces module specifiers with opaque ids
//! (`__webpack_require__(42)`) that only its own runtime understands. When
//! the bundle is loaded next to code that `require`s the same packages, both
//! sides end up with separate instances of those packages, and injection
//! tokens no longer compare equal.
//!
//! The transform runs in two passes over the bundle source:
//! 1. Build the `token → module` table from the module headers the bundler
//!    emits with `pathinfo`
//! 2. Visit every token load site, fail on unmapped tokens, and rewrite the
//!    loads of package modules into plain `require("<package>")` calls
//!
//! Loads of first-party modules are left to the bundle's own runtime.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::utils::{escape_js_string, normalize_token, package_specifier};
use crate::PrerenderError;

/// Suffix of the patched module written next to the input.
pub const UNBUNDLED_SUFFIX: &str = "unbundled.js";

const TOKEN: &str = r#"(?P<token>\d+|"[^"\n]*"|'[^'\n]*')"#;

/// `/***/ 42:` optionally followed by a `!*** ./path ***!` pathinfo block.
/// The pathinfo may contain spaces: `external "fs"`, `./a.ts + 3 modules`.
fn module_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"/\*\*\*/[ \t]*{TOKEN}[ \t]*:(?:\s*/\*![*!\\]*\s*!\*\*\*[ \t]+(?P<specifier>[^\n]+?)[ \t]+\*\*\*!)?"
        ))
        .expect("module header pattern is valid")
    })
}

/// `__webpack_require__(42)` or `__webpack_require__.bind(ctx, 42)`, with an
/// optional `/*! annotation */` before the token.
fn load_site_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"__webpack_require__(?:(?P<bind>\.bind\(\s*[\w$]+\s*,)|\()\s*(?:/\*.*?\*/\s*)?{TOKEN}\s*\)"
        ))
        .expect("load site pattern is valid")
    })
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of [`unbundle_tokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unbundled {
    /// Module to load. Equals the input path when nothing was rewritten.
    pub path: PathBuf,
    pub rewritten: bool,
}

/// How a load site pulls in its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// `__webpack_require__(token)`
    Direct,
    /// `__webpack_require__.bind(ctx, token)`, called later by `import()`.
    Deferred,
}

/// What a module header says about the module behind a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRef {
    /// Module compiled into the bundle, by its source path.
    Bundled(String),
    /// `external "x"`: the bundler delegates to a plain `require("x")`.
    External(String),
}

impl ModuleRef {
    /// Parse the text of a pathinfo block.
    pub fn from_pathinfo(pathinfo: &str) -> Self {
        let pathinfo = strip_concatenation(pathinfo.trim());
        match pathinfo.strip_prefix("external ") {
            Some(rest) => ModuleRef::External(normalize_token(rest).to_string()),
            None => ModuleRef::Bundled(pathinfo.to_string()),
        }
    }

    /// Specifier a host-side `require` resolves to the same module instance,
    /// or `None` for first-party code.
    pub fn package(&self) -> Option<String> {
        match self {
            ModuleRef::Bundled(path) => package_specifier(path),
            ModuleRef::External(name) => Some(name.clone()),
        }
    }
}

/// `./src/main.ts + 12 modules` → `./src/main.ts`
fn strip_concatenation(pathinfo: &str) -> &str {
    let Some((head, tail)) = pathinfo.rsplit_once(" + ") else {
        return pathinfo;
    };
    let mut words = tail.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(count), Some("module" | "modules"), None)
            if !count.is_empty() && count.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head.trim_end()
        }
        _ => pathinfo,
    }
}

/// A token load found in the bundle source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSite {
    pub range: Range<usize>,
    pub token: String,
    pub kind: LoadKind,
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Collect the bundler's `token → module` table.
///
/// Numeric ids need a pathinfo block; string ids fall back to the id itself.
pub fn module_table(source: &str) -> BTreeMap<String, ModuleRef> {
    let mut table = BTreeMap::new();
    for cap in module_header_re().captures_iter(source) {
        let raw = &cap["token"];
        let token = normalize_token(raw);
        let module = match cap.name("specifier") {
            Some(m) => ModuleRef::from_pathinfo(m.as_str()),
            None if raw.starts_with(['"', '\'']) => ModuleRef::Bundled(token.to_string()),
            None => continue,
        };
        table.insert(token.to_string(), module);
    }
    table
}

/// Find every token load site, in source order.
pub fn load_sites(source: &str) -> Vec<LoadSite> {
    load_site_re()
        .captures_iter(source)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            Some(LoadSite {
                range: whole.range(),
                token: normalize_token(&cap["token"]).to_string(),
                kind: if cap.name("bind").is_some() {
                    LoadKind::Deferred
                } else {
                    LoadKind::Direct
                },
            })
        })
        .collect()
}

/// Rewrite the bundle source held in memory.
///
/// Returns `Ok(None)` when no load needs a rewrite. `path` only labels errors.
pub fn unbundle_source(source: &str, path: &Path) -> Result<Option<String>, PrerenderError> {
    let sites = load_sites(source);
    if sites.is_empty() {
        return Ok(None);
    }

    let table = module_table(source);
    if table.is_empty() {
        return Err(PrerenderError::TokenTableNotFound {
            path: path.to_path_buf(),
            sites: sites.len(),
        });
    }

    let mut replacements: Vec<(Range<usize>, String)> = Vec::new();
    for site in &sites {
        let module = table
            .get(&site.token)
            .ok_or_else(|| PrerenderError::UnresolvedToken {
                path: path.to_path_buf(),
                token: site.token.clone(),
            })?;

        let Some(package) = module.package() else {
            continue;
        };
        let load = format!("require(\"{}\")", escape_js_string(&package));
        let replacement = match site.kind {
            LoadKind::Direct => load,
            LoadKind::Deferred => format!("(() => {load})"),
        };
        replacements.push((site.range.clone(), replacement));
    }

    debug!(
        "Found {} token loads and {} table entries, {} loads need a rewrite",
        sites.len(),
        table.len(),
        replacements.len()
    );

    if replacements.is_empty() {
        return Ok(None);
    }

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (range, replacement) in replacements {
        out.push_str(&source[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);

    Ok(Some(out))
}

/// Path of the patched module: `dist/server/main.js` → `dist/server/main.unbundled.js`.
pub fn unbundled_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.{UNBUNDLED_SUFFIX}"))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Unbundle the token loads of the module at `path`.
///
/// The patched module is written next to the input so relative `require`s
/// keep resolving. Nothing is written when no rewrite is needed.
pub async fn unbundle_tokens(path: &Path) -> Result<Unbundled, PrerenderError> {
    let source = tokio::fs::read_to_string(path).await?;

    match unbundle_source(&source, path)? {
        Some(patched) => {
            let out = unbundled_path(path);
            tokio::fs::write(&out, patched).await?;
            Ok(Unbundled {
                path: out,
                rewritten: true,
            })
        }
        None => Ok(Unbundled {
            path: path.to_path_buf(),
            rewritten: false,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUNDLE: &str = r#"/******/ (function(modules) { // webpackBootstrap
/******/ })
/******/ ({

/***/ 0:
/*!*******************************!*\
  !*** ./src/main.server.ts ***!
  \*******************************/
/***/ (function(module, exports, __webpack_require__) {
const tokens = __webpack_require__(/*! @nguniversal/express-engine/tokens */ 17);
const app = __webpack_require__(3);
/***/ }),

/***/ 3:
/*!***********************!*\
  !*** ./src/app.ts ***!
  \***********************/
/***/ (function(module, exports, __webpack_require__) {
const lazy = () => __webpack_require__.e(5).then(__webpack_require__.bind(null, 17));
/***/ }),

/***/ 17:
/*!**************************************************************!*\
  !*** ./node_modules/@nguniversal/express-engine/tokens/index.js ***!
  \**************************************************************/
/***/ (function(module, exports) {
exports.RESPONSE = "RESPONSE";
/***/ })
/******/ });
"#;

    #[test]
    fn table_from_pathinfo_headers() {
        let table = module_table(BUNDLE);
        assert_eq!(table.len(), 3);
        assert_eq!(table["0"], ModuleRef::Bundled("./src/main.server.ts".into()));
        assert_eq!(table["3"], ModuleRef::Bundled("./src/app.ts".into()));
        assert_eq!(
            table["17"],
            ModuleRef::Bundled("./node_modules/@nguniversal/express-engine/tokens/index.js".into())
        );
    }

    #[test]
    fn table_from_string_ids_without_pathinfo() {
        let source = "/***/ \"./node_modules/a/index.js\":\n/***/ (function() {})";
        let table = module_table(source);
        assert_eq!(
            table["./node_modules/a/index.js"],
            ModuleRef::Bundled("./node_modules/a/index.js".into())
        );
    }

    #[test]
    fn external_header_loads_the_bare_specifier() {
        let source = r#"/***/ 5:
/*!*********************!*\
  !*** external "fs" ***!
  \*********************/
/***/ (function(module, exports) {
module.exports = require("fs");
/***/ }),
const fs = __webpack_require__(/*! fs */ 5);"#;

        assert_eq!(module_table(source)["5"], ModuleRef::External("fs".into()));

        let patched = unbundle_source(source, Path::new("main.js")).unwrap().unwrap();
        assert!(patched.contains(r#"const fs = require("fs");"#));
    }

    #[test]
    fn concatenated_header_keeps_its_root_module() {
        let source = r#"/***/ 0:
/*!**********************************!*\
  !*** ./src/main.ts + 12 modules ***!
  \**********************************/
/***/ (function(module, exports, __webpack_require__) {
/***/ }),
/***/ 8:
/*!*****************************************************!*\
  !*** ./node_modules/@angular/core/index.js + 2 modules ***!
  \*****************************************************/
/***/ (function(module, exports) {
/***/ }),
const main = __webpack_require__(0);
const core = __webpack_require__(8);"#;

        let table = module_table(source);
        assert_eq!(table["0"], ModuleRef::Bundled("./src/main.ts".into()));
        assert_eq!(
            table["8"],
            ModuleRef::Bundled("./node_modules/@angular/core/index.js".into())
        );

        let patched = unbundle_source(source, Path::new("main.js")).unwrap().unwrap();
        assert!(patched.contains("const main = __webpack_require__(0);"));
        assert!(patched.contains(r#"const core = require("@angular/core");"#));
    }

    #[test]
    fn plus_inside_a_path_is_not_a_concatenation() {
        assert_eq!(
            ModuleRef::from_pathinfo("./src/a + b.ts"),
            ModuleRef::Bundled("./src/a + b.ts".into())
        );
        assert_eq!(
            ModuleRef::from_pathinfo("external 'path'"),
            ModuleRef::External("path".into())
        );
    }

    #[test]
    fn numeric_header_without_pathinfo_is_ignored() {
        assert!(module_table("/***/ 12:\n/***/ (function() {})").is_empty());
    }

    #[test]
    fn sites_in_source_order() {
        let sites = load_sites(BUNDLE);
        let summary: Vec<_> = sites.iter().map(|s| (s.token.as_str(), s.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("17", LoadKind::Direct),
                ("3", LoadKind::Direct),
                ("17", LoadKind::Deferred),
            ]
        );
    }

    #[test]
    fn runtime_calls_are_not_sites() {
        let source = "__webpack_require__(moduleId); __webpack_require__(__webpack_require__.s = 0); __webpack_require__.e(5);";
        assert!(load_sites(source).is_empty());
    }

    #[test]
    fn rewrites_package_loads_only() {
        let patched = unbundle_source(BUNDLE, Path::new("main.js")).unwrap().unwrap();

        assert!(patched.contains(
            r#"const tokens = require("@nguniversal/express-engine/tokens");"#
        ));
        assert!(patched.contains(r#"const app = __webpack_require__(3);"#));
        assert!(patched.contains(
            r#".then((() => require("@nguniversal/express-engine/tokens")));"#
        ));
        assert!(load_sites(&patched).iter().all(|s| s.token == "3"));
    }

    #[test]
    fn no_sites_is_a_no_op() {
        let result = unbundle_source("module.exports = 1;", Path::new("main.js")).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn first_party_only_is_a_no_op() {
        let source = "/***/ 3:\n/*!****!*\\\n  !*** ./src/app.ts ***!\n  \\****/\n__webpack_require__(3);";
        assert_eq!(unbundle_source(source, Path::new("main.js")).unwrap(), None);
    }

    #[test]
    fn missing_table_fails() {
        let err = unbundle_source("__webpack_require__(7);", Path::new("main.js")).unwrap_err();
        match err {
            PrerenderError::TokenTableNotFound { sites, .. } => assert_eq!(sites, 1),
            other => panic!("Expected TokenTableNotFound, got {other:?}"),
        }
    }

    #[test]
    fn unmapped_token_fails() {
        let source = format!("{BUNDLE}\n__webpack_require__(99);");
        let err = unbundle_source(&source, Path::new("main.js")).unwrap_err();
        match err {
            PrerenderError::UnresolvedToken { token, .. } => assert_eq!(token, "99"),
            other => panic!("Expected UnresolvedToken, got {other:?}"),
        }
    }

    #[test]
    fn unbundled_path_is_a_sibling() {
        assert_eq!(
            unbundled_path(Path::new("/dist/server/main.js")),
            PathBuf::from("/dist/server/main.unbundled.js")
        );
    }
}
