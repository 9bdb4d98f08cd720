//! Utility functions for the prerenderer.
//!
//! - Route → output directory mapping
//! - Route segment classification
//! - JS string escaping and package specifier derivation for the unbundler

use std::path::{Path, PathBuf};

/// Marker that starts a parameter segment (`:id`).
pub const PARAMETER_MARKER: char = ':';

/// Marker that makes a route a wildcard route.
pub const WILDCARD_MARKER: &str = "**";

/// File written for every rendered route.
pub const INDEX_HTML: &str = "index.html";

/// File that receives the original shell when `/` overwrites it.
pub const START_HTML: &str = "start.html";

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn is_parameter_segment(segment: &str) -> bool {
    segment.starts_with(PARAMETER_MARKER)
}

pub fn is_wildcard_route(route: &str) -> bool {
    route.contains(WILDCARD_MARKER)
}

/// Iterate the parameter segments of a route, in order, including repeats.
pub fn parameter_segments(route: &str) -> impl Iterator<Item = &str> {
    route.split('/').filter(|s| is_parameter_segment(s))
}

/// Map a concrete route onto its directory below the browser output root.
///
/// `/` maps onto the root itself, `/blog/1` onto `<root>/blog/1`.
pub fn route_to_output_dir(root: &Path, route: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for segment in route.split('/').filter(|s| !s.is_empty()) {
        out.push(segment);
    }
    out
}

// ---------------------------------------------------------------------------
// JS String Escaping
// ---------------------------------------------------------------------------

/// Escape a string for safe embedding inside a JS double-quoted string literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Module Specifiers
// ---------------------------------------------------------------------------

const NODE_MODULES: &str = "node_modules/";

/// Whether a bundled module specifier points into `node_modules`.
pub fn is_package_specifier(specifier: &str) -> bool {
    specifier.contains(NODE_MODULES)
}

/// Derive the bare `require` specifier for a bundled package file.
///
/// `./node_modules/@scope/pkg/tokens/index.js` → `@scope/pkg/tokens`.
/// Returns `None` for first-party specifiers.
pub fn package_specifier(specifier: &str) -> Option<String> {
    let idx = specifier.rfind(NODE_MODULES)?;
    let mut bare = &specifier[idx + NODE_MODULES.len()..];

    for ext in [".js", ".cjs", ".mjs"] {
        if let Some(stripped) = bare.strip_suffix(ext) {
            bare = stripped;
            break;
        }
    }
    if let Some(stripped) = bare.strip_suffix("/index") {
        bare = stripped;
    }

    if bare.is_empty() {
        None
    } else {
        Some(bare.to_string())
    }
}

/// Strip matching quotes from a bundled module id (`"./a.js"` → `./a.js`).
pub fn normalize_token(raw: &str) -> &str {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = raw.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner;
        }
    }
    raw
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
