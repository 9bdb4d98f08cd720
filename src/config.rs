//! Workspace configuration loading.
//!
//! Reads an `angular.json`-style workspace descriptor and resolves target
//! properties such as `outputPath` and `tsConfig`. Relative paths are
//! resolved against the directory that contains the descriptor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::PrerenderError;

pub const OUTPUT_PATH: &str = "outputPath";
pub const TS_CONFIG: &str = "tsConfig";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSchema {
    #[serde(default)]
    pub default_project: Option<String>,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSchema {
    #[serde(default, alias = "targets")]
    pub architect: BTreeMap<String, TargetSchema>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetSchema {
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub configurations: BTreeMap<String, Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Target Specifier
// ---------------------------------------------------------------------------

/// A target name with an optional configuration: `build` or `build:production`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpecifier {
    pub target: String,
    pub configuration: Option<String>,
}

impl TargetSpecifier {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            configuration: None,
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }
}

impl FromStr for TargetSpecifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, configuration) = match s.split_once(':') {
            Some((target, configuration)) => (target, Some(configuration)),
            None => (s, None),
        };
        if target.trim().is_empty() {
            return Err(format!("invalid target specifier '{s}': target name is empty"));
        }
        match configuration {
            Some(c) if c.trim().is_empty() => Err(format!(
                "invalid target specifier '{s}': configuration name is empty"
            )),
            Some(c) => Ok(Self::new(target).with_configuration(c)),
            None => Ok(Self::new(target)),
        }
    }
}

impl fmt::Display for TargetSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.configuration {
            Some(configuration) => write!(f, "{}:{}", self.target, configuration),
            None => write!(f, "{}", self.target),
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A loaded workspace descriptor plus the directory it was read from.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    schema: WorkspaceSchema,
}

impl Workspace {
    /// Load the descriptor at `path`.
    pub async fn load(path: &Path) -> Result<Self, PrerenderError> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            PrerenderError::Config(format!(
                "failed to read workspace config '{}': {e}",
                path.display()
            ))
        })?;
        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        Self::from_str_in(&source, root).map_err(|e| match e {
            PrerenderError::Config(msg) => {
                PrerenderError::Config(format!("{msg} (in '{}')", path.display()))
            }
            other => other,
        })
    }

    /// Parse a descriptor whose relative paths resolve against `root`.
    pub fn from_str_in(source: &str, root: impl Into<PathBuf>) -> Result<Self, PrerenderError> {
        let schema: WorkspaceSchema = serde_json::from_str(source)
            .map_err(|e| PrerenderError::Config(format!("invalid workspace config: {e}")))?;
        Ok(Self {
            root: root.into(),
            schema,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The `defaultProject`, or the only project when none is named.
    pub fn default_project(&self) -> Result<(&str, &ProjectSchema), PrerenderError> {
        match &self.schema.default_project {
            Some(name) => self
                .schema
                .projects
                .get_key_value(name)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| {
                    PrerenderError::Config(format!("default project '{name}' does not exist"))
                }),
            None if self.schema.projects.len() == 1 => self
                .schema
                .projects
                .iter()
                .next()
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| PrerenderError::Config("no projects defined".into())),
            None => Err(PrerenderError::Config(format!(
                "no defaultProject set and {} projects defined",
                self.schema.projects.len()
            ))),
        }
    }

    /// Read a string property of a target of the default project.
    ///
    /// The target's configuration (if any) takes precedence over `options`.
    pub fn read_property(
        &self,
        target: &TargetSpecifier,
        property: &str,
    ) -> Result<String, PrerenderError> {
        let (project_name, project) = self.default_project()?;
        let missing = || PrerenderError::MissingProperty {
            project: project_name.to_string(),
            target: target.to_string(),
            property: property.to_string(),
        };

        let schema = project.architect.get(&target.target).ok_or_else(|| {
            PrerenderError::Config(format!(
                "project '{project_name}' has no target '{}'",
                target.target
            ))
        })?;

        let overridden = match &target.configuration {
            Some(name) => {
                let configuration = schema.configurations.get(name).ok_or_else(|| {
                    PrerenderError::Config(format!(
                        "target '{}' of project '{project_name}' has no configuration '{name}'",
                        target.target
                    ))
                })?;
                configuration.get(property)
            }
            None => None,
        };

        match overridden.or_else(|| schema.options.get(property)) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(other) => Err(PrerenderError::Config(format!(
                "property '{property}' of target '{target}' must be a string, got {other}"
            ))),
            None => Err(missing()),
        }
    }

    /// Read a path property and resolve it against the workspace root.
    pub fn resolve_path(
        &self,
        target: &TargetSpecifier,
        property: &str,
    ) -> Result<PathBuf, PrerenderError> {
        Ok(self.root.join(self.read_property(target, property)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
