//! Stack definitions
//!
//! A [`StackConfig`] is the fully merged definition of one stack. Parameter
//! values are either literals or [`ResolverRef`]s pointing at another stack;
//! every resolver implies a dependency edge on its source.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Logical stack identity: the path below `config/` without extension
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(String);

impl StackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity named by a stack reference or config file path
    ///
    /// `network/vpc.yaml`, `/network/vpc` and `network/vpc` all name the
    /// same stack.
    pub fn from_reference(reference: &str) -> Self {
        Self::new(strip_config_suffix(reference))
    }

    /// Whether this stack is addressed by `path`
    ///
    /// `path` may be the stack itself (with or without its `.yaml` suffix),
    /// a group prefix (`network` matches `network/vpc`), or `.`/empty for
    /// the whole project.
    pub fn is_within(&self, path: &str) -> bool {
        let path = strip_config_suffix(path);
        if path.is_empty() || path == "." {
            return true;
        }
        self.0 == path
            || self
                .0
                .strip_prefix(path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Default external name: dashed identity, prefixed with the project code
    pub fn default_external_name(&self, project_code: Option<&str>) -> String {
        let dashed = self.0.replace('/', "-");
        match project_code {
            Some(code) if !code.is_empty() => format!("{code}-{dashed}"),
            _ => dashed,
        }
    }
}

fn strip_config_suffix(reference: &str) -> &str {
    let trimmed = reference.trim().trim_matches('/');
    trimmed
        .strip_suffix(".yaml")
        .or_else(|| trimmed.strip_suffix(".yml"))
        .unwrap_or(trimmed)
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for StackId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a resolver reads from its source stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// A named output of the deployed source stack
    Output(String),
    /// The source stack's external name
    ExternalName,
}

/// Lazy reference to a value produced by another stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolverRef {
    pub source: StackId,
    pub accessor: Accessor,
}

impl ResolverRef {
    pub fn output(source: impl Into<StackId>, key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            accessor: Accessor::Output(key.into()),
        }
    }

    pub fn external_name(source: impl Into<StackId>) -> Self {
        Self {
            source: source.into(),
            accessor: Accessor::ExternalName,
        }
    }
}

impl fmt::Display for ResolverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.accessor {
            Accessor::Output(key) => write!(f, "!stack_output {}::{}", self.source, key),
            Accessor::ExternalName => write!(f, "!stack_name {}", self.source),
        }
    }
}

/// A parameter value as declared in configuration
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Literal(serde_json::Value),
    Resolver(ResolverRef),
    /// Mixed list; rendered comma-delimited once resolved
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        ParamValue::Literal(value.into())
    }

    /// Every resolver reachable from this value
    pub fn resolvers(&self) -> Vec<&ResolverRef> {
        match self {
            ParamValue::Literal(_) => Vec::new(),
            ParamValue::Resolver(r) => vec![r],
            ParamValue::List(items) => items.iter().flat_map(|item| item.resolvers()).collect(),
        }
    }
}

/// Render a literal the way the backend expects parameter strings
pub fn literal_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(literal_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Fully merged definition of one stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub id: StackId,

    /// Name understood by the remote backend
    pub external_name: String,

    /// Template path relative to `templates/`
    pub template_path: PathBuf,

    /// Explicitly declared dependencies
    pub dependencies: BTreeSet<StackId>,

    pub parameters: BTreeMap<String, ParamValue>,

    /// Free-form data exposed to template rendering
    pub user_data: serde_json::Value,

    pub tags: BTreeMap<String, String>,

    /// Refuse mutating actions
    pub protect: bool,

    pub region: Option<String>,
}

impl StackConfig {
    pub fn new(id: impl Into<StackId>, template_path: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            external_name: id.default_external_name(None),
            id,
            template_path: template_path.into(),
            dependencies: BTreeSet::new(),
            parameters: BTreeMap::new(),
            user_data: serde_json::Value::Null,
            tags: BTreeMap::new(),
            protect: false,
            region: None,
        }
    }

    pub fn with_external_name(mut self, name: impl Into<String>) -> Self {
        self.external_name = name.into();
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<StackId>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn protected(mut self) -> Self {
        self.protect = true;
        self
    }

    /// Stacks referenced by resolvers in this stack's parameters
    pub fn resolver_sources(&self) -> BTreeSet<StackId> {
        self.parameters
            .values()
            .flat_map(|value| value.resolvers())
            .map(|r| r.source.clone())
            .collect()
    }

    /// Explicit and resolver-implied dependencies
    pub fn upstream(&self) -> BTreeSet<StackId> {
        let mut upstream = self.dependencies.clone();
        upstream.extend(self.resolver_sources());
        upstream
    }
}
