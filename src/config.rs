//! Engine configuration
//!
//! A [`Config`] is built in code with the `with_*` methods or loaded from
//! TOML:
//!
//! ```toml
//! root = "site"
//! layout = "base_layout.html"
//! exts = ["html", "tmpl"]
//! cache = false
//! escape = "none"
//! missing_key = "error"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::exec::{Funcs, Options};

/// Extensions recognised when none are configured
pub const DEFAULT_EXTS: [&str; 4] = ["html", "gohtml", "tpl", "tmpl"];

/// Errors that can occur when loading configuration files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How printed values are escaped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Escape {
    /// HTML-escape every printed value
    #[default]
    Html,
    /// Print values as-is, for plain-text output
    #[serde(rename = "none", alias = "plain")]
    Plain,
}

/// What a field lookup yields when the key is absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingKey {
    /// Empty value
    #[default]
    Zero,
    /// Execution error
    Error,
}

/// Engine configuration, fixed once an engine is built
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Subdirectory of the template directory to scope discovery to
    pub root: Option<String>,
    /// Layout file, relative to the template root
    pub layout: Option<String>,
    /// Recognised file extensions
    pub exts: Vec<String>,
    /// Compose views once at construction; when false, directory engines
    /// recompose a view on every render
    pub cache: bool,
    pub escape: Escape,
    pub missing_key: MissingKey,
    /// Caller functions
    #[serde(skip)]
    pub funcs: Funcs,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: None,
            layout: None,
            exts: DEFAULT_EXTS.iter().map(|e| e.to_string()).collect(),
            cache: true,
            escape: Escape::default(),
            missing_key: MissingKey::default(),
            funcs: Funcs::new(),
        }
    }
}

impl Config {
    /// Create a default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    /// Replace the recognised extensions
    pub fn with_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exts = exts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_escape(mut self, escape: Escape) -> Self {
        self.escape = escape;
        self
    }

    pub fn with_missing_key(mut self, missing_key: MissingKey) -> Self {
        self.missing_key = missing_key;
        self
    }

    /// Add a caller function; `render` and `partial` are ignored
    pub fn with_func<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.funcs.insert(name, func);
        self
    }

    /// Merge a table of caller functions
    pub fn with_funcs(mut self, funcs: &Funcs) -> Self {
        self.funcs.extend(funcs);
        self
    }

    /// Whether `path` carries one of the recognised extensions
    pub fn has_ext(&self, path: &str) -> bool {
        has_ext(path, &self.exts)
    }

    pub(crate) fn options(&self) -> Options {
        Options {
            escape: self.escape,
            missing_key: self.missing_key,
        }
    }
}

/// Whether the extension of `path` is in `exts`.
///
/// Comparison ignores case and a leading `.` on the configured entries; a
/// file without an extension never matches.
pub fn has_ext<S: AsRef<str>>(path: &str, exts: &[S]) -> bool {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    if ext.is_empty() || stem.is_empty() {
        return false;
    }
    exts.iter().any(|e| {
        let e = e.as_ref().trim_start_matches('.');
        !e.is_empty() && e.eq_ignore_ascii_case(ext)
    })
}
