//! Template discovery
//!
//! Collects template sources from a directory or an in-memory collection,
//! scopes them to an optional root subdirectory, and separates the layout
//! from the views and partials.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{has_ext, Config, DEFAULT_EXTS};
use crate::error::Error;

/// Name the embedded layout is registered under
pub const DEFAULT_LAYOUT_NAME: &str = "default_layout";

/// Layout used when none is configured
pub const DEFAULT_LAYOUT: &str = "<!DOCTYPE html>\n<html>\n<head>\n{{render \"head\"}}\n</head>\n<body>\n{{render}}\n</body>\n</html>\n";

/// Template sources ready for composition
#[derive(Debug, Clone)]
pub struct Sources {
    /// Layout name and source
    pub layout: (String, String),
    /// Views and partials, by logical name
    pub files: Vec<(String, String)>,
}

/// Whether any component of a `/`-separated name starts with `.`
pub fn is_hidden(name: &str) -> bool {
    name.split('/').any(|part| part.starts_with('.') && part != "." && part != "..")
}

/// Whether `name` follows the layout naming rule: a recognised extension
/// on a stem ending in `layout`
pub fn is_layout_name<S: AsRef<str>>(name: &str, exts: &[S]) -> bool {
    if !has_ext(name, exts) {
        return false;
    }
    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name
        .rsplit_once('.')
        .is_some_and(|(stem, _)| stem.to_ascii_lowercase().ends_with("layout"))
}

/// Read every template file under `dir`, skipping hidden entries
pub fn collect<S: AsRef<str>>(dir: &Path, exts: &[S]) -> Result<Vec<(String, String)>, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry = entry.map_err(|e| {
            tracing::error!("Failed to read directory entry: {}", e);
            Error::Io {
                path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
                source: e.into(),
            }
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let name = logical_name(relative);
        if !has_ext(&name, exts) {
            continue;
        }

        let source = fs::read_to_string(entry.path()).map_err(|source| Error::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        files.push((name, source));
    }
    tracing::debug!(dir = %dir.display(), count = files.len(), "collected templates");
    Ok(files)
}

/// `/`-separated form of a relative path
fn logical_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_root(root: &str) -> String {
    root.trim_matches('/').trim_start_matches("./").to_string()
}

/// Directory logical template names are relative to
pub fn template_root(dir: &Path, config: &Config) -> PathBuf {
    match config.root.as_deref().map(normalize_root) {
        Some(root) if !root.is_empty() => dir.join(root),
        _ => dir.to_path_buf(),
    }
}

/// Read and separate the templates under `dir`
pub fn load_dir(dir: &Path, config: &Config) -> Result<Sources, Error> {
    let base = template_root(dir, config);
    if let Some(root) = config.root.as_deref().map(normalize_root).filter(|r| !r.is_empty()) {
        if !base.is_dir() {
            return Err(Error::InvalidRoot {
                root,
                reason: format!("'{}' is not a directory", base.display()),
            });
        }
    }
    if !base.is_dir() {
        return Err(Error::Io {
            path: base,
            source: io::Error::new(io::ErrorKind::NotFound, "template directory not found"),
        });
    }
    split(collect(&base, &config.exts)?, config)
}

/// Filter, scope and separate an in-memory collection
pub fn load_files<I, N, S>(files: I, config: &Config) -> Result<Sources, Error>
where
    I: IntoIterator<Item = (N, S)>,
    N: Into<String>,
    S: Into<String>,
{
    let files = files.into_iter().map(|(n, s)| {
        let name: String = n.into();
        let source: String = s.into();
        (name.trim_start_matches("./").to_string(), source)
    });

    let files: Vec<(String, String)> = match config.root.as_deref().map(normalize_root) {
        Some(root) if !root.is_empty() => {
            let prefix = format!("{}/", root);
            let scoped: Vec<_> = files
                .filter_map(|(n, s)| n.strip_prefix(&prefix).map(|n| (n.to_string(), s)))
                .collect();
            if scoped.is_empty() {
                return Err(Error::InvalidRoot {
                    root,
                    reason: "no templates under this directory".to_string(),
                });
            }
            scoped
        }
        _ => files.collect(),
    };

    let files = files
        .into_iter()
        .filter(|(n, _)| !is_hidden(n) && has_ext(n, &config.exts))
        .collect();
    split(files, config)
}

/// Pull the layout out of `files` and drop every other layout-named file
fn split(files: Vec<(String, String)>, config: &Config) -> Result<Sources, Error> {
    let layout = match config.layout.as_deref() {
        Some(name) => {
            let name = name.trim_start_matches("./");
            if !is_layout_name(name, &config.exts) {
                return Err(Error::InvalidLayout {
                    name: name.to_string(),
                    reason: "file name must end with 'layout' and a template extension".to_string(),
                });
            }
            let source = files
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| s.clone())
                .ok_or_else(|| Error::not_found(name))?;
            (name.to_string(), source)
        }
        None => (DEFAULT_LAYOUT_NAME.to_string(), DEFAULT_LAYOUT.to_string()),
    };

    let files = files
        .into_iter()
        .filter(|(n, _)| !is_layout_name(n, &config.exts))
        .collect();
    Ok(Sources { layout, files })
}

/// Static-file access that refuses to serve templates.
///
/// Lets a static file server share a directory with the templates: files
/// with a template extension are reported as missing.
#[derive(Debug, Clone)]
pub struct HiddenTemplates {
    dir: PathBuf,
    exts: Vec<String>,
}

impl HiddenTemplates {
    /// Hide the default template extensions under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            exts: DEFAULT_EXTS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replace the hidden extensions; an empty list keeps the defaults
    pub fn with_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exts: Vec<String> = exts.into_iter().map(Into::into).collect();
        if !exts.is_empty() {
            self.exts = exts;
        }
        self
    }

    /// Whether `path` would be refused
    pub fn is_hidden(&self, path: &str) -> bool {
        has_ext(path, &self.exts)
    }

    /// Resolve `path` below the directory, or fail as if it did not exist
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || self.is_hidden(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("file does not exist: {}", path),
            ));
        }
        Ok(self.dir.join(relative))
    }

    /// Open a non-template file
    pub fn open(&self, path: &str) -> io::Result<fs::File> {
        fs::File::open(self.resolve(path)?)
    }

    /// Read a non-template file
    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path)?)
    }
}
