//! Render engine: construction and the render entry point

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::Error;
use crate::exec::{self, Funcs, Options};
use crate::source::{self, Sources};
use crate::template::{Composed, Composer, Registry, TemplateFile};

/// A ready-to-use set of composed views.
///
/// Construction either composes every view or fails; afterwards the engine
/// is read-only and can be shared between threads.
#[derive(Debug)]
pub struct Engine {
    views: BTreeMap<String, Composed>,
    funcs: Funcs,
    options: Options,
    /// Set when views are recomposed from disk on every render
    reload: Option<Reload>,
}

#[derive(Debug)]
struct Reload {
    dir: PathBuf,
    config: Config,
}

impl Reload {
    /// Re-read the directory and compose only `view`
    fn compose(&self, view: &str) -> Result<Composed, Error> {
        let sources = source::load_dir(&self.dir, &self.config)?;
        let registry = Registry::build(sources.files, &self.config.funcs)?;
        let (name, text) = sources.layout;
        let layout = TemplateFile::parse(name, text, &self.config.funcs)?;
        let mut composer = Composer::new(&registry);
        let base = composer.compose_layout(&layout)?;
        composer.compose_view(&base, view)
    }
}

impl Engine {
    /// Discover and compose every template under `dir`
    pub fn new(dir: impl AsRef<Path>, config: Config) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let sources = source::load_dir(dir, &config)?;
        let views = compose_all(sources, &config.funcs)?;
        tracing::info!(dir = %dir.display(), views = views.len(), cache = config.cache, "templates composed");

        let reload = (!config.cache).then(|| Reload {
            dir: dir.to_path_buf(),
            config: config.clone(),
        });
        Ok(Self {
            views,
            funcs: config.funcs.clone(),
            options: config.options(),
            reload,
        })
    }

    /// Compose an in-memory collection of `(name, source)` pairs.
    ///
    /// Names are `/`-separated paths; the `cache` setting does not apply.
    pub fn from_files<I, N, S>(files: I, config: Config) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let sources = source::load_files(files, &config)?;
        let views = compose_all(sources, &config.funcs)?;
        tracing::info!(views = views.len(), "templates composed");
        Ok(Self {
            views,
            options: config.options(),
            funcs: config.funcs,
            reload: None,
        })
    }

    /// Render `view` with `data` into `w`.
    ///
    /// An unknown view fails with [`Error::NotFound`] before anything is
    /// written. Output produced before an execution error stays written.
    pub fn render<W, T>(&self, w: &mut W, view: &str, data: &T) -> Result<(), Error>
    where
        W: Write + ?Sized,
        T: Serialize + ?Sized,
    {
        let fresh;
        let composed = match &self.reload {
            Some(reload) => {
                fresh = reload.compose(view)?;
                &fresh
            }
            None => self.views.get(view).ok_or_else(|| Error::not_found(view))?,
        };

        let data = serde_json::to_value(data)?;
        tracing::debug!(view, "render");
        exec::execute(w, composed, &data, &self.funcs, self.options).map_err(|source| Error::Execution {
            view: view.to_string(),
            source,
        })
    }

    /// Render `view` into a string
    pub fn render_to_string<T: Serialize + ?Sized>(&self, view: &str, data: &T) -> Result<String, Error> {
        let mut out = Vec::new();
        self.render(&mut out, view, data)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Names of all composed views, sorted
    pub fn views(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    /// Check if a view exists
    pub fn has_view(&self, name: &str) -> bool {
        self.views.contains_key(name)
    }
}

/// Build the registry and compose every view against the layout
fn compose_all(sources: Sources, funcs: &Funcs) -> Result<BTreeMap<String, Composed>, Error> {
    let registry = Registry::build(sources.files, funcs)?;
    let (name, text) = sources.layout;
    let layout = TemplateFile::parse(name, text, funcs)?;

    let mut composer = Composer::new(&registry);
    let base = composer.compose_layout(&layout)?;

    let mut views = BTreeMap::new();
    for name in registry.names() {
        views.insert(name.to_string(), composer.compose_view(&base, name)?);
    }
    Ok(views)
}

/// Unwrap a construction result, panicking on error
pub fn must<T>(result: Result<T, Error>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine(files: &[(&str, &str)]) -> Result<Engine, Error> {
        Engine::from_files(files.iter().copied(), Config::new())
    }

    #[test]
    fn test_default_layout() {
        let engine = engine(&[("index.html", "Hi {{.}}")]).expect("Should build");
        let out = engine.render_to_string("index.html", "Bo").expect("Should render");
        assert_eq!(
            out,
            "<!DOCTYPE html>\n<html>\n<head>\n\n</head>\n<body>\nHi Bo\n</body>\n</html>\n"
        );
    }

    #[test]
    fn test_views_listed_sorted() {
        let engine = engine(&[("b.html", "b"), ("a.html", "a")]).expect("Should build");
        assert_eq!(engine.views().collect::<Vec<_>>(), vec!["a.html", "b.html"]);
        assert!(engine.has_view("a.html"));
        assert!(!engine.has_view("c.html"));
    }

    #[test]
    fn test_unknown_view_writes_nothing() {
        let engine = engine(&[("a.html", "a")]).expect("Should build");
        let mut out = Vec::new();
        let err = engine.render(&mut out, "missing.html", &json!({})).unwrap_err();
        assert!(err.is_not_found());
        assert!(out.is_empty());
    }

    #[test]
    fn test_execution_error_names_view() {
        let engine = engine(&[("a.html", "{{.A.B}}")]).expect("Should build");
        let err = engine.render_to_string("a.html", &json!({"A": 1})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "error rendering 'a.html': template: body: can't evaluate field B in type int"
        );
        // The engine stays usable
        assert!(engine.render_to_string("a.html", &json!({})).is_ok());
    }

    #[test]
    fn test_serializable_data() {
        #[derive(Serialize)]
        struct Page {
            title: &'static str,
            tags: Vec<&'static str>,
        }
        let engine = engine(&[("p.html", "{{.title}}:{{range .tags}}[{{.}}]{{end}}")]).expect("Should build");
        let page = Page {
            title: "T",
            tags: vec!["a", "b"],
        };
        let out = engine.render_to_string("p.html", &page).expect("Should render");
        assert!(out.contains("T:[a][b]"));
    }

    #[test]
    #[should_panic(expected = "not found")]
    fn test_must_panics() {
        must(Engine::from_files([("a.html", "a")], Config::new().with_layout("layout.html")));
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
