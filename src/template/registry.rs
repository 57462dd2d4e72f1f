//! Template registry for storing parsed template files

use std::collections::BTreeMap;

use crate::error::{Error, Location, ParseError};
use crate::exec::Funcs;
use crate::parser::ast::{walk_commands, Operand, Tree};
use crate::parser::{self, ParsedFile};

/// One parsed template file
#[derive(Debug, Clone)]
pub struct TemplateFile {
    /// Logical name: the `/`-separated path relative to the template root
    pub name: String,
    /// Raw source, kept for translating spans into line and column
    pub source: String,
    /// Main tree, as parsed
    pub tree: Tree,
    /// Sections declared with `define` or `block`
    pub defines: Vec<Tree>,
}

impl TemplateFile {
    /// Parse `source` and check that every function it calls is known
    pub fn parse(name: impl Into<String>, source: impl Into<String>, funcs: &Funcs) -> Result<Self, Error> {
        let name = name.into();
        let source = source.into();

        let ParsedFile { tree, defines } = parser::parse(&name, &source).map_err(|errors| {
            // The grammar reports at least one error on failure
            let error = errors.into_iter().next().unwrap_or_else(|| ParseError::Syntax {
                span: 0..0,
                message: "invalid template".to_string(),
                expected: vec![],
            });
            parse_error(&name, &source, error)
        })?;

        let file = Self {
            name,
            source,
            tree,
            defines,
        };
        file.check_functions(funcs)?;
        tracing::debug!(file = %file.name, defines = file.defines.len(), "parsed template");
        Ok(file)
    }

    /// Location of `span` inside this file
    pub fn locate(&self, span: std::ops::Range<usize>) -> Location {
        Location::new(&self.name, &self.source, span)
    }

    fn check_functions(&self, funcs: &Funcs) -> Result<(), Error> {
        let mut unknown = None;
        for tree in std::iter::once(&self.tree).chain(&self.defines) {
            walk_commands(&tree.root, &mut |cmd| {
                if unknown.is_some() {
                    return;
                }
                for arg in &cmd.args {
                    if let Operand::Identifier(ident) = &arg.node {
                        if !funcs.contains(ident) {
                            unknown = Some((ident.clone(), arg.span.clone()));
                            return;
                        }
                    }
                }
            });
        }

        match unknown {
            Some((ident, span)) => Err(parse_error(
                &self.name,
                &self.source,
                ParseError::Syntax {
                    span,
                    message: format!("function {:?} not defined", ident),
                    expected: vec![],
                },
            )),
            None => Ok(()),
        }
    }
}

fn parse_error(name: &str, source: &str, error: ParseError) -> Error {
    Error::Parse {
        location: Location::new(name, source, error.span().clone()),
        source: error,
    }
}

/// Every discovered template file, keyed by logical name.
///
/// Built once and never modified afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    files: BTreeMap<String, TemplateFile>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every `(name, source)` pair; the first failure aborts the build
    pub fn build<I, N, S>(files: I, funcs: &Funcs) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (name, source) in files {
            let file = TemplateFile::parse(name, source, funcs)?;
            registry.files.insert(file.name.clone(), file);
        }
        Ok(registry)
    }

    /// Get a file by logical name
    pub fn get(&self, name: &str) -> Option<&TemplateFile> {
        self.files.get(name)
    }

    /// Check if a file exists
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// All file names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Get the number of registered files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
