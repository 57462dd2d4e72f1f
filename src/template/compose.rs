//! Composition of layouts, views and partials into executable sets

use std::collections::HashMap;
use std::sync::Arc;

use super::registry::{Registry, TemplateFile};
use super::rewrite::{rewrite, MarkerRef, Rewritten};
use super::{Marker, Role, BODY, HEAD};
use crate::error::Error;
use crate::parser::ast::Tree;

/// A self-contained set of named trees with one entry point.
///
/// Trees are shared between sets; grafting only replaces map entries, so
/// composing one view never affects the layout or any other view.
#[derive(Debug, Clone)]
pub struct Composed {
    entry: String,
    trees: HashMap<String, Arc<Tree>>,
}

impl Composed {
    fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            trees: HashMap::new(),
        }
    }

    /// Name of the tree execution starts from
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Get a tree by name
    pub fn get(&self, name: &str) -> Option<&Arc<Tree>> {
        self.trees.get(name)
    }

    /// Check if a tree exists
    pub fn contains(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }

    /// Names of all trees, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.trees.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn graft(&mut self, name: &str, tree: Arc<Tree>) {
        tracing::debug!(entry = %self.entry, section = name, "graft");
        if tree.name == name {
            self.trees.insert(name.to_string(), tree);
        } else {
            self.trees.insert(name.to_string(), Arc::new(tree.renamed(name)));
        }
    }

    fn graft_if_absent(&mut self, name: &str, tree: Arc<Tree>) {
        if !self.contains(name) {
            self.graft(name, tree);
        }
    }
}

/// Builds composed sets from a registry, rewriting each file at most once
#[derive(Debug)]
pub struct Composer<'a> {
    registry: &'a Registry,
    rewritten: HashMap<String, Arc<Rewritten>>,
    roles: HashMap<String, Role>,
}

impl<'a> Composer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            rewritten: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    /// Role a file was last consumed in
    pub fn role_of(&self, name: &str) -> Option<Role> {
        self.roles.get(name).copied()
    }

    /// Rewrite `file` (memoized) and check it is legal in `role`
    fn consume(&mut self, file: &TemplateFile, role: Role) -> Result<Arc<Rewritten>, Error> {
        let rewritten = match self.rewritten.get(&file.name) {
            Some(rewritten) => Arc::clone(rewritten),
            None => {
                let rewritten = Arc::new(rewrite(file)?);
                self.rewritten
                    .insert(file.name.clone(), Arc::clone(&rewritten));
                rewritten
            }
        };
        rewritten.validate(file, role)?;
        self.roles.insert(file.name.clone(), role);
        Ok(rewritten)
    }

    /// Rewrite the layout and attach everything it references.
    ///
    /// A missing `partial` target is an error. A missing `render` target
    /// becomes an empty section that views may fill in.
    pub fn compose_layout(&mut self, layout: &TemplateFile) -> Result<Composed, Error> {
        let rewritten = self.consume(layout, Role::Layout)?;

        let mut composed = Composed::new(&layout.name);
        composed.graft(&layout.name, Arc::clone(&rewritten.tree));
        for define in &rewritten.defines {
            composed.graft(&define.name, Arc::clone(define));
        }

        for reference in rewritten.references() {
            match reference.marker {
                Marker::Partial => self.attach_partial(&mut composed, reference)?,
                Marker::Render if composed.contains(&reference.name) => {}
                Marker::Render if self.registry.contains(&reference.name) => {
                    self.attach_partial(&mut composed, reference)?
                }
                Marker::Render => {
                    tracing::debug!(section = %reference.name, "layout section left empty");
                    composed.graft(&reference.name, Arc::new(Tree::empty(&reference.name)));
                }
            }
        }
        Ok(composed)
    }

    /// Clone the composed layout and graft in the named view.
    ///
    /// The view's content becomes the `body` section; sections it defines
    /// replace the layout's; `head` is always present afterwards.
    pub fn compose_view(&mut self, layout: &Composed, name: &str) -> Result<Composed, Error> {
        let registry = self.registry;
        let file = registry.get(name).ok_or_else(|| Error::not_found(name))?;
        let rewritten = self.consume(file, Role::View)?;

        let mut composed = layout.clone();
        for reference in rewritten.references() {
            self.attach_partial(&mut composed, reference)?;
        }

        composed.graft(BODY, Arc::clone(&rewritten.tree));
        for define in &rewritten.defines {
            composed.graft(&define.name, Arc::clone(define));
        }
        composed.graft_if_absent(HEAD, Arc::new(Tree::empty(HEAD)));
        Ok(composed)
    }

    /// Graft the partial named by `reference` together with its sections
    fn attach_partial(&mut self, composed: &mut Composed, reference: &MarkerRef) -> Result<(), Error> {
        let registry = self.registry;
        let file = registry
            .get(&reference.name)
            .ok_or_else(|| Error::not_found(&reference.name))?;
        let rewritten = self.consume(file, Role::Partial)?;

        composed.graft(&reference.name, Arc::clone(&rewritten.tree));
        for define in &rewritten.defines {
            composed.graft_if_absent(&define.name, Arc::clone(define));
        }
        Ok(())
    }
}
