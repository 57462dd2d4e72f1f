//! Layout, view and partial composition
//!
//! Template files are parsed once into a [`Registry`]. The rewriter turns
//! the two marker invocations into ordinary named template calls:
//!
//! ```text
//! {{render}}                     ->  {{template "body" .}}
//! {{render "head"}}              ->  {{template "head" .}}
//! {{partial "nav.html" .Menu}}   ->  {{template "nav.html" .Menu}}
//! ```
//!
//! The composer then splices the rewritten trees of the layout, a view and
//! every partial they reference into one self-contained [`Composed`] set
//! per view.

mod compose;
mod registry;
mod rewrite;

use std::fmt;

pub use compose::{Composed, Composer};
pub use registry::{Registry, TemplateFile};
pub use rewrite::{rewrite, MarkerRef, Rewritten};

/// Section a view's top-level content is grafted under
pub const BODY: &str = "body";

/// Optional section that always exists in a composed template
pub const HEAD: &str = "head";

/// Section names resolved by composition rather than the registry
pub const RESERVED_SECTIONS: [&str; 2] = [BODY, HEAD];

/// Capacity in which a template file is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Layout,
    View,
    Partial,
}

impl Role {
    /// Whether a file in this role may use `marker`
    pub fn allows(self, marker: Marker) -> bool {
        match self {
            Role::Layout => true,
            Role::View => marker == Marker::Partial,
            Role::Partial => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Layout => "layout",
            Role::View => "view",
            Role::Partial => "partial",
        })
    }
}

/// The two reserved invocation forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Render,
    Partial,
}

impl Marker {
    pub const ALL: [Marker; 2] = [Marker::Render, Marker::Partial];

    /// The function name that invokes this marker
    pub fn name(self) -> &'static str {
        match self {
            Marker::Render => "render",
            Marker::Partial => "partial",
        }
    }

    /// Marker called by `ident`, if any
    pub fn from_ident(ident: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == ident)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
