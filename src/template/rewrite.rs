//! Marker rewriting
//!
//! Walks a file's trees depth-first and replaces every action whose first
//! command calls `render` or `partial` with a call of the named template.
//! The rewrite is structural and does not depend on the role a file is
//! consumed in; role legality is checked separately by [`Rewritten::validate`]
//! so the same memoized rewrite can serve every consumer.

use std::sync::Arc;

use super::registry::TemplateFile;
use super::{Marker, Role, BODY, RESERVED_SECTIONS};
use crate::error::{Error, Span};
use crate::parser::ast::{Command, ListNode, Node, Operand, Pipeline, Spanned, TemplateCall, Tree};

/// One marker invocation found while rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRef {
    /// Resolved target name
    pub name: String,
    pub marker: Marker,
    /// Span of the original action in the file source
    pub span: Span,
}

impl MarkerRef {
    /// Whether composition resolves this reference itself instead of
    /// looking it up in the registry
    pub fn is_reserved(&self) -> bool {
        self.marker == Marker::Render && RESERVED_SECTIONS.contains(&self.name.as_str())
    }
}

/// A file with all of its markers rewritten
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub name: String,
    pub tree: Arc<Tree>,
    pub defines: Vec<Arc<Tree>>,
    /// Every marker use, in source order
    pub markers: Vec<MarkerRef>,
}

impl Rewritten {
    /// References that must be resolved against the registry
    pub fn references(&self) -> impl Iterator<Item = &MarkerRef> {
        self.markers.iter().filter(|m| !m.is_reserved())
    }

    /// Reject the first marker `role` does not allow
    pub fn validate(&self, file: &TemplateFile, role: Role) -> Result<(), Error> {
        match self.markers.iter().find(|m| !role.allows(m.marker)) {
            Some(m) => Err(Error::IllegalMarker {
                location: file.locate(m.span.clone()),
                marker: m.marker,
                role,
            }),
            None => Ok(()),
        }
    }
}

/// Rewrite the main tree and every define of `file`
pub fn rewrite(file: &TemplateFile) -> Result<Rewritten, Error> {
    let mut rewriter = Rewriter {
        file,
        markers: Vec::new(),
    };

    let mut tree = file.tree.clone();
    rewriter.list(&mut tree.root)?;

    let mut defines = Vec::with_capacity(file.defines.len());
    for define in &file.defines {
        let mut define = define.clone();
        rewriter.list(&mut define.root)?;
        defines.push(Arc::new(define));
    }

    Ok(Rewritten {
        name: file.name.clone(),
        tree: Arc::new(tree),
        defines,
        markers: rewriter.markers,
    })
}

struct Rewriter<'a> {
    file: &'a TemplateFile,
    markers: Vec<MarkerRef>,
}

impl Rewriter<'_> {
    /// Rewrite markers in `list`, replacing nodes by index
    fn list(&mut self, list: &mut ListNode) -> Result<(), Error> {
        for index in 0..list.nodes.len() {
            let Spanned { node, span } = &mut list.nodes[index];
            let call = match node {
                Node::Action(pipe) => self.marker_call(pipe, span.clone())?,
                Node::If(branch) | Node::Range(branch) | Node::With(branch) => {
                    self.list(&mut branch.list)?;
                    if let Some(else_list) = &mut branch.else_list {
                        self.list(else_list)?;
                    }
                    None
                }
                // Block bodies are rewritten through the define they register
                _ => None,
            };
            if let Some(call) = call {
                list.nodes[index].node = Node::Template(call);
            }
        }
        Ok(())
    }

    /// Template call replacing `pipe`, when `pipe` invokes a marker
    fn marker_call(&mut self, pipe: &Pipeline, span: Span) -> Result<Option<TemplateCall>, Error> {
        // Only a bare single-command action is a marker; anything else keeps
        // the placeholder function, which prints nothing.
        if !pipe.decl.is_empty() || pipe.cmds.len() != 1 {
            return Ok(None);
        }
        let cmd = &pipe.cmds[0];
        let Some(marker) = cmd.callee().and_then(Marker::from_ident) else {
            return Ok(None);
        };

        let target = match cmd.args.get(1).map(|a| &a.node) {
            Some(Operand::String(name)) if !name.is_empty() => Some(name.clone()),
            _ => None,
        };

        let (name, context) = match marker {
            Marker::Render => (target.unwrap_or_else(|| BODY.to_string()), dot(&span)),
            Marker::Partial => {
                let name = target.ok_or_else(|| Error::MissingTarget {
                    location: self.file.locate(span.clone()),
                })?;
                let context = match cmd.args.get(2) {
                    Some(arg) => Pipeline::single(Command {
                        args: vec![arg.clone()],
                        span: arg.span.clone(),
                    }),
                    None => dot(&span),
                };
                (name, context)
            }
        };

        if name == self.file.name {
            return Err(Error::CyclicReference {
                location: self.file.locate(span),
                name,
            });
        }

        self.markers.push(MarkerRef {
            name: name.clone(),
            marker,
            span,
        });
        Ok(Some(TemplateCall {
            name,
            pipe: Some(context),
        }))
    }
}

fn dot(span: &Span) -> Pipeline {
    Pipeline::single(Command {
        args: vec![Spanned::new(Operand::Dot, span.clone())],
        span: span.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Funcs;

    fn file(name: &str, source: &str) -> TemplateFile {
        TemplateFile::parse(name, source, &Funcs::new()).expect("Should parse")
    }

    fn call(node: &Node) -> &TemplateCall {
        match node {
            Node::Template(call) => call,
            other => panic!("Expected template call, got {:?}", other),
        }
    }

    #[test]
    fn test_render_defaults_to_body() {
        let rw = rewrite(&file("layout.html", "<body>{{render}}</body>")).expect("Should rewrite");
        let call = call(&rw.tree.root.nodes[1].node);
        assert_eq!(call.name, "body");
        assert_eq!(rw.markers.len(), 1);
        assert!(rw.markers[0].is_reserved());
        assert_eq!(rw.references().count(), 0);
    }

    #[test]
    fn test_render_named_section() {
        let rw = rewrite(&file("layout.html", r#"{{render "head"}}{{render "sidebar"}}"#))
            .expect("Should rewrite");
        assert_eq!(call(&rw.tree.root.nodes[0].node).name, "head");
        let refs: Vec<_> = rw.references().map(|r| r.name.as_str()).collect();
        assert_eq!(refs, vec!["sidebar"]);
    }

    #[test]
    fn test_partial_forwards_context() {
        let rw = rewrite(&file("view.html", r#"{{partial "partial.html" .Location}}"#))
            .expect("Should rewrite");
        let call = call(&rw.tree.root.nodes[0].node);
        assert_eq!(call.name, "partial.html");
        let pipe = call.pipe.as_ref().expect("Should forward context");
        assert_eq!(
            pipe.cmds[0].args[0].node,
            Operand::Field(vec!["Location".to_string()])
        );
        assert_eq!(
            rw.markers[0],
            MarkerRef {
                name: "partial.html".to_string(),
                marker: Marker::Partial,
                span: 0..36,
            }
        );
    }

    #[test]
    fn test_partial_without_context_gets_dot() {
        let rw = rewrite(&file("view.html", r#"{{partial "p.html"}}"#)).expect("Should rewrite");
        let pipe = call(&rw.tree.root.nodes[0].node).pipe.clone().expect("pipe");
        assert_eq!(pipe.cmds[0].args[0].node, Operand::Dot);
    }

    #[test]
    fn test_rewrite_inside_nested_blocks() {
        let source = r#"{{if .A}}{{range .B}}{{with .C}}{{partial "deep.html"}}{{end}}{{end}}{{else}}{{partial "other.html"}}{{end}}"#;
        let rw = rewrite(&file("view.html", source)).expect("Should rewrite");
        let names: Vec<_> = rw.markers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["deep.html", "other.html"]);

        let Node::If(branch) = &rw.tree.root.nodes[0].node else {
            panic!("Expected if");
        };
        let else_list = branch.else_list.as_ref().expect("else");
        assert_eq!(call(&else_list.nodes[0].node).name, "other.html");
    }

    #[test]
    fn test_rewrite_defines() {
        let rw = rewrite(&file(
            "view.html",
            r#"{{define "head"}}{{partial "meta.html"}}{{end}}body"#,
        ))
        .expect("Should rewrite");
        assert_eq!(rw.defines.len(), 1);
        assert_eq!(call(&rw.defines[0].root.nodes[0].node).name, "meta.html");
    }

    #[test]
    fn test_original_file_untouched() {
        let f = file("view.html", r#"{{partial "p.html"}}"#);
        rewrite(&f).expect("Should rewrite");
        assert!(matches!(f.tree.root.nodes[0].node, Node::Action(_)));
    }

    #[test]
    fn test_self_reference_is_cyclic() {
        let err = rewrite(&file(
            "view.html",
            "a\n{{if .X}}{{range .Y}}{{partial \"view.html\"}}{{end}}{{end}}",
        ))
        .unwrap_err();
        match err {
            Error::CyclicReference { location, name } => {
                assert_eq!(name, "view.html");
                assert_eq!((location.line, location.column), (2, 22));
            }
            other => panic!("Expected cyclic reference, got {:?}", other),
        }
    }

    #[test]
    fn test_render_self_is_cyclic() {
        let err = rewrite(&file("layout.html", r#"{{render "layout.html"}}"#)).unwrap_err();
        assert!(matches!(err, Error::CyclicReference { .. }));
    }

    #[test]
    fn test_partial_without_target() {
        let err = rewrite(&file("view.html", "x {{partial}}")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "view.html:1:3: path to partial file is not specified"
        );
    }

    #[test]
    fn test_marker_in_later_command_is_left_alone() {
        let rw = rewrite(&file("view.html", r#"{{"a" | render}}"#)).expect("Should rewrite");
        assert!(rw.markers.is_empty());
        assert!(matches!(rw.tree.root.nodes[0].node, Node::Action(_)));
    }

    #[test]
    fn test_validate_roles() {
        let f = file("view.html", r#"{{render}}"#);
        let rw = rewrite(&f).expect("Should rewrite");
        assert!(rw.validate(&f, Role::Layout).is_ok());
        let err = rw.validate(&f, Role::View).unwrap_err();
        assert_eq!(err.to_string(), "view.html:1:1: view: render not supported");

        let f = file("p.html", r#"{{partial "q.html"}}"#);
        let rw = rewrite(&f).expect("Should rewrite");
        assert!(rw.validate(&f, Role::View).is_ok());
        let err = rw.validate(&f, Role::Partial).unwrap_err();
        assert_eq!(err.to_string(), "p.html:1:1: partial: partial not supported");
    }
}
