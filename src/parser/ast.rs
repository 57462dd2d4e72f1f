//! Abstract Syntax Tree types for the template language

use serde_json::Number;

/// Byte range in source text
pub type Span = std::ops::Range<usize>;

/// AST node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Result of parsing one template file: its main tree plus every
/// `define`/`block` it declares
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub tree: Tree,
    pub defines: Vec<Tree>,
}

/// A named, executable parse tree
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub name: String,
    pub root: ListNode,
}

impl Tree {
    pub fn new(name: impl Into<String>, root: ListNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    /// A tree that produces no output
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, ListNode::default())
    }

    /// Copy of this tree registered under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(name, self.root.clone())
    }
}

/// Ordered sequence of nodes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListNode {
    pub nodes: Vec<Spanned<Node>>,
}

impl ListNode {
    pub fn new(nodes: Vec<Spanned<Node>>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Control-flow and output nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, written as-is
    Text(String),
    /// `{{pipeline}}`: evaluates and prints, or declares variables
    Action(Pipeline),
    /// `{{if p}} ... {{else}} ... {{end}}`
    If(Branch),
    /// `{{range p}} ... {{else}} ... {{end}}`
    Range(Branch),
    /// `{{with p}} ... {{else}} ... {{end}}`
    With(Branch),
    /// `{{template "name" p}}`
    Template(TemplateCall),
    /// `{{block "name" p}} ... {{end}}`: invokes `name`, whose default body
    /// is also registered as a define of the file
    Block(BlockCall),
    /// `{{break}}`
    Break,
    /// `{{continue}}`
    Continue,
}

/// Shared shape of `if`, `range` and `with`
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub pipe: Pipeline,
    pub list: ListNode,
    pub else_list: Option<ListNode>,
}

/// Invocation of a named tree
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateCall {
    pub name: String,
    pub pipe: Option<Pipeline>,
}

/// Inline definition plus invocation
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCall {
    pub name: String,
    pub pipe: Pipeline,
    pub list: ListNode,
}

/// `$x, $y := cmd | cmd`
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub decl: Vec<String>,
    /// `=` rather than `:=`
    pub is_assign: bool,
    pub cmds: Vec<Command>,
    pub span: Span,
}

impl Pipeline {
    /// A pipeline consisting of a single command
    pub fn single(cmd: Command) -> Self {
        let span = cmd.span.clone();
        Self {
            decl: Vec::new(),
            is_assign: false,
            cmds: vec![cmd],
            span,
        }
    }
}

/// One stage of a pipeline: an operand optionally applied to arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Spanned<Operand>>,
    pub span: Span,
}

impl Command {
    /// Name of the function this command calls, if any
    pub fn callee(&self) -> Option<&str> {
        match self.args.first().map(|a| &a.node) {
            Some(Operand::Identifier(name)) => Some(name),
            _ => None,
        }
    }
}

/// Argument or first word of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `.A.B`
    Field(Vec<String>),
    /// `.`
    Dot,
    /// `$x.A`
    Variable { name: String, fields: Vec<String> },
    /// Function name
    Identifier(String),
    String(String),
    Number(Number),
    Bool(bool),
    Nil,
    /// `(pipeline).A.B`
    Pipe {
        pipe: Box<Pipeline>,
        fields: Vec<String>,
    },
}

/// Visit every command in a list, descending into nested blocks
pub fn walk_commands<'a>(list: &'a ListNode, visit: &mut dyn FnMut(&'a Command)) {
    fn pipeline<'a>(pipe: &'a Pipeline, visit: &mut dyn FnMut(&'a Command)) {
        for cmd in &pipe.cmds {
            visit(cmd);
            for arg in &cmd.args {
                if let Operand::Pipe { pipe, .. } = &arg.node {
                    pipeline(pipe, visit);
                }
            }
        }
    }

    for node in &list.nodes {
        match &node.node {
            Node::Action(pipe) => pipeline(pipe, visit),
            Node::If(b) | Node::Range(b) | Node::With(b) => {
                pipeline(&b.pipe, visit);
                walk_commands(&b.list, visit);
                if let Some(else_list) = &b.else_list {
                    walk_commands(else_list, visit);
                }
            }
            Node::Template(call) => {
                if let Some(pipe) = &call.pipe {
                    pipeline(pipe, visit);
                }
            }
            Node::Block(block) => {
                pipeline(&block.pipe, visit);
                walk_commands(&block.list, visit);
            }
            Node::Text(_) | Node::Break | Node::Continue => {}
        }
    }
}
