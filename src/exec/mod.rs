//! Tree-walking executor for composed templates
//!
//! Data is a [`serde_json::Value`]; every named tree a template calls must
//! be present in the [`Composed`] set being executed.

mod funcs;
pub mod value;

use std::io::Write;

use serde_json::Value;
use thiserror::Error;

pub use funcs::{sprint, sprintf, sprintln, Func, Funcs, BUILTINS};

use crate::config::{Escape, MissingKey};
use crate::parser::ast::{Branch, Command, ListNode, Node, Operand, Pipeline, Spanned};
use crate::template::Composed;
use value::{display, format_value, html_escape, truth, type_name};

/// Maximum nesting of template calls
pub const MAX_DEPTH: usize = 256;

static NULL: Value = Value::Null;

/// Errors raised while executing a template
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("template: {template}: {message}")]
    Eval { template: String, message: String },

    #[error("template: {template}: error calling {function}: {message}")]
    Func {
        template: String,
        function: String,
        message: String,
    },

    #[error("exceeded maximum template depth ({0})")]
    Depth(usize),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Evaluation settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    pub escape: Escape,
    pub missing_key: MissingKey,
}

/// Execute the entry tree of `set` against `data`, writing to `w`
pub fn execute<W: Write + ?Sized>(
    w: &mut W,
    set: &Composed,
    data: &Value,
    funcs: &Funcs,
    options: Options,
) -> Result<(), ExecError> {
    let mut state = State {
        w,
        set,
        funcs,
        options,
        vars: Vec::new(),
        template: String::new(),
        depth: 0,
    };
    state.call_template(set.entry(), data.clone())
}

/// Outcome of walking a list, for `break` and `continue`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct State<'a, W: Write + ?Sized> {
    w: &'a mut W,
    set: &'a Composed,
    funcs: &'a Funcs,
    options: Options,
    /// Variable stack; `$` is always at the bottom of a template's frame
    vars: Vec<(String, Value)>,
    template: String,
    depth: usize,
}

impl<'a, W: Write + ?Sized> State<'a, W> {
    fn error(&self, message: impl Into<String>) -> ExecError {
        ExecError::Eval {
            template: self.template.clone(),
            message: message.into(),
        }
    }

    fn walk(&mut self, dot: &Value, list: &ListNode) -> Result<Flow, ExecError> {
        for node in &list.nodes {
            let flow = self.node(dot, node)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn node(&mut self, dot: &Value, node: &Spanned<Node>) -> Result<Flow, ExecError> {
        match &node.node {
            Node::Text(text) => {
                self.w.write_all(text.as_bytes())?;
                Ok(Flow::Normal)
            }
            Node::Action(pipe) => {
                let value = self.pipeline(dot, pipe)?;
                if pipe.decl.is_empty() {
                    self.print(&value, pipe)?;
                }
                Ok(Flow::Normal)
            }
            Node::If(branch) => self.conditional(dot, branch, false),
            Node::With(branch) => self.conditional(dot, branch, true),
            Node::Range(branch) => self.range(dot, branch),
            Node::Template(call) => {
                let value = match &call.pipe {
                    Some(pipe) => self.pipeline(dot, pipe)?,
                    None => Value::Null,
                };
                self.call_template(&call.name, value)?;
                Ok(Flow::Normal)
            }
            Node::Block(block) => {
                let value = self.pipeline(dot, &block.pipe)?;
                self.call_template(&block.name, value)?;
                Ok(Flow::Normal)
            }
            Node::Break => Ok(Flow::Break),
            Node::Continue => Ok(Flow::Continue),
        }
    }

    fn print(&mut self, value: &Value, pipe: &Pipeline) -> Result<(), ExecError> {
        let text = display(value);
        // A pipeline ending in the builtin `html` is already escaped
        let escaped = pipe
            .cmds
            .last()
            .and_then(Command::callee)
            .is_some_and(|f| f == "html" && !self.funcs.is_user(f));
        if self.options.escape == Escape::Html && !escaped {
            self.w.write_all(html_escape(&text).as_bytes())?;
        } else {
            self.w.write_all(text.as_bytes())?;
        }
        Ok(())
    }

    /// `if` and `with`; `with` moves the dot to the pipeline's value
    fn conditional(&mut self, dot: &Value, branch: &Branch, with: bool) -> Result<Flow, ExecError> {
        let mark = self.vars.len();
        let value = self.pipeline(dot, &branch.pipe)?;
        let flow = if truth(&value) {
            let inner = if with { &value } else { dot };
            self.walk(inner, &branch.list)?
        } else if let Some(else_list) = &branch.else_list {
            self.walk(dot, else_list)?
        } else {
            Flow::Normal
        };
        self.vars.truncate(mark);
        Ok(flow)
    }

    fn range(&mut self, dot: &Value, branch: &Branch) -> Result<Flow, ExecError> {
        let mark = self.vars.len();
        let value = self.commands(dot, &branch.pipe)?;

        let items: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), v))
                    .collect()
            }
            Value::Number(n) => match n.as_u64() {
                Some(count) => (0..count).map(|i| (Value::from(i), Value::from(i))).collect(),
                None => return Err(self.error(format!("range can't iterate over {}", n))),
            },
            Value::Null => Vec::new(),
            other => {
                return Err(self.error(format!(
                    "range can't iterate over {}",
                    format_value(&other)
                )))
            }
        };

        if items.is_empty() {
            let flow = match &branch.else_list {
                Some(else_list) => self.walk(dot, else_list)?,
                None => Flow::Normal,
            };
            self.vars.truncate(mark);
            return Ok(flow);
        }

        for (key, item) in items {
            match branch.pipe.decl.as_slice() {
                [] => {}
                [elem] => self.bind(elem, item.clone(), branch.pipe.is_assign)?,
                [index, elem] => {
                    self.bind(index, key, branch.pipe.is_assign)?;
                    self.bind(elem, item.clone(), branch.pipe.is_assign)?;
                }
                _ => return Err(self.error("too many declarations in range")),
            }
            let flow = self.walk(&item, &branch.list)?;
            self.vars.truncate(mark);
            if flow == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    /// Run the named tree with a fresh variable frame
    fn call_template(&mut self, name: &str, dot: Value) -> Result<(), ExecError> {
        let set = self.set;
        let tree = set
            .get(name)
            .ok_or_else(|| self.error(format!("no such template {:?}", name)))?;
        if self.depth >= MAX_DEPTH {
            return Err(ExecError::Depth(MAX_DEPTH));
        }

        let vars = std::mem::replace(&mut self.vars, vec![("$".to_string(), dot.clone())]);
        let template = std::mem::replace(&mut self.template, tree.name.clone());
        self.depth += 1;
        let result = self.walk(&dot, &tree.root);
        self.depth -= 1;
        self.template = template;
        self.vars = vars;
        result.map(|_| ())
    }

    /// Evaluate a pipeline and bind its declared variables
    fn pipeline(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, ExecError> {
        let value = self.commands(dot, pipe)?;
        match pipe.decl.as_slice() {
            [] => {}
            [name] => self.bind(name, value.clone(), pipe.is_assign)?,
            _ => return Err(self.error("too many declarations in pipeline")),
        }
        Ok(value)
    }

    /// Evaluate the commands of a pipeline, feeding each result to the next
    fn commands(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, ExecError> {
        let mut last = None;
        for cmd in &pipe.cmds {
            last = Some(self.command(dot, cmd, last)?);
        }
        Ok(last.unwrap_or(Value::Null))
    }

    fn bind(&mut self, name: &str, value: Value, assign: bool) -> Result<(), ExecError> {
        if !assign {
            self.vars.push((name.to_string(), value));
            return Ok(());
        }
        match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(self.error(format!("undefined variable: {}", name))),
        }
    }

    fn variable(&self, name: &str) -> Result<&Value, ExecError> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| self.error(format!("undefined variable: {}", name)))
    }

    fn command(&mut self, dot: &Value, cmd: &Command, last: Option<Value>) -> Result<Value, ExecError> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Ok(Value::Null);
        };
        if let Operand::Identifier(name) = &first.node {
            return self.call(dot, name, rest, last);
        }
        if !rest.is_empty() || last.is_some() {
            return Err(self.error(format!(
                "can't give argument to non-function {}",
                describe(&first.node)
            )));
        }
        if first.node == Operand::Nil {
            return Err(self.error("nil is not a command"));
        }
        self.operand(dot, &first.node)
    }

    fn call(
        &mut self,
        dot: &Value,
        name: &str,
        args: &[Spanned<Operand>],
        last: Option<Value>,
    ) -> Result<Value, ExecError> {
        if (name == "and" || name == "or") && !self.funcs.is_user(name) {
            return self.short_circuit(dot, name == "and", args, last);
        }

        let mut values = Vec::with_capacity(args.len() + 1);
        for arg in args {
            values.push(self.operand(dot, &arg.node)?);
        }
        values.extend(last);
        self.funcs.call(name, &values).map_err(|message| ExecError::Func {
            template: self.template.clone(),
            function: name.to_string(),
            message,
        })
    }

    /// `and` stops at the first false argument, `or` at the first true one
    fn short_circuit(
        &mut self,
        dot: &Value,
        and: bool,
        args: &[Spanned<Operand>],
        last: Option<Value>,
    ) -> Result<Value, ExecError> {
        if args.is_empty() && last.is_none() {
            return Err(ExecError::Func {
                template: self.template.clone(),
                function: if and { "and" } else { "or" }.to_string(),
                message: "missing argument".to_string(),
            });
        }
        let mut value = Value::Null;
        for arg in args {
            value = self.operand(dot, &arg.node)?;
            if truth(&value) != and {
                return Ok(value);
            }
        }
        Ok(last.unwrap_or(value))
    }

    fn operand(&mut self, dot: &Value, operand: &Operand) -> Result<Value, ExecError> {
        match operand {
            Operand::Field(fields) => self.fields(dot, fields),
            Operand::Dot => Ok(dot.clone()),
            Operand::Variable { name, fields } => {
                let value = self.variable(name)?;
                self.fields(value, fields)
            }
            Operand::Identifier(name) => self.call(dot, name, &[], None),
            Operand::String(s) => Ok(Value::String(s.clone())),
            Operand::Number(n) => Ok(Value::Number(n.clone())),
            Operand::Bool(b) => Ok(Value::Bool(*b)),
            Operand::Nil => Ok(Value::Null),
            Operand::Pipe { pipe, fields } => {
                let value = self.pipeline(dot, pipe)?;
                self.fields(&value, fields)
            }
        }
    }

    /// Follow a field chain through nested maps
    fn fields(&self, value: &Value, fields: &[String]) -> Result<Value, ExecError> {
        let strict = self.options.missing_key == MissingKey::Error;
        let mut current = value;
        for name in fields {
            current = match current {
                Value::Object(map) => match map.get(name) {
                    Some(v) => v,
                    None if strict => {
                        return Err(self.error(format!("map has no entry for key {:?}", name)))
                    }
                    None => &NULL,
                },
                Value::Null if strict => {
                    return Err(self.error(format!("nil pointer evaluating .{}", name)))
                }
                Value::Null => &NULL,
                other => {
                    return Err(self.error(format!(
                        "can't evaluate field {} in type {}",
                        name,
                        type_name(other)
                    )))
                }
            };
        }
        Ok(current.clone())
    }
}

fn describe(operand: &Operand) -> String {
    match operand {
        Operand::Field(fields) => format!(".{}", fields.join(".")),
        Operand::Dot => ".".to_string(),
        Operand::Variable { name, .. } => name.clone(),
        Operand::Identifier(name) => name.clone(),
        Operand::String(s) => format!("{:?}", s),
        Operand::Number(n) => n.to_string(),
        Operand::Bool(b) => b.to_string(),
        Operand::Nil => "nil".to_string(),
        Operand::Pipe { .. } => "(pipeline)".to_string(),
    }
}
