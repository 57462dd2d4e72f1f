//! Builtin and caller-supplied template functions

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use super::value::{
    as_int, compare, equal, format_value, html_escape, js_escape, query_escape, truth, type_name,
};
use crate::template::Marker;

/// A caller-supplied template function
pub type Func = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Names of the functions every template can call
pub const BUILTINS: [&str; 18] = [
    "and", "or", "not", "len", "index", "slice", "print", "println", "printf", "eq", "ne", "lt",
    "le", "gt", "ge", "html", "urlquery", "js",
];

/// Function table: builtins, the two marker placeholders, and caller
/// functions, which may shadow builtins but never the markers.
#[derive(Clone, Default)]
pub struct Funcs {
    user: HashMap<String, Func>,
}

impl Funcs {
    /// Create a table with builtins only
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a caller function; names of markers are ignored
    pub fn insert<F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.insert_arc(name, Arc::new(func))
    }

    /// Register a shared caller function; names of markers are ignored
    pub fn insert_arc(&mut self, name: impl Into<String>, func: Func) -> &mut Self {
        let name = name.into();
        if Marker::from_ident(&name).is_some() {
            tracing::warn!(function = %name, "ignoring caller function with a reserved marker name");
        } else {
            self.user.insert(name, func);
        }
        self
    }

    /// Merge another table into this one; its functions win
    pub fn extend(&mut self, other: &Funcs) {
        for (name, func) in &other.user {
            self.user.insert(name.clone(), Arc::clone(func));
        }
    }

    /// Whether `name` can be called from a template
    pub fn contains(&self, name: &str) -> bool {
        self.user.contains_key(name)
            || BUILTINS.contains(&name)
            || Marker::from_ident(name).is_some()
    }

    /// Whether a caller function shadows the builtin `name`
    pub fn is_user(&self, name: &str) -> bool {
        self.user.contains_key(name)
    }

    /// Call `name` with evaluated arguments
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        if let Some(func) = self.user.get(name) {
            return panic::catch_unwind(AssertUnwindSafe(|| func(args)))
                .unwrap_or_else(|payload| Err(format!("panic: {}", panic_message(payload.as_ref()))));
        }
        if Marker::from_ident(name).is_some() {
            // Markers left in place by the rewriter print nothing
            return Ok(Value::String(String::new()));
        }
        builtin(name, args)
    }
}

impl fmt::Debug for Funcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.user.keys().collect();
        names.sort();
        f.debug_struct("Funcs").field("user", &names).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

fn builtin(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        // `and`/`or` reach here only without short-circuiting
        "and" => args
            .iter()
            .find(|a| !truth(a))
            .or(args.last())
            .cloned()
            .ok_or_else(|| "missing argument".to_string()),
        "or" => args
            .iter()
            .find(|a| truth(a))
            .or(args.last())
            .cloned()
            .ok_or_else(|| "missing argument".to_string()),
        "not" => match args {
            [arg] => Ok(Value::Bool(!truth(arg))),
            _ => Err(format!("wrong number of args: want 1 got {}", args.len())),
        },
        "len" => match args {
            [arg] => len(arg).map(Value::from),
            _ => Err(format!("wrong number of args: want 1 got {}", args.len())),
        },
        "index" => match args.split_first() {
            Some((item, indices)) => index(item, indices),
            None => Err("wrong number of args: want at least 1 got 0".to_string()),
        },
        "slice" => match args.split_first() {
            Some((item, indices)) => slice(item, indices),
            None => Err("wrong number of args: want at least 1 got 0".to_string()),
        },
        "print" => Ok(Value::String(sprint(args))),
        "println" => Ok(Value::String(sprintln(args))),
        "printf" => match args.split_first() {
            Some((Value::String(format), rest)) => Ok(Value::String(sprintf(format, rest))),
            Some((other, _)) => Err(format!("format must be a string, got {}", type_name(other))),
            None => Err("wrong number of args: want at least 1 got 0".to_string()),
        },
        "eq" => match args.split_first() {
            Some((first, rest)) if !rest.is_empty() => {
                for other in rest {
                    if equal(first, other)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            _ => Err("missing argument for comparison".to_string()),
        },
        "ne" => match args {
            [a, b] => Ok(Value::Bool(!equal(a, b)?)),
            _ => Err(format!("wrong number of args: want 2 got {}", args.len())),
        },
        "lt" | "le" | "gt" | "ge" => match args {
            [a, b] => {
                let ord = compare(a, b)?;
                Ok(Value::Bool(match name {
                    "lt" => ord.is_lt(),
                    "le" => ord.is_le(),
                    "gt" => ord.is_gt(),
                    _ => ord.is_ge(),
                }))
            }
            _ => Err(format!("wrong number of args: want 2 got {}", args.len())),
        },
        "html" => Ok(Value::String(html_escape(&sprint(args)))),
        "urlquery" => Ok(Value::String(query_escape(&sprint(args)))),
        "js" => Ok(Value::String(js_escape(&sprint(args)))),
        _ => Err(format!("function {:?} not defined", name)),
    }
}

fn len(value: &Value) -> Result<usize, String> {
    match value {
        Value::String(s) => Ok(s.len()),
        Value::Array(a) => Ok(a.len()),
        Value::Object(o) => Ok(o.len()),
        other => Err(format!("len of type {}", type_name(other))),
    }
}

fn index(item: &Value, indices: &[Value]) -> Result<Value, String> {
    let mut current = item.clone();
    for idx in indices {
        current = match (&current, idx) {
            (Value::Array(items), _) => {
                let i = as_int(idx).ok_or_else(|| format!("cannot index array with {}", type_name(idx)))?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| format!("index out of range: {}", i))?
            }
            (Value::Object(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
            (Value::Object(_), other) => {
                return Err(format!("cannot index map with {}", type_name(other)))
            }
            (Value::Null, _) => return Err("index of untyped nil".to_string()),
            (other, _) => return Err(format!("can't index item of type {}", type_name(other))),
        };
    }
    Ok(current)
}

fn slice(item: &Value, indices: &[Value]) -> Result<Value, String> {
    if indices.len() > 2 {
        return Err(format!("too many slice indexes: {}", indices.len()));
    }
    let bound = |i: usize| -> Result<Option<usize>, String> {
        match indices.get(i) {
            None => Ok(None),
            Some(v) => as_int(v)
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| format!("invalid slice index: {}", format_value(v))),
        }
    };
    let start = bound(0)?.unwrap_or(0);
    match item {
        Value::String(s) => {
            let end = bound(1)?.unwrap_or(s.len());
            s.get(start..end)
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| format!("slice index out of range: {}:{}", start, end))
        }
        Value::Array(items) => {
            let end = bound(1)?.unwrap_or(items.len());
            items
                .get(start..end)
                .map(|s| Value::Array(s.to_vec()))
                .ok_or_else(|| format!("slice index out of range: {}:{}", start, end))
        }
        other => Err(format!("can't slice item of type {}", type_name(other))),
    }
}

/// Concatenate values, with spaces between operands when neither is a string
pub fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !arg.is_string() && !args[i - 1].is_string() {
            out.push(' ');
        }
        out.push_str(&format_value(arg));
    }
    out
}

/// Join values with spaces and end with a newline
pub fn sprintln(args: &[Value]) -> String {
    let parts: Vec<String> = args.iter().map(format_value).collect();
    format!("{}\n", parts.join(" "))
}

/// Format with `%v %s %d %f %.Nf %q %t %x %%`
pub fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                digits.push(d);
            }
            precision = Some(digits.parse().unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        match args.next() {
            Some(arg) => out.push_str(&format_verb(verb, precision, arg)),
            None => out.push_str(&format!("%!{}(MISSING)", verb)),
        }
    }
    out
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> String {
    let bad = || format!("%!{}({}={})", verb, type_name(arg), format_value(arg));
    match verb {
        'v' => format_value(arg),
        's' => match arg {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => bad(),
            other => format_value(other),
        },
        'd' => as_int(arg).map(|i| i.to_string()).unwrap_or_else(bad),
        'f' => match arg {
            Value::Number(n) => n
                .as_f64()
                .map(|f| format!("{:.*}", precision.unwrap_or(6), f))
                .unwrap_or_else(bad),
            _ => bad(),
        },
        'q' => match arg {
            Value::String(s) => format!("{:?}", s),
            _ => bad(),
        },
        't' => match arg {
            Value::Bool(b) => b.to_string(),
            _ => bad(),
        },
        'x' => match arg {
            Value::String(s) => s.bytes().map(|b| format!("{:02x}", b)).collect(),
            _ => match as_int(arg) {
                Some(i) if i < 0 => format!("-{:x}", i.unsigned_abs()),
                Some(i) => format!("{:x}", i),
                None => bad(),
            },
        },
        _ => format!("%!{}({})", verb, format_value(arg)),
    }
}
