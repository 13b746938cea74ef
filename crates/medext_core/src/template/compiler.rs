//! Restricted template language: parser and interpreter.
//!
//! # Grammar
//! - `{{{path}}}` raw substitution.
//! - `{{path}}` HTML-escaped substitution.
//! - `{{#each path}}…{{/each}}` / `{{#if path}}…{{/if}}` blocks (nestable, no else).
//! - `{{helper arg …}}` helper call: any tag with more than one token.
//!
//! # Invariants
//! - The language has no loops other than `each` over finite input, so
//!   rendering always terminates.
//! - A multi-token tag is always a helper call, so helper names shadow data
//!   fields of the same name only when used with arguments.
//! - Rendering is a pure function of the input record.

use crate::template::helpers::Helper;
use crate::template::TemplateError;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\{\s*([^{}]*?)\s*\}\}\}|\{\{\s*([^{}]*?)\s*\}\}").expect("valid tag regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Each,
    If,
}

impl Block {
    fn name(self) -> &'static str {
        match self {
            Self::Each => "each",
            Self::If => "if",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(Value),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Raw(String),
    Escaped(String),
    Helper {
        helper: Option<Helper>,
        args: Vec<Arg>,
    },
    Each {
        path: String,
        body: Vec<Node>,
    },
    If {
        path: String,
        body: Vec<Node>,
    },
}

/// Parsed template, ready to render any number of records.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    nodes: Vec<Node>,
    diagnostics: Vec<String>,
}

impl CompiledTemplate {
    /// Renders the template against one data record.
    pub fn render(&self, data: &Value) -> String {
        let mut out = String::new();
        render_nodes(&self.nodes, data, &mut out);
        out
    }

    /// Non-fatal compile findings, e.g. unknown helper names.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

struct Frame {
    block: Block,
    path: String,
    offset: usize,
    nodes: Vec<Node>,
}

/// Parses template source into an executable tree.
pub fn compile_template(source: &str) -> Result<CompiledTemplate, TemplateError> {
    let mut root = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut diagnostics = Vec::new();
    let mut cursor = 0;

    for captures in TAG_RE.captures_iter(source) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_text(
            target(&mut root, &mut stack),
            &source[cursor..whole.start()],
            cursor,
        )?;
        cursor = whole.end();
        let offset = whole.start();

        if let Some(raw) = captures.get(1) {
            target(&mut root, &mut stack).push(Node::Raw(raw.as_str().to_string()));
            continue;
        }

        let content = captures.get(2).map_or("", |m| m.as_str());
        if content.is_empty() {
            return Err(TemplateError::EmptyTag { offset });
        }

        if let Some(open) = content.strip_prefix('#') {
            let (keyword, argument) = open
                .split_once(char::is_whitespace)
                .map_or((open, ""), |(keyword, rest)| (keyword, rest.trim()));
            let block = match keyword {
                "each" => Block::Each,
                "if" => Block::If,
                other => {
                    return Err(TemplateError::UnsupportedBlock {
                        name: other.to_string(),
                        offset,
                    })
                }
            };
            if argument.is_empty() {
                return Err(TemplateError::MissingBlockArgument {
                    block: block.name(),
                    offset,
                });
            }
            stack.push(Frame {
                block,
                path: argument.to_string(),
                offset,
                nodes: Vec::new(),
            });
            continue;
        }

        if let Some(close) = content.strip_prefix('/') {
            let keyword = close.trim();
            let Some(frame) = stack.pop() else {
                return Err(TemplateError::UnexpectedClose {
                    block: keyword.to_string(),
                    offset,
                });
            };
            if frame.block.name() != keyword {
                return Err(TemplateError::MismatchedClose {
                    expected: frame.block.name(),
                    found: keyword.to_string(),
                    offset,
                });
            }
            let node = match frame.block {
                Block::Each => Node::Each {
                    path: frame.path,
                    body: frame.nodes,
                },
                Block::If => Node::If {
                    path: frame.path,
                    body: frame.nodes,
                },
            };
            target(&mut root, &mut stack).push(node);
            continue;
        }

        let mut tokens = split_arguments(content).into_iter();
        let Some(first) = tokens.next() else {
            return Err(TemplateError::EmptyTag { offset });
        };
        let args: Vec<Arg> = tokens.map(|token| parse_argument(&token)).collect();
        let node = if args.is_empty() {
            Node::Escaped(first)
        } else {
            let helper = Helper::from_name(&first);
            if helper.is_none() {
                warn!(
                    "event=template_compile module=template status=warn reason=unknown_helper helper={}",
                    first
                );
                diagnostics.push(format!("unknown helper `{first}` at offset {offset}"));
            }
            Node::Helper { helper, args }
        };
        target(&mut root, &mut stack).push(node);
    }

    push_text(
        target(&mut root, &mut stack),
        &source[cursor..],
        cursor,
    )?;

    if let Some(frame) = stack.pop() {
        return Err(TemplateError::UnclosedBlock {
            block: frame.block.name(),
            offset: frame.offset,
        });
    }

    Ok(CompiledTemplate {
        nodes: root,
        diagnostics,
    })
}

fn target<'a>(root: &'a mut Vec<Node>, stack: &'a mut [Frame]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(frame) => &mut frame.nodes,
        None => root,
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str, base: usize) -> Result<(), TemplateError> {
    if let Some(index) = text.find("{{") {
        return Err(TemplateError::UnterminatedTag {
            offset: base + index,
        });
    }
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
    Ok(())
}

/// Splits on whitespace, keeping quoted segments (with their quotes) intact.
fn split_arguments(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in content.chars() {
        match quote {
            Some(open) => {
                current.push(c);
                if c == open {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_argument(token: &str) -> Arg {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return Arg::Literal(Value::String(token[1..token.len() - 1].to_string()));
        }
    }
    if let Ok(integer) = token.parse::<i64>() {
        return Arg::Literal(Value::Number(Number::from(integer)));
    }
    if let Some(number) = token.parse::<f64>().ok().and_then(Number::from_f64) {
        return Arg::Literal(Value::Number(number));
    }
    Arg::Path(token.to_string())
}

fn render_nodes(nodes: &[Node], scope: &Value, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Raw(path) => out.push_str(&stringify(lookup(scope, path))),
            Node::Escaped(path) => out.push_str(&escape_html(&stringify(lookup(scope, path)))),
            Node::Helper { helper, args } => {
                let Some(helper) = helper else {
                    continue;
                };
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Literal(value) => value.clone(),
                        Arg::Path(path) => lookup(scope, path).cloned().unwrap_or(Value::Null),
                    })
                    .collect();
                out.push_str(&escape_html(&helper.invoke(&values)));
            }
            Node::Each { path, body } => {
                let Some(Value::Array(items)) = lookup(scope, path) else {
                    continue;
                };
                for (index, item) in items.iter().enumerate() {
                    let child = each_scope(scope, item, index, items.len());
                    render_nodes(body, &child, out);
                }
            }
            Node::If { path, body } => {
                if is_truthy(lookup(scope, path)) {
                    render_nodes(body, scope, out);
                }
            }
        }
    }
}

/// Parent scope, then element fields, then `this`/`@index`/`@first`/`@last`.
fn each_scope(parent: &Value, item: &Value, index: usize, len: usize) -> Value {
    let mut scope = match parent {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    if let Value::Object(fields) = item {
        for (key, value) in fields {
            scope.insert(key.clone(), value.clone());
        }
    }
    scope.insert("this".to_string(), item.clone());
    scope.insert("@index".to_string(), Value::from(index));
    scope.insert("@first".to_string(), Value::Bool(index == 0));
    scope.insert("@last".to_string(), Value::Bool(index + 1 == len));
    Value::Object(scope)
}

fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = match scope.get(first) {
        Some(value) => value,
        None if first == "this" => scope,
        None => return None,
    };
    for segment in segments {
        current = match current {
            Value::Object(fields) => fields.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Object(_)) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => format_number(number),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| stringify(Some(item)))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn format_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    match number.as_f64() {
        Some(value) if value.fract() == 0.0 && value.abs() < 1e15 => format!("{}", value as i64),
        Some(value) => value.to_string(),
        None => number.to_string(),
    }
}

/// Escapes `& < > " '` for HTML text and attribute contexts.
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
