//! `modelgate inspect` - load a model file and print a summary tree or JSON.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use modelgate_core::{SecureLoader, Value};

use super::config::{absolute, resolve};
use crate::cli::args::InspectArgs;
use crate::exit_codes;

/// Children shown per container before eliding the rest.
const MAX_CHILDREN: usize = 16;
const MAX_STR_CHARS: usize = 48;

pub fn run(args: InspectArgs, config: Option<&Path>) -> Result<i32> {
    let config = resolve(config, &args.trust)?;
    let loader = SecureLoader::from_config(&config)?;
    let path = absolute(&args.file)?;

    let value = if args.unsafe_load {
        loader.unsafe_load(&path)?
    } else {
        loader.secure_load(&path, !args.no_verify)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", render_tree(&value, args.depth));
    }
    Ok(exit_codes::SUCCESS)
}

/// Indented one-line-per-value outline of `value`, `max_depth` levels deep.
pub fn render_tree(value: &Value, max_depth: usize) -> String {
    let mut out = String::new();
    render_node(&mut out, None, value, 0, max_depth);
    out
}

fn render_node(out: &mut String, label: Option<&str>, value: &Value, depth: usize, max_depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = match label {
        Some(label) => writeln!(out, "{indent}{label}: {}", summary(value)),
        None => writeln!(out, "{indent}{}", summary(value)),
    };

    let children = children(value);
    if children.is_empty() {
        return;
    }
    if depth >= max_depth {
        let _ = writeln!(out, "{indent}  ...");
        return;
    }
    for (label, child) in children.iter().take(MAX_CHILDREN) {
        render_node(out, Some(label), child, depth + 1, max_depth);
    }
    if children.len() > MAX_CHILDREN {
        let _ = writeln!(out, "{indent}  ... {} more", children.len() - MAX_CHILDREN);
    }
}

fn summary(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Int(i) => format!("int {i}"),
        Value::BigInt(bytes) => format!("int ({} bytes)", bytes.len()),
        Value::Float(f) => format!("float {f}"),
        Value::String(s) => format!("str {:?}", truncate(s)),
        Value::Bytes(b) | Value::ByteArray(b) => format!("{} ({} bytes)", value.type_name(), b.len()),
        Value::List(items) | Value::Tuple(items) | Value::Set(items) | Value::FrozenSet(items) => {
            format!("{} ({} items)", value.type_name(), items.len())
        }
        Value::Dict(pairs) => format!("dict ({} entries)", pairs.len()),
        Value::Type(class) => format!("type {class}"),
        Value::Object(object) => format!("object {}", object.class),
    }
}

fn children(value: &Value) -> Vec<(String, &Value)> {
    match value {
        Value::List(items) | Value::Tuple(items) | Value::Set(items) | Value::FrozenSet(items) => {
            indexed(items)
        }
        Value::Dict(pairs) => keyed(pairs),
        Value::Object(object) => {
            let mut children: Vec<_> = object
                .args
                .iter()
                .enumerate()
                .map(|(i, arg)| (format!("arg{i}"), arg))
                .collect();
            children.extend(keyed(&object.kwargs));
            if let Some(state) = &object.state {
                children.push(("state".to_string(), state));
            }
            children.extend(indexed(&object.items));
            children.extend(keyed(&object.entries));
            children
        }
        _ => Vec::new(),
    }
}

fn indexed(items: &[Value]) -> Vec<(String, &Value)> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (format!("[{i}]"), item))
        .collect()
}

fn keyed(pairs: &[(Value, Value)]) -> Vec<(String, &Value)> {
    pairs
        .iter()
        .map(|(key, value)| {
            let label = match key {
                Value::String(s) => truncate(s),
                other => summary(other),
            };
            (label, value)
        })
        .collect()
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_STR_CHARS {
        return s.to_string();
    }
    let mut short: String = s.chars().take(MAX_STR_CHARS).collect();
    short.push_str("...");
    short
}
