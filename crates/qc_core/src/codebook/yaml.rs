//! YAML codec for the codebook file.
//!
//! A codebook is a sequence whose items are either a plain string (leaf) or
//! a single-key mapping from the code name to its sequence of children.
//! Serialization sorts siblings and writes childless nodes as plain strings,
//! so `parse -> serialize` is a fixed point for files already in that form.
//! Numeric names such as `- 12` are read as their string form and written
//! back unquoted.

use super::{CodeTree, CodebookError, CodebookResult, NodeId};
use log::info;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// Parses codebook YAML into a tree. Empty text is an empty codebook.
pub fn parse(text: &str) -> CodebookResult<CodeTree> {
    let mut tree = CodeTree::new();
    if text.trim().is_empty() {
        return Ok(tree);
    }
    let value: Value = serde_yaml::from_str(text)?;
    match value {
        Value::Null => {}
        Value::Sequence(items) => {
            let root = tree.root();
            for item in items {
                parse_node(&mut tree, root, item)?;
            }
        }
        other => {
            return Err(CodebookError::Parse(format!(
                "expected a sequence of codes at top level, found {}",
                describe(&other)
            )))
        }
    }
    Ok(tree)
}

/// Serializes the tree in canonical form (`[]` for an empty codebook).
pub fn serialize(tree: &CodeTree) -> CodebookResult<String> {
    let items: Vec<Value> = tree
        .sorted_children(tree.root())
        .into_iter()
        .map(|child| node_value(tree, child))
        .collect();
    Ok(serde_yaml::to_string(&Value::Sequence(items))?)
}

/// Reads and parses the codebook file at `path`.
pub fn read_codebook(path: &Path) -> CodebookResult<CodeTree> {
    let text = std::fs::read_to_string(path).map_err(|source| CodebookError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

/// Serializes `tree` and writes it to `path`.
pub fn write_codebook(path: &Path, tree: &CodeTree) -> CodebookResult<()> {
    let text = serialize(tree)?;
    std::fs::write(path, text).map_err(|source| CodebookError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "event=codebook_write module=codebook status=ok path={}",
        path.display()
    );
    Ok(())
}

fn parse_node(tree: &mut CodeTree, parent: NodeId, value: Value) -> CodebookResult<()> {
    match value {
        Value::String(name) => {
            tree.add_child(parent, name);
            Ok(())
        }
        Value::Number(number) => {
            tree.add_child(parent, number.to_string());
            Ok(())
        }
        Value::Mapping(mapping) => {
            if mapping.len() != 1 {
                return Err(CodebookError::Parse(format!(
                    "a code with children must be a single-key mapping, found {} keys",
                    mapping.len()
                )));
            }
            let Some((key, children)) = mapping.into_iter().next() else {
                return Err(CodebookError::Parse("empty mapping".to_string()));
            };
            let name = match key {
                Value::String(name) => name,
                Value::Number(number) => number.to_string(),
                other => {
                    return Err(CodebookError::Parse(format!(
                        "code names must be strings, found {}",
                        describe(&other)
                    )))
                }
            };
            let id = tree.add_child(parent, name);
            match children {
                Value::Null => Ok(()),
                Value::Sequence(items) => {
                    for item in items {
                        parse_node(tree, id, item)?;
                    }
                    Ok(())
                }
                other => Err(CodebookError::Parse(format!(
                    "children of `{}` must be a sequence, found {}",
                    tree.name(id),
                    describe(&other)
                ))),
            }
        }
        other => Err(CodebookError::Parse(format!(
            "expected a code name or a single-key mapping, found {}",
            describe(&other)
        ))),
    }
}

fn node_value(tree: &CodeTree, id: NodeId) -> Value {
    let name = name_value(tree.name(id));
    let children = tree.sorted_children(id);
    if children.is_empty() {
        return name;
    }
    let items = children
        .into_iter()
        .map(|child| node_value(tree, child))
        .collect();
    let mut mapping = Mapping::new();
    mapping.insert(name, Value::Sequence(items));
    Value::Mapping(mapping)
}

/// Integer-looking names are emitted as numbers so they stay unquoted.
fn name_value(name: &str) -> Value {
    match name.parse::<i64>() {
        Ok(number) if number.to_string() == name => Value::Number(number.into()),
        _ => Value::String(name.to_string()),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
