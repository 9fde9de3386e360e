//! Small accessors over KDL nodes.
//!
//! Scalar settings are written as child nodes with a single argument,
//! e.g. `request-timeout-secs 30` inside a `ca { ... }` block.

use anyhow::Result;
use kdl::{KdlNode, KdlValue};

/// First positional (unnamed) argument of a node
pub fn get_first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// First positional argument of a node as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    get_first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Child node with the given name
pub fn get_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children().and_then(|children| children.get(name))
}

/// String argument of a named child node
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    get_child(node, name).and_then(get_first_arg_string)
}

/// Integer argument of a named child node
///
/// A child that is present but carries no integer, or one outside the
/// `i64` range, is an error naming the setting.
pub fn get_int_entry(node: &KdlNode, name: &str) -> Result<Option<i64>> {
    let Some(child) = get_child(node, name) else {
        return Ok(None);
    };

    let value = get_first_arg(child).ok_or_else(|| {
        anyhow::anyhow!(
            "'{}' in '{}' block requires an integer argument",
            name,
            node.name().value()
        )
    })?;

    let int = value.as_integer().ok_or_else(|| {
        anyhow::anyhow!(
            "'{}' in '{}' block must be an integer, got {}",
            name,
            node.name().value(),
            value
        )
    })?;

    i64::try_from(int).map(Some).map_err(|_| {
        anyhow::anyhow!(
            "'{}' in '{}' block is out of range: {}",
            name,
            node.name().value(),
            int
        )
    })
}
