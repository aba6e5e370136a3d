use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::ast::{Node, NodeKind, Program};
use crate::parser::parse_source;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintOutcome {
    /// The file already matched the canonical formatting.
    Clean,
    /// The file was rewritten in place.
    Rewritten,
}

/// Parse `path` and rewrite it in the canonical formatting when the text
/// differs.
pub fn lint_file(path: &Path) -> Result<LintOutcome> {
    let source =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let program = parse_source(&source)?;
    let formatted = format_program(&program);

    if formatted == source {
        return Ok(LintOutcome::Clean);
    }
    fs::write(path, &formatted).with_context(|| format!("writing {}", path.display()))?;
    Ok(LintOutcome::Rewritten)
}

/// Canonical source form: one statement per line, tab indentation, blank
/// line between top-level statements.
pub fn format_program(program: &Program) -> String {
    let mut formatted = program
        .statements
        .iter()
        .map(|node| format_node(node, 0))
        .collect::<Vec<_>>()
        .join("\n\n");
    formatted.push('\n');
    formatted
}

fn format_node(node: &Node, indent: usize) -> String {
    match &node.kind {
        NodeKind::Int(value) => value.to_string(),
        NodeKind::Float(value) => Value::Float(*value).to_string(),
        NodeKind::Str(value) => format!("\"{value}\""),
        NodeKind::Bool(value) => value.to_string(),
        NodeKind::Nil => "nil".to_string(),
        NodeKind::Ident(name) => name.clone(),
        NodeKind::Array(elements) => {
            let elements = elements
                .iter()
                .map(|element| format_node(element, indent))
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{elements}]")
        }
        NodeKind::Infix { op, left, right } => format!(
            "{} {op} {}",
            format_node(left, indent),
            format_node(right, indent)
        ),
        NodeKind::Assign { name, value } => {
            format!("{name} = {}", format_node(value, indent))
        }
        NodeKind::Increment(name) => format!("{name}++"),
        NodeKind::Decrement(name) => format!("{name}--"),
        NodeKind::Call { name, args } => {
            let args = args
                .iter()
                .map(|arg| format_node(arg, indent))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name}({args})")
        }
        NodeKind::Function { name, params, body } => {
            let params = params.join(", ");
            format!(
                "func {name}({params}) {{\n{}\n{}}}",
                format_body(body, indent + 1),
                pad(indent)
            )
        }
        NodeKind::If {
            condition,
            consequence,
            alternative,
        } => {
            let mut formatted = format!(
                "if {} {{\n{}\n{}}}",
                format_node(condition, indent),
                format_block(consequence, indent + 1),
                pad(indent)
            );
            if let Some(alternative) = alternative {
                formatted.push_str(&format!(
                    " else {{\n{}\n{}}}",
                    format_block(alternative, indent + 1),
                    pad(indent)
                ));
            }
            formatted
        }
        NodeKind::For {
            init,
            condition,
            update,
            body,
        } => {
            let header = match (init, condition, update) {
                (Some(init), Some(condition), Some(update)) => format!(
                    "{}; {}; {} ",
                    format_node(init, indent),
                    format_node(condition, indent),
                    format_node(update, indent)
                ),
                (None, Some(condition), None) => format!("{} ", format_node(condition, indent)),
                _ => String::new(),
            };
            format!(
                "for {header}{{\n{}\n{}}}",
                format_block(body, indent + 1),
                pad(indent)
            )
        }
        NodeKind::Return(value) => match value {
            Some(value) => format!("return {}", format_node(value, indent)),
            None => "return".to_string(),
        },
    }
}

fn format_block(nodes: &[Node], indent: usize) -> String {
    nodes
        .iter()
        .map(|node| format!("{}{}", pad(indent), format_node(node, indent)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A function body, minus the `return nil` the parser synthesizes; that
/// return is not part of the written source.
fn format_body(nodes: &[Node], indent: usize) -> String {
    let visible = match nodes.last() {
        Some(Node {
            kind: NodeKind::Return(Some(value)),
            ..
        }) if value.kind == NodeKind::Nil => &nodes[..nodes.len() - 1],
        _ => nodes,
    };
    format_block(visible, indent)
}

fn pad(indent: usize) -> String {
    "\t".repeat(indent)
}
