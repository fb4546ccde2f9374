//! Minimal HCL writer producing `terraform fmt`-style text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("Invalid identifier regex"));

const INDENT: &str = "  ";

/// Quote a string literal, escaping template sequences so values are never
/// interpolated
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a JSON value as an HCL expression at the given nesting depth
pub fn render_value(value: &Value, depth: usize) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(|v| render_value(v, depth)).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) if map.is_empty() => "{}".to_string(),
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().map(|k| map_key(k)).collect();
            let width = keys.iter().map(String::len).max().unwrap_or(0);
            let inner = INDENT.repeat(depth + 1);
            let mut out = String::from("{\n");
            for (key, value) in keys.iter().zip(map.values()) {
                out.push_str(&format!(
                    "{}{:<width$} = {}\n",
                    inner,
                    key,
                    render_value(value, depth + 1),
                    width = width
                ));
            }
            out.push_str(&INDENT.repeat(depth));
            out.push('}');
            out
        }
    }
}

fn map_key(key: &str) -> String {
    if IDENTIFIER_REGEX.is_match(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Attribute { name: String, expression: Expression },
    Blank,
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
enum Expression {
    Raw(String),
    Value(Value),
}

/// A block such as `module "x" { ... }` or `replication { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    header: String,
    items: Vec<Item>,
}

impl Block {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            items: Vec::new(),
        }
    }

    /// `name = <raw expression>`, e.g. a variable reference
    pub fn raw(mut self, name: &str, expression: impl Into<String>) -> Self {
        self.items.push(Item::Attribute {
            name: name.to_string(),
            expression: Expression::Raw(expression.into()),
        });
        self
    }

    /// `name = <literal>`
    pub fn value(mut self, name: &str, value: &Value) -> Self {
        self.items.push(Item::Attribute {
            name: name.to_string(),
            expression: Expression::Value(value.clone()),
        });
        self
    }

    pub fn blank(mut self) -> Self {
        if !self.items.is_empty() && self.items.last() != Some(&Item::Blank) {
            self.items.push(Item::Blank);
        }
        self
    }

    pub fn block(mut self, block: Block) -> Self {
        self.items.push(Item::Block(block));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let pad = INDENT.repeat(depth);
        let items: &[Item] = match self.items.last() {
            Some(Item::Blank) => &self.items[..self.items.len() - 1],
            _ => &self.items,
        };

        if items.is_empty() {
            out.push_str(&format!("{}{} {{}}\n", pad, self.header));
            return;
        }

        out.push_str(&format!("{}{} {{\n", pad, self.header));
        let inner = INDENT.repeat(depth + 1);
        let mut index = 0;
        while index < items.len() {
            match &items[index] {
                Item::Attribute { .. } => {
                    // Align `=` across a run of consecutive attributes
                    let run_end = items[index..]
                        .iter()
                        .position(|item| !matches!(item, Item::Attribute { .. }))
                        .map(|offset| index + offset)
                        .unwrap_or(items.len());
                    let width = items[index..run_end]
                        .iter()
                        .filter_map(|item| match item {
                            Item::Attribute { name, .. } => Some(name.len()),
                            _ => None,
                        })
                        .max()
                        .unwrap_or(0);
                    for item in &items[index..run_end] {
                        if let Item::Attribute { name, expression } = item {
                            let rendered = match expression {
                                Expression::Raw(raw) => raw.clone(),
                                Expression::Value(value) => render_value(value, depth + 1),
                            };
                            out.push_str(&format!(
                                "{}{:<width$} = {}\n",
                                inner,
                                name,
                                rendered,
                                width = width
                            ));
                        }
                    }
                    index = run_end;
                }
                Item::Blank => {
                    out.push('\n');
                    index += 1;
                }
                Item::Block(block) => {
                    block.render_into(out, depth + 1);
                    index += 1;
                }
            }
        }
        out.push_str(&format!("{}}}\n", pad));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_escapes_templates() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(quote("${var.x}"), "\"$${var.x}\"");
        assert_eq!(quote("%{ if }"), "\"%%{ if }\"");
        assert_eq!(quote("cost $5"), "\"cost $5\"");
    }

    #[test]
    fn test_render_values() {
        assert_eq!(render_value(&json!(8080), 0), "8080");
        assert_eq!(render_value(&json!(false), 0), "false");
        assert_eq!(render_value(&json!(["a", "b"]), 0), "[\"a\", \"b\"]");
        assert_eq!(
            render_value(&json!({"team": "core", "cost-center": "x"}), 1),
            "{\n    cost-center = \"x\"\n    team        = \"core\"\n  }"
        );
        assert_eq!(
            render_value(&json!({"app.kubernetes.io/name": "x"}), 0),
            "{\n  \"app.kubernetes.io/name\" = \"x\"\n}"
        );
    }

    #[test]
    fn test_block_alignment() {
        let text = Block::new("resource \"google_project_service\" \"pubsub\"")
            .raw("project", "var.project_id")
            .value("service", &json!("pubsub.googleapis.com"))
            .blank()
            .raw("disable_on_destroy", "false")
            .render();
        assert_eq!(
            text,
            "resource \"google_project_service\" \"pubsub\" {\n  project = var.project_id\n  service = \"pubsub.googleapis.com\"\n\n  disable_on_destroy = false\n}\n"
        );
    }

    #[test]
    fn test_nested_and_empty_blocks() {
        let text = Block::new("replication")
            .block(Block::new("auto"))
            .render();
        assert_eq!(text, "replication {\n  auto {}\n}\n");
    }
}
