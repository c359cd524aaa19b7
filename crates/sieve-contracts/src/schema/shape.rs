use serde_json::Value;
use thiserror::Error;

use crate::expr::{is_identifier, Expr, ITEM_BINDING};

const PREVIEW_CHARS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Any,
    Bool,
    Integer,
    Number,
    String,
    /// Binding name: identifier that is not reserved by the grammar.
    Binding,
    /// `tool` or `target.method`.
    Call,
    Enum(&'static [&'static str]),
    Nullable(Box<Shape>),
    Array(Box<Shape>),
    /// Free-form object; contents are checked elsewhere.
    Record,
    Object(Vec<Field>),
    Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub shape: Shape,
}

impl Field {
    pub fn required(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: true,
            shape,
        }
    }

    pub fn optional(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: false,
            shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("document rejected with {} violation(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub name: &'static str,
    pub root: Shape,
}

impl Shape {
    pub fn describe(&self) -> String {
        match self {
            Shape::Any => "any value".to_string(),
            Shape::Bool => "boolean".to_string(),
            Shape::Integer => "integer".to_string(),
            Shape::Number => "number".to_string(),
            Shape::String => "string".to_string(),
            Shape::Binding => format!("identifier other than '{ITEM_BINDING}'"),
            Shape::Call => "tool name or '<node>.<method>'".to_string(),
            Shape::Enum(allowed) => format!("one of [{}]", allowed.join(", ")),
            Shape::Nullable(inner) => format!("{} or null", inner.describe()),
            Shape::Array(inner) => format!("array of {}", inner.describe()),
            Shape::Record => "object".to_string(),
            Shape::Object(fields) => {
                let names: Vec<&str> = fields.iter().map(|field| field.name).collect();
                format!("object with fields [{}]", names.join(", "))
            }
            Shape::Expression => "expression".to_string(),
        }
    }
}

impl SchemaSpec {
    pub fn validate(&self, document: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        check(&self.root, document, "$", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    /// Flattened `(path, constraint)` listing used in prompts and the CLI.
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        flatten(&self.root, "$".to_string(), true, &mut out);
        out
    }
}

fn flatten(shape: &Shape, path: String, required: bool, out: &mut Vec<(String, String)>) {
    let presence = if required { "required" } else { "optional" };
    match shape {
        Shape::Object(fields) => {
            for field in fields {
                flatten(
                    &field.shape,
                    format!("{path}.{}", field.name),
                    field.required,
                    out,
                );
            }
        }
        Shape::Array(inner) if matches!(**inner, Shape::Object(_)) => {
            out.push((path.clone(), format!("array ({presence})")));
            flatten(inner, format!("{path}[]"), true, out);
        }
        other => out.push((path, format!("{} ({presence})", other.describe()))),
    }
}

fn check(shape: &Shape, value: &Value, path: &str, out: &mut Vec<FieldViolation>) {
    match shape {
        Shape::Any => {}
        Shape::Bool if value.is_boolean() => {}
        Shape::Integer if is_integer(value) => {}
        Shape::Number if value.is_number() => {}
        Shape::String if value.is_string() => {}
        Shape::Binding => match value.as_str() {
            Some(name) if is_identifier(name) && name != ITEM_BINDING => {}
            _ => mismatch(shape, value, path, out),
        },
        Shape::Call => match value.as_str() {
            Some(call) if is_call(call) => {}
            _ => mismatch(shape, value, path, out),
        },
        Shape::Enum(allowed) => match value.as_str() {
            Some(text) if allowed.contains(&text) => {}
            _ => mismatch(shape, value, path, out),
        },
        Shape::Nullable(inner) => {
            if !value.is_null() {
                check(inner, value, path, out);
            }
        }
        Shape::Array(inner) => match value.as_array() {
            Some(items) => {
                for (idx, item) in items.iter().enumerate() {
                    check(inner, item, &format!("{path}[{idx}]"), out);
                }
            }
            None => mismatch(shape, value, path, out),
        },
        Shape::Record if value.is_object() => {}
        Shape::Object(fields) => match value.as_object() {
            Some(map) => {
                for field in fields {
                    let field_path = format!("{path}.{}", field.name);
                    match map.get(field.name) {
                        Some(inner) => check(&field.shape, inner, &field_path, out),
                        None if field.required => out.push(FieldViolation {
                            path: field_path,
                            expected: field.shape.describe(),
                            actual: "missing".to_string(),
                        }),
                        None => {}
                    }
                }
                for key in map.keys() {
                    if !fields.iter().any(|field| field.name == key) {
                        out.push(FieldViolation {
                            path: format!("{path}.{key}"),
                            expected: "no additional fields".to_string(),
                            actual: "unexpected field".to_string(),
                        });
                    }
                }
            }
            None => mismatch(shape, value, path, out),
        },
        Shape::Expression => {
            if let Err(errors) = Expr::compile(value) {
                for error in errors {
                    out.push(FieldViolation {
                        path: format!("{path}{}", error.path),
                        expected: error.expected,
                        actual: error.actual,
                    });
                }
            }
        }
        _ => mismatch(shape, value, path, out),
    }
}

fn mismatch(shape: &Shape, value: &Value, path: &str, out: &mut Vec<FieldViolation>) {
    out.push(FieldViolation {
        path: path.to_string(),
        expected: shape.describe(),
        actual: actual_of(value),
    });
}

fn is_integer(value: &Value) -> bool {
    value.is_i64()
        || value.is_u64()
        || value
            .as_f64()
            .is_some_and(|number| number.fract() == 0.0 && number.is_finite())
}

fn is_call(raw: &str) -> bool {
    match raw.split_once('.') {
        Some((target, method)) => is_identifier(target) && is_identifier(method),
        None => is_identifier(raw),
    }
}

/// Short description of what was found, for feedback.
fn actual_of(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => format!("boolean {flag}"),
        Value::Number(number) => format!("number {number}"),
        Value::String(text) => {
            let preview: String = text.chars().take(PREVIEW_CHARS).collect();
            if preview.len() < text.len() {
                format!("string \"{preview}...\"")
            } else {
                format!("string \"{preview}\"")
            }
        }
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Object(_) => "object".to_string(),
    }
}
