use serde_json::Value as Json;

use crate::scene::NodeId;

/// Binding visible inside `map`/`filter` sub-expressions.
pub const ITEM_BINDING: &str = "item";

pub const FORMS: &[&str] = &["var", "node", "attr", "index", "map", "filter", "len", "sum"];

/// Compiled syntax is refused past this nesting, well above the evaluator
/// limit, so compilation itself stays bounded on hand-built input.
const MAX_SYNTAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Expr>),
    Var(String),
    Node(NodeId),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Map(Box<Expr>, Box<Expr>),
    Filter(Box<Expr>, Box<Expr>),
    Len(Box<Expr>),
    Sum(Box<Expr>),
}

/// A syntax problem at `path`, relative to the expression root
/// (empty for the root itself, otherwise `.map[1]`, `[0]` and so on).
#[derive(Debug, Clone, PartialEq)]
pub struct ExprSyntaxError {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

pub fn is_identifier(raw: &str) -> bool {
    let mut chars = raw.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

impl Expr {
    /// Compiles a JSON expression, collecting every syntax error.
    pub fn compile(json: &Json) -> Result<Expr, Vec<ExprSyntaxError>> {
        let mut errors = Vec::new();
        let expr = compile_at(json, String::new(), 0, &mut errors);
        match expr {
            Some(expr) if errors.is_empty() => Ok(expr),
            _ => Err(errors),
        }
    }

    /// Nesting depth of the compiled tree; leaves count as 1.
    pub fn depth(&self) -> usize {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => 1,
            Expr::Var(_) | Expr::Node(_) => 1,
            Expr::List(items) => 1 + items.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Attr(inner, _) | Expr::Len(inner) | Expr::Sum(inner) => 1 + inner.depth(),
            Expr::Index(left, right) | Expr::Map(left, right) | Expr::Filter(left, right) => {
                1 + left.depth().max(right.depth())
            }
        }
    }
}

fn describe(json: &Json) -> String {
    match json {
        Json::Null => "null".to_string(),
        Json::Bool(_) => "boolean".to_string(),
        Json::Number(_) => "number".to_string(),
        Json::String(_) => "string".to_string(),
        Json::Array(items) => format!("array of {}", items.len()),
        Json::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
    }
}

fn push(errors: &mut Vec<ExprSyntaxError>, path: &str, expected: impl Into<String>, actual: String) {
    errors.push(ExprSyntaxError {
        path: path.to_string(),
        expected: expected.into(),
        actual,
    });
}

fn compile_at(
    json: &Json,
    path: String,
    depth: usize,
    errors: &mut Vec<ExprSyntaxError>,
) -> Option<Expr> {
    if depth >= MAX_SYNTAX_DEPTH {
        push(
            errors,
            &path,
            format!("expression nested at most {MAX_SYNTAX_DEPTH} levels"),
            "deeper nesting".to_string(),
        );
        return None;
    }
    match json {
        Json::Null => Some(Expr::Null),
        Json::Bool(flag) => Some(Expr::Bool(*flag)),
        Json::Number(number) => match number.as_f64() {
            Some(value) if value.is_finite() => Some(Expr::Number(value)),
            _ => {
                push(errors, &path, "finite number", number.to_string());
                None
            }
        },
        Json::String(text) => Some(Expr::String(text.clone())),
        Json::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                if let Some(expr) = compile_at(item, format!("{path}[{idx}]"), depth + 1, errors) {
                    out.push(expr);
                }
            }
            (out.len() == items.len()).then_some(Expr::List(out))
        }
        Json::Object(map) => {
            let mut entries = map.iter();
            let (Some((form, body)), None) = (entries.next(), entries.next()) else {
                push(
                    errors,
                    &path,
                    format!("object with exactly one key from [{}]", FORMS.join(", ")),
                    describe(json),
                );
                return None;
            };
            compile_form(form, body, format!("{path}.{form}"), depth, errors)
        }
    }
}

fn compile_form(
    form: &str,
    body: &Json,
    path: String,
    depth: usize,
    errors: &mut Vec<ExprSyntaxError>,
) -> Option<Expr> {
    match form {
        "var" => compile_var(body, &path, errors),
        "node" => match body.as_str() {
            Some(id) if !id.is_empty() => Some(Expr::Node(NodeId::from(id))),
            _ => {
                push(errors, &path, "node id string", describe(body));
                None
            }
        },
        "attr" => {
            let [target, name] = pair(body, &path, "[expression, attribute name]", errors)?;
            let Some(name) = name.as_str().filter(|name| is_identifier(name)) else {
                push(errors, &format!("{path}[1]"), "attribute name", describe(name));
                return None;
            };
            let target = compile_at(target, format!("{path}[0]"), depth + 1, errors)?;
            Some(Expr::Attr(Box::new(target), name.to_string()))
        }
        "index" | "map" | "filter" => {
            let [left, right] = pair(body, &path, "[expression, expression]", errors)?;
            let left = compile_at(left, format!("{path}[0]"), depth + 1, errors);
            let right = compile_at(right, format!("{path}[1]"), depth + 1, errors);
            let (left, right) = (Box::new(left?), Box::new(right?));
            Some(match form {
                "index" => Expr::Index(left, right),
                "map" => Expr::Map(left, right),
                _ => Expr::Filter(left, right),
            })
        }
        "len" | "sum" => {
            let inner = Box::new(compile_at(body, path, depth + 1, errors)?);
            Some(if form == "len" {
                Expr::Len(inner)
            } else {
                Expr::Sum(inner)
            })
        }
        _ => {
            let parent = path.rsplit_once('.').map(|(head, _)| head).unwrap_or("");
            push(
                errors,
                parent,
                format!("one of [{}]", FORMS.join(", ")),
                format!("unknown form '{form}'"),
            );
            None
        }
    }
}

fn pair<'a>(
    body: &'a Json,
    path: &str,
    expected: &str,
    errors: &mut Vec<ExprSyntaxError>,
) -> Option<[&'a Json; 2]> {
    match body.as_array().map(Vec::as_slice) {
        Some([first, second]) => Some([first, second]),
        _ => {
            push(errors, path, expected, describe(body));
            None
        }
    }
}

/// `{"var": "name"}` or dotted `{"var": "name.attr.0"}`; numeric segments index.
fn compile_var(body: &Json, path: &str, errors: &mut Vec<ExprSyntaxError>) -> Option<Expr> {
    let Some(raw) = body.as_str() else {
        push(errors, path, "binding name string", describe(body));
        return None;
    };
    let mut segments = raw.split('.');
    let head = segments.next().unwrap_or_default();
    if !is_identifier(head) {
        push(errors, path, "binding name", format!("'{raw}'"));
        return None;
    }
    let mut expr = Expr::Var(head.to_string());
    for segment in segments {
        expr = if is_identifier(segment) {
            Expr::Attr(Box::new(expr), segment.to_string())
        } else if let Ok(index) = segment.parse::<u32>() {
            Expr::Index(Box::new(expr), Box::new(Expr::Number(f64::from(index))))
        } else {
            push(errors, path, "dotted attribute path", format!("'{raw}'"));
            return None;
        };
    }
    Some(expr)
}
