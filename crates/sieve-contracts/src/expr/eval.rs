use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::scene::SceneGraph;

use super::ast::{Expr, ITEM_BINDING};
use super::attributes::read_attribute;
use super::value::Value;

pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    UnknownIdentifier,
    AttributeNotWhitelisted,
    TypeMismatch,
    IndexOutOfRange,
    DepthExceeded,
}

impl EvalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalErrorKind::UnknownIdentifier => "unknown_identifier",
            EvalErrorKind::AttributeNotWhitelisted => "attribute_not_whitelisted",
            EvalErrorKind::TypeMismatch => "type_mismatch",
            EvalErrorKind::IndexOutOfRange => "index_out_of_range",
            EvalErrorKind::DepthExceeded => "depth_exceeded",
        }
    }
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {detail}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub detail: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn mismatch(what: &str, value: &Value) -> Self {
        Self::new(
            EvalErrorKind::TypeMismatch,
            format!("{what}, got {}", value.type_name()),
        )
    }
}

/// Step bindings for one document run.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    bindings: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Read-only tree walker over a scene and an environment.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    scene: &'a SceneGraph,
    env: &'a Environment,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(scene: &'a SceneGraph, env: &'a Environment) -> Self {
        Self {
            scene,
            env,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.walk(expr, 1, None)
    }

    fn walk(&self, expr: &Expr, depth: usize, item: Option<&Value>) -> Result<Value, EvalError> {
        if depth > self.max_depth {
            return Err(EvalError::new(
                EvalErrorKind::DepthExceeded,
                format!("expression nests deeper than {} levels", self.max_depth),
            ));
        }
        let next = depth + 1;
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(flag) => Ok(Value::Bool(*flag)),
            Expr::Number(number) => Ok(Value::Number(*number)),
            Expr::String(text) => Ok(Value::String(text.clone())),
            Expr::List(items) => items
                .iter()
                .map(|item_expr| self.walk(item_expr, next, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Var(name) => self.lookup(name, item),
            Expr::Node(id) => self.scene.resolve(id.as_str()).map(Value::Node).ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::UnknownIdentifier,
                    format!("no scene node '{id}'"),
                )
            }),
            Expr::Attr(target, name) => {
                let target = self.walk(target, next, item)?;
                match &target {
                    Value::Node(node) => read_attribute(self.scene, node, name),
                    other => Err(EvalError::new(
                        EvalErrorKind::AttributeNotWhitelisted,
                        format!("{} values expose no attribute '{name}'", other.type_name()),
                    )),
                }
            }
            Expr::Index(seq, index) => {
                let seq = self.walk(seq, next, item)?;
                let index = self.walk(index, next, item)?;
                let items = match seq {
                    Value::List(items) => items,
                    other => return Err(EvalError::mismatch("index expects a list", &other)),
                };
                let Some(position) = index.as_index() else {
                    return Err(EvalError::mismatch(
                        "index expects a non-negative integer",
                        &index,
                    ));
                };
                let len = items.len();
                items.into_iter().nth(position).ok_or_else(|| {
                    EvalError::new(
                        EvalErrorKind::IndexOutOfRange,
                        format!("index {position} out of range for list of {len}"),
                    )
                })
            }
            Expr::Map(seq, body) => {
                let items = self.sequence("map", seq, next, item)?;
                items
                    .iter()
                    .map(|element| self.walk(body, next, Some(element)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            Expr::Filter(seq, predicate) => {
                let items = self.sequence("filter", seq, next, item)?;
                let mut kept = Vec::new();
                for element in items {
                    match self.walk(predicate, next, Some(&element))? {
                        Value::Bool(true) => kept.push(element),
                        Value::Bool(false) => {}
                        other => {
                            return Err(EvalError::mismatch(
                                "filter predicate must yield a boolean",
                                &other,
                            ))
                        }
                    }
                }
                Ok(Value::List(kept))
            }
            Expr::Len(inner) => match self.walk(inner, next, item)? {
                Value::List(items) => Ok(Value::Number(items.len() as f64)),
                Value::String(text) => Ok(Value::Number(text.chars().count() as f64)),
                other => Err(EvalError::mismatch("len expects a list or string", &other)),
            },
            Expr::Sum(inner) => {
                let mut total = 0.0;
                for element in self.sequence("sum", inner, next, item)? {
                    match element {
                        Value::Number(number) => total += number,
                        other => return Err(EvalError::mismatch("sum expects numbers", &other)),
                    }
                }
                Ok(Value::Number(total))
            }
        }
    }

    fn lookup(&self, name: &str, item: Option<&Value>) -> Result<Value, EvalError> {
        if name == ITEM_BINDING {
            if let Some(item) = item {
                return Ok(item.clone());
            }
        }
        self.env.get(name).cloned().ok_or_else(|| {
            EvalError::new(
                EvalErrorKind::UnknownIdentifier,
                format!("no binding named '{name}'"),
            )
        })
    }

    fn sequence(
        &self,
        form: &str,
        expr: &Expr,
        depth: usize,
        item: Option<&Value>,
    ) -> Result<Vec<Value>, EvalError> {
        match self.walk(expr, depth, item)? {
            Value::List(items) => Ok(items),
            other => Err(EvalError::mismatch(&format!("{form} expects a list"), &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::expr::attribute_names;
    use crate::scene::{Axis, NodeKind, Rect};

    fn scene() -> SceneGraph {
        let mut scene = SceneGraph::new();
        let root = scene.add_root_frame(Rect::new(0.0, 0.0, 200.0, 100.0)).unwrap();
        scene.split_frame(&root, Axis::X, 0.5).unwrap();
        scene
            .add_interactable(&"f1".into(), Rect::new(0.0, 0.0, 10.0, 10.0))
            .unwrap();
        scene.add_keypoint(&"f2".into(), 150.0, 50.0).unwrap();
        scene
    }

    fn eval_json(scene: &SceneGraph, env: &Environment, json: serde_json::Value) -> Result<Value, EvalError> {
        let expr = Expr::compile(&json).map_err(|errors| {
            EvalError::new(EvalErrorKind::TypeMismatch, format!("{errors:?}"))
        })?;
        Evaluator::new(scene, env).eval(&expr)
    }

    #[test]
    fn map_filter_len_and_sum_over_scene_nodes() {
        let scene = scene();
        let mut env = Environment::new();
        env.bind("root", scene.resolve("f0").map(Value::Node).unwrap());

        let widths = eval_json(
            &scene,
            &env,
            json!({"sum": {"map": [{"var": "root.children"}, {"attr": [{"var": "item"}, "width"]}]}}),
        )
        .unwrap();
        assert_eq!(widths, Value::Number(200.0));

        let with_items = eval_json(
            &scene,
            &env,
            json!({"len": {"filter": [
                {"var": "root.children"},
                {"index": [[false, true], {"len": {"var": "item.keypoints"}}]}
            ]}}),
        )
        .unwrap();
        assert_eq!(with_items, Value::Number(1.0));

        let first_child = eval_json(&scene, &env, json!({"var": "root.children.0.id"})).unwrap();
        assert_eq!(first_child, Value::String("f1".to_string()));
    }

    #[test]
    fn unresolved_identifiers_fail() {
        let scene = scene();
        let env = Environment::new();
        for json in [json!({"var": "missing"}), json!({"node": "f99"}), json!({"var": "item"})] {
            let err = eval_json(&scene, &env, json).unwrap_err();
            assert_eq!(err.kind, EvalErrorKind::UnknownIdentifier);
        }
    }

    #[test]
    fn attributes_outside_whitelist_never_succeed() {
        let scene = scene();
        let env = Environment::new();
        let nodes = [("f0", NodeKind::Frame), ("i0", NodeKind::Interactable), ("k0", NodeKind::Keypoint)];
        for (id, kind) in nodes {
            for name in ["__class__", "bounds", "counter", "next_frame", "frames", "selected_by"] {
                if attribute_names(kind).contains(&name) {
                    continue;
                }
                let err = eval_json(&scene, &env, json!({"attr": [{"node": id}, name]})).unwrap_err();
                assert_eq!(err.kind, EvalErrorKind::AttributeNotWhitelisted, "{id}.{name}");
            }
        }
        let err = eval_json(&scene, &env, json!({"attr": ["text", "upper"]})).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::AttributeNotWhitelisted);
    }

    #[test]
    fn deep_nesting_fails_with_depth_exceeded() {
        let scene = scene();
        let env = Environment::new();
        let mut json = json!([]);
        for _ in 0..200 {
            json = json!({"len": json});
        }
        let err = eval_json(&scene, &env, json).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DepthExceeded);

        let mut shallow = json!([1]);
        for _ in 0..(DEFAULT_MAX_DEPTH - 2) {
            shallow = json!([shallow]);
        }
        assert!(eval_json(&scene, &env, shallow).is_ok());
    }

    #[test]
    fn type_and_range_errors() {
        let scene = scene();
        let env = Environment::new();
        let cases = [
            (json!({"index": [[1, 2], 5]}), EvalErrorKind::IndexOutOfRange),
            (json!({"index": [[1, 2], 0.5]}), EvalErrorKind::TypeMismatch),
            (json!({"sum": [1, "two"]}), EvalErrorKind::TypeMismatch),
            (json!({"filter": [[1, 2], 1]}), EvalErrorKind::TypeMismatch),
            (json!({"map": [{"node": "f0"}, 1]}), EvalErrorKind::TypeMismatch),
            (json!({"len": 3}), EvalErrorKind::TypeMismatch),
        ];
        for (json, kind) in cases {
            let err = eval_json(&scene, &env, json.clone()).unwrap_err();
            assert_eq!(err.kind, kind, "{json}");
        }
    }
}
