use std::collections::BTreeMap;

use sieve_contracts::expr::Value;
use sieve_contracts::scene::{Interaction, NodeKind, NodeRef, SceneGraph};

use crate::executor::StepFailure;

/// A named, fixed-arity operation callable from a step.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn signature(&self) -> &str;
    fn invoke(&self, scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure>;
}

/// Names every step may call. The set is closed: the only way to build a
/// registry is [`ToolRegistry::with_builtins`].
pub const BUILTIN_TOOLS: &[&str] = &["bind", "click", "drag", "enter", "point"];

pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
        };
        registry.register(ClickTool);
        registry.register(DragTool);
        registry.register(EnterTool);
        registry.register(PointTool);
        registry.register(BindTool);
        registry
    }

    fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn signatures(&self) -> Vec<String> {
        self.tools
            .values()
            .map(|tool| tool.signature().to_string())
            .collect()
    }
}

/// Positional arguments of one call, with typed accessors.
pub(crate) struct CallArgs<'a> {
    call: &'a str,
    values: &'a [Value],
}

impl<'a> CallArgs<'a> {
    pub(crate) fn new(call: &'a str, values: &'a [Value], arity: usize) -> Result<Self, StepFailure> {
        if values.len() != arity {
            return Err(StepFailure::Arity {
                call: call.to_string(),
                expected: arity,
                found: values.len(),
            });
        }
        Ok(Self { call, values })
    }

    fn mismatch(&self, position: usize, expected: &str) -> StepFailure {
        StepFailure::ArgumentType {
            call: self.call.to_string(),
            position: position + 1,
            expected: expected.to_string(),
            found: self
                .values
                .get(position)
                .map(Value::type_name)
                .unwrap_or("nothing")
                .to_string(),
        }
    }

    pub(crate) fn value(&self, position: usize) -> Result<&'a Value, StepFailure> {
        self.values
            .get(position)
            .ok_or_else(|| self.mismatch(position, "a value"))
    }

    pub(crate) fn node(&self, position: usize, kinds: &[NodeKind]) -> Result<&'a NodeRef, StepFailure> {
        match self.values.get(position) {
            Some(Value::Node(node)) if kinds.contains(&node.kind) => Ok(node),
            _ => {
                let names: Vec<&str> = kinds.iter().map(NodeKind::as_str).collect();
                Err(self.mismatch(position, &names.join(" or ")))
            }
        }
    }

    pub(crate) fn text(&self, position: usize) -> Result<&'a str, StepFailure> {
        self.values
            .get(position)
            .and_then(Value::as_str)
            .ok_or_else(|| self.mismatch(position, "string"))
    }

    pub(crate) fn number(&self, position: usize) -> Result<f64, StepFailure> {
        self.values
            .get(position)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.mismatch(position, "number"))
    }

    pub(crate) fn count(&self, position: usize) -> Result<usize, StepFailure> {
        self.values
            .get(position)
            .and_then(Value::as_index)
            .ok_or_else(|| self.mismatch(position, "non-negative integer"))
    }

    pub(crate) fn parsed<T>(&self, position: usize, names: &[&str], parse: fn(&str) -> Option<T>) -> Result<T, StepFailure> {
        self.text(position)
            .ok()
            .and_then(parse)
            .ok_or_else(|| self.mismatch(position, &format!("one of [{}]", names.join(", "))))
    }
}

const TARGETS: &[NodeKind] = &[NodeKind::Frame, NodeKind::Interactable];

struct ClickTool;

impl Tool for ClickTool {
    fn name(&self) -> &str {
        "click"
    }

    fn signature(&self) -> &str {
        "click(target: frame | interactable)"
    }

    fn invoke(&self, scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure> {
        let args = CallArgs::new(self.name(), args, 1)?;
        let target = args.node(0, TARGETS)?;
        scene.record(Interaction::Click {
            target: target.id.clone(),
        });
        Ok(Value::Null)
    }
}

struct DragTool;

impl Tool for DragTool {
    fn name(&self) -> &str {
        "drag"
    }

    fn signature(&self) -> &str {
        "drag(from: frame | interactable, to: frame | interactable | keypoint)"
    }

    fn invoke(&self, scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure> {
        let args = CallArgs::new(self.name(), args, 2)?;
        let from = args.node(0, TARGETS)?;
        let to = args.node(
            1,
            &[NodeKind::Frame, NodeKind::Interactable, NodeKind::Keypoint],
        )?;
        scene.record(Interaction::Drag {
            from: from.id.clone(),
            to: to.id.clone(),
        });
        Ok(Value::Null)
    }
}

struct EnterTool;

impl Tool for EnterTool {
    fn name(&self) -> &str {
        "enter"
    }

    fn signature(&self) -> &str {
        "enter(target: frame | interactable, text: string)"
    }

    fn invoke(&self, scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure> {
        let args = CallArgs::new(self.name(), args, 2)?;
        let target = args.node(0, TARGETS)?;
        let text = args.text(1)?;
        scene.record(Interaction::Enter {
            target: target.id.clone(),
            text: text.to_string(),
        });
        Ok(Value::Null)
    }
}

struct PointTool;

impl Tool for PointTool {
    fn name(&self) -> &str {
        "point"
    }

    fn signature(&self) -> &str {
        "point(keypoint: keypoint)"
    }

    fn invoke(&self, scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure> {
        let args = CallArgs::new(self.name(), args, 1)?;
        let keypoint = args.node(0, &[NodeKind::Keypoint])?;
        scene.record(Interaction::Point {
            keypoint: keypoint.id.clone(),
        });
        Ok(Value::Null)
    }
}

/// Identity; lets a step give an expression a name.
struct BindTool;

impl Tool for BindTool {
    fn name(&self) -> &str {
        "bind"
    }

    fn signature(&self) -> &str {
        "bind(value: any)"
    }

    fn invoke(&self, _scene: &mut SceneGraph, args: &[Value]) -> Result<Value, StepFailure> {
        let args = CallArgs::new(self.name(), args, 1)?;
        Ok(args.value(0)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use sieve_contracts::scene::{NodeId, Rect};

    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["bind", "click", "drag", "enter", "point"]);
        assert!(registry.get("eval").is_none());
    }

    #[test]
    fn registry_holds_exactly_the_builtin_set() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.names(), BUILTIN_TOOLS);
        assert_eq!(registry.signatures().len(), BUILTIN_TOOLS.len());
        for name in ["eval", "exec", "open", "system", "f0.click"] {
            assert!(registry.get(name).is_none(), "{name}");
        }
    }

    #[test]
    fn tools_record_interactions_and_check_arguments() {
        let mut scene = SceneGraph::new();
        let root = scene.add_root_frame(Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        let point = scene.add_keypoint(&root, 5.0, 5.0).unwrap();
        let registry = ToolRegistry::with_builtins();
        let frame = Value::Node(scene.resolve("f0").unwrap());
        let keypoint = Value::Node(scene.resolve("k0").unwrap());

        let enter = registry.get("enter").unwrap();
        enter
            .invoke(&mut scene, &[frame.clone(), Value::String("cat".into())])
            .unwrap();
        let drag = registry.get("drag").unwrap();
        drag.invoke(&mut scene, &[frame.clone(), keypoint.clone()]).unwrap();
        assert_eq!(
            scene.interactions()[1],
            Interaction::Drag {
                from: root.clone(),
                to: point.clone()
            }
        );

        let point_tool = registry.get("point").unwrap();
        let err = point_tool.invoke(&mut scene, &[frame.clone()]).unwrap_err();
        assert_eq!(err.kind(), "argument_type");
        let err = point_tool.invoke(&mut scene, &[]).unwrap_err();
        assert_eq!(err.kind(), "arity");
        assert_eq!(scene.interactions().len(), 2);
        assert_eq!(
            scene.interactions()[0],
            Interaction::Enter {
                target: NodeId::from("f0"),
                text: "cat".to_string()
            }
        );
    }
}
