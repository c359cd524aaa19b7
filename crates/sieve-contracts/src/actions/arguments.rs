use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::scene::{Axis, ElementLabel, FrameLabel, NodeId, SceneError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Frame,
    Element,
    Axis,
    /// Number strictly between 0 and 1.
    Ratio,
    Count { min: u64, max: u64 },
    FrameLabel,
    ElementLabel,
}

impl ParamKind {
    pub fn describe(&self) -> String {
        match self {
            ParamKind::Frame => "frame id".to_string(),
            ParamKind::Element => "interactable id".to_string(),
            ParamKind::Axis => Axis::NAMES.join("|"),
            ParamKind::Ratio => "number in (0, 1)".to_string(),
            ParamKind::Count { min, max } => format!("integer in [{min}, {max}]"),
            ParamKind::FrameLabel => FrameLabel::NAMES.join("|"),
            ParamKind::ElementLabel => ElementLabel::NAMES.join("|"),
        }
    }

    fn read(&self, raw: &Value) -> Result<ArgValue, String> {
        let found = || format!("expected {}, got {raw}", self.describe());
        match self {
            ParamKind::Frame | ParamKind::Element => match raw.as_str() {
                Some(id) if !id.trim().is_empty() => Ok(ArgValue::Node(NodeId::from(id.trim()))),
                _ => Err(found()),
            },
            ParamKind::Axis => raw
                .as_str()
                .and_then(Axis::parse)
                .map(ArgValue::Axis)
                .ok_or_else(found),
            ParamKind::Ratio => match raw.as_f64() {
                Some(ratio) if ratio > 0.0 && ratio < 1.0 => Ok(ArgValue::Ratio(ratio)),
                _ => Err(found()),
            },
            ParamKind::Count { min, max } => match count_of(raw) {
                Some(count) if (*min..=*max).contains(&count) => Ok(ArgValue::Count(count)),
                _ => Err(found()),
            },
            ParamKind::FrameLabel => raw
                .as_str()
                .and_then(FrameLabel::parse)
                .map(ArgValue::FrameLabel)
                .ok_or_else(found),
            ParamKind::ElementLabel => raw
                .as_str()
                .and_then(ElementLabel::parse)
                .map(ArgValue::ElementLabel)
                .ok_or_else(found),
        }
    }
}

fn count_of(raw: &Value) -> Option<u64> {
    if let Some(count) = raw.as_u64() {
        return Some(count);
    }
    let number = raw.as_f64()?;
    (number >= 0.0 && number.fract() == 0.0 && number <= u32::MAX as f64).then_some(number as u64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Node(NodeId),
    Axis(Axis),
    Ratio(f64),
    Count(u64),
    FrameLabel(FrameLabel),
    ElementLabel(ElementLabel),
}

/// A problem with one named parameter, raised while binding or applying.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgFault {
    pub param: &'static str,
    pub detail: String,
}

impl ArgFault {
    pub fn new(param: &'static str, detail: impl Into<String>) -> Self {
        Self {
            param,
            detail: detail.into(),
        }
    }

    /// Attributes a scene precondition failure to `param`.
    pub fn scene(param: &'static str) -> impl Fn(SceneError) -> ArgFault {
        move |err| ArgFault::new(param, err.to_string())
    }
}

/// Arguments checked against an operation's parameter list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    values: IndexMap<&'static str, ArgValue>,
}

impl Arguments {
    /// Checks every parameter; unknown keys are rejected, not ignored.
    pub fn bind(params: &[ParamSpec], raw: &Map<String, Value>) -> Result<Self, ArgFault> {
        if let Some(key) = raw
            .keys()
            .find(|key| !params.iter().any(|param| param.name == key.as_str()))
        {
            let allowed: Vec<&str> = params.iter().map(|param| param.name).collect();
            return Err(ArgFault::new(
                "args",
                format!("unexpected argument '{key}' (allowed: {})", allowed.join(", ")),
            ));
        }
        let mut values = IndexMap::new();
        for param in params {
            match raw.get(param.name) {
                Some(Value::Null) | None if !param.required => {}
                Some(Value::Null) | None => {
                    return Err(ArgFault::new(
                        param.name,
                        format!("missing required {}", param.kind.describe()),
                    ))
                }
                Some(value) => {
                    let bound = param
                        .kind
                        .read(value)
                        .map_err(|detail| ArgFault::new(param.name, detail))?;
                    values.insert(param.name, bound);
                }
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn node(&self, name: &'static str) -> Result<Option<&NodeId>, ArgFault> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ArgValue::Node(id)) => Ok(Some(id)),
            Some(_) => Err(ArgFault::new(name, "expected a node id")),
        }
    }

    pub fn required_node(&self, name: &'static str) -> Result<&NodeId, ArgFault> {
        self.node(name)?
            .ok_or_else(|| ArgFault::new(name, "missing node id"))
    }

    pub fn axis(&self, name: &'static str) -> Result<Axis, ArgFault> {
        match self.values.get(name) {
            Some(ArgValue::Axis(axis)) => Ok(*axis),
            _ => Err(ArgFault::new(name, "expected an axis")),
        }
    }

    pub fn ratio(&self, name: &'static str) -> Result<f64, ArgFault> {
        match self.values.get(name) {
            Some(ArgValue::Ratio(ratio)) => Ok(*ratio),
            _ => Err(ArgFault::new(name, "expected a ratio")),
        }
    }

    pub fn count(&self, name: &'static str) -> Result<u64, ArgFault> {
        match self.values.get(name) {
            Some(ArgValue::Count(count)) => Ok(*count),
            _ => Err(ArgFault::new(name, "expected a count")),
        }
    }

    pub fn frame_label(&self, name: &'static str) -> Result<FrameLabel, ArgFault> {
        match self.values.get(name) {
            Some(ArgValue::FrameLabel(label)) => Ok(*label),
            _ => Err(ArgFault::new(name, "expected a frame label")),
        }
    }

    pub fn element_label(&self, name: &'static str) -> Result<ElementLabel, ArgFault> {
        match self.values.get(name) {
            Some(ArgValue::ElementLabel(label)) => Ok(*label),
            _ => Err(ArgFault::new(name, "expected an element label")),
        }
    }
}
