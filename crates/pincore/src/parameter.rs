use crate::{DataType, Value};
use serde::{Deserialize, Serialize};

/// How a parameter participates in data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterMode {
    Input,
    Output,
    Property,
    InputOutput,
}

impl ParameterMode {
    /// Can be the target of a data connection
    pub fn accepts_connection(self) -> bool {
        matches!(self, ParameterMode::Input | ParameterMode::InputOutput)
    }

    /// Can be the source of a data connection
    pub fn produces_output(self) -> bool {
        matches!(self, ParameterMode::Output | ParameterMode::InputOutput)
    }
}

/// Declaration of a parameter as published by a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub mode: ParameterMode,
    #[serde(default)]
    pub types: Vec<DataType>,
    #[serde(default)]
    pub accept_any: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, mode: ParameterMode, ty: impl Into<DataType>) -> Self {
        Self {
            name: name.into(),
            mode,
            types: vec![ty.into()],
            accept_any: false,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    /// Required input of a single type
    pub fn input(name: impl Into<String>, ty: impl Into<DataType>) -> Self {
        Self::new(name, ParameterMode::Input, ty).required()
    }

    pub fn output(name: impl Into<String>, ty: impl Into<DataType>) -> Self {
        Self::new(name, ParameterMode::Output, ty)
    }

    pub fn property(name: impl Into<String>, ty: impl Into<DataType>) -> Self {
        Self::new(name, ParameterMode::Property, ty)
    }

    pub fn input_output(name: impl Into<String>, ty: impl Into<DataType>) -> Self {
        Self::new(name, ParameterMode::InputOutput, ty)
    }

    /// Accept every listed type instead of the single declared one
    pub fn with_types(mut self, types: impl IntoIterator<Item = DataType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn accept_any(mut self) -> Self {
        self.accept_any = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn accepts(&self, ty: &DataType) -> bool {
        self.accept_any || self.types.contains(ty)
    }

    pub fn describe_types(&self) -> String {
        if self.accept_any {
            return "any".to_string();
        }
        self.types
            .iter()
            .map(DataType::name)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Adapt `value` to this slot: passed through when accepted, otherwise
    /// coerced to the first declared type that admits it
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if self.accepts(&value.data_type()) {
            return Some(value.clone());
        }
        self.types.iter().find_map(|ty| value.coerce_to(ty))
    }
}

/// A parameter slot on a node instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(flatten)]
    pub spec: ParameterSpec,
    /// Resolved value for inputs/properties, last produced value for outputs
    #[serde(default)]
    pub value: Option<Value>,
}

impl Parameter {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn mode(&self) -> ParameterMode {
        self.spec.mode
    }

    /// Current value, falling back to the declared default
    pub fn current_value(&self) -> Option<&Value> {
        self.value.as_ref().or(self.spec.default.as_ref())
    }
}

impl From<ParameterSpec> for Parameter {
    fn from(spec: ParameterSpec) -> Self {
        Self { spec, value: None }
    }
}
