//! Argument schemas for catalog entries.
//!
//! Every middleware and provider kind describes the arguments its factory
//! accepts. Serialized arguments are checked against the schema before the
//! factory runs so a bad persisted state fails with a readable reason.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ArgType {
    String {
        optional: bool,
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    Number {
        optional: bool,
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean {
        optional: bool,
    },
    Array {
        optional: bool,
        subtype: Box<ArgType>,
    },
    Object {
        optional: bool,
        fields: Vec<(String, ArgType)>,
    },
}

impl ArgType {
    pub fn string() -> Self {
        ArgType::String {
            optional: false,
            min_length: None,
            max_length: None,
        }
    }

    pub fn number() -> Self {
        ArgType::Number {
            optional: false,
            min: None,
            max: None,
        }
    }

    pub fn boolean() -> Self {
        ArgType::Boolean { optional: false }
    }

    pub fn array(subtype: ArgType) -> Self {
        ArgType::Array {
            optional: false,
            subtype: Box::new(subtype),
        }
    }

    pub fn object(fields: Vec<(&str, ArgType)>) -> Self {
        ArgType::Object {
            optional: false,
            fields: fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        }
    }

    pub fn optional(mut self) -> Self {
        match &mut self {
            ArgType::String { optional, .. }
            | ArgType::Number { optional, .. }
            | ArgType::Boolean { optional }
            | ArgType::Array { optional, .. }
            | ArgType::Object { optional, .. } => *optional = true,
        }
        self
    }

    pub fn min(mut self, bound: f64) -> Self {
        if let ArgType::Number { min, .. } = &mut self {
            *min = Some(bound);
        }
        self
    }

    pub fn max(mut self, bound: f64) -> Self {
        if let ArgType::Number { max, .. } = &mut self {
            *max = Some(bound);
        }
        self
    }

    pub fn min_length(mut self, bound: usize) -> Self {
        if let ArgType::String { min_length, .. } = &mut self {
            *min_length = Some(bound);
        }
        self
    }

    pub fn max_length(mut self, bound: usize) -> Self {
        if let ArgType::String { max_length, .. } = &mut self {
            *max_length = Some(bound);
        }
        self
    }

    fn is_optional(&self) -> bool {
        match self {
            ArgType::String { optional, .. }
            | ArgType::Number { optional, .. }
            | ArgType::Boolean { optional }
            | ArgType::Array { optional, .. }
            | ArgType::Object { optional, .. } => *optional,
        }
    }

    /// Check `value` against this schema; the error names the offending field
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        self.validate_at("args", Some(value))
    }

    fn validate_at(&self, at: &str, value: Option<&Value>) -> Result<(), String> {
        let value = match value {
            None | Some(Value::Null) if self.is_optional() => return Ok(()),
            None | Some(Value::Null) => return Err(format!("{} is required", at)),
            Some(value) => value,
        };

        match self {
            ArgType::String {
                min_length,
                max_length,
                ..
            } => {
                let s = value.as_str().ok_or_else(|| format!("{} must be a string", at))?;
                let len = s.chars().count();
                if let Some(min) = min_length {
                    if len < *min {
                        return Err(format!("{} is shorter than {}", at, min));
                    }
                }
                if let Some(max) = max_length {
                    if len > *max {
                        return Err(format!("{} is longer than {}", at, max));
                    }
                }
                Ok(())
            }
            ArgType::Number { min, max, .. } => {
                let n = value.as_f64().ok_or_else(|| format!("{} must be a number", at))?;
                if let Some(min) = min {
                    if n < *min {
                        return Err(format!("{} must be at least {}", at, min));
                    }
                }
                if let Some(max) = max {
                    if n > *max {
                        return Err(format!("{} must be at most {}", at, max));
                    }
                }
                Ok(())
            }
            ArgType::Boolean { .. } => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| format!("{} must be a boolean", at)),
            ArgType::Array { subtype, .. } => {
                let items = value.as_array().ok_or_else(|| format!("{} must be an array", at))?;
                for (i, item) in items.iter().enumerate() {
                    subtype.validate_at(&format!("{}[{}]", at, i), Some(item))?;
                }
                Ok(())
            }
            ArgType::Object { fields, .. } => {
                let object = value.as_object().ok_or_else(|| format!("{} must be an object", at))?;
                for (name, ty) in fields {
                    ty.validate_at(&format!("{}.{}", at, name), object.get(name))?;
                }
                Ok(())
            }
        }
    }
}
