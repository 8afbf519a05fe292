use std::fmt;

use serde::{Deserialize, Serialize};

/// A literal written onto a device capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse user input: `true`/`false`, then a number, else text.
    pub fn parse_loose(input: &str) -> Self {
        match input.trim() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            other => other
                .parse::<f64>()
                .map_or_else(|_| Self::Text(other.to_owned()), Self::Number),
        }
    }

    /// Convert a JSON scalar. Arrays, objects and `null` have no capability form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for CapabilityValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_loose_prefers_bool_then_number() {
        assert_eq!(CapabilityValue::parse_loose("true"), CapabilityValue::Bool(true));
        assert_eq!(CapabilityValue::parse_loose(" 0.25 "), CapabilityValue::Number(0.25));
        assert_eq!(
            CapabilityValue::parse_loose("self_consumption"),
            CapabilityValue::Text("self_consumption".into())
        );
    }

    #[test]
    fn json_scalars_only() {
        assert_eq!(
            CapabilityValue::from_json(&serde_json::json!(12.5)),
            Some(CapabilityValue::Number(12.5))
        );
        assert_eq!(CapabilityValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(CapabilityValue::from_json(&serde_json::json!({"a": 1})), None);
    }
}
