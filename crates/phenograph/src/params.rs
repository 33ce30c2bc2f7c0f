use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{PipelineError, Result},
    types::FeatureData,
};

/// One tunable operator parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub value: Value,
    pub default: Value,
    /// Grid-search specification, see [`crate::grid`].
    pub grid_search: String,
}

/// Ordered parameter list of an operator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolParams {
    params: Vec<ToolParam>,
}

impl ToolParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with its default value.
    pub fn with(mut self, name: &str, default: impl Into<Value>, description: &str) -> Self {
        let default = default.into();
        self.params.push(ToolParam {
            name: name.to_string(),
            description: description.to_string(),
            value: default.clone(),
            default,
            grid_search: String::new(),
        });
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolParam> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&ToolParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|p| &p.value)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let param = self.get_mut(name)?;
        param.value = value.into();
        Ok(())
    }

    pub fn set_grid_search(&mut self, name: &str, spec: impl Into<String>) -> Result<()> {
        let param = self.get_mut(name)?;
        param.grid_search = spec.into();
        Ok(())
    }

    /// Restore every value to its default.
    pub fn reset(&mut self) {
        for param in &mut self.params {
            param.value = param.default.clone();
        }
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut ToolParam> {
        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| PipelineError::InvalidParameter {
                name: name.to_string(),
                reason: "no such parameter".to_string(),
            })
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::Bool(b) => Some(*b as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.value(name)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Current values keyed by parameter name.
    pub fn values(&self) -> FeatureData {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    /// Non-empty grid-search specifications keyed by parameter name.
    pub fn grid_search_specs(&self) -> FeatureData {
        self.params
            .iter()
            .filter(|p| !p.grid_search.is_empty())
            .map(|p| (p.name.clone(), Value::String(p.grid_search.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> ToolParams {
        ToolParams::new()
            .with("threshold", 128, "Cut-off level")
            .with("invert", false, "Swap foreground and background")
            .with("label", "leaf", "Output name")
    }

    #[test]
    fn test_lenient_getters() {
        let mut p = params();
        assert_eq!(p.get_i64("threshold"), Some(128));
        p.set("threshold", "90").unwrap();
        assert_eq!(p.get_i64("threshold"), Some(90));
        p.set("invert", 1).unwrap();
        assert_eq!(p.get_bool("invert"), Some(true));
        assert_eq!(p.get_str("label").as_deref(), Some("leaf"));
        assert_eq!(p.get_f64("threshold"), Some(90.0));
    }

    #[test]
    fn test_set_unknown_parameter_fails() {
        let mut p = params();
        assert!(matches!(
            p.set("sigma", 2.0),
            Err(PipelineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut p = params();
        p.set("threshold", 12).unwrap();
        p.reset();
        assert_eq!(p.value("threshold"), Some(&json!(128)));
    }
}
