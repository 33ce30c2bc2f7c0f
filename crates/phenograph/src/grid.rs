//! Grid-search specifications.
//!
//! A parameter's grid-search string is either a literal comma separated
//! list (`"1,2,5"`, `"open,close"`) or an inclusive integer range written
//! `low|high;step` (`"10|50;10"`). The step defaults to 1.

use serde_json::Value;

use crate::{
    error::{PipelineError, Result},
    params::ToolParam,
};

/// Expand one grid-search specification into candidate values.
pub fn parse_grid_spec(name: &str, spec: &str) -> Result<Vec<Value>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    if let Some((low, rest)) = spec.split_once('|') {
        let (high, step) = match rest.split_once(';') {
            Some((high, step)) => (high, step),
            None => (rest, "1"),
        };
        let low = parse_int(name, low)?;
        let high = parse_int(name, high)?;
        let step = parse_int(name, step)?;
        if step <= 0 {
            return Err(invalid(name, "step must be positive"));
        }
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        return Ok((low..=high)
            .step_by(step as usize)
            .map(Value::from)
            .collect());
    }

    Ok(spec
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(literal)
        .collect())
}

/// Candidate values for a parameter; an empty specification keeps the current value.
pub fn candidates(param: &ToolParam) -> Result<Vec<Value>> {
    let values = parse_grid_spec(&param.name, &param.grid_search)?;
    if values.is_empty() {
        Ok(vec![param.value.clone()])
    } else {
        Ok(values)
    }
}

/// Every combination of the given axes, first axis varying slowest.
pub fn cartesian_product(axes: &[(String, Vec<Value>)]) -> Vec<Vec<(String, Value)>> {
    let mut combos: Vec<Vec<(String, Value)>> = vec![Vec::new()];
    for (name, values) in axes {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((name.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

fn parse_int(name: &str, token: &str) -> Result<i64> {
    token
        .trim()
        .parse()
        .map_err(|_| invalid(name, &format!("'{}' is not an integer", token.trim())))
}

fn literal(token: &str) -> Value {
    if let Ok(b) = token.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return Value::from(f);
    }
    Value::String(token.to_string())
}

fn invalid(name: &str, reason: &str) -> PipelineError {
    PipelineError::InvalidParameter {
        name: name.to_string(),
        reason: format!("bad grid search specification: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_range_is_inclusive() {
        let values = parse_grid_spec("threshold", "10|50;10").unwrap();
        assert_eq!(values, vec![json!(10), json!(20), json!(30), json!(40), json!(50)]);
    }

    #[test]
    fn test_range_default_step_and_reversed_bounds() {
        let values = parse_grid_spec("k", "5|3").unwrap();
        assert_eq!(values, vec![json!(3), json!(4), json!(5)]);
    }

    #[test]
    fn test_literal_list_types() {
        let values = parse_grid_spec("mixed", "1, 2.5, true, open").unwrap();
        assert_eq!(values, vec![json!(1), json!(2.5), json!(true), json!("open")]);
    }

    #[test]
    fn test_bad_step_is_rejected() {
        assert!(parse_grid_spec("k", "1|9;0").is_err());
        assert!(parse_grid_spec("k", "a|9").is_err());
    }

    #[test]
    fn test_cartesian_product_size_and_order() {
        let axes = vec![
            ("a".to_string(), vec![json!(1), json!(2)]),
            ("b".to_string(), vec![json!("x"), json!("y"), json!("z")]),
        ];
        let combos = cartesian_product(&axes);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![("a".to_string(), json!(1)), ("b".to_string(), json!("x"))]);
        assert_eq!(combos[5], vec![("a".to_string(), json!(2)), ("b".to_string(), json!("z"))]);
    }
}
