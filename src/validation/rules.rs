//! Structural rules for operation data
//!
//! Rules are written as pipe-separated strings, e.g. `required|string|max:500`.
//! `regex:` consumes the rest of the string so patterns may contain `|`.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::Validator;
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::{CriticalOperation, OperationData};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("Unknown rule '{0}'")]
    Unknown(String),

    #[error("Invalid argument for rule '{rule}': {message}")]
    InvalidArgument { rule: String, message: String },
}

/// A single field rule
#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    Nullable,
    String,
    Integer,
    Numeric,
    Boolean,
    Array,
    Object,
    /// Minimum length for strings, arrays and objects; minimum value for numbers
    Min(f64),
    Max(f64),
    In(Vec<String>),
    Regex(Regex),
}

impl Rule {
    fn parse_one(token: &str) -> Result<Self, RuleParseError> {
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };
        let number = |rule: &str| -> Result<f64, RuleParseError> {
            arg.unwrap_or_default()
                .trim()
                .parse::<f64>()
                .map_err(|e| RuleParseError::InvalidArgument {
                    rule: rule.to_string(),
                    message: e.to_string(),
                })
        };

        match name {
            "required" => Ok(Rule::Required),
            "nullable" => Ok(Rule::Nullable),
            "string" => Ok(Rule::String),
            "integer" => Ok(Rule::Integer),
            "numeric" => Ok(Rule::Numeric),
            "boolean" => Ok(Rule::Boolean),
            "array" => Ok(Rule::Array),
            "object" => Ok(Rule::Object),
            "min" => Ok(Rule::Min(number("min")?)),
            "max" => Ok(Rule::Max(number("max")?)),
            "in" => Ok(Rule::In(
                arg.unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            )),
            "regex" => Regex::new(arg.unwrap_or_default())
                .map(Rule::Regex)
                .map_err(|e| RuleParseError::InvalidArgument {
                    rule: "regex".to_string(),
                    message: e.to_string(),
                }),
            other => Err(RuleParseError::Unknown(other.to_string())),
        }
    }

    /// Error message for `value`, or `None` when it passes
    fn check(&self, field: &str, value: &Value) -> Option<String> {
        let ok = match self {
            Rule::Required | Rule::Nullable => true,
            Rule::String => value.is_string(),
            Rule::Integer => value.is_i64() || value.is_u64(),
            Rule::Numeric => {
                value.is_number()
                    || value.as_str().map(|s| s.trim().parse::<f64>().is_ok()).unwrap_or(false)
            }
            Rule::Boolean => value.is_boolean(),
            Rule::Array => value.is_array(),
            Rule::Object => value.is_object(),
            Rule::Min(n) => size_of(value).map(|size| size >= *n).unwrap_or(true),
            Rule::Max(n) => size_of(value).map(|size| size <= *n).unwrap_or(true),
            Rule::In(allowed) => scalar_text(value)
                .map(|text| allowed.iter().any(|a| *a == text))
                .unwrap_or(false),
            Rule::Regex(re) => value.as_str().map(|s| re.is_match(s)).unwrap_or(false),
        };
        if ok {
            return None;
        }

        Some(match self {
            Rule::Required | Rule::Nullable => format!("{} is required", field),
            Rule::String => format!("{} must be a string", field),
            Rule::Integer => format!("{} must be an integer", field),
            Rule::Numeric => format!("{} must be numeric", field),
            Rule::Boolean => format!("{} must be a boolean", field),
            Rule::Array => format!("{} must be an array", field),
            Rule::Object => format!("{} must be an object", field),
            Rule::Min(n) => format!("{} must be at least {}", field, n),
            Rule::Max(n) => format!("{} must not exceed {}", field, n),
            Rule::In(allowed) => format!("{} must be one of: {}", field, allowed.join(", ")),
            Rule::Regex(_) => format!("{} has an invalid format", field),
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "required"),
            Rule::Nullable => write!(f, "nullable"),
            Rule::String => write!(f, "string"),
            Rule::Integer => write!(f, "integer"),
            Rule::Numeric => write!(f, "numeric"),
            Rule::Boolean => write!(f, "boolean"),
            Rule::Array => write!(f, "array"),
            Rule::Object => write!(f, "object"),
            Rule::Min(n) => write!(f, "min:{}", n),
            Rule::Max(n) => write!(f, "max:{}", n),
            Rule::In(allowed) => write!(f, "in:{}", allowed.join(",")),
            Rule::Regex(re) => write!(f, "regex:{}", re.as_str()),
        }
    }
}

/// Length or magnitude compared by `min` / `max`
fn size_of(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(a) => Some(a.len() as f64),
        Value::Object(o) => Some(o.len() as f64),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Field name to ordered rules
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    fields: BTreeMap<String, Vec<Rule>>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `(field, "rule|rule:arg")` pairs
    pub fn parse<'a, I>(pairs: I) -> Result<Self, RuleParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut rules = Self::new();
        for (field, spec) in pairs {
            rules = rules.field(field, spec)?;
        }
        Ok(rules)
    }

    /// Parse and add the rules for one field
    pub fn field(mut self, field: &str, spec: &str) -> Result<Self, RuleParseError> {
        let mut parsed = Vec::new();
        let mut rest = spec.trim();
        while !rest.is_empty() {
            if rest.starts_with("regex:") {
                parsed.push(Rule::parse_one(rest)?);
                break;
            }
            let (token, tail) = rest.split_once('|').unwrap_or((rest, ""));
            let token = token.trim();
            if !token.is_empty() {
                parsed.push(Rule::parse_one(token)?);
            }
            rest = tail.trim_start();
        }
        self.fields.entry(field.to_string()).or_default().extend(parsed);
        Ok(self)
    }

    /// Add an already-built rule
    pub fn rule(mut self, field: &str, rule: Rule) -> Self {
        self.fields.entry(field.to_string()).or_default().push(rule);
        self
    }

    pub fn rules_for(&self, field: &str) -> &[Rule] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every violation, ordered by field name then rule order
    pub fn check(&self, data: &OperationData) -> Vec<String> {
        let mut errors = Vec::new();
        for (field, rules) in &self.fields {
            let required = rules.iter().any(|r| matches!(r, Rule::Required));

            // Absent or null optional fields skip their rules
            let value = match data.get(field) {
                Some(value) if !is_blank(value) => value,
                Some(value) if !required && !value.is_null() => value,
                None | Some(Value::Null) if !required => continue,
                _ => {
                    errors.push(format!("{} is required", field));
                    continue;
                }
            };

            errors.extend(rules.iter().filter_map(|rule| rule.check(field, value)));
        }
        errors
    }
}

/// Structural step of the validation chain
pub struct RulesValidator;

#[async_trait]
impl Validator for RulesValidator {
    fn name(&self) -> &str {
        "rules"
    }

    async fn validate(
        &self,
        _context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        let errors = operation.validation_rules().check(operation.data());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GuardError::validation(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::test_support::StubOperation;
    use serde_json::json;

    fn data(value: Value) -> OperationData {
        match value {
            Value::Object(map) => map,
            _ => OperationData::new(),
        }
    }

    #[test]
    fn test_parse_pipe_string() {
        let rules = ValidationRules::new()
            .field("title", "required|string|max:200")
            .unwrap();
        let parsed: Vec<String> = rules.rules_for("title").iter().map(|r| r.to_string()).collect();
        assert_eq!(parsed, vec!["required", "string", "max:200"]);
    }

    #[test]
    fn test_regex_keeps_pipes() {
        let rules = ValidationRules::new()
            .field("status", "string|regex:^(draft|published)$")
            .unwrap();
        assert_eq!(rules.rules_for("status").len(), 2);
        assert!(rules.check(&data(json!({"status": "draft"}))).is_empty());
        assert_eq!(
            rules.check(&data(json!({"status": "archived"}))),
            vec!["status has an invalid format".to_string()]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ValidationRules::new().field("x", "required|bogus").unwrap_err(),
            RuleParseError::Unknown("bogus".into())
        );
        assert!(matches!(
            ValidationRules::new().field("x", "max:lots"),
            Err(RuleParseError::InvalidArgument { .. })
        ));
        assert!(matches!(
            ValidationRules::new().field("x", "regex:("),
            Err(RuleParseError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_collects_all_errors_in_field_order() {
        let rules = ValidationRules::parse([
            ("title", "required|string"),
            ("body", "string|max:5"),
            ("author", "required"),
        ])
        .unwrap();

        let errors = rules.check(&data(json!({"title": 42, "body": "far too long"})));
        assert_eq!(
            errors,
            vec![
                "author is required".to_string(),
                "body must not exceed 5".to_string(),
                "title must be a string".to_string(),
            ]
        );
    }

    #[test]
    fn test_optional_and_nullable_fields() {
        let rules = ValidationRules::parse([("tag", "string"), ("parent", "nullable|integer")]).unwrap();
        assert!(rules.check(&data(json!({}))).is_empty());
        assert!(rules.check(&data(json!({"parent": null}))).is_empty());
        assert_eq!(
            rules.check(&data(json!({"parent": "x"}))),
            vec!["parent must be an integer".to_string()]
        );
    }

    #[test]
    fn test_required_rejects_blank() {
        let rules = ValidationRules::parse([("name", "required|string")]).unwrap();
        assert_eq!(
            rules.check(&data(json!({"name": "  "}))),
            vec!["name is required".to_string()]
        );
    }

    #[test]
    fn test_numeric_bounds_and_in() {
        let rules = ValidationRules::parse([
            ("count", "integer|min:1|max:10"),
            ("mode", "in:fast,safe"),
            ("ratio", "numeric"),
        ])
        .unwrap();

        assert!(rules
            .check(&data(json!({"count": 5, "mode": "safe", "ratio": "0.5"})))
            .is_empty());
        assert_eq!(
            rules.check(&data(json!({"count": 0, "mode": "reckless", "ratio": "half"}))),
            vec![
                "count must be at least 1".to_string(),
                "mode must be one of: fast, safe".to_string(),
                "ratio must be numeric".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_validator_rejects_with_all_errors() {
        let rules = ValidationRules::parse([("a", "required"), ("b", "required")]).unwrap();
        let op = StubOperation::new("op").rules(rules);

        let result = RulesValidator
            .validate(&SecurityContext::for_actor("op", "u1"), &op)
            .await;
        assert_eq!(
            result,
            Err(GuardError::validation(vec![
                "a is required".to_string(),
                "b is required".to_string(),
            ]))
        );
    }
}
