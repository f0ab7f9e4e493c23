//! Named query validation.

use std::fmt;
use std::str::FromStr;

use super::error::{ConfigError, Result};
use super::resource::{FieldFilter, NamedQueries};

/// Operators accepted in named query conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
}

impl Operator {
    /// All supported operators.
    pub fn all() -> &'static [Operator] {
        &[
            Operator::Eq,
            Operator::NotEq,
            Operator::Gt,
            Operator::Lt,
            Operator::Gte,
            Operator::Lte,
            Operator::Like,
            Operator::ILike,
            Operator::In,
            Operator::NotIn,
        ]
    }

    /// Canonical token as written in queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        }
    }

    /// Whether the operator takes a list of values.
    pub fn expects_list(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // "not   in" and "NOT IN" are the same token.
        let token = s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        Operator::all()
            .iter()
            .copied()
            .find(|op| op.as_str() == token)
            .ok_or_else(|| format!("unsupported operator '{}'", s))
    }
}

/// Validates every named query and rewrites operators to their canonical token.
pub fn validate_named_queries(queries: &mut NamedQueries) -> Result<()> {
    for (name, query) in queries.iter_mut() {
        if name.trim().is_empty() {
            return Err(ConfigError::named_query(name.as_str(), None, "query name is empty"));
        }
        for (field, filter) in query.iter_mut() {
            if field.trim().is_empty() {
                return Err(ConfigError::named_query(
                    name.as_str(),
                    Some(field.as_str()),
                    "field name is empty",
                ));
            }
            let op = validate_filter(filter).map_err(|reason| {
                ConfigError::named_query(name.as_str(), Some(field.as_str()), reason)
            })?;
            filter.operator = op.as_str().to_string();
        }
    }
    Ok(())
}

fn validate_filter(filter: &FieldFilter) -> std::result::Result<Operator, String> {
    if filter.operator.trim().is_empty() {
        return Err("operator is empty".to_string());
    }
    let op: Operator = filter.operator.parse()?;

    match &filter.value {
        None | Some(serde_yaml::Value::Null) => Err("value is missing".to_string()),
        Some(value) if op.expects_list() && !value.is_sequence() => {
            Err(format!("operator '{}' requires an array value", op))
        }
        Some(_) => Ok(op),
    }
}
