//! Search filter expressions.
//!
//! Parses command-line filter strings of the form `name:op:value`,
//! `name:IS NULL` and `name:IS NOT NULL` into typed filters. Parsing is pure:
//! every call allocates fresh values and nothing is cached between calls.

use crate::types::{
    ComparisonOperator, DateField, DateFilter, PropertyFilter, PropertyValue, SearchFilters,
};
use thiserror::Error;

const IS_NOT_NULL_MARKER: &str = ":IS NOT NULL";
const IS_NULL_MARKER: &str = ":IS NULL";

const PROPERTY_SHAPE: &str = "property:operator:value, property:IS NULL or property:IS NOT NULL";
const DATE_SHAPE: &str = "field:operator:date, field:IS NULL or field:IS NOT NULL";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid filter format {expr:?}: expected {expected}")]
    MalformedFilter {
        expr: String,
        expected: &'static str,
    },
    #[error("invalid comparison operator {0:?}: expected one of =, ==, <>, !=, >, <, >=, <=")]
    InvalidOperator(String),
    #[error(
        "unknown date field {field:?}: expected one of created_at, valid_at, invalid_at, expired_at"
    )]
    UnknownField { field: String },
}

/// Map an operator token to a [`ComparisonOperator`].
pub fn parse_comparison_operator(token: &str) -> Result<ComparisonOperator, FilterError> {
    match token {
        "=" | "==" => Ok(ComparisonOperator::Equals),
        "<>" | "!=" => Ok(ComparisonOperator::NotEquals),
        ">" => Ok(ComparisonOperator::GreaterThan),
        "<" => Ok(ComparisonOperator::LessThan),
        ">=" => Ok(ComparisonOperator::GreaterThanEqual),
        "<=" => Ok(ComparisonOperator::LessThanEqual),
        "IS NULL" => Ok(ComparisonOperator::IsNull),
        "IS NOT NULL" => Ok(ComparisonOperator::IsNotNull),
        _ => Err(FilterError::InvalidOperator(token.to_string())),
    }
}

/// Infer the type of a filter literal.
///
/// Priority: `true`/`false`, then `null` or empty, then i64, then finite f64,
/// falling back to the raw string. Tokens such as `nan` or `inf` stay strings
/// since JSON has no encoding for them.
pub fn infer_value(token: &str) -> PropertyValue {
    match token {
        "true" => PropertyValue::Bool(true),
        "false" => PropertyValue::Bool(false),
        "null" | "" => PropertyValue::Null,
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                PropertyValue::Integer(i)
            } else if let Some(f) = token.parse::<f64>().ok().filter(|f| f.is_finite()) {
                PropertyValue::Float(f)
            } else {
                PropertyValue::String(token.to_string())
            }
        }
    }
}

/// A filter expression split into its parts but not yet typed.
enum Split<'a> {
    NullCheck {
        name: &'a str,
        operator: ComparisonOperator,
    },
    Comparison {
        name: &'a str,
        operator: &'a str,
        value: &'a str,
    },
}

impl<'a> Split<'a> {
    fn name(&self) -> &'a str {
        match self {
            Split::NullCheck { name, .. } | Split::Comparison { name, .. } => *name,
        }
    }
}

fn split_expression<'a>(expr: &'a str, expected: &'static str) -> Result<Split<'a>, FilterError> {
    let malformed = || FilterError::MalformedFilter {
        expr: expr.to_string(),
        expected,
    };

    for (marker, operator) in [
        (IS_NOT_NULL_MARKER, ComparisonOperator::IsNotNull),
        (IS_NULL_MARKER, ComparisonOperator::IsNull),
    ] {
        if let Some((name, _)) = expr.split_once(marker) {
            if name.is_empty() {
                return Err(malformed());
            }
            return Ok(Split::NullCheck { name, operator });
        }
    }

    let parts: Vec<&str> = expr.splitn(3, ':').collect();
    if parts.len() != 3 || parts[0].is_empty() {
        return Err(malformed());
    }
    Ok(Split::Comparison {
        name: parts[0],
        operator: parts[1],
        value: parts[2],
    })
}

/// Parse a property filter expression such as `age:>:30` or `deleted_at:IS NULL`.
pub fn parse_property_filter(expr: &str) -> Result<PropertyFilter, FilterError> {
    match split_expression(expr, PROPERTY_SHAPE)? {
        Split::NullCheck { name, operator } => Ok(PropertyFilter {
            property_name: name.to_string(),
            comparison_operator: operator,
            property_value: None,
        }),
        Split::Comparison {
            name,
            operator,
            value,
        } => {
            let comparison_operator = parse_comparison_operator(operator)?;
            Ok(PropertyFilter {
                property_name: name.to_string(),
                comparison_operator,
                property_value: Some(infer_value(value)),
            })
        }
    }
}

/// Parse a date filter expression and append it to `into` as a new OR-group.
///
/// Every call adds its own singleton group; filters on the same field are
/// never merged into one AND-group.
pub fn parse_date_filter(expr: &str, into: &mut SearchFilters) -> Result<(), FilterError> {
    let split = split_expression(expr, DATE_SHAPE)?;
    let field = DateField::from_name(split.name()).ok_or_else(|| FilterError::UnknownField {
        field: split.name().to_string(),
    })?;

    let filter = match split {
        Split::NullCheck { operator, .. } => DateFilter {
            comparison_operator: operator,
            date: None,
        },
        Split::Comparison {
            operator, value, ..
        } => DateFilter {
            comparison_operator: parse_comparison_operator(operator)?,
            date: Some(value.to_string()),
        },
    };

    into.date_groups_mut(field).push(vec![filter]);
    Ok(())
}

/// Filter flags collected from the command line, in the order given.
#[derive(Debug, Clone, Default)]
pub struct FilterArgs {
    pub property_filters: Vec<String>,
    pub date_filters: Vec<String>,
    pub exclude_node_labels: Option<String>,
    pub exclude_edge_types: Option<String>,
}

impl FilterArgs {
    fn is_empty(&self) -> bool {
        self.property_filters.is_empty()
            && self.date_filters.is_empty()
            && self.exclude_node_labels.as_deref().is_none_or(str::is_empty)
            && self.exclude_edge_types.as_deref().is_none_or(str::is_empty)
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Assemble [`SearchFilters`] from command-line flags.
///
/// Returns `Ok(None)` when no filter flag was supplied, and fails on the first
/// invalid expression so nothing malformed reaches the server.
pub fn build_search_filters(args: &FilterArgs) -> Result<Option<SearchFilters>, FilterError> {
    if args.is_empty() {
        return Ok(None);
    }

    let mut filters = SearchFilters::default();
    for expr in &args.property_filters {
        filters.property_filters.push(parse_property_filter(expr)?);
    }
    for expr in &args.date_filters {
        parse_date_filter(expr, &mut filters)?;
    }
    if let Some(labels) = &args.exclude_node_labels {
        filters.node_labels = split_csv(labels);
    }
    if let Some(types) = &args.exclude_edge_types {
        filters.edge_types = split_csv(types);
    }
    Ok(Some(filters))
}
