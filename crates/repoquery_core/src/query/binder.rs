//! Parameter binding.
//!
//! # Responsibility
//! - Validate invocation arguments against a descriptor's expected
//!   parameters (count and ordinal type).
//! - Resolve the dynamic sort of a page request into ORDER BY terms.
//! - Carry fetch paths and lock mode onto the [`BoundQuery`].
//!
//! # Invariants
//! - Page requests are never counted among positional arguments.
//! - A bound query is created per invocation and dropped after execution.

use crate::query::descriptor::QueryDescriptor;
use crate::query::error::BindError;
use crate::query::method::{LockMode, ParamType, ReturnShape, ScalarType};
use crate::query::page::PageRequest;
use crate::query::plan::{FetchPath, QueryPlan};
use rusqlite::types::Value;
use std::sync::Arc;
use uuid::Uuid;

/// One invocation argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryArg {
    Null,
    Integer(i64),
    Text(String),
    /// Ordered sequence for `IN` style placeholders.
    List(Vec<QueryArg>),
}

impl QueryArg {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }

    /// Store value of a scalar argument; lists render as `NULL`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null | Self::List(_) => Value::Null,
            Self::Integer(value) => Value::Integer(*value),
            Self::Text(value) => Value::Text(value.clone()),
        }
    }

    fn matches_scalar(&self, expected: ScalarType) -> bool {
        match (self, expected) {
            (Self::Null, _) => true,
            (Self::Integer(_), ScalarType::Integer) => true,
            (Self::Text(_), ScalarType::Text) => true,
            (Self::Text(text), ScalarType::Identifier) => Uuid::parse_str(text).is_ok(),
            _ => false,
        }
    }

    fn matches(&self, expected: ParamType) -> bool {
        match (self, expected) {
            (Self::List(items), ParamType::List(scalar)) => items
                .iter()
                .all(|item| !matches!(item, Self::List(_)) && item.matches_scalar(scalar)),
            (Self::List(_), ParamType::Scalar(_)) => false,
            (Self::Null, ParamType::List(_)) => false,
            (scalar, ParamType::Scalar(expected)) => scalar.matches_scalar(expected),
            (_, ParamType::List(_)) => false,
        }
    }
}

impl From<i64> for QueryArg {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for QueryArg {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for QueryArg {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for QueryArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for QueryArg {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Uuid> for QueryArg {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<QueryArg>> From<Option<T>> for QueryArg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<QueryArg>> From<Vec<T>> for QueryArg {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<QueryArg>> From<&[T]> for QueryArg {
    fn from(values: &[T]) -> Self {
        Self::List(values.iter().cloned().map(Into::into).collect())
    }
}

/// Builds a `Vec<QueryArg>` from heterogeneous values.
#[macro_export]
macro_rules! query_args {
    () => {
        ::std::vec::Vec::<$crate::query::QueryArg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::query::QueryArg::from($arg)),+]
    };
}

/// A resolved descriptor plus the values of one invocation.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub descriptor: Arc<QueryDescriptor>,
    pub args: Vec<QueryArg>,
    pub page: Option<PageRequest>,
    /// Dynamic ORDER BY terms resolved from the page request sort.
    pub order: Vec<String>,
    pub fetch: Vec<FetchPath>,
    pub lock: LockMode,
    pub read_only: bool,
}

/// Validates `args` and `page` against `descriptor`.
pub fn bind(
    descriptor: Arc<QueryDescriptor>,
    args: Vec<QueryArg>,
    page: Option<PageRequest>,
) -> Result<BoundQuery, BindError> {
    let expected = &descriptor.parameters;
    if args.len() != expected.len() {
        return Err(BindError::ArityMismatch {
            expected: expected.len(),
            actual: args.len(),
        });
    }
    for (index, (arg, param)) in args.iter().zip(expected).enumerate() {
        if !arg.matches(param.ty) {
            return Err(BindError::TypeMismatch {
                index,
                expected: param.ty,
                actual: arg.type_name(),
            });
        }
    }

    if matches!(descriptor.returns, ReturnShape::Page | ReturnShape::Slice) && page.is_none() {
        return Err(BindError::MissingPageRequest);
    }

    let order = match &page {
        Some(request) => resolve_sort(&descriptor.plan, request)?,
        None => Vec::new(),
    };

    Ok(BoundQuery {
        fetch: descriptor.fetch_paths.clone(),
        lock: descriptor.lock,
        read_only: descriptor.read_only,
        descriptor,
        args,
        page,
        order,
    })
}

fn resolve_sort(plan: &QueryPlan, request: &PageRequest) -> Result<Vec<String>, BindError> {
    request
        .sort()
        .orders()
        .iter()
        .map(|order| {
            let expression = match plan {
                QueryPlan::Select(select) => select.sort_keys.get(&order.property).cloned(),
                QueryPlan::Native(native) => native
                    .columns
                    .iter()
                    .find(|column| **column == order.property)
                    .map(|column| format!("\"{column}\"")),
                QueryPlan::Mutation(_) => None,
            };
            expression
                .map(|expression| format!("{expression} {}", order.direction.as_sql()))
                .ok_or_else(|| BindError::UnknownSortProperty(order.property.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::QueryArg;
    use crate::query::method::ParamType;
    use uuid::Uuid;

    #[test]
    fn scalar_arguments_match_declared_types() {
        assert!(QueryArg::from(10).matches(ParamType::INTEGER));
        assert!(QueryArg::from("AAA").matches(ParamType::TEXT));
        assert!(QueryArg::Null.matches(ParamType::TEXT));
        assert!(!QueryArg::from("AAA").matches(ParamType::INTEGER));
        assert!(!QueryArg::from(10).matches(ParamType::TEXT));
    }

    #[test]
    fn identifier_parameters_require_uuid_text() {
        assert!(QueryArg::from(Uuid::new_v4()).matches(ParamType::ID));
        assert!(!QueryArg::from("not-a-uuid").matches(ParamType::ID));
    }

    #[test]
    fn list_parameters_require_sequences_of_the_element_type() {
        let names = QueryArg::from(vec!["AAA", "BBB"]);
        assert!(names.matches(ParamType::TEXT_LIST));
        assert!(!names.matches(ParamType::TEXT));
        assert!(!QueryArg::from("AAA").matches(ParamType::TEXT_LIST));
        assert!(!QueryArg::from(vec![1, 2]).matches(ParamType::TEXT_LIST));
        assert!(QueryArg::List(Vec::new()).matches(ParamType::INTEGER_LIST));
    }

    #[test]
    fn query_args_macro_converts_each_value() {
        let args = crate::query_args!["AAA", 15, None::<i64>];
        assert_eq!(
            args,
            vec![
                QueryArg::Text("AAA".to_string()),
                QueryArg::Integer(15),
                QueryArg::Null
            ]
        );
        assert!(crate::query_args![].is_empty());
    }
}
