//! Method-name predicate parser.
//!
//! # Responsibility
//! - Split `<verb><subject>By<predicate>[OrderBy<orders>]` method names.
//! - Resolve predicate segments against the entity schema into clauses.
//!
//! # Invariants
//! - Property segments match the longest known property name first; shorter
//!   candidates are tried only when the rest of the name fails to parse.
//! - Parameter ordinals follow clause order, left to right.
//! - `Or` separates groups of `And`-joined clauses (OR of ANDs).

use crate::query::error::ResolutionError;
use crate::query::page::{Direction, Order};
use crate::schema::{EntitySchema, Property};
use once_cell::sync::Lazy;
use regex::Regex;

static METHOD_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<verb>find|read|get|query|count)(?P<subject>(?:[A-Z][A-Za-z0-9]*?)??)(?:By(?P<predicate>[A-Z][A-Za-z0-9]*))?$",
    )
    .expect("valid method name regex")
});

const ORDER_BY: &str = "OrderBy";

/// Suffix keywords, longer spellings before their prefixes.
const OPERATOR_SUFFIXES: &[(&str, Operator)] = &[
    ("GreaterThanEqual", Operator::GreaterThanEqual),
    ("LessThanEqual", Operator::LessThanEqual),
    ("GreaterThan", Operator::GreaterThan),
    ("LessThan", Operator::LessThan),
    ("IsNotNull", Operator::IsNotNull),
    ("IsNull", Operator::IsNull),
    ("NotNull", Operator::IsNotNull),
    ("NotIn", Operator::NotIn),
    ("Equals", Operator::Equals),
    ("Like", Operator::Like),
    ("Not", Operator::NotEquals),
    ("Null", Operator::IsNull),
    ("In", Operator::In),
    ("Is", Operator::Equals),
    ("", Operator::Equals),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Whether the operator binds one argument.
    pub fn takes_argument(self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }

    /// Whether the bound argument must be an ordered sequence.
    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// One `(property, operator, parameter)` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub property: Property,
    pub operator: Operator,
    pub param_index: Option<usize>,
}

/// OR of AND-groups; an empty tree matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateTree {
    pub groups: Vec<Vec<Clause>>,
}

impl PredicateTree {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn combinator(&self) -> Combinator {
        if self.groups.len() > 1 {
            Combinator::Or
        } else {
            Combinator::And
        }
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        self.groups.iter().flatten()
    }

    pub fn param_count(&self) -> usize {
        self.clauses()
            .filter(|clause| clause.param_index.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVerb {
    Find,
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMethod {
    pub verb: QueryVerb,
    pub predicate: PredicateTree,
    pub order: Vec<Order>,
}

/// Parses a derived-query method name against `schema`.
pub fn parse_method_name(
    method: &str,
    schema: &EntitySchema,
) -> Result<ParsedMethod, ResolutionError> {
    let captures = METHOD_NAME_RE
        .captures(method)
        .ok_or_else(|| ResolutionError::invalid(method, "name does not follow the find-by convention"))?;

    let verb = match &captures["verb"] {
        "count" => QueryVerb::Count,
        _ => QueryVerb::Find,
    };
    if captures["subject"].contains("By") {
        return Err(ResolutionError::invalid(
            method,
            "predicate after `By` must start with a property name",
        ));
    }

    let Some(predicate) = captures.name("predicate").map(|m| m.as_str()) else {
        return Ok(ParsedMethod {
            verb,
            predicate: PredicateTree::default(),
            order: Vec::new(),
        });
    };

    let (criteria, ordering) = match predicate.find(ORDER_BY) {
        Some(index) => (&predicate[..index], Some(&predicate[index + ORDER_BY.len()..])),
        None => (predicate, None),
    };

    let parser = SegmentParser::new(method, schema);
    let predicate = if criteria.is_empty() {
        PredicateTree::default()
    } else {
        parser.predicate(criteria)?
    };
    let order = match ordering {
        Some("") => return Err(ResolutionError::invalid(method, "`OrderBy` without a property")),
        Some(text) => parser.order(text)?,
        None => Vec::new(),
    };

    Ok(ParsedMethod {
        verb,
        predicate,
        order,
    })
}

struct Segment {
    property: Property,
    operator: Operator,
    next: Option<Combinator>,
}

struct SegmentParser<'a> {
    method: &'a str,
    schema: &'a EntitySchema,
    /// `(CapitalizedName, property)`, longest name first.
    candidates: Vec<(String, Property)>,
}

impl<'a> SegmentParser<'a> {
    fn new(method: &'a str, schema: &'a EntitySchema) -> Self {
        let mut candidates = schema
            .stored_properties()
            .map(|property| (capitalize(property.name), *property))
            .collect::<Vec<_>>();
        candidates.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
        Self {
            method,
            schema,
            candidates,
        }
    }

    fn predicate(&self, text: &str) -> Result<PredicateTree, ResolutionError> {
        let segments = self.segments(text)?;
        let mut tree = PredicateTree::default();
        let mut group = Vec::new();
        let mut next_param = 0;

        for segment in segments {
            let param_index = if segment.operator.takes_argument() {
                next_param += 1;
                Some(next_param - 1)
            } else {
                None
            };
            group.push(Clause {
                property: segment.property,
                operator: segment.operator,
                param_index,
            });
            if segment.next != Some(Combinator::And) {
                tree.groups.push(std::mem::take(&mut group));
            }
        }

        Ok(tree)
    }

    /// Backtracking scan: property, operator suffix, then `And`/`Or` or end.
    fn segments(&self, text: &str) -> Result<Vec<Segment>, ResolutionError> {
        let mut deepest: Option<ResolutionError> = None;

        for (name, property) in self.matching(text) {
            let after_property = &text[name.len()..];
            for (suffix, operator) in OPERATOR_SUFFIXES {
                let Some(rest) = after_property.strip_prefix(suffix) else {
                    continue;
                };
                if rest.is_empty() {
                    return Ok(vec![Segment {
                        property,
                        operator: *operator,
                        next: None,
                    }]);
                }
                for (keyword, combinator) in [("And", Combinator::And), ("Or", Combinator::Or)] {
                    let Some(tail) = rest.strip_prefix(keyword) else {
                        continue;
                    };
                    if tail.is_empty() {
                        return Err(ResolutionError::invalid(
                            self.method,
                            format!("dangling `{keyword}` at the end of the predicate"),
                        ));
                    }
                    match self.segments(tail) {
                        Ok(mut following) => {
                            following.insert(
                                0,
                                Segment {
                                    property,
                                    operator: *operator,
                                    next: Some(combinator),
                                },
                            );
                            return Ok(following);
                        }
                        Err(err) => deepest = Some(err),
                    }
                }
            }
        }

        Err(deepest.unwrap_or_else(|| {
            ResolutionError::unknown_property(self.schema.name, leading_segment(text))
        }))
    }

    fn order(&self, text: &str) -> Result<Vec<Order>, ResolutionError> {
        let mut orders = Vec::new();
        let mut rest = text;

        while !rest.is_empty() {
            let Some((name, property)) = self.matching(rest).next() else {
                return Err(ResolutionError::unknown_property(
                    self.schema.name,
                    leading_segment(rest),
                ));
            };
            rest = &rest[name.len()..];
            let direction = if let Some(tail) = rest.strip_prefix("Desc") {
                rest = tail;
                Direction::Desc
            } else {
                rest = rest.strip_prefix("Asc").unwrap_or(rest);
                Direction::Asc
            };
            orders.push(Order {
                property: property.name.to_string(),
                direction,
            });
        }

        Ok(orders)
    }

    fn matching<'t>(&'t self, text: &'t str) -> impl Iterator<Item = (&'t str, Property)> + 't {
        self.candidates
            .iter()
            .filter(move |(name, _)| text.starts_with(name.as_str()))
            .map(|(name, property)| (name.as_str(), *property))
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Text up to the next `And`/`Or` keyword, used for error reporting.
fn leading_segment(text: &str) -> &str {
    let bytes = text.as_bytes();
    for index in 1..text.len() {
        let rest = &text[index..];
        let keyword_len = if rest.starts_with("And") {
            3
        } else if rest.starts_with("Or") {
            2
        } else {
            continue;
        };
        let boundary = bytes
            .get(index + keyword_len)
            .map_or(false, u8::is_ascii_uppercase);
        if boundary {
            return &text[..index];
        }
    }
    text
}
