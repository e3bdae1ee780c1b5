//! Query descriptor resolution.
//!
//! # Responsibility
//! - Pick exactly one execution strategy per method, in priority order:
//!   native text, explicit text, named query `<Entity>.<method>`, derived
//!   name.
//! - Validate the method against the compiled plan (return shape, modifying
//!   flag, lock mode, projection fields, fetch paths, count plan).
//!
//! # Invariants
//! - A descriptor is immutable once built; the registry shares it by `Arc`.
//! - Page descriptors always carry a count plan; slice descriptors never do.
//! - Projection fields are all output columns of the plan.

use crate::query::error::ResolutionError;
use crate::query::method::{
    LockMode, MethodSignature, ParamType, ProjectionTarget, QueryMethod, QueryText, ReturnShape,
    ScalarType,
};
use crate::query::plan::{CountPlan, FetchPath, QueryPlan};
use crate::query::predicate::{parse_method_name, PredicateTree, QueryVerb};
use crate::query::translate::{
    attach_fetch, compile_derived, compile_explicit, compile_native, Compiled,
};
use crate::schema::{PropertyKind, SchemaRegistry};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Derived,
    Explicit,
    Named,
    Native,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Derived => "derived",
            Self::Explicit => "explicit",
            Self::Named => "named",
            Self::Native => "native",
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What one result row maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// Every stored property of the entity, labelled by property name.
    Entity,
    /// Fields of the method's projection target.
    Projection,
    /// Plain columns: scalars, counts, raw rows.
    Scalar,
}

/// Parameter the binder expects at one ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedParam {
    pub name: &'static str,
    pub ty: ParamType,
}

/// Immutable, fully resolved form of one repository method.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub signature: MethodSignature,
    pub entity: &'static str,
    pub strategy: Strategy,
    pub returns: ReturnShape,
    pub plan: QueryPlan,
    /// Clause tree of derived descriptors.
    pub predicate: Option<PredicateTree>,
    pub result: ResultKind,
    pub projection: Option<ProjectionTarget>,
    pub modifying: bool,
    pub lock: LockMode,
    pub read_only: bool,
    pub fetch_paths: Vec<FetchPath>,
    pub parameters: Vec<ExpectedParam>,
}

impl QueryDescriptor {
    /// Whether rows repeat their owner once per related collection row.
    pub fn fetches_collection(&self) -> bool {
        self.fetch_paths.iter().any(|fetch| fetch.collection)
    }

    pub fn method_name(&self) -> String {
        format!("{}.{}", self.signature.entity, self.signature.name)
    }
}

/// Resolves `method` into a descriptor.
///
/// `named` maps `<Entity>.<method>` to registered query text.
pub fn resolve(
    method: &QueryMethod,
    schemas: &SchemaRegistry,
    named: &BTreeMap<String, &'static str>,
) -> Result<QueryDescriptor, ResolutionError> {
    let qualified = method.qualified_name();
    let invalid = |reason: &str| ResolutionError::invalid(qualified.clone(), reason);
    let schema = schemas
        .get(method.entity)
        .ok_or_else(|| invalid("entity is not registered"))?;

    let mut predicate = None;
    let (strategy, compiled) = match method.text {
        QueryText::Native { text, count } => {
            if method.lock != LockMode::None {
                return Err(invalid("lock modes are not supported on native queries"));
            }
            if !method.fetch.is_empty() {
                return Err(invalid("fetch paths are not supported on native queries"));
            }
            if method.returns == ReturnShape::Page && count.is_none() {
                return Err(ResolutionError::MissingCountQueryForNativePagination {
                    method: qualified.clone(),
                });
            }
            (
                Strategy::Native,
                compile_native(method, text, count, schemas, schema)?,
            )
        }
        QueryText::Explicit { text, count } => (
            Strategy::Explicit,
            compile_explicit(method, text, count, schemas)?,
        ),
        QueryText::None => match named.get(&qualified) {
            Some(text) => (
                Strategy::Named,
                compile_explicit(method, text, None, schemas)?,
            ),
            None => {
                let parsed = parse_method_name(method.name, schema)?;
                if parsed.verb == QueryVerb::Count && method.returns != ReturnShape::One {
                    return Err(invalid("count methods must return a single value"));
                }
                let compiled = compile_derived(method, &parsed, schema);
                predicate = Some(parsed.predicate);
                (Strategy::Derived, compiled)
            }
        },
    };
    let Compiled { mut plan, result } = compiled;

    let is_mutation = matches!(plan, QueryPlan::Mutation(_));
    if method.modifying != is_mutation {
        return Err(invalid(if method.modifying {
            "modifying methods must run an update or delete statement"
        } else {
            "update and delete statements require the modifying flag"
        }));
    }
    if is_mutation != (method.returns == ReturnShape::RowCount) {
        return Err(invalid("modifying methods return the affected row count"));
    }
    if is_mutation && (method.lock != LockMode::None || !method.fetch.is_empty()) {
        return Err(invalid("modifying methods take no lock mode or fetch paths"));
    }

    if let QueryPlan::Select(select) = &mut plan {
        for path in method.fetch {
            if result == ResultKind::Scalar {
                return Err(invalid("fetch paths require selecting the root entity"));
            }
            attach_fetch(method, schemas, select, schema, path)?;
        }
        match method.returns {
            ReturnShape::Page if select.count.is_none() => {
                select.count = Some(CountPlan::Synthesized);
            }
            ReturnShape::Slice => select.count = None,
            _ => {}
        }
    }

    let fetch_paths = match &plan {
        QueryPlan::Select(select) => select.from.fetch_paths().cloned().collect::<Vec<_>>(),
        _ => Vec::new(),
    };
    if matches!(method.returns, ReturnShape::Page | ReturnShape::Slice)
        && fetch_paths.iter().any(|fetch| fetch.collection)
    {
        return Err(invalid(
            "collection fetches cannot be paginated; page the owners and fetch separately",
        ));
    }

    if let Some(target) = method.projection {
        let columns = plan.columns();
        if let Some(missing) = target
            .fields
            .iter()
            .find(|field| !columns.iter().any(|column| column == *field))
        {
            return Err(invalid(&format!(
                "projection `{}` field `{missing}` is not an output column",
                target.name
            )));
        }
    }

    let parameters = match &predicate {
        Some(tree) => derived_parameters(method, tree)?,
        None => method
            .params
            .iter()
            .map(|param| ExpectedParam {
                name: param.name,
                ty: param.ty,
            })
            .collect(),
    };
    if predicate.is_none() {
        let unbound = (0..method.params.len()).find(|index| !binds(&plan, *index));
        if let Some(index) = unbound {
            return Err(invalid(&format!(
                "declared parameter `{}` is not used by the query",
                method.params[index].name
            )));
        }
    }

    Ok(QueryDescriptor {
        signature: method.signature(),
        entity: method.entity,
        strategy,
        returns: method.returns,
        plan,
        predicate,
        result,
        projection: method.projection,
        modifying: method.modifying,
        lock: method.lock,
        read_only: method.read_only,
        fetch_paths,
        parameters,
    })
}

fn binds(plan: &QueryPlan, index: usize) -> bool {
    plan.templates()
        .iter()
        .any(|template| template.param_indexes().any(|bound| bound == index))
}

/// Expected parameters of a derived method: one per argument-taking clause.
///
/// Types follow the property; `In`/`NotIn` clauses expect a list.
fn derived_parameters(
    method: &QueryMethod,
    tree: &PredicateTree,
) -> Result<Vec<ExpectedParam>, ResolutionError> {
    let arity = tree.param_count();
    if !method.params.is_empty() && method.params.len() != arity {
        return Err(ResolutionError::invalid(
            method.qualified_name(),
            format!(
                "declares {} parameters but the name binds {arity}",
                method.params.len()
            ),
        ));
    }

    let mut parameters = Vec::with_capacity(arity);
    for clause in tree.clauses() {
        let Some(index) = clause.param_index else {
            continue;
        };
        let scalar = match clause.property.kind {
            PropertyKind::Integer => ScalarType::Integer,
            PropertyKind::Text => ScalarType::Text,
            PropertyKind::Identifier
            | PropertyKind::Reference { .. }
            | PropertyKind::Collection { .. } => ScalarType::Identifier,
        };
        let ty = if clause.operator.takes_list() {
            ParamType::List(scalar)
        } else {
            ParamType::Scalar(scalar)
        };
        let name = method
            .params
            .get(index)
            .map_or(clause.property.name, |param| param.name);
        parameters.push(ExpectedParam { name, ty });
    }
    Ok(parameters)
}
