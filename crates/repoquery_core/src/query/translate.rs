//! Compilation of query text and parsed method names into plans.
//!
//! # Responsibility
//! - Translate the entity query subset (`select ... from Entity alias
//!   [join ...] [where ...] [order by ...]`, `update`, `delete`) into SQL
//!   templates over the mapped tables.
//! - Compile native statements by placeholder substitution only.
//! - Build select plans for derived method names.
//!
//! # Invariants
//! - Entity paths (`alias.property`) are rewritten to `alias.column`;
//!   every other token passes through unchanged.
//! - `:name` binds the declared parameter of that name, `?N` the N-th
//!   declared parameter, bare `?` the next one.
//! - Fetch joins add the target's columns labelled `<path>.<property>`.

use crate::query::descriptor::ResultKind;
use crate::query::error::ResolutionError;
use crate::query::lexer::{find_keyword, split_top_level, tokenize, Token, TokenKind};
use crate::query::method::QueryMethod;
use crate::query::plan::{
    CountPlan, FetchPath, FromClause, Join, JoinKind, MutationPlan, NativePlan, QueryPlan,
    SelectPlan, SqlTemplate,
};
use crate::query::predicate::{ParsedMethod, QueryVerb};
use crate::schema::{EntitySchema, PropertyKind, SchemaRegistry};
use std::collections::BTreeMap;

/// Plan plus the kind of value each result row maps to.
#[derive(Debug, Clone)]
pub(crate) struct Compiled {
    pub plan: QueryPlan,
    pub result: ResultKind,
}

/// Words that keep a space before a following `(`.
const SPACED_KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "where", "on", "set", "exists", "when", "then", "else", "by",
    "select", "from", "values", "as", "like",
];

struct Binding<'s> {
    alias: String,
    schema: &'s EntitySchema,
}

struct Scope<'s> {
    bindings: Vec<Binding<'s>>,
}

impl<'s> Scope<'s> {
    fn root(&self) -> Option<&Binding<'s>> {
        self.bindings.first()
    }

    fn get(&self, alias: &str) -> Option<&'s EntitySchema> {
        self.bindings
            .iter()
            .find(|binding| binding.alias == alias)
            .map(|binding| binding.schema)
    }
}

struct Compiler<'a> {
    method: &'a QueryMethod,
    schemas: &'a SchemaRegistry,
    next_positional: usize,
}

impl<'a> Compiler<'a> {
    fn new(method: &'a QueryMethod, schemas: &'a SchemaRegistry) -> Self {
        Self {
            method,
            schemas,
            next_positional: 0,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> ResolutionError {
        ResolutionError::invalid(self.method.qualified_name(), reason)
    }

    fn tokens<'t>(&self, text: &'t str) -> Result<Vec<Token<'t>>, ResolutionError> {
        let mut tokens = tokenize(text).map_err(|reason| self.invalid(reason))?;
        while tokens.last().is_some_and(|token| token.is_symbol(";")) {
            tokens.pop();
        }
        if tokens.is_empty() {
            return Err(self.invalid("query text is empty"));
        }
        Ok(tokens)
    }

    fn entity(&self, name: &str) -> Result<&'a EntitySchema, ResolutionError> {
        self.schemas
            .get(name)
            .ok_or_else(|| self.invalid(format!("unknown entity `{name}`")))
    }

    /// Declared parameter index bound by a placeholder token.
    fn placeholder(&mut self, token: &Token<'_>) -> Result<usize, ResolutionError> {
        let declared = self.method.params;
        let index = match token.kind {
            TokenKind::Named => declared
                .iter()
                .position(|param| param.name == token.name())
                .ok_or_else(|| {
                    self.invalid(format!("`:{}` has no declared parameter", token.name()))
                })?,
            TokenKind::Positional if token.name().is_empty() => {
                self.next_positional += 1;
                self.next_positional - 1
            }
            TokenKind::Positional => token
                .name()
                .parse::<usize>()
                .ok()
                .and_then(|ordinal| ordinal.checked_sub(1))
                .ok_or_else(|| self.invalid(format!("invalid placeholder `{}`", token.text)))?,
            _ => return Err(self.invalid(format!("`{}` is not a placeholder", token.text))),
        };
        if index >= declared.len() {
            return Err(self.invalid(format!(
                "placeholder `{}` has no declared parameter",
                token.text
            )));
        }
        Ok(index)
    }

    fn is_list_param(&self, index: usize) -> bool {
        self.method
            .params
            .get(index)
            .is_some_and(|param| param.ty.is_list())
    }

    /// Column reference for an entity path, or `None` when `text` is not one.
    fn column_ref(
        &self,
        scope: &Scope<'_>,
        text: &str,
        qualify: bool,
    ) -> Result<Option<String>, ResolutionError> {
        let mut segments = text.split('.');
        let Some(alias) = segments.next() else {
            return Ok(None);
        };
        let Some(schema) = scope.get(alias) else {
            return Ok(None);
        };
        let rest = segments.collect::<Vec<_>>();
        let column = match rest.as_slice() {
            [] => schema.id_column(),
            [property] => {
                let property = schema
                    .property(property)
                    .ok_or_else(|| ResolutionError::unknown_property(schema.name, *property))?;
                property.column.ok_or_else(|| {
                    self.invalid(format!(
                        "collection `{}` cannot be used as a value; join it instead",
                        property.name
                    ))
                })?
            }
            _ => {
                return Err(self.invalid(format!(
                    "path `{text}` navigates an association; join it explicitly"
                )))
            }
        };
        Ok(Some(if qualify {
            format!("{alias}.{column}")
        } else {
            column.to_string()
        }))
    }

    /// Renders a token run, rewriting paths and placeholders.
    fn render(
        &mut self,
        tokens: &[Token<'_>],
        scope: &Scope<'_>,
        qualify: bool,
    ) -> Result<SqlTemplate, ResolutionError> {
        let mut out = SqlTemplate::new();
        let mut previous: Option<&Token<'_>> = None;
        let mut index = 0;

        while index < tokens.len() {
            let token = &tokens[index];
            let wrapped_placeholder = token.is_symbol("(")
                && tokens.get(index + 1).is_some_and(Token::is_placeholder)
                && tokens.get(index + 2).is_some_and(|next| next.is_symbol(")"));
            if wrapped_placeholder {
                if needs_space(previous, token) {
                    out.push_text(" ");
                }
                let param = self.placeholder(&tokens[index + 1])?;
                if self.is_list_param(param) {
                    out.push_param(param);
                } else {
                    out.push_text("(");
                    out.push_param(param);
                    out.push_text(")");
                }
                previous = Some(&tokens[index + 2]);
                index += 3;
                continue;
            }

            if needs_space(previous, token) {
                out.push_text(" ");
            }
            match token.kind {
                TokenKind::Named | TokenKind::Positional => out.push_param(self.placeholder(token)?),
                TokenKind::Word => match self.column_ref(scope, token.text, qualify)? {
                    Some(column) => out.push_text(&column),
                    None => out.push_text(token.text),
                },
                _ => out.push_text(token.text),
            }
            previous = Some(token);
            index += 1;
        }

        Ok(out)
    }

    fn compile_explicit(
        &mut self,
        text: &str,
        count: Option<&str>,
    ) -> Result<Compiled, ResolutionError> {
        let tokens = self.tokens(text)?;
        let first = tokens[0];

        if first.is_keyword("select") || first.is_keyword("from") {
            let (mut plan, result) = self.compile_select(&tokens)?;
            if let Some(count) = count {
                let mut count_compiler = Compiler::new(self.method, self.schemas);
                let count_tokens = count_compiler.tokens(count)?;
                let (count_plan, _) = count_compiler.compile_select(&count_tokens)?;
                plan.count = Some(CountPlan::Explicit(select_template(&count_plan)));
            }
            Ok(Compiled {
                plan: QueryPlan::Select(plan),
                result,
            })
        } else if first.is_keyword("update") {
            self.compile_update(&tokens)
        } else if first.is_keyword("delete") {
            self.compile_delete(&tokens)
        } else {
            Err(self.invalid(format!(
                "query must start with select, update or delete, found `{}`",
                first.text
            )))
        }
    }

    fn compile_select(
        &mut self,
        tokens: &[Token<'_>],
    ) -> Result<(SelectPlan, ResultKind), ResolutionError> {
        let from_index = if tokens[0].is_keyword("from") {
            0
        } else {
            find_keyword(tokens, 1, "from")
                .ok_or_else(|| self.invalid("select without a from clause"))?
        };
        let where_index = find_keyword(tokens, from_index, "where");
        let order_index = find_keyword(tokens, from_index, "order");
        if let Some(order) = order_index {
            if !tokens.get(order + 1).is_some_and(|token| token.is_keyword("by")) {
                return Err(self.invalid("`order` must be followed by `by`"));
            }
        }
        let from_end = where_index.or(order_index).unwrap_or(tokens.len());
        let (from, scope) = self.parse_from(&tokens[from_index + 1..from_end])?;
        let root = scope
            .root()
            .map(|binding| binding.schema)
            .ok_or_else(|| self.invalid("from clause names no entity"))?;

        let mut items = if from_index == 0 {
            &tokens[0..0]
        } else {
            &tokens[1..from_index]
        };
        let distinct = items.first().is_some_and(|token| token.is_keyword("distinct"));
        if distinct {
            items = &items[1..];
        }

        let (mut select, mut columns, result) = if items.is_empty() {
            let alias = from.alias.clone();
            self.entity_select(&scope, &alias)?
        } else {
            self.select_list(items, &scope)?
        };

        let fetches = from
            .joins
            .iter()
            .filter(|join| join.fetch.is_some())
            .collect::<Vec<_>>();
        if !fetches.is_empty() && !selects_root(&select, root, &from.alias, result) {
            return Err(self.invalid("fetch join requires selecting the root entity"));
        }
        for join in fetches {
            let Some(fetch) = &join.fetch else {
                continue;
            };
            let target = self.entity(fetch.target)?;
            let (list, labels) = fetch_columns(target, &join.alias, fetch.path);
            select.push_text(", ");
            select.push_text(&list);
            columns.extend(labels);
        }

        let filter_end = order_index.unwrap_or(tokens.len());
        let filter = match where_index {
            Some(index) if index + 1 >= filter_end => {
                return Err(self.invalid("empty where clause"));
            }
            Some(index) => Some(self.render(&tokens[index + 1..filter_end], &scope, true)?),
            None => None,
        };
        let order = match order_index {
            Some(index) if index + 2 >= tokens.len() => {
                return Err(self.invalid("empty order by clause"));
            }
            Some(index) => Some(self.render(&tokens[index + 2..], &scope, true)?),
            None => None,
        };

        let sort_keys = sort_keys(root, &from.alias, &columns);
        Ok((
            SelectPlan {
                distinct,
                select,
                id_column: root.id_column(),
                from,
                filter,
                order,
                columns,
                count: None,
                sort_keys,
            },
            result,
        ))
    }

    fn parse_from(
        &self,
        tokens: &[Token<'_>],
    ) -> Result<(FromClause, Scope<'a>), ResolutionError> {
        let Some(entity) = tokens.first().filter(|token| token.kind == TokenKind::Word) else {
            return Err(self.invalid("from clause names no entity"));
        };
        let root = self.entity(entity.text)?;
        let mut index = 1;
        if tokens.get(index).is_some_and(|token| token.is_keyword("as")) {
            index += 1;
        }
        let alias = match tokens.get(index) {
            Some(token) if is_alias(token) => {
                index += 1;
                token.text.to_string()
            }
            _ => default_alias(root.name),
        };

        let mut from = FromClause::new(root.table, alias.clone());
        let mut scope = Scope {
            bindings: vec![Binding {
                alias,
                schema: root,
            }],
        };

        while index < tokens.len() {
            let kind = if tokens[index].is_keyword("left") {
                index += 1;
                if tokens.get(index).is_some_and(|token| token.is_keyword("outer")) {
                    index += 1;
                }
                JoinKind::Left
            } else if tokens[index].is_keyword("inner") {
                index += 1;
                JoinKind::Inner
            } else {
                JoinKind::Inner
            };
            if !tokens.get(index).is_some_and(|token| token.is_keyword("join")) {
                return Err(self.invalid(format!(
                    "unexpected `{}` in from clause",
                    tokens[index.min(tokens.len() - 1)].text
                )));
            }
            index += 1;
            let fetch = tokens.get(index).is_some_and(|token| token.is_keyword("fetch"));
            if fetch {
                index += 1;
            }

            let path = tokens
                .get(index)
                .filter(|token| token.kind == TokenKind::Word)
                .ok_or_else(|| self.invalid("join without an association path"))?;
            index += 1;
            let Some((owner_alias, association)) = path.text.split_once('.') else {
                return Err(self.invalid(format!(
                    "join path `{}` must be `alias.association`",
                    path.text
                )));
            };
            let owner = scope
                .get(owner_alias)
                .ok_or_else(|| self.invalid(format!("unknown alias `{owner_alias}`")))?;

            if tokens.get(index).is_some_and(|token| token.is_keyword("as")) {
                index += 1;
            }
            let join_alias = match tokens.get(index) {
                Some(token) if is_alias(token) => {
                    index += 1;
                    token.text.to_string()
                }
                _ => format!("{owner_alias}_{association}"),
            };

            let is_root = scope
                .root()
                .is_some_and(|binding| binding.alias == owner_alias);
            if fetch && !is_root {
                return Err(self.invalid("fetch joins are only supported from the root entity"));
            }
            let (join, target) = association_join(
                self.method,
                self.schemas,
                owner_alias,
                owner,
                association,
                join_alias.clone(),
                kind,
                fetch,
            )?;
            from.joins.push(join);
            scope.bindings.push(Binding {
                alias: join_alias,
                schema: target,
            });
        }

        Ok((from, scope))
    }

    fn entity_select(
        &self,
        scope: &Scope<'_>,
        alias: &str,
    ) -> Result<(SqlTemplate, Vec<String>, ResultKind), ResolutionError> {
        let schema = scope
            .get(alias)
            .ok_or_else(|| self.invalid(format!("unknown alias `{alias}`")))?;
        let result = if self.method.projection.is_some() {
            ResultKind::Projection
        } else {
            ResultKind::Entity
        };
        Ok((
            SqlTemplate::from_text(schema.select_list(alias, None)),
            schema.labels(None),
            result,
        ))
    }

    fn select_list(
        &mut self,
        items: &[Token<'_>],
        scope: &Scope<'_>,
    ) -> Result<(SqlTemplate, Vec<String>, ResultKind), ResolutionError> {
        if let [single] = items {
            if single.kind == TokenKind::Word && !single.text.contains('.') && scope.get(single.text).is_some() {
                return self.entity_select(scope, single.text);
            }
        }
        if items[0].is_keyword("new") {
            return self.constructor_select(items, scope);
        }

        let mut select = SqlTemplate::new();
        let mut columns = Vec::new();
        for (position, item) in split_top_level(items).into_iter().enumerate() {
            if item.is_empty() {
                return Err(self.invalid("empty select item"));
            }
            let (expression, label) = match item {
                [.., keyword, label] if keyword.is_keyword("as") && item.len() > 2 => {
                    (&item[..item.len() - 2], unquote(label.text).to_string())
                }
                [path] if path.kind == TokenKind::Word => {
                    let label = path.text.rsplit('.').next().unwrap_or(path.text);
                    let label = if scope.get(label).is_some() { "id" } else { label };
                    (item, label.to_string())
                }
                [function, ..] if function.is_keyword("count") => (item, "count".to_string()),
                _ => (item, format!("col_{position}")),
            };
            if position > 0 {
                select.push_text(", ");
            }
            select.append(&self.render(expression, scope, true)?);
            select.push_text(&format!(" AS \"{label}\""));
            columns.push(label);
        }

        let result = if self.method.projection.is_some() {
            ResultKind::Projection
        } else {
            ResultKind::Scalar
        };
        Ok((select, columns, result))
    }

    /// `new Name(expr, ...)`: labels come from the projection fields.
    fn constructor_select(
        &mut self,
        items: &[Token<'_>],
        scope: &Scope<'_>,
    ) -> Result<(SqlTemplate, Vec<String>, ResultKind), ResolutionError> {
        let (name, arguments) = match items {
            [_, name, open, arguments @ .., close]
                if name.kind == TokenKind::Word && open.is_symbol("(") && close.is_symbol(")") =>
            {
                (name.text.rsplit('.').next().unwrap_or(name.text), arguments)
            }
            _ => return Err(self.invalid("malformed constructor expression")),
        };
        let target = self
            .method
            .projection
            .ok_or_else(|| self.invalid(format!("constructor `{name}` requires a projection target")))?;
        if target.name != name {
            return Err(self.invalid(format!(
                "constructor `{name}` does not match projection `{}`",
                target.name
            )));
        }
        let arguments = split_top_level(arguments);
        if arguments.len() != target.fields.len() {
            return Err(self.invalid(format!(
                "constructor `{name}` takes {} arguments, projection declares {} fields",
                arguments.len(),
                target.fields.len()
            )));
        }

        let mut select = SqlTemplate::new();
        for (position, (argument, field)) in arguments.iter().zip(target.fields).enumerate() {
            if position > 0 {
                select.push_text(", ");
            }
            select.append(&self.render(argument, scope, true)?);
            select.push_text(&format!(" AS \"{field}\""));
        }
        let columns = target.fields.iter().map(|field| (*field).to_string()).collect();
        Ok((select, columns, ResultKind::Projection))
    }

    fn compile_update(&mut self, tokens: &[Token<'_>]) -> Result<Compiled, ResolutionError> {
        let set_index =
            find_keyword(tokens, 1, "set").ok_or_else(|| self.invalid("update without set"))?;
        let (schema, scope) = self.mutation_target(&tokens[1..set_index])?;
        let where_index = find_keyword(tokens, set_index, "where");

        let mut statement = SqlTemplate::from_text(format!("UPDATE {} SET ", schema.table));
        let set_end = where_index.unwrap_or(tokens.len());
        if set_index + 1 >= set_end {
            return Err(self.invalid("empty set clause"));
        }
        statement.append(&self.render(&tokens[set_index + 1..set_end], &scope, false)?);
        self.push_mutation_filter(&mut statement, tokens, where_index, &scope)?;

        Ok(Compiled {
            plan: QueryPlan::Mutation(MutationPlan {
                statement,
                entity: schema.name,
            }),
            result: ResultKind::Scalar,
        })
    }

    fn compile_delete(&mut self, tokens: &[Token<'_>]) -> Result<Compiled, ResolutionError> {
        let start = if tokens.get(1).is_some_and(|token| token.is_keyword("from")) {
            2
        } else {
            1
        };
        let where_index = find_keyword(tokens, start, "where");
        let (schema, scope) =
            self.mutation_target(&tokens[start..where_index.unwrap_or(tokens.len())])?;

        let mut statement = SqlTemplate::from_text(format!("DELETE FROM {}", schema.table));
        self.push_mutation_filter(&mut statement, tokens, where_index, &scope)?;

        Ok(Compiled {
            plan: QueryPlan::Mutation(MutationPlan {
                statement,
                entity: schema.name,
            }),
            result: ResultKind::Scalar,
        })
    }

    fn mutation_target(
        &self,
        tokens: &[Token<'_>],
    ) -> Result<(&'a EntitySchema, Scope<'a>), ResolutionError> {
        let (entity, rest) = match tokens {
            [entity, rest @ ..] if entity.kind == TokenKind::Word => (entity, rest),
            _ => return Err(self.invalid("statement names no entity")),
        };
        let schema = self.entity(entity.text)?;
        let alias = match rest {
            [] => default_alias(schema.name),
            [alias] | [_, alias] if is_alias(alias) => alias.text.to_string(),
            _ => return Err(self.invalid("joins are not supported in bulk statements")),
        };
        Ok((
            schema,
            Scope {
                bindings: vec![Binding { alias, schema }],
            },
        ))
    }

    fn push_mutation_filter(
        &mut self,
        statement: &mut SqlTemplate,
        tokens: &[Token<'_>],
        where_index: Option<usize>,
        scope: &Scope<'_>,
    ) -> Result<(), ResolutionError> {
        if let Some(index) = where_index {
            if index + 1 >= tokens.len() {
                return Err(self.invalid("empty where clause"));
            }
            statement.push_text(" WHERE ");
            statement.append(&self.render(&tokens[index + 1..], scope, false)?);
        }
        Ok(())
    }

    fn compile_native(
        &mut self,
        text: &str,
        count: Option<&str>,
        root: &EntitySchema,
    ) -> Result<Compiled, ResolutionError> {
        let text = text.trim().trim_end_matches(';').trim_end();
        let tokens = self.tokens(text)?;
        let statement = self.substitute(text, &tokens)?;
        let first = tokens[0];
        let result = if self.method.projection.is_some() {
            ResultKind::Projection
        } else {
            ResultKind::Entity
        };

        if first.is_keyword("select") || first.is_keyword("with") {
            let count = match count {
                Some(count) => {
                    let count = count.trim().trim_end_matches(';').trim_end();
                    let mut count_compiler = Compiler::new(self.method, self.schemas);
                    let count_tokens = count_compiler.tokens(count)?;
                    Some(count_compiler.substitute(count, &count_tokens)?)
                }
                None => None,
            };
            let columns = native_columns(text, &tokens, self.schemas);
            Ok(Compiled {
                plan: QueryPlan::Native(NativePlan {
                    text: statement,
                    count,
                    columns,
                }),
                result,
            })
        } else if ["update", "delete", "insert", "replace"]
            .iter()
            .any(|keyword| first.is_keyword(keyword))
        {
            Ok(Compiled {
                plan: QueryPlan::Mutation(MutationPlan {
                    statement,
                    entity: root.name,
                }),
                result: ResultKind::Scalar,
            })
        } else {
            Err(self.invalid(format!("unsupported native statement `{}`", first.text)))
        }
    }

    /// Original text with placeholders replaced by parameter slots.
    fn substitute(
        &mut self,
        text: &str,
        tokens: &[Token<'_>],
    ) -> Result<SqlTemplate, ResolutionError> {
        let mut template = SqlTemplate::new();
        let mut last = 0;
        for token in tokens.iter().filter(|token| token.is_placeholder()) {
            template.push_text(&text[last..token.start]);
            template.push_param(self.placeholder(token)?);
            last = token.end;
        }
        template.push_text(&text[last..]);
        Ok(template)
    }
}

/// Compiles explicit or named entity-query text.
pub(crate) fn compile_explicit(
    method: &QueryMethod,
    text: &str,
    count: Option<&str>,
    schemas: &SchemaRegistry,
) -> Result<Compiled, ResolutionError> {
    Compiler::new(method, schemas).compile_explicit(text, count)
}

/// Compiles a native statement against `root`, the method's entity.
pub(crate) fn compile_native(
    method: &QueryMethod,
    text: &str,
    count: Option<&str>,
    schemas: &SchemaRegistry,
    root: &EntitySchema,
) -> Result<Compiled, ResolutionError> {
    Compiler::new(method, schemas).compile_native(text, count, root)
}

/// Builds the select plan of a parsed derived method name.
pub(crate) fn compile_derived(
    method: &QueryMethod,
    parsed: &ParsedMethod,
    schema: &EntitySchema,
) -> Compiled {
    let alias = default_alias(schema.name);
    let (select, columns, result) = match parsed.verb {
        QueryVerb::Count => (
            SqlTemplate::from_text("COUNT(*) AS \"count\""),
            vec!["count".to_string()],
            ResultKind::Scalar,
        ),
        QueryVerb::Find => (
            SqlTemplate::from_text(schema.select_list(&alias, None)),
            schema.labels(None),
            if method.projection.is_some() {
                ResultKind::Projection
            } else {
                ResultKind::Entity
            },
        ),
    };

    let groups = &parsed.predicate.groups;
    let filter = (!groups.is_empty()).then(|| {
        let mut filter = SqlTemplate::new();
        for (group_index, group) in groups.iter().enumerate() {
            if group_index > 0 {
                filter.push_text(" OR ");
            }
            let wrap = groups.len() > 1 && group.len() > 1;
            if wrap {
                filter.push_text("(");
            }
            for (clause_index, clause) in group.iter().enumerate() {
                if clause_index > 0 {
                    filter.push_text(" AND ");
                }
                let column = clause.property.column.unwrap_or(clause.property.name);
                filter.push_text(&format!("{alias}.{column} {}", clause.operator.sql()));
                if let Some(param) = clause.param_index {
                    filter.push_text(" ");
                    filter.push_param(param);
                }
            }
            if wrap {
                filter.push_text(")");
            }
        }
        filter
    });

    let order = (!parsed.order.is_empty()).then(|| {
        let terms = parsed
            .order
            .iter()
            .filter_map(|order| {
                let column = schema.property(&order.property)?.column?;
                Some(format!("{alias}.{column} {}", order.direction.as_sql()))
            })
            .collect::<Vec<_>>();
        SqlTemplate::from_text(terms.join(", "))
    });

    let sort_keys = sort_keys(schema, &alias, &columns);
    Compiled {
        plan: QueryPlan::Select(SelectPlan {
            distinct: false,
            select,
            from: FromClause::new(schema.table, alias),
            id_column: schema.id_column(),
            filter,
            order,
            columns,
            count: None,
            sort_keys,
        }),
        result,
    }
}

/// Adds an eager-fetch LEFT JOIN of `path` to a root-entity select.
pub(crate) fn attach_fetch(
    method: &QueryMethod,
    schemas: &SchemaRegistry,
    plan: &mut SelectPlan,
    root: &EntitySchema,
    path: &str,
) -> Result<(), ResolutionError> {
    if plan.from.fetches(path) {
        return Ok(());
    }
    let alias = plan.from.alias.clone();
    let join_alias = format!("{alias}_{path}");
    let (join, target) = association_join(
        method,
        schemas,
        &alias,
        root,
        path,
        join_alias.clone(),
        JoinKind::Left,
        true,
    )?;
    let (list, labels) = fetch_columns(target, &join_alias, path);
    plan.from.joins.push(join);
    plan.select.push_text(", ");
    plan.select.push_text(&list);
    plan.columns.extend(labels);
    Ok(())
}

/// Full `SELECT ... FROM ... WHERE ...` template of a plan, without ordering.
pub(crate) fn select_template(plan: &SelectPlan) -> SqlTemplate {
    let mut template = SqlTemplate::from_text(if plan.distinct {
        "SELECT DISTINCT "
    } else {
        "SELECT "
    });
    template.append(&plan.select);
    template.push_text(" FROM ");
    template.push_text(&plan.from.render(true));
    if let Some(filter) = &plan.filter {
        template.push_text(" WHERE ");
        template.append(filter);
    }
    template
}

#[allow(clippy::too_many_arguments)]
fn association_join<'s>(
    method: &QueryMethod,
    schemas: &'s SchemaRegistry,
    owner_alias: &str,
    owner: &EntitySchema,
    association: &str,
    join_alias: String,
    kind: JoinKind,
    fetch: bool,
) -> Result<(Join, &'s EntitySchema), ResolutionError> {
    let invalid = |reason: String| ResolutionError::invalid(method.qualified_name(), reason);
    let property = owner
        .property(association)
        .ok_or_else(|| ResolutionError::unknown_property(owner.name, association))?;
    let target_name = property
        .target()
        .ok_or_else(|| invalid(format!("`{association}` is not an association")))?;
    let target = schemas
        .get(target_name)
        .ok_or_else(|| invalid(format!("unknown entity `{target_name}`")))?;

    let on = match property.kind {
        PropertyKind::Reference { .. } => {
            let column = property.column.unwrap_or(property.name);
            format!("{join_alias}.{} = {owner_alias}.{column}", target.id_column())
        }
        PropertyKind::Collection { mapped_by, .. } => {
            let column = target
                .property(mapped_by)
                .and_then(|inverse| inverse.column)
                .ok_or_else(|| {
                    invalid(format!(
                        "`{association}` is mapped by `{mapped_by}`, which `{}` does not store",
                        target.name
                    ))
                })?;
            format!("{join_alias}.{column} = {owner_alias}.{}", owner.id_column())
        }
        _ => return Err(invalid(format!("`{association}` is not an association"))),
    };

    Ok((
        Join {
            kind,
            table: target.table,
            alias: join_alias,
            on,
            fetch: fetch.then(|| FetchPath {
                path: property.name,
                target: target.name,
                collection: property.is_collection(),
            }),
        },
        target,
    ))
}

fn fetch_columns(target: &EntitySchema, join_alias: &str, path: &str) -> (String, Vec<String>) {
    (
        target.select_list(join_alias, Some(path)),
        target.labels(Some(path)),
    )
}

fn selects_root(select: &SqlTemplate, root: &EntitySchema, alias: &str, result: ResultKind) -> bool {
    result != ResultKind::Scalar && select.to_string() == root.select_list(alias, None)
}

/// Sortable keys: root properties, then output labels.
fn sort_keys(root: &EntitySchema, alias: &str, columns: &[String]) -> BTreeMap<String, String> {
    let mut keys = BTreeMap::new();
    for property in root.stored_properties() {
        if let Some(column) = property.column {
            keys.insert(property.name.to_string(), format!("{alias}.{column}"));
        }
    }
    for label in columns {
        keys.entry(label.clone())
            .or_insert_with(|| format!("\"{label}\""));
    }
    keys
}

/// Output labels of a native select list.
fn native_columns(text: &str, tokens: &[Token<'_>], schemas: &SchemaRegistry) -> Vec<String> {
    let Some(select_index) = find_keyword(tokens, 0, "select") else {
        return Vec::new();
    };
    let Some(from_index) = find_keyword(tokens, select_index + 1, "from") else {
        return Vec::new();
    };
    let from_table = tokens
        .get(from_index + 1)
        .filter(|token| token.kind == TokenKind::Word)
        .map(|token| token.text);
    let from_alias = tokens
        .get(from_index + 2)
        .filter(|token| is_alias(token))
        .map(|token| token.text);

    let mut items = &tokens[select_index + 1..from_index];
    if items.first().is_some_and(|token| token.is_keyword("distinct")) {
        items = &items[1..];
    }

    let table_columns = |table: Option<&str>| -> Vec<String> {
        table
            .and_then(|table| schemas.by_table(table))
            .map(|schema| {
                schema
                    .stored_properties()
                    .filter_map(|property| property.column.map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut columns = Vec::new();
    for item in split_top_level(items) {
        match item {
            [] => {}
            [.., keyword, label] if keyword.is_keyword("as") => {
                columns.push(unquote(label.text).to_string());
            }
            [star] if star.is_symbol("*") => columns.extend(table_columns(from_table)),
            [path] if path.kind == TokenKind::Word && path.text.ends_with(".*") => {
                let qualifier = path.text.trim_end_matches(".*");
                let table = if Some(qualifier) == from_alias {
                    from_table
                } else {
                    Some(qualifier)
                };
                columns.extend(table_columns(table));
            }
            [path] if matches!(path.kind, TokenKind::Word | TokenKind::Quoted) => {
                let label = path.text.rsplit('.').next().unwrap_or(path.text);
                columns.push(unquote(label).to_string());
            }
            expression => {
                if let (Some(first), Some(last)) = (expression.first(), expression.last()) {
                    columns.push(text[first.start..last.end].to_string());
                }
            }
        }
    }
    columns
}

fn is_alias(token: &Token<'_>) -> bool {
    const RESERVED: &[&str] = &[
        "join", "left", "inner", "outer", "fetch", "where", "order", "set", "on", "group",
    ];
    token.kind == TokenKind::Word
        && !token.text.contains('.')
        && !RESERVED.iter().any(|word| token.is_keyword(word))
}

/// Lowercased entity initial, the alias of generated queries.
pub(crate) fn default_alias(entity: &str) -> String {
    entity
        .chars()
        .next()
        .map(|first| first.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "e".to_string())
}

fn unquote(text: &str) -> &str {
    text.trim_matches('"')
}

fn needs_space(previous: Option<&Token<'_>>, token: &Token<'_>) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    if token.is_symbol(")") || token.is_symbol(",") || previous.is_symbol("(") {
        return false;
    }
    if token.is_symbol("(") && previous.kind == TokenKind::Word {
        return SPACED_KEYWORDS
            .iter()
            .any(|keyword| previous.is_keyword(keyword));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::{compile_derived, compile_explicit, compile_native, Compiled};
    use crate::query::descriptor::ResultKind;
    use crate::query::error::ResolutionError;
    use crate::query::method::{Param, ProjectionTarget, QueryMethod, ReturnShape};
    use crate::query::plan::{CountPlan, JoinKind, QueryPlan, SelectPlan};
    use crate::query::predicate::parse_method_name;
    use crate::schema::{EntitySchema, Property, SchemaRegistry};

    fn schemas() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                EntitySchema::new("Member", "member")
                    .with(Property::id("id", "member_id"))
                    .with(Property::text("username", "username"))
                    .with(Property::integer("age", "age"))
                    .with(Property::reference("team", "team_id", "Team")),
            )
            .expect("member schema");
        registry
            .register(
                EntitySchema::new("Team", "team")
                    .with(Property::id("id", "team_id"))
                    .with(Property::text("name", "name"))
                    .with(Property::collection("members", "Member", "team")),
            )
            .expect("team schema");
        registry
    }

    fn select(compiled: &Compiled) -> &SelectPlan {
        match &compiled.plan {
            QueryPlan::Select(plan) => plan,
            other => panic!("expected a select plan, got {other:?}"),
        }
    }

    #[test]
    fn named_parameters_bind_by_declaration_order() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findUser", ReturnShape::List)
            .params(&[Param::text("username"), Param::integer("age")]);
        let compiled = compile_explicit(
            &METHOD,
            "select m from Member m where m.age = :age and m.username = :username",
            None,
            &schemas(),
        )
        .expect("compiles");
        let plan = select(&compiled);
        assert_eq!(compiled.result, ResultKind::Entity);
        assert_eq!(
            plan.filter.as_ref().map(ToString::to_string).as_deref(),
            Some("m.age = ?2 and m.username = ?1")
        );
        assert_eq!(plan.columns, vec!["id", "username", "age", "team"]);
    }

    #[test]
    fn constructor_expression_labels_projection_fields() {
        const DTO: ProjectionTarget = ProjectionTarget::new("MemberDto", &["id", "username", "teamName"]);
        const METHOD: QueryMethod =
            QueryMethod::new("Member", "findMemberDto", ReturnShape::List).projection(DTO);
        let compiled = compile_explicit(
            &METHOD,
            "select new study.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
            None,
            &schemas(),
        )
        .expect("compiles");
        let plan = select(&compiled);
        assert_eq!(
            plan.select.to_string(),
            "m.member_id AS \"id\", m.username AS \"username\", t.name AS \"teamName\""
        );
        assert_eq!(plan.from.render(true), "member m JOIN team t ON t.team_id = m.team_id");
        assert_eq!(compiled.result, ResultKind::Projection);
    }

    #[test]
    fn fetch_join_adds_prefixed_target_columns() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findMemberFetchJoin", ReturnShape::List);
        let compiled = compile_explicit(
            &METHOD,
            "select m from Member m left join fetch m.team t",
            None,
            &schemas(),
        )
        .expect("compiles");
        let plan = select(&compiled);
        assert_eq!(plan.from.joins[0].kind, JoinKind::Left);
        assert!(plan.columns.contains(&"team.name".to_string()));
        assert!(plan
            .select
            .to_string()
            .ends_with("t.team_id AS \"team.id\", t.name AS \"team.name\""));
        assert!(!plan.fetches_collection());
    }

    #[test]
    fn collection_join_uses_the_inverse_column() {
        const METHOD: QueryMethod = QueryMethod::new("Team", "findAllWithMembers", ReturnShape::List);
        let compiled = compile_explicit(
            &METHOD,
            "select distinct t from Team t left join fetch t.members",
            None,
            &schemas(),
        )
        .expect("compiles");
        let plan = select(&compiled);
        assert!(plan.distinct);
        assert!(plan.fetches_collection());
        assert_eq!(
            plan.from.render(true),
            "team t LEFT JOIN member t_members ON t_members.team_id = t.team_id"
        );
    }

    #[test]
    fn list_parameter_in_parentheses_expands_once() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findByNames", ReturnShape::List)
            .params(&[Param::text_list("names")]);
        let compiled = compile_explicit(
            &METHOD,
            "select m from Member m where m.username in (:names)",
            None,
            &schemas(),
        )
        .expect("compiles");
        assert_eq!(
            select(&compiled).filter.as_ref().map(ToString::to_string).as_deref(),
            Some("m.username in ?1")
        );
    }

    #[test]
    fn bulk_update_uses_bare_columns() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "bulkAgePlus", ReturnShape::RowCount)
            .params(&[Param::integer("age")])
            .modifying();
        let compiled = compile_explicit(
            &METHOD,
            "update Member m set m.age = m.age + 1 where m.age >= :age",
            None,
            &schemas(),
        )
        .expect("compiles");
        match compiled.plan {
            QueryPlan::Mutation(plan) => {
                assert_eq!(plan.entity, "Member");
                assert_eq!(
                    plan.statement.to_string(),
                    "UPDATE member SET age = age + 1 WHERE age >= ?1"
                );
            }
            other => panic!("expected a mutation plan, got {other:?}"),
        }
    }

    #[test]
    fn explicit_count_text_becomes_the_count_plan() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findByAge", ReturnShape::Page)
            .params(&[Param::integer("age")])
            .query_with_count(
                "select m from Member m left join m.team t where m.age = :age",
                "select count(m.username) from Member m where m.age = :age",
            );
        let compiled = compile_explicit(
            &METHOD,
            "select m from Member m left join m.team t where m.age = :age",
            Some("select count(m.username) from Member m where m.age = :age"),
            &schemas(),
        )
        .expect("compiles");
        match &select(&compiled).count {
            Some(CountPlan::Explicit(template)) => assert_eq!(
                template.to_string(),
                "SELECT count(m.username) AS \"count\" FROM member m WHERE m.age = ?1"
            ),
            other => panic!("expected an explicit count, got {other:?}"),
        }
    }

    #[test]
    fn unknown_paths_and_placeholders_are_rejected() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findOdd", ReturnShape::List)
            .params(&[Param::text("username")]);
        let err = compile_explicit(&METHOD, "select m from Member m where m.nickname = :username", None, &schemas())
            .expect_err("unknown property");
        assert!(matches!(err, ResolutionError::UnknownProperty { ref property, .. } if property == "nickname"));

        let err = compile_explicit(&METHOD, "select m from Member m where m.username = :name", None, &schemas())
            .expect_err("undeclared parameter");
        assert!(matches!(err, ResolutionError::AmbiguousOrInvalid { .. }));
    }

    #[test]
    fn native_text_passes_through_with_slots() {
        const VIEW: ProjectionTarget = ProjectionTarget::new("MemberProjection", &["id", "username", "teamName"]);
        const METHOD: QueryMethod = QueryMethod::new("Member", "findByNativeProjection", ReturnShape::Page)
            .projection(VIEW);
        let text = "select m.member_id as id, m.username, t.name as teamName from member m left join team t on m.team_id = t.team_id where m.age > ?";
        let registry = schemas();
        let member = registry.get("Member").cloned().expect("member schema");
        let err = compile_native(&METHOD, text, None, &registry, &member).expect_err("no declared parameter");
        assert!(matches!(err, ResolutionError::AmbiguousOrInvalid { .. }));

        const WITH_PARAM: QueryMethod = METHOD.params(&[Param::integer("age")]);
        let compiled = compile_native(&WITH_PARAM, text, None, &registry, &member).expect("compiles");
        match compiled.plan {
            QueryPlan::Native(plan) => {
                assert_eq!(plan.columns, vec!["id", "username", "teamName"]);
                assert!(plan.text.to_string().ends_with("where m.age > ?1"));
            }
            other => panic!("expected a native plan, got {other:?}"),
        }
    }

    #[test]
    fn native_star_expands_to_table_columns() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findByNativeQuery", ReturnShape::One)
            .params(&[Param::text("username")]);
        let registry = schemas();
        let member = registry.get("Member").cloned().expect("member schema");
        let compiled = compile_native(
            &METHOD,
            "select * from member where username = ?;",
            None,
            &registry,
            &member,
        )
        .expect("compiles");
        assert_eq!(compiled.plan.columns(), &["member_id", "username", "age", "team_id"]);
        assert_eq!(compiled.result, ResultKind::Entity);
    }

    #[test]
    fn derived_names_compile_to_filters_and_order() {
        const METHOD: QueryMethod = QueryMethod::new("Member", "findByUsernameOrAgeGreaterThanAndTeamIsNullOrderByAgeDesc", ReturnShape::List);
        let registry = schemas();
        let member = registry.get("Member").expect("member schema");
        let parsed = parse_method_name(METHOD.name, member).expect("parses");
        let compiled = compile_derived(&METHOD, &parsed, member);
        let plan = select(&compiled);
        assert_eq!(
            plan.filter.as_ref().map(ToString::to_string).as_deref(),
            Some("m.username = ?1 OR (m.age > ?2 AND m.team_id IS NULL)")
        );
        assert_eq!(
            plan.order.as_ref().map(ToString::to_string).as_deref(),
            Some("m.age DESC")
        );
        assert_eq!(plan.sort_keys.get("username").map(String::as_str), Some("m.username"));
    }
}
