//! The validator: structural check, schema compliance, logic heuristics,
//! optional EXPLAIN probe.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, GroupByExpr, Query, SelectItem, SetExpr, Statement,
    TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use sibyl_core::config::ValidatorConfig;
use sibyl_core::errors::{classify_error, ErrorCategory};
use sibyl_core::traits::IQueryBackend;
use sibyl_core::types::{CandidateQuery, SchemaCandidate, ValidationResult};

/// Names visible inside a query besides the catalog tables: CTEs, derived
/// table aliases, projection aliases, and table aliases.
#[derive(Debug, Default)]
struct Scope {
    ctes: HashSet<String>,
    derived: HashSet<String>,
    projection_aliases: HashSet<String>,
    /// alias -> underlying table name
    table_aliases: HashMap<String, String>,
}

pub struct Validator<'a> {
    config: &'a ValidatorConfig,
}

impl<'a> Validator<'a> {
    pub fn new(config: &'a ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate a candidate against the narrowed schema. `is_valid=false`
    /// short-circuits the pipeline into correction; warnings never block.
    pub async fn validate(
        &self,
        candidate: &CandidateQuery,
        schema: &[SchemaCandidate],
        backend: Option<&dyn IQueryBackend>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        let sql = candidate.text.as_str();

        if sql.contains("...") || sql.to_uppercase().contains("TODO") {
            result
                .errors
                .push("SyntaxInvalid: query contains placeholder text".to_string());
            return result;
        }

        let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => {
                result.errors.push(format!("SyntaxInvalid: {e}"));
                return result;
            }
        };
        if statements.len() != sibyl_core::constants::MAX_STATEMENTS_PER_CANDIDATE {
            result.errors.push(format!(
                "SyntaxInvalid: expected a single statement, found {}",
                statements.len()
            ));
            return result;
        }
        let statement = &statements[0];
        let Statement::Query(query) = statement else {
            result.errors.push(format!(
                "ReadOnlyViolation: {} is not a read-only query",
                statement_keyword(statement)
            ));
            return result;
        };

        let mut scope = Scope::default();
        collect_query_scope(query, &mut scope);

        self.check_tables(statement, schema, &scope, &mut result);
        self.check_columns(statement, schema, &scope, &mut result);
        self.logic_heuristics(sql, query, &mut result);

        // The EXPLAIN probe only runs when static checks pass; there is no
        // point dry-running a query already known to be broken.
        if result.is_valid() && self.config.explain_probe {
            if let Some(backend) = backend {
                if let Err(e) = backend.explain(sql).await {
                    let message = e.to_string();
                    match classify_error(&message) {
                        ErrorCategory::TableNotFound | ErrorCategory::ColumnNotFound => {
                            result.errors.push(format!("SchemaViolation: {message}"));
                        }
                        _ => result.errors.push(format!("SyntaxInvalid: {message}")),
                    }
                }
            }
        }

        debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "candidate validated"
        );
        result
    }

    fn check_tables(
        &self,
        statement: &Statement,
        schema: &[SchemaCandidate],
        scope: &Scope,
        result: &mut ValidationResult,
    ) {
        let known: HashSet<String> = schema.iter().map(|c| c.table_id.to_lowercase()).collect();
        let mut flagged: HashSet<String> = HashSet::new();
        let _ = visit_relations(statement, |relation| {
            if let Some(ident) = relation.0.last() {
                let name = ident.value.to_lowercase();
                if !known.contains(&name)
                    && !scope.ctes.contains(&name)
                    && !scope.derived.contains(&name)
                    && flagged.insert(name.clone())
                {
                    result.errors.push(format!("SchemaViolation: {name}"));
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }

    fn check_columns(
        &self,
        statement: &Statement,
        schema: &[SchemaCandidate],
        scope: &Scope,
        result: &mut ValidationResult,
    ) {
        let by_table: HashMap<String, &SchemaCandidate> = schema
            .iter()
            .map(|c| (c.table_id.to_lowercase(), c))
            .collect();
        let any_column = |name: &str| schema.iter().any(|c| c.has_column(name));

        let mut flagged: HashSet<String> = HashSet::new();
        let _ = visit_expressions(statement, |expr| {
            match expr {
                Expr::Identifier(ident) => {
                    let name = ident.value.to_lowercase();
                    if !any_column(&name)
                        && !scope.projection_aliases.contains(&name)
                        && !scope.ctes.contains(&name)
                        && flagged.insert(name.clone())
                    {
                        result.errors.push(format!("SchemaViolation: column {name}"));
                    }
                }
                Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                    let qualifier = parts[0].value.to_lowercase();
                    let column = parts[parts.len() - 1].value.to_lowercase();
                    // Qualifiers that are CTEs or derived tables are out of
                    // the catalog's jurisdiction.
                    if scope.ctes.contains(&qualifier) || scope.derived.contains(&qualifier) {
                        return ControlFlow::<()>::Continue(());
                    }
                    let table = scope
                        .table_aliases
                        .get(&qualifier)
                        .cloned()
                        .unwrap_or(qualifier);
                    let ok = match by_table.get(&table) {
                        Some(candidate) => candidate.has_column(&column),
                        None => any_column(&column),
                    };
                    if !ok && flagged.insert(format!("{table}.{column}")) {
                        result
                            .errors
                            .push(format!("SchemaViolation: column {table}.{column}"));
                    }
                }
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });
    }

    fn logic_heuristics(&self, sql: &str, query: &Query, result: &mut ValidationResult) {
        let lower = sql.to_lowercase();

        let disjuncts = lower.matches(" or ").count();
        if disjuncts > self.config.max_disjuncts {
            result.warnings.push(format!(
                "excessive disjunction: {disjuncts} OR terms"
            ));
        }

        if let SetExpr::Select(select) = query.body.as_ref() {
            let grouped = match &select.group_by {
                GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
                GroupByExpr::All(_) => true,
            };

            let mut has_aggregate = false;
            let mut has_plain_column = false;
            let mut has_wildcard = false;
            for item in &select.projection {
                match item {
                    SelectItem::Wildcard(_) => has_wildcard = true,
                    SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                        match expr {
                            Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                                has_plain_column = true
                            }
                            Expr::Function(f) => {
                                if let Some(name) = f.name.0.last() {
                                    if is_aggregate(&name.value) {
                                        has_aggregate = true;
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    _ => {}
                }
            }

            if has_aggregate && has_plain_column && !grouped {
                result.warnings.push(
                    "aggregate mixed with plain columns but no GROUP BY".to_string(),
                );
            }
            if has_wildcard && select.selection.is_none() && query.limit.is_none() {
                result
                    .warnings
                    .push("unscoped wildcard projection".to_string());
            }
        }
    }
}

fn is_aggregate(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "count" | "sum" | "avg" | "min" | "max"
    )
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

fn collect_query_scope(query: &Query, scope: &mut Scope) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            scope.ctes.insert(cte.alias.name.value.to_lowercase());
            collect_query_scope(&cte.query, scope);
        }
    }
    collect_set_expr(&query.body, scope);
}

fn collect_set_expr(body: &SetExpr, scope: &mut Scope) {
    match body {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let SelectItem::ExprWithAlias { alias, .. } = item {
                    scope.projection_aliases.insert(alias.value.to_lowercase());
                }
            }
            for table in &select.from {
                collect_table_factor(&table.relation, scope);
                for join in &table.joins {
                    collect_table_factor(&join.relation, scope);
                }
            }
        }
        SetExpr::Query(query) => collect_query_scope(query, scope),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr(left, scope);
            collect_set_expr(right, scope);
        }
        _ => {}
    }
}

fn collect_table_factor(factor: &TableFactor, scope: &mut Scope) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let (Some(table), Some(alias)) = (name.0.last(), alias) {
                scope
                    .table_aliases
                    .insert(alias.name.value.to_lowercase(), table.value.to_lowercase());
            }
        }
        TableFactor::Derived {
            subquery, alias, ..
        } => {
            if let Some(alias) = alias {
                scope.derived.insert(alias.name.value.to_lowercase());
            }
            collect_query_scope(subquery, scope);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_factor(&table_with_joins.relation, scope);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, scope);
            }
        }
        _ => {}
    }
}
