//! Account Scoping Enforcer
//!
//! One function, [`enforce_account_scope`], decides what accounts a query may
//! touch. It runs at three checkpoints:
//!
//! 1. `GenerationHint`: appends the authorized account list to free-form
//!    SQL generation instructions as a required clause.
//! 2. `PostGeneration`: parses the SQL, injects `account_id IN (...)` where
//!    the usage table is read without one, and narrows an existing filter to
//!    its intersection with the authorized set.
//! 3. `ExecutionGuard`: re-parses the final SQL with the same parser and
//!    re-validates without repairing. Any mismatch is a `ScopeViolation`.
//!
//! Every identifier goes through [`AccountId::parse`] before it can reach SQL
//! text. An empty scope is denied outright. Anything the walker does not
//! understand is denied: the usage table read outside a scoped `SELECT`,
//! unknown tables, any table read from inside an expression subquery,
//! column aliases or table-function arguments on the usage table,
//! non-query statements, multiple statements.

use crate::catalog::templates::{ACCOUNT_COLUMN, USAGE_TABLE};
use crate::error::{CostwiseError, Result};
use crate::observability::audit::{AuditOutcome, ScopeAuditEntry, ScopeAuditLog};
use crate::plan::QueryPlan;
use crate::security::account_id::AccountId;
use crate::security::scope::ScopeContext;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_relations, BinaryOperator, Expr, Ident, ObjectName, Query, Select, SetExpr, Statement,
    TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::ControlFlow;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    GenerationHint,
    PostGeneration,
    ExecutionGuard,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::GenerationHint => "generation_hint",
            Checkpoint::PostGeneration => "post_generation",
            Checkpoint::ExecutionGuard => "execution_guard",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account ids the question itself asked for. Raw strings: they are only
/// trusted after validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRequest {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl AccountRequest {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeAction {
    Verified,
    Injected,
    Intersected,
    Hinted,
}

impl ScopeAction {
    fn outcome(self) -> AuditOutcome {
        match self {
            ScopeAction::Verified => AuditOutcome::Verified,
            ScopeAction::Injected => AuditOutcome::Injected,
            ScopeAction::Intersected => AuditOutcome::Intersected,
            ScopeAction::Hinted => AuditOutcome::Hinted,
        }
    }
}

/// Output of one checkpoint: instructions for `GenerationHint`, SQL otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Enforcement {
    pub text: String,
    pub action: ScopeAction,
    pub effective: BTreeSet<AccountId>,
}

/// The single scoping decision, shared by all checkpoints.
pub fn enforce_account_scope(
    checkpoint: Checkpoint,
    input: &str,
    request: &AccountRequest,
    scope: &ScopeContext,
) -> Result<Enforcement> {
    let fail = |reason: String| match checkpoint {
        Checkpoint::ExecutionGuard => CostwiseError::ScopeViolation(reason),
        _ => CostwiseError::ScopeDenied(reason),
    };

    let effective = authorize(request, scope).map_err(fail)?;

    match checkpoint {
        Checkpoint::GenerationHint => Ok(Enforcement {
            text: format!("{}\n\n{}", input.trim_end(), required_clause(&effective)),
            action: ScopeAction::Hinted,
            effective,
        }),
        Checkpoint::PostGeneration => {
            let (text, action) = rewrite(input, &effective, Mode::Repair).map_err(fail)?;
            Ok(Enforcement { text, action, effective })
        }
        Checkpoint::ExecutionGuard => {
            let (text, action) = rewrite(input, &effective, Mode::Verify).map_err(fail)?;
            Ok(Enforcement { text, action, effective })
        }
    }
}

/// `(requested or allowed) - excluded`, each id validated. Never widens
/// beyond `allowed_account_ids`.
fn authorize(request: &AccountRequest, scope: &ScopeContext) -> std::result::Result<BTreeSet<AccountId>, String> {
    if scope.is_empty() {
        return Err("caller has no accounts in scope".to_string());
    }

    let parse_all = |raw: &[String]| -> std::result::Result<BTreeSet<AccountId>, String> {
        raw.iter()
            .map(|r| AccountId::parse(r).map_err(|_| "malformed account identifier in request".to_string()))
            .collect()
    };
    let include = parse_all(&request.include)?;
    let exclude = parse_all(&request.exclude)?;

    let allowed = scope.allowed_account_ids();
    let base: BTreeSet<AccountId> = if include.is_empty() {
        allowed.clone()
    } else {
        allowed.intersection(&include).cloned().collect()
    };
    let effective: BTreeSet<AccountId> = base.difference(&exclude).cloned().collect();

    if effective.is_empty() {
        return Err("requested accounts do not overlap the caller's scope".to_string());
    }
    Ok(effective)
}

fn required_clause(effective: &BTreeSet<AccountId>) -> String {
    let list = literal_list(effective);
    format!(
        "REQUIRED: read only from {table}. Every SELECT that reads {table} must include \
         `{column} IN ({list})` in its WHERE clause. Do not reference any other {column} value. \
         Read tables only in FROM clauses, never in a subquery inside an expression.",
        table = USAGE_TABLE,
        column = ACCOUNT_COLUMN,
        list = list
    )
}

fn literal_list(ids: &BTreeSet<AccountId>) -> String {
    ids.iter().map(|id| id.sql_literal()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Repair,
    Verify,
}

fn rewrite(
    sql: &str,
    effective: &BTreeSet<AccountId>,
    mode: Mode,
) -> std::result::Result<(String, ScopeAction), String> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| format!("SQL could not be parsed: {}", e))?;
    if statements.len() != 1 {
        return Err(format!("expected exactly one statement, found {}", statements.len()));
    }

    let (total_relations, total_refs) = count_relations(&statements);

    let mut walk = ScopeWalk::new(mode, effective);
    match statements.first_mut() {
        Some(Statement::Query(query)) => walk.walk_query(query, &[])?,
        _ => return Err("only SELECT queries are allowed".to_string()),
    }

    // Relations the walker never saw sit in expression subqueries
    // (SELECT list, WHERE, HAVING, ORDER BY), where nothing is scoped.
    if walk.seen_relations != total_relations {
        return Err(format!(
            "query reads a table outside a FROM clause ({} of {} relations checked)",
            walk.seen_relations, total_relations
        ));
    }
    if walk.scoped_refs == 0 {
        return Err(format!("query does not read {}", USAGE_TABLE));
    }
    if walk.scoped_refs != total_refs {
        return Err(format!(
            "{} is referenced outside a scoped SELECT ({} of {} references scoped)",
            USAGE_TABLE, walk.scoped_refs, total_refs
        ));
    }

    let rendered = statements
        .first()
        .map(|s| s.to_string())
        .ok_or_else(|| "statement disappeared during rewrite".to_string())?;
    Ok((rendered, walk.action()))
}

fn is_usage_table(name: &ObjectName) -> bool {
    name.0
        .last()
        .map(|ident| ident.value.eq_ignore_ascii_case(USAGE_TABLE))
        .unwrap_or(false)
}

/// `(all relations, usage table relations)` anywhere in the statements.
fn count_relations(statements: &[Statement]) -> (usize, usize) {
    let (mut relations, mut usage) = (0, 0);
    for statement in statements {
        let _ = visit_relations(statement, |name: &ObjectName| {
            relations += 1;
            if is_usage_table(name) {
                usage += 1;
            }
            ControlFlow::<()>::Continue(())
        });
    }
    (relations, usage)
}

/// Relations found in one SELECT's FROM clause.
#[derive(Default)]
struct FromScan {
    usage_bindings: Vec<Vec<Ident>>,
    relations: usize,
}

struct ScopeWalk<'a> {
    mode: Mode,
    effective: &'a BTreeSet<AccountId>,
    scoped_refs: usize,
    seen_relations: usize,
    actions: Vec<ScopeAction>,
}

impl<'a> ScopeWalk<'a> {
    fn new(mode: Mode, effective: &'a BTreeSet<AccountId>) -> Self {
        Self {
            mode,
            effective,
            scoped_refs: 0,
            seen_relations: 0,
            actions: Vec::new(),
        }
    }

    fn action(&self) -> ScopeAction {
        if self.actions.contains(&ScopeAction::Intersected) {
            ScopeAction::Intersected
        } else if self.actions.contains(&ScopeAction::Injected) {
            ScopeAction::Injected
        } else {
            ScopeAction::Verified
        }
    }

    fn walk_query(&mut self, query: &mut Query, ctes: &[String]) -> std::result::Result<(), String> {
        let mut visible: Vec<String> = ctes.to_vec();
        if let Some(with) = query.with.as_mut() {
            for cte in with.cte_tables.iter_mut() {
                let name = cte.alias.name.value.to_lowercase();
                if name == USAGE_TABLE {
                    return Err(format!("a CTE may not shadow {}", USAGE_TABLE));
                }
                self.walk_query(&mut cte.query, &visible)?;
                visible.push(name);
            }
        }
        self.walk_set_expr(&mut query.body, &visible)
    }

    fn walk_set_expr(&mut self, body: &mut SetExpr, ctes: &[String]) -> std::result::Result<(), String> {
        match body {
            SetExpr::Select(select) => self.walk_select(select, ctes),
            SetExpr::Query(query) => self.walk_query(query, ctes),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left, ctes)?;
                self.walk_set_expr(right, ctes)
            }
            _ => Err("only SELECT queries are allowed".to_string()),
        }
    }

    fn walk_select(&mut self, select: &mut Select, ctes: &[String]) -> std::result::Result<(), String> {
        if select.into.is_some() {
            return Err("SELECT INTO is not allowed".to_string());
        }

        let mut scan = FromScan::default();
        for table in select.from.iter_mut() {
            self.walk_table_with_joins(table, ctes, &mut scan)?;
        }

        match scan.usage_bindings.len() {
            0 => Ok(()),
            1 => {
                let joined = scan.relations > 1;
                let qualifier = scan.usage_bindings.remove(0);
                self.scope_selection(&mut select.selection, &qualifier, joined)?;
                self.scoped_refs += 1;
                Ok(())
            }
            _ => Err(format!("{} is read more than once in one SELECT", USAGE_TABLE)),
        }
    }

    fn walk_table_with_joins(
        &mut self,
        table: &mut TableWithJoins,
        ctes: &[String],
        scan: &mut FromScan,
    ) -> std::result::Result<(), String> {
        self.walk_factor(&mut table.relation, ctes, scan)?;
        for join in table.joins.iter_mut() {
            self.walk_factor(&mut join.relation, ctes, scan)?;
        }
        Ok(())
    }

    fn walk_factor(
        &mut self,
        factor: &mut TableFactor,
        ctes: &[String],
        scan: &mut FromScan,
    ) -> std::result::Result<(), String> {
        match factor {
            TableFactor::Table { name, alias, args, .. } => {
                scan.relations += 1;
                self.seen_relations += 1;
                if args.is_some() {
                    return Err(format!("table {} may not take arguments", name));
                }
                if is_usage_table(name) {
                    // A column list renames physical columns, so the injected
                    // filter would land on the wrong one.
                    if alias.as_ref().map_or(false, |a| !a.columns.is_empty()) {
                        return Err(format!("{} may not be aliased with a column list", USAGE_TABLE));
                    }
                    let binding = match alias {
                        Some(alias) => vec![alias.name.clone()],
                        None => name.0.clone(),
                    };
                    scan.usage_bindings.push(binding);
                    return Ok(());
                }
                let is_cte = name.0.len() == 1
                    && ctes.iter().any(|cte| name.0[0].value.eq_ignore_ascii_case(cte));
                if is_cte {
                    Ok(())
                } else {
                    Err(format!("table {} is not queryable", name))
                }
            }
            TableFactor::Derived { subquery, .. } => {
                scan.relations += 1;
                self.walk_query(subquery, ctes)
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.walk_table_with_joins(table_with_joins, ctes, scan)
            }
            _ => Err("unsupported table expression".to_string()),
        }
    }

    fn scope_selection(
        &mut self,
        selection: &mut Option<Expr>,
        qualifier: &[Ident],
        joined: bool,
    ) -> std::result::Result<(), String> {
        let conjuncts = selection.clone().map(split_conjuncts).unwrap_or_default();

        let mut rest = Vec::new();
        let mut filters: Vec<BTreeSet<AccountId>> = Vec::new();
        for conjunct in conjuncts {
            match account_filter(&conjunct, qualifier) {
                Some(values) => filters.push(values?),
                None => rest.push(conjunct),
            }
        }

        match self.mode {
            Mode::Verify => {
                if filters.is_empty() {
                    return Err(format!("no {} filter on {}", ACCOUNT_COLUMN, USAGE_TABLE));
                }
                for filter in &filters {
                    if filter.is_empty() || !filter.is_subset(self.effective) {
                        return Err(format!("{} filter outside the authorized scope", ACCOUNT_COLUMN));
                    }
                }
                self.actions.push(ScopeAction::Verified);
            }
            Mode::Repair => {
                let mut narrowed = self.effective.clone();
                for filter in &filters {
                    narrowed = narrowed.intersection(filter).cloned().collect();
                }
                if narrowed.is_empty() {
                    return Err(format!(
                        "{} filter does not overlap the authorized scope",
                        ACCOUNT_COLUMN
                    ));
                }
                let action = if filters.is_empty() {
                    ScopeAction::Injected
                } else if filters.len() == 1 && filters[0] == narrowed {
                    ScopeAction::Verified
                } else {
                    ScopeAction::Intersected
                };
                debug!(action = ?action, accounts = narrowed.len(), "account filter applied");
                rest.push(account_in_list(&narrowed, qualifier, joined));
                *selection = join_conjuncts(rest);
                self.actions.push(action);
            }
        }
        Ok(())
    }
}

fn split_conjuncts(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut out = split_conjuncts(*left);
            out.extend(split_conjuncts(*right));
            out
        }
        Expr::Nested(inner) if matches!(inner.as_ref(), Expr::BinaryOp { op: BinaryOperator::And, .. }) => {
            split_conjuncts(*inner)
        }
        other => vec![other],
    }
}

fn join_conjuncts(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts
        .into_iter()
        .map(|expr| match expr {
            Expr::BinaryOp {
                op: BinaryOperator::Or | BinaryOperator::Xor,
                ..
            } => Expr::Nested(Box::new(expr)),
            other => other,
        })
        .reduce(|left, right| Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOperator::And,
            right: Box::new(right),
        })
}

fn is_account_column(expr: &Expr, qualifier: &[Ident]) -> bool {
    match expr {
        Expr::Identifier(ident) => ident.value.eq_ignore_ascii_case(ACCOUNT_COLUMN),
        Expr::CompoundIdentifier(parts) => match parts.split_last() {
            Some((last, quals)) if last.value.eq_ignore_ascii_case(ACCOUNT_COLUMN) => {
                quals.is_empty() || idents_match(quals, qualifier)
            }
            _ => false,
        },
        Expr::Nested(inner) => is_account_column(inner, qualifier),
        _ => false,
    }
}

fn idents_match(a: &[Ident], b: &[Ident]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.value.eq_ignore_ascii_case(&y.value))
}

/// `Some` when the conjunct is a positive account filter (`IN` list or
/// equality); the values are validated.
fn account_filter(
    expr: &Expr,
    qualifier: &[Ident],
) -> Option<std::result::Result<BTreeSet<AccountId>, String>> {
    match expr {
        Expr::InList {
            expr,
            list,
            negated: false,
        } if is_account_column(expr, qualifier) => Some(literal_ids(list)),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => {
            if is_account_column(left, qualifier) {
                Some(literal_ids(std::slice::from_ref(right.as_ref())))
            } else if is_account_column(right, qualifier) {
                Some(literal_ids(std::slice::from_ref(left.as_ref())))
            } else {
                None
            }
        }
        Expr::Nested(inner) => account_filter(inner, qualifier),
        _ => None,
    }
}

fn literal_ids(list: &[Expr]) -> std::result::Result<BTreeSet<AccountId>, String> {
    list.iter()
        .map(|item| match item {
            Expr::Value(Value::SingleQuotedString(raw)) | Expr::Value(Value::Number(raw, _)) => {
                AccountId::parse(raw).map_err(|_| "malformed account identifier in SQL filter".to_string())
            }
            _ => Err(format!("{} filter must compare against literals", ACCOUNT_COLUMN)),
        })
        .collect()
}

fn account_in_list(ids: &BTreeSet<AccountId>, qualifier: &[Ident], joined: bool) -> Expr {
    let column = if joined {
        let mut parts = qualifier.to_vec();
        parts.push(Ident::new(ACCOUNT_COLUMN));
        Expr::CompoundIdentifier(parts)
    } else {
        Expr::Identifier(Ident::new(ACCOUNT_COLUMN))
    };
    Expr::InList {
        expr: Box::new(column),
        list: ids
            .iter()
            .map(|id| Expr::Value(Value::SingleQuotedString(id.as_str().to_string())))
            .collect(),
        negated: false,
    }
}

/// A plan that passed post-generation scoping. Only the enforcer builds one;
/// the executor accepts nothing else.
#[derive(Debug, Clone)]
pub struct ScopedPlan {
    plan: QueryPlan,
    sql: String,
    accounts: BTreeSet<AccountId>,
    action: ScopeAction,
}

impl ScopedPlan {
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn accounts(&self) -> &BTreeSet<AccountId> {
        &self.accounts
    }

    pub fn action(&self) -> ScopeAction {
        self.action
    }
}

/// Runs the checkpoints and records every decision in the audit log.
#[derive(Clone, Default)]
pub struct AccountScopeEnforcer {
    audit: ScopeAuditLog,
}

impl AccountScopeEnforcer {
    pub fn new(audit: ScopeAuditLog) -> Self {
        Self { audit }
    }

    pub fn audit(&self) -> &ScopeAuditLog {
        &self.audit
    }

    pub fn generation_hint(
        &self,
        instructions: &str,
        request: &AccountRequest,
        scope: &ScopeContext,
        thread_id: Option<&str>,
    ) -> Result<String> {
        self.run(Checkpoint::GenerationHint, instructions, request, scope, thread_id)
            .map(|enforcement| enforcement.text)
    }

    pub fn post_generation(
        &self,
        plan: QueryPlan,
        scope: &ScopeContext,
        thread_id: Option<&str>,
    ) -> Result<ScopedPlan> {
        let enforcement = self.run(
            Checkpoint::PostGeneration,
            plan.rendered_sql(),
            plan.account_request(),
            scope,
            thread_id,
        )?;
        Ok(ScopedPlan {
            plan,
            sql: enforcement.text,
            accounts: enforcement.effective,
            action: enforcement.action,
        })
    }

    /// Returns the exact SQL to submit.
    pub fn execution_guard(
        &self,
        scoped: &ScopedPlan,
        scope: &ScopeContext,
        thread_id: Option<&str>,
    ) -> Result<String> {
        self.run(
            Checkpoint::ExecutionGuard,
            scoped.sql(),
            scoped.plan().account_request(),
            scope,
            thread_id,
        )?;
        Ok(scoped.sql().to_string())
    }

    fn run(
        &self,
        checkpoint: Checkpoint,
        input: &str,
        request: &AccountRequest,
        scope: &ScopeContext,
        thread_id: Option<&str>,
    ) -> Result<Enforcement> {
        let result = enforce_account_scope(checkpoint, input, request, scope);
        let (outcome, count, reason) = match &result {
            Ok(enforcement) => (enforcement.action.outcome(), enforcement.effective.len(), None),
            Err(CostwiseError::ScopeViolation(reason)) => (AuditOutcome::Violation, 0, Some(reason.clone())),
            Err(e) => (AuditOutcome::Denied, 0, Some(e.to_string())),
        };
        self.audit.record(ScopeAuditEntry {
            timestamp: Utc::now(),
            checkpoint: checkpoint.as_str().to_string(),
            outcome,
            user_id: scope.user_id().to_string(),
            org_role: scope.org_role().as_str().to_string(),
            thread_id: thread_id.map(str::to_string),
            effective_account_count: count,
            reason,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::scope::OrgRole;

    const BASE_SQL: &str = "SELECT product_code AS category, SUM(unblended_cost) AS total_cost \
        FROM cost_usage WHERE billing_period IN ('2024-09') \
        AND usage_date BETWEEN DATE '2024-09-01' AND DATE '2024-09-30' \
        GROUP BY product_code ORDER BY total_cost DESC LIMIT 5";

    fn scope(ids: &[&str]) -> ScopeContext {
        ScopeContext::from_raw("u1", OrgRole::Engineer, ids).unwrap()
    }

    fn post(sql: &str, scope: &ScopeContext) -> Result<Enforcement> {
        enforce_account_scope(Checkpoint::PostGeneration, sql, &AccountRequest::default(), scope)
    }

    fn guard(sql: &str, scope: &ScopeContext) -> Result<Enforcement> {
        enforce_account_scope(Checkpoint::ExecutionGuard, sql, &AccountRequest::default(), scope)
    }

    #[test]
    fn test_injects_missing_filter() {
        let out = post(BASE_SQL, &scope(&["111111111111"])).unwrap();
        assert_eq!(out.action, ScopeAction::Injected);
        assert!(out.text.contains("AND account_id IN ('111111111111') GROUP BY"));
        assert!(out.text.contains("LIMIT 5"));
    }

    #[test]
    fn test_narrows_to_intersection_not_union() {
        let sql = BASE_SQL.replace(
            "GROUP BY",
            "AND account_id IN ('111111111111', '999999999999') GROUP BY",
        );
        let out = post(&sql, &scope(&["111111111111", "222222222222"])).unwrap();
        assert_eq!(out.action, ScopeAction::Intersected);
        assert!(out.text.contains("account_id IN ('111111111111')"));
        assert!(!out.text.contains("999999999999"));
        assert!(!out.text.contains("222222222222"));
    }

    #[test]
    fn test_subset_filter_is_verified() {
        let sql = BASE_SQL.replace("GROUP BY", "AND account_id = '222222222222' GROUP BY");
        let out = post(&sql, &scope(&["111111111111", "222222222222"])).unwrap();
        assert_eq!(out.action, ScopeAction::Verified);
        assert!(out.text.contains("account_id IN ('222222222222')"));
    }

    #[test]
    fn test_disjoint_filter_is_denied() {
        let sql = BASE_SQL.replace("GROUP BY", "AND account_id IN ('999999999999') GROUP BY");
        let err = post(&sql, &scope(&["111111111111"])).unwrap_err();
        assert!(matches!(err, CostwiseError::ScopeDenied(_)));
    }

    #[test]
    fn test_empty_scope_denied_outright() {
        let empty = ScopeContext::new("u1", OrgRole::Viewer, Vec::new());
        for checkpoint in [Checkpoint::GenerationHint, Checkpoint::PostGeneration] {
            let err = enforce_account_scope(checkpoint, BASE_SQL, &AccountRequest::default(), &empty).unwrap_err();
            assert!(matches!(err, CostwiseError::ScopeDenied(_)));
        }
    }

    #[test]
    fn test_malformed_requested_id_denied() {
        let request = AccountRequest {
            include: vec!["111111111111; DROP TABLE x".to_string()],
            exclude: Vec::new(),
        };
        let err = enforce_account_scope(Checkpoint::PostGeneration, BASE_SQL, &request, &scope(&["111111111111"]))
            .unwrap_err();
        assert!(matches!(err, CostwiseError::ScopeDenied(_)));
        assert!(!err.to_string().contains("DROP"));
    }

    #[test]
    fn test_requested_and_excluded_accounts() {
        let s = scope(&["111111111111", "222222222222", "333333333333"]);
        let request = AccountRequest {
            include: vec!["222222222222".to_string(), "444444444444".to_string()],
            exclude: Vec::new(),
        };
        let out = enforce_account_scope(Checkpoint::PostGeneration, BASE_SQL, &request, &s).unwrap();
        assert!(out.text.contains("account_id IN ('222222222222')"));

        let request = AccountRequest {
            include: Vec::new(),
            exclude: vec!["111111111111".to_string()],
        };
        let out = enforce_account_scope(Checkpoint::PostGeneration, BASE_SQL, &request, &s).unwrap();
        assert!(out.text.contains("account_id IN ('222222222222', '333333333333')"));
    }

    #[test]
    fn test_disjunction_cannot_bypass_filter() {
        let sql = "SELECT SUM(unblended_cost) FROM cost_usage WHERE account_id = '999999999999' OR 1 = 1";
        let out = post(sql, &scope(&["111111111111"])).unwrap();
        assert!(out.text.contains("(account_id = '999999999999' OR 1 = 1) AND account_id IN ('111111111111')"));
    }

    #[test]
    fn test_hidden_subquery_reference_denied() {
        let sql = "SELECT SUM(unblended_cost) FROM cost_usage \
                   WHERE product_code IN (SELECT product_code FROM cost_usage)";
        assert!(post(sql, &scope(&["111111111111"])).is_err());
    }

    #[test]
    fn test_expression_subquery_cannot_read_other_tables() {
        let s = scope(&["111111111111"]);
        let sql = "SELECT product_code, (SELECT MAX(secret) FROM other_tenant_billing) AS leak \
                   FROM cost_usage GROUP BY product_code";
        assert!(matches!(post(sql, &s).unwrap_err(), CostwiseError::ScopeDenied(_)));

        let scoped = "SELECT product_code, (SELECT MAX(secret) FROM other_tenant_billing) AS leak \
                      FROM cost_usage WHERE account_id IN ('111111111111') GROUP BY product_code";
        assert!(guard(scoped, &s).unwrap_err().is_scope_violation());

        let sql = "SELECT SUM(unblended_cost) FROM cost_usage \
                   WHERE EXISTS (SELECT 1 FROM billing_raw) HAVING SUM(unblended_cost) > 0";
        assert!(post(sql, &s).is_err());

        let sql = "SELECT SUM(unblended_cost), (SELECT 1) AS one FROM cost_usage";
        assert!(post(sql, &s).is_ok());
    }

    #[test]
    fn test_usage_table_column_aliases_denied() {
        let s = scope(&["111111111111"]);
        let sql = "SELECT SUM(c) FROM cost_usage AS t (real_account, account_id, c)";
        assert!(matches!(post(sql, &s).unwrap_err(), CostwiseError::ScopeDenied(_)));

        let scoped = "SELECT SUM(c) FROM cost_usage AS t (real_account, account_id, c) \
                      WHERE account_id IN ('111111111111')";
        assert!(guard(scoped, &s).unwrap_err().is_scope_violation());

        assert!(post("SELECT SUM(unblended_cost) FROM cost_usage AS t", &s).is_ok());
    }

    #[test]
    fn test_ctes_and_unions_are_scoped_everywhere() {
        let sql = "WITH monthly AS (SELECT billing_period, SUM(unblended_cost) AS c FROM cost_usage GROUP BY billing_period) \
                   SELECT * FROM monthly";
        let out = post(sql, &scope(&["111111111111"])).unwrap();
        assert!(out.text.contains("FROM cost_usage WHERE account_id IN ('111111111111')"));

        let sql = "SELECT region FROM cost_usage UNION ALL SELECT region FROM cost_usage";
        let out = post(sql, &scope(&["111111111111"])).unwrap();
        assert_eq!(out.text.matches("account_id IN ('111111111111')").count(), 2);
    }

    #[test]
    fn test_joined_select_uses_qualified_filter() {
        let sql = "WITH t AS (SELECT product_code FROM cost_usage) \
                   SELECT u.region FROM cost_usage u JOIN t ON u.product_code = t.product_code";
        let out = post(sql, &scope(&["111111111111"])).unwrap();
        assert!(out.text.contains("u.account_id IN ('111111111111')"));
    }

    #[test]
    fn test_rejects_unknown_tables_and_statements() {
        let s = scope(&["111111111111"]);
        assert!(post("SELECT * FROM billing_raw", &s).is_err());
        assert!(post("DELETE FROM cost_usage", &s).is_err());
        assert!(post("SELECT 1; SELECT 2", &s).is_err());
        assert!(post("SELECT 1", &s).is_err());
        assert!(post("SELECT * FROM cost_usage a JOIN cost_usage b ON a.region = b.region", &s).is_err());
    }

    #[test]
    fn test_guard_never_repairs() {
        let s = scope(&["111111111111"]);
        let err = guard(BASE_SQL, &s).unwrap_err();
        assert!(err.is_scope_violation());

        let widened = BASE_SQL.replace("GROUP BY", "AND account_id IN ('111111111111', '222222222222') GROUP BY");
        assert!(guard(&widened, &s).unwrap_err().is_scope_violation());

        let repaired = post(BASE_SQL, &s).unwrap();
        let verified = guard(&repaired.text, &s).unwrap();
        assert_eq!(verified.action, ScopeAction::Verified);
    }

    #[test]
    fn test_generation_hint_lists_effective_accounts() {
        let out = enforce_account_scope(
            Checkpoint::GenerationHint,
            "Write a query.",
            &AccountRequest::default(),
            &scope(&["222222222222", "111111111111"]),
        )
        .unwrap();
        assert!(out.text.starts_with("Write a query."));
        assert!(out.text.contains("account_id IN ('111111111111', '222222222222')"));
    }
}
