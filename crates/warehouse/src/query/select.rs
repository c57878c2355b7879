//! SELECT statements over a join graph.

use std::collections::HashSet;

use saledw_core::Value;

use super::expr::{Expr, SelectColumn};
use super::join::JoinGraph;
use super::{ParamStyle, SqlWriter};
use crate::error::{WarehouseError, WarehouseResult};

/// SQL text plus the values bound to its placeholders (empty for inline).
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    from: JoinGraph,
    columns: Vec<SelectColumn>,
    filter: Option<Expr>,
}

impl Select {
    pub fn new(from: JoinGraph, columns: Vec<SelectColumn>, filter: Option<Expr>) -> Self {
        Self {
            from,
            columns,
            filter,
        }
    }

    pub fn join_graph(&self) -> &JoinGraph {
        &self.from
    }

    pub fn columns(&self) -> &[SelectColumn] {
        &self.columns
    }

    pub fn filter(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    pub fn column_aliases(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.alias.as_str())
    }

    /// Check the statement is well formed before it reaches an engine.
    ///
    /// Table aliases and output aliases must be unique, and every column
    /// reference must name a table that is in scope: join conditions may only
    /// see the base table and the joins up to and including their own.
    pub fn validate(&self) -> WarehouseResult<()> {
        if self.columns.is_empty() {
            return Err(WarehouseError::InvalidDefinition(
                "select list is empty".to_string(),
            ));
        }

        let mut in_scope: HashSet<&str> = HashSet::new();
        in_scope.insert(self.from.base().alias());
        for join in self.from.joins() {
            if !in_scope.insert(join.table.alias()) {
                return Err(WarehouseError::InvalidDefinition(format!(
                    "table alias '{}' used twice",
                    join.table.alias()
                )));
            }
            check_refs(&join.on, &in_scope, "join condition")?;
        }

        let mut outputs: HashSet<&str> = HashSet::new();
        for column in &self.columns {
            if column.alias.is_empty() {
                return Err(WarehouseError::InvalidDefinition(
                    "output column without alias".to_string(),
                ));
            }
            if !outputs.insert(column.alias.as_str()) {
                return Err(WarehouseError::InvalidDefinition(format!(
                    "output column '{}' defined twice",
                    column.alias
                )));
            }
            check_refs(&column.expr, &in_scope, &column.alias)?;
        }

        if let Some(filter) = &self.filter {
            check_refs(filter, &in_scope, "filter")?;
        }
        Ok(())
    }

    pub fn to_sql(&self, style: ParamStyle) -> WarehouseResult<RenderedSql> {
        self.validate()?;

        let mut w = SqlWriter::new(style);
        w.push("SELECT ");
        for (idx, column) in self.columns.iter().enumerate() {
            if idx > 0 {
                w.push(", ");
            }
            column.expr.render(&mut w);
            w.push(" AS ");
            w.ident(&column.alias);
        }
        w.push(" FROM ");
        self.from.render(&mut w);
        if let Some(filter) = &self.filter {
            w.push(" WHERE ");
            filter.render(&mut w);
        }
        Ok(w.finish())
    }
}

fn check_refs(expr: &Expr, in_scope: &HashSet<&str>, context: &str) -> WarehouseResult<()> {
    for column in expr.column_refs() {
        if !in_scope.contains(column.table_alias.as_str()) {
            return Err(WarehouseError::InvalidDefinition(format!(
                "{context}: table '{}' is not in scope for column '{}'",
                column.table_alias, column.column
            )));
        }
    }
    Ok(())
}
