//! Join graphs: a base table and an ordered chain of joins.

use saledw_core::TableRef;

use super::SqlWriter;
use super::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGraph {
    base: TableRef,
    joins: Vec<Join>,
}

impl JoinGraph {
    pub fn new(base: TableRef) -> Self {
        Self {
            base,
            joins: Vec::new(),
        }
    }

    pub fn join(mut self, table: &TableRef, on: Expr) -> Self {
        self.push(JoinKind::Inner, table, on);
        self
    }

    pub fn left_join(mut self, table: &TableRef, on: Expr) -> Self {
        self.push(JoinKind::LeftOuter, table, on);
        self
    }

    /// Append a join in place (used by extensions on an existing graph).
    pub fn push(&mut self, kind: JoinKind, table: &TableRef, on: Expr) {
        self.joins.push(Join {
            kind,
            table: table.clone(),
            on,
        });
    }

    pub fn base(&self) -> &TableRef {
        &self.base
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    /// Number of joins (the base table is not counted).
    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Base table followed by every joined table, in join order.
    pub fn tables(&self) -> impl Iterator<Item = &TableRef> {
        std::iter::once(&self.base).chain(self.joins.iter().map(|j| &j.table))
    }

    pub(crate) fn render(&self, w: &mut SqlWriter) {
        render_table(w, &self.base);
        for join in &self.joins {
            w.push(" ");
            w.push(join.kind.as_sql());
            w.push(" ");
            render_table(w, &join.table);
            w.push(" ON ");
            join.on.render(w);
        }
    }
}

fn render_table(w: &mut SqlWriter, table: &TableRef) {
    w.ident(table.table());
    w.push(" AS ");
    w.ident(table.alias());
}
