//! Scalar and boolean expressions over a join graph.

use saledw_core::{TableRef, Value};

use super::SqlWriter;

/// A column of an aliased table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table_alias: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Value),
    Mul(Box<Expr>, Box<Expr>),
    /// `TO_CHAR(expr, format)`; the format is part of the definition, not data.
    ToChar(Box<Expr>, String),
    Eq(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Value>),
    And(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn column(table: &TableRef, column: impl Into<String>) -> Self {
        Expr::Column(ColumnRef {
            table_alias: table.alias().to_string(),
            column: column.into(),
        })
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }

    pub fn to_char(self, format: impl Into<String>) -> Self {
        Expr::ToChar(Box::new(self), format.into())
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(rhs))
    }

    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In(Box::new(self), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    /// Name this expression in the select list (`expr AS alias`).
    pub fn alias(self, alias: impl Into<String>) -> SelectColumn {
        SelectColumn {
            expr: self,
            alias: alias.into(),
        }
    }

    /// Every column this expression reads.
    pub fn column_refs(&self) -> Vec<&ColumnRef> {
        let mut out = Vec::new();
        self.collect_column_refs(&mut out);
        out
    }

    fn collect_column_refs<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::ToChar(e, _) | Expr::In(e, _) => e.collect_column_refs(out),
            Expr::Mul(a, b) | Expr::Eq(a, b) | Expr::And(a, b) => {
                a.collect_column_refs(out);
                b.collect_column_refs(out);
            }
        }
    }

    pub(crate) fn render(&self, w: &mut SqlWriter) {
        match self {
            Expr::Column(c) => {
                w.ident(&c.table_alias);
                w.push(".");
                w.ident(&c.column);
            }
            Expr::Literal(v) => w.literal(v),
            Expr::Mul(a, b) => binary(w, a, " * ", b),
            Expr::ToChar(e, format) => {
                w.push("TO_CHAR(");
                e.render(w);
                w.push(", ");
                w.push(&saledw_core::value::quote_literal(format));
                w.push(")");
            }
            Expr::Eq(a, b) => binary(w, a, " = ", b),
            Expr::In(e, values) => {
                if values.is_empty() {
                    w.push("FALSE");
                    return;
                }
                w.push("(");
                e.render(w);
                w.push(" IN (");
                for (idx, v) in values.iter().enumerate() {
                    if idx > 0 {
                        w.push(", ");
                    }
                    w.literal(v);
                }
                w.push("))");
            }
            Expr::And(a, b) => binary(w, a, " AND ", b),
        }
    }
}

fn binary(w: &mut SqlWriter, a: &Expr, op: &str, b: &Expr) {
    w.push("(");
    a.render(w);
    w.push(op);
    b.render(w);
    w.push(")");
}

/// An output column: expression plus stable alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectColumn {
    pub expr: Expr,
    pub alias: String,
}

/// Column references straight off a table handle: `line.col("id")`.
pub trait TableExt {
    fn col(&self, column: &str) -> Expr;
}

impl TableExt for TableRef {
    fn col(&self, column: &str) -> Expr {
        Expr::column(self, column)
    }
}
