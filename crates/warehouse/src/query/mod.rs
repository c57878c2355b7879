//! Typed query model: expressions, join graphs and selects.
//!
//! This is deliberately not a general query builder. It models exactly what
//! the warehouse view needs (column references, a handful of operators,
//! inner / left-outer joins and a filter) and renders it to Postgres SQL.

pub mod expr;
pub mod join;
pub mod select;

pub use expr::{ColumnRef, Expr, SelectColumn, TableExt};
pub use join::{Join, JoinGraph, JoinKind};
pub use select::{RenderedSql, Select};

use saledw_core::Value;

/// How literal values are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `$1, $2, ...` placeholders, values collected in [`RenderedSql::params`].
    Numbered,
    /// Escaped inline literals. Required for DDL: Postgres does not accept
    /// bind parameters in `CREATE MATERIALIZED VIEW`.
    Inline,
}

/// Accumulates SQL text and bound parameters.
#[derive(Debug)]
pub(crate) struct SqlWriter {
    style: ParamStyle,
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    pub(crate) fn new(style: ParamStyle) -> Self {
        Self {
            style,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub(crate) fn ident(&mut self, name: &str) {
        let quoted = quote_ident(name);
        self.sql.push_str(&quoted);
    }

    pub(crate) fn literal(&mut self, value: &Value) {
        match self.style {
            ParamStyle::Inline => {
                let literal = value.to_sql_literal();
                self.sql.push_str(&literal);
            }
            ParamStyle::Numbered => {
                self.params.push(value.clone());
                let placeholder = format!("${}", self.params.len());
                self.sql.push_str(&placeholder);
            }
        }
    }

    pub(crate) fn finish(self) -> RenderedSql {
        RenderedSql {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("sale_line"), "\"sale_line\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn numbered_params_are_collected_in_order() {
        let mut w = SqlWriter::new(ParamStyle::Numbered);
        w.literal(&Value::from("a"));
        w.push(", ");
        w.literal(&Value::Int(2));
        let rendered = w.finish();
        assert_eq!(rendered.sql, "$1, $2");
        assert_eq!(rendered.params, vec![Value::from("a"), Value::Int(2)]);
    }
}
