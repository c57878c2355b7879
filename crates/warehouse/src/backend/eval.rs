//! Evaluates a [`Select`] over in-memory tables.
//!
//! Joins are nested loops with SQL semantics: an inner join drops a row
//! without a match, a left-outer join keeps it with the joined side absent.
//! Expressions follow SQL three-valued logic. A column missing from a stored
//! row reads as `NULL`.

use std::collections::{BTreeMap, HashMap};

use saledw_core::{TableRef, Value};

use crate::error::{WarehouseError, WarehouseResult};
use crate::query::{Expr, JoinKind, Select};

pub type Row = BTreeMap<String, Value>;

/// Aliases bound so far for one candidate output row.
type Frame<'a> = Vec<(&'a str, Option<&'a Row>)>;

pub(crate) fn evaluate(
    select: &Select,
    tables: &HashMap<String, Vec<Row>>,
) -> WarehouseResult<Vec<Row>> {
    select.validate()?;
    let graph = select.join_graph();

    let base = graph.base();
    let mut frames: Vec<Frame<'_>> = source(tables, base)?
        .iter()
        .map(|row| vec![(base.alias(), Some(row))])
        .collect();

    for join in graph.joins() {
        let rows = source(tables, &join.table)?;
        let alias = join.table.alias();
        let mut next = Vec::with_capacity(frames.len());
        for frame in &frames {
            let mut matched = false;
            for row in rows {
                let mut candidate = frame.clone();
                candidate.push((alias, Some(row)));
                if is_true(&eval(&join.on, &candidate)?) {
                    next.push(candidate);
                    matched = true;
                }
            }
            if !matched && join.kind == JoinKind::LeftOuter {
                let mut padded = frame.clone();
                padded.push((alias, None));
                next.push(padded);
            }
        }
        frames = next;
    }

    let mut out = Vec::new();
    for frame in &frames {
        if let Some(filter) = select.filter() {
            if !is_true(&eval(filter, frame)?) {
                continue;
            }
        }
        let mut row = Row::new();
        for column in select.columns() {
            row.insert(column.alias.clone(), eval(&column.expr, frame)?);
        }
        out.push(row);
    }
    Ok(out)
}

fn source<'a>(
    tables: &'a HashMap<String, Vec<Row>>,
    table: &TableRef,
) -> WarehouseResult<&'a [Row]> {
    tables
        .get(table.table())
        .map(Vec::as_slice)
        .ok_or_else(|| {
            WarehouseError::database(
                "execute",
                "42P01",
                format!("relation \"{}\" does not exist", table.table()),
            )
        })
}

fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn eval(expr: &Expr, frame: &Frame<'_>) -> WarehouseResult<Value> {
    match expr {
        Expr::Column(c) => {
            let bound = frame
                .iter()
                .find(|(alias, _)| *alias == c.table_alias)
                .ok_or_else(|| {
                    WarehouseError::database(
                        "execute",
                        "42P01",
                        format!("missing FROM-clause entry for table \"{}\"", c.table_alias),
                    )
                })?;
            Ok(bound
                .1
                .and_then(|row| row.get(&c.column).cloned())
                .unwrap_or(Value::Null))
        }
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Mul(a, b) => multiply(eval(a, frame)?, eval(b, frame)?),
        Expr::ToChar(e, format) => match eval(e, frame)? {
            Value::Null => Ok(Value::Null),
            Value::Date(date) => {
                let upper = format.to_ascii_uppercase();
                let text = upper
                    .replace("YYYY", &date.format("%Y").to_string())
                    .replace("MM", &date.format("%m").to_string())
                    .replace("DD", &date.format("%d").to_string());
                Ok(Value::Text(text))
            }
            other => Err(undefined_function(format!("to_char({other:?}, text)"))),
        },
        Expr::Eq(a, b) => Ok(bool_or_null(eval(a, frame)?.sql_eq(&eval(b, frame)?))),
        Expr::In(e, values) => {
            let lhs = eval(e, frame)?;
            if lhs.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for v in values {
                match lhs.sql_eq(v) {
                    Some(true) => return Ok(Value::Bool(true)),
                    Some(false) => {}
                    None => saw_null = true,
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Bool(false)
            })
        }
        Expr::And(a, b) => {
            let (a, b) = (as_bool(eval(a, frame)?, "AND")?, as_bool(eval(b, frame)?, "AND")?);
            Ok(bool_or_null(match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }))
        }
    }
}

fn multiply(a: Value, b: Value) -> WarehouseResult<Value> {
    match (&a, &b) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(x), Value::Int(y)) => x.checked_mul(*y).map(Value::Int).ok_or_else(overflow),
        _ => match (a.as_decimal(), b.as_decimal()) {
            (Some(x), Some(y)) => x
                .checked_mul(y)
                .map(Value::Decimal)
                .ok_or_else(overflow),
            _ => Err(undefined_function(format!("{a:?} * {b:?}"))),
        },
    }
}

fn as_bool(value: Value, op: &str) -> WarehouseResult<Option<bool>> {
    match value {
        Value::Bool(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(WarehouseError::database(
            "execute",
            "42804",
            format!("argument of {op} must be type boolean, not {other:?}"),
        )),
    }
}

fn bool_or_null(value: Option<bool>) -> Value {
    value.map(Value::Bool).unwrap_or(Value::Null)
}

fn overflow() -> WarehouseError {
    WarehouseError::database("execute", "22003", "numeric value out of range")
}

fn undefined_function(signature: String) -> WarehouseError {
    WarehouseError::database(
        "execute",
        "42883",
        format!("operator does not exist: {signature}"),
    )
}
