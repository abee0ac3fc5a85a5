//! Expression tree to SQL predicate compilation
//!
//! Literals are always bound as text parameters and cast in SQL according
//! to the type of the operand they are compared with. Parameters are
//! collected in placeholder order: each side of a comparison is compiled
//! into its own buffer and the buffers are concatenated left to right.
//!
//! A field over a row set (feedback of a call) compares row by row: the
//! predicate holds when any row matches. Everywhere else it stands for the
//! value on the newest row.

use serde_json::Value as JsonValue;

use super::fields::{FieldResolver, RowSet, Ty};
use super::{QueryError, SqlParams};
use crate::data::types::{ContainsSpec, ConvertSpec, ConvertTo, Expr, SortBy};
use crate::utils::sql::escape_like_pattern;
use crate::utils::time::{parse_timestamp, to_sql_timestamp};

/// A compiled operand: a literal not yet rendered, or a typed SQL expression
enum Operand {
    Literal(JsonValue),
    Sql {
        sql: String,
        ty: Ty,
        params: SqlParams,
    },
    /// Field over a row set; `rows.value` is typed `ty`
    Rows { rows: RowSet, scalar: String, ty: Ty },
}

impl Operand {
    /// Collapse a row-set field to its newest-row value
    fn scalar(self) -> Self {
        match self {
            Operand::Rows { scalar, ty, .. } => Operand::Sql {
                sql: scalar,
                ty,
                params: SqlParams::default(),
            },
            other => other,
        }
    }
}

/// Compile a boolean expression into a SQL predicate
pub fn compile_predicate(
    expr: &Expr,
    resolver: &dyn FieldResolver,
    params: &mut SqlParams,
) -> Result<String, QueryError> {
    Compiler { resolver }.predicate(expr, params)
}

/// Compile `sort_by` into an ORDER BY list (without the keyword)
///
/// JSON-derived values sort numerically when they parse as numbers, then
/// lexically.
pub fn compile_sort(
    sort_by: &[SortBy],
    resolver: &dyn FieldResolver,
) -> Result<String, QueryError> {
    let mut parts = Vec::with_capacity(sort_by.len());
    for key in sort_by {
        let field = resolver.resolve_sort(&key.field)?;
        let dir = key.direction.as_sql();
        match field.ty {
            Ty::Dynamic => {
                parts.push(format!(
                    "TRY_CAST({} AS DOUBLE) {} NULLS LAST",
                    field.sql, dir
                ));
                parts.push(format!("{} {} NULLS LAST", field.sql, dir));
            }
            _ => parts.push(format!("{} {} NULLS LAST", field.sql, dir)),
        }
    }
    Ok(parts.join(", "))
}

struct Compiler<'a> {
    resolver: &'a dyn FieldResolver,
}

impl Compiler<'_> {
    fn predicate(&self, expr: &Expr, params: &mut SqlParams) -> Result<String, QueryError> {
        match expr {
            Expr::And(operands) => self.junction(operands, "AND", params),
            Expr::Or(operands) => self.junction(operands, "OR", params),
            Expr::Not((inner,)) => Ok(format!("NOT ({})", self.predicate(inner, params)?)),
            Expr::Eq((lhs, rhs)) => self.comparison(lhs, rhs, "=", params),
            Expr::Gt((lhs, rhs)) => self.comparison(lhs, rhs, ">", params),
            Expr::Gte((lhs, rhs)) => self.comparison(lhs, rhs, ">=", params),
            Expr::In((lhs, values)) => self.membership(lhs, values, params),
            Expr::Contains(spec) => self.contains(spec, params),
            Expr::Literal(JsonValue::Bool(b)) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            other => match self.operand(other)? {
                Operand::Rows {
                    rows,
                    ty: Ty::Bool,
                    ..
                } => Ok(rows.any(&rows.value)),
                Operand::Rows {
                    rows,
                    ty: Ty::Dynamic,
                    ..
                } => Ok(rows.any(&format!("TRY_CAST({} AS BOOLEAN)", rows.value))),
                Operand::Sql {
                    sql,
                    ty: Ty::Bool,
                    params: p,
                } => {
                    params.extend(p);
                    Ok(sql)
                }
                Operand::Sql {
                    sql,
                    ty: Ty::Dynamic,
                    params: p,
                } => {
                    params.extend(p);
                    Ok(format!("TRY_CAST({} AS BOOLEAN)", sql))
                }
                _ => Err(QueryError::NotPredicate(describe(other))),
            },
        }
    }

    /// N-ary AND/OR; a single operand compiles to that operand alone
    fn junction(
        &self,
        operands: &[Expr],
        op: &str,
        params: &mut SqlParams,
    ) -> Result<String, QueryError> {
        match operands {
            [] => Err(QueryError::Arity(format!("{} needs at least one operand", op))),
            [single] => self.predicate(single, params),
            many => {
                let parts = many
                    .iter()
                    .map(|e| self.predicate(e, params))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(&format!(" {} ", op))))
            }
        }
    }

    fn operand(&self, expr: &Expr) -> Result<Operand, QueryError> {
        match expr {
            Expr::Literal(value) => Ok(Operand::Literal(value.clone())),
            Expr::GetField(path) => {
                let field = self.resolver.resolve(path)?;
                Ok(match field.rows {
                    Some(rows) => Operand::Rows {
                        rows,
                        scalar: field.sql,
                        ty: field.ty,
                    },
                    None => Operand::Sql {
                        sql: field.sql,
                        ty: field.ty,
                        params: SqlParams::default(),
                    },
                })
            }
            Expr::Convert(spec) => self.convert(spec),
            predicate => {
                let mut params = SqlParams::default();
                let sql = self.predicate(predicate, &mut params)?;
                Ok(Operand::Sql {
                    sql,
                    ty: Ty::Bool,
                    params,
                })
            }
        }
    }

    fn convert(&self, spec: &ConvertSpec) -> Result<Operand, QueryError> {
        let (input, params) = match self.operand(&spec.input)? {
            Operand::Rows { rows, scalar, .. } => {
                if spec.to == ConvertTo::Exists {
                    return Ok(Operand::Sql {
                        sql: format!("({})", rows.exists(&rows.value)),
                        ty: Ty::Bool,
                        params: SqlParams::default(),
                    });
                }
                let (value, ty) = converted(&rows.value, spec.to);
                let (scalar, _) = converted(&scalar, spec.to);
                return Ok(Operand::Rows {
                    rows: RowSet { value, ..rows },
                    scalar,
                    ty,
                });
            }
            Operand::Sql { sql, params, .. } => (sql, params),
            Operand::Literal(value) => {
                let mut params = SqlParams::default();
                let sql = match value {
                    JsonValue::Null => "NULL".to_string(),
                    JsonValue::String(s) => {
                        params.push(s);
                        "CAST(? AS VARCHAR)".to_string()
                    }
                    JsonValue::Number(n) => {
                        params.push(n.to_string());
                        "CAST(? AS VARCHAR)".to_string()
                    }
                    JsonValue::Bool(b) => {
                        params.push(b.to_string());
                        "CAST(? AS VARCHAR)".to_string()
                    }
                    other => {
                        return Err(QueryError::InvalidLiteral(format!(
                            "cannot convert {}",
                            other
                        )));
                    }
                };
                (sql, params)
            }
        };

        let (sql, ty) = converted(&input, spec.to);
        Ok(Operand::Sql { sql, ty, params })
    }

    fn comparison(
        &self,
        lhs: &Expr,
        rhs: &Expr,
        op: &str,
        params: &mut SqlParams,
    ) -> Result<String, QueryError> {
        let (left, right) = match (self.operand(lhs)?, self.operand(rhs)?) {
            (Operand::Rows { rows, ty, .. }, Operand::Literal(value)) => {
                return rows_comparison(&rows, ty, &value, op, false, params);
            }
            (Operand::Literal(value), Operand::Rows { rows, ty, .. }) => {
                return rows_comparison(&rows, ty, &value, op, true, params);
            }
            (left, right) => (left.scalar(), right.scalar()),
        };

        match (left, right) {
            (
                Operand::Sql {
                    sql,
                    ty,
                    params: p,
                },
                Operand::Literal(value),
            ) => {
                if value.is_null() {
                    params.extend(p);
                    return null_comparison(&sql, op);
                }
                let (field_sql, lit_sql, lit_param) = coerce_literal(&sql, ty, &value)?;
                params.extend(p);
                params.push(lit_param);
                Ok(format!("{} {} {}", field_sql, op, lit_sql))
            }
            (
                Operand::Literal(value),
                Operand::Sql {
                    sql,
                    ty,
                    params: p,
                },
            ) => {
                if value.is_null() {
                    params.extend(p);
                    return null_comparison(&sql, op);
                }
                let (field_sql, lit_sql, lit_param) = coerce_literal(&sql, ty, &value)?;
                params.push(lit_param);
                params.extend(p);
                Ok(format!("{} {} {}", lit_sql, op, field_sql))
            }
            (
                Operand::Sql {
                    sql: l,
                    ty: lt,
                    params: lp,
                },
                Operand::Sql {
                    sql: r,
                    ty: rt,
                    params: rp,
                },
            ) => {
                let (l, r) = coerce_pair(l, lt, r, rt)?;
                params.extend(lp);
                params.extend(rp);
                Ok(format!("{} {} {}", l, op, r))
            }
            (Operand::Rows { .. }, _) | (_, Operand::Rows { .. }) => Err(
                QueryError::TypeMismatch("row-set field in scalar comparison".to_string()),
            ),
            (Operand::Literal(a), Operand::Literal(b)) => {
                let ty = literal_ty(&a)?;
                if literal_ty(&b)? != ty {
                    return Err(QueryError::TypeMismatch(format!(
                        "cannot compare {} with {}",
                        a, b
                    )));
                }
                let (l, lp) = render_literal(&a, ty)?;
                let (r, rp) = render_literal(&b, ty)?;
                params.push(lp);
                params.push(rp);
                Ok(format!("{} {} {}", l, op, r))
            }
        }
    }

    fn membership(
        &self,
        lhs: &Expr,
        values: &[Expr],
        params: &mut SqlParams,
    ) -> Result<String, QueryError> {
        let (sql, ty, field_params, rows) = match self.operand(lhs)? {
            Operand::Sql { sql, ty, params } => (sql, ty, params, None),
            Operand::Rows { rows, ty, .. } => {
                (rows.value.clone(), ty, SqlParams::default(), Some(rows))
            }
            Operand::Literal(_) => {
                return Err(QueryError::TypeMismatch(
                    "$in requires a field or expression on the left".to_string(),
                ));
            }
        };
        if values.is_empty() {
            params.extend(field_params);
            return Ok("FALSE".to_string());
        }

        let mut field_sql = sql.clone();
        let mut rendered = Vec::with_capacity(values.len());
        let mut list_params = SqlParams::default();
        for value in values {
            let Expr::Literal(value) = value else {
                return Err(QueryError::TypeMismatch(
                    "$in requires a list of literals".to_string(),
                ));
            };
            if value.is_null() {
                return Err(QueryError::InvalidLiteral(
                    "null is not allowed in $in".to_string(),
                ));
            }
            let (coerced_field, lit_sql, lit_param) = coerce_literal(&sql, ty, value)?;
            if rendered.is_empty() {
                field_sql = coerced_field;
            } else if coerced_field != field_sql {
                return Err(QueryError::TypeMismatch(
                    "$in values must share one type".to_string(),
                ));
            }
            rendered.push(lit_sql);
            list_params.push(lit_param);
        }

        params.extend(field_params);
        params.extend(list_params);
        let predicate = format!("{} IN ({})", field_sql, rendered.join(", "));
        Ok(match rows {
            Some(rows) => rows.any(&predicate),
            None => predicate,
        })
    }

    fn contains(&self, spec: &ContainsSpec, params: &mut SqlParams) -> Result<String, QueryError> {
        let (input, input_params, rows) = match self.operand(&spec.input)? {
            Operand::Sql {
                sql,
                ty: Ty::Text | Ty::Dynamic,
                params,
            } => (sql, params, None),
            Operand::Rows {
                rows,
                ty: Ty::Text | Ty::Dynamic,
                ..
            } => (rows.value.clone(), SqlParams::default(), Some(rows)),
            _ => {
                return Err(QueryError::TypeMismatch(
                    "$contains requires a string-valued input".to_string(),
                ));
            }
        };

        let predicate = match self.operand(&spec.substr)?.scalar() {
            Operand::Literal(JsonValue::String(substr)) => {
                params.extend(input_params);
                params.push(format!("%{}%", escape_like_pattern(&substr)));
                let op = if spec.case_insensitive { "ILIKE" } else { "LIKE" };
                format!("{} {} ? ESCAPE '\\'", input, op)
            }
            Operand::Sql {
                sql,
                ty: Ty::Text | Ty::Dynamic,
                params: substr_params,
            } => {
                params.extend(input_params);
                params.extend(substr_params);
                if spec.case_insensitive {
                    format!("contains(lower({}), lower({}))", input, sql)
                } else {
                    format!("contains({}, {})", input, sql)
                }
            }
            _ => {
                return Err(QueryError::TypeMismatch(
                    "$contains requires a string substring".to_string(),
                ));
            }
        };
        Ok(match rows {
            Some(rows) => rows.any(&predicate),
            None => predicate,
        })
    }
}

/// Row-set field against a literal, holding when any row does
fn rows_comparison(
    rows: &RowSet,
    ty: Ty,
    value: &JsonValue,
    op: &str,
    literal_left: bool,
    params: &mut SqlParams,
) -> Result<String, QueryError> {
    if value.is_null() {
        return match op {
            "=" => Ok(format!("NOT {}", rows.exists(&rows.value))),
            _ => null_comparison(&rows.value, op),
        };
    }
    let (field_sql, lit_sql, lit_param) = coerce_literal(&rows.value, ty, value)?;
    params.push(lit_param);
    let predicate = if literal_left {
        format!("{} {} {}", lit_sql, op, field_sql)
    } else {
        format!("{} {} {}", field_sql, op, lit_sql)
    };
    Ok(rows.any(&predicate))
}

/// SQL and result type of `$convert` applied to `input`
fn converted(input: &str, to: ConvertTo) -> (String, Ty) {
    match to {
        ConvertTo::Double => (format!("TRY_CAST({} AS DOUBLE)", input), Ty::Number),
        ConvertTo::Int => (format!("TRY_CAST({} AS BIGINT)", input), Ty::Number),
        ConvertTo::String => (format!("CAST({} AS VARCHAR)", input), Ty::Text),
        ConvertTo::Bool => (format!("TRY_CAST({} AS BOOLEAN)", input), Ty::Bool),
        ConvertTo::Exists => (format!("({} IS NOT NULL)", input), Ty::Bool),
    }
}

fn null_comparison(sql: &str, op: &str) -> Result<String, QueryError> {
    if op == "=" {
        Ok(format!("{} IS NULL", sql))
    } else {
        Err(QueryError::InvalidLiteral(format!(
            "null cannot be used with '{}'",
            op
        )))
    }
}

/// The natural type of a JSON literal
fn literal_ty(value: &JsonValue) -> Result<Ty, QueryError> {
    match value {
        JsonValue::String(_) => Ok(Ty::Text),
        JsonValue::Number(_) => Ok(Ty::Number),
        JsonValue::Bool(_) => Ok(Ty::Bool),
        JsonValue::Null => Err(QueryError::InvalidLiteral("unexpected null".to_string())),
        other => Err(QueryError::InvalidLiteral(format!(
            "{} literals are not comparable",
            if other.is_array() { "array" } else { "object" }
        ))),
    }
}

/// Render a literal as a placeholder cast to `ty`
fn render_literal(value: &JsonValue, ty: Ty) -> Result<(String, String), QueryError> {
    match (ty, value) {
        (Ty::Text, JsonValue::String(s)) => Ok(("?".to_string(), s.clone())),
        (Ty::Number, JsonValue::Number(n)) => Ok(("CAST(? AS DOUBLE)".to_string(), n.to_string())),
        (Ty::Bool, JsonValue::Bool(b)) => Ok(("CAST(? AS BOOLEAN)".to_string(), b.to_string())),
        _ => Err(QueryError::TypeMismatch(format!(
            "cannot use {} as {:?}",
            value, ty
        ))),
    }
}

/// Pick the SQL for a field/literal pair so both sides compare as one type
///
/// Returns `(field_sql, literal_sql, literal_param)`.
fn coerce_literal(
    field: &str,
    ty: Ty,
    value: &JsonValue,
) -> Result<(String, String, String), QueryError> {
    let lit_ty = literal_ty(value)?;
    let mismatch = || {
        QueryError::TypeMismatch(format!(
            "cannot compare {:?} field with literal {}",
            ty, value
        ))
    };

    match (ty, lit_ty) {
        (Ty::Text, Ty::Text) | (Ty::Dynamic, Ty::Text) => {
            let (lit, param) = render_literal(value, Ty::Text)?;
            Ok((field.to_string(), lit, param))
        }
        (Ty::Number, Ty::Number) | (Ty::Bool, Ty::Bool) => {
            let (lit, param) = render_literal(value, lit_ty)?;
            Ok((field.to_string(), lit, param))
        }
        (Ty::Dynamic, Ty::Number) => {
            let (lit, param) = render_literal(value, Ty::Number)?;
            Ok((format!("TRY_CAST({} AS DOUBLE)", field), lit, param))
        }
        (Ty::Dynamic, Ty::Bool) => {
            let (lit, param) = render_literal(value, Ty::Bool)?;
            Ok((format!("TRY_CAST({} AS BOOLEAN)", field), lit, param))
        }
        (Ty::Timestamp, Ty::Number) => {
            let (lit, param) = render_literal(value, Ty::Number)?;
            Ok((format!("epoch({})", field), lit, param))
        }
        (Ty::Timestamp, Ty::Text) => {
            let raw = value.as_str().unwrap_or_default();
            let ts = parse_timestamp(raw).ok_or_else(|| {
                QueryError::InvalidLiteral(format!("'{}' is not a timestamp", raw))
            })?;
            Ok((
                field.to_string(),
                "CAST(? AS TIMESTAMP)".to_string(),
                to_sql_timestamp(&ts),
            ))
        }
        _ => Err(mismatch()),
    }
}

/// Align two SQL operands of possibly different static types
fn coerce_pair(l: String, lt: Ty, r: String, rt: Ty) -> Result<(String, String), QueryError> {
    let cast = |sql: String, target: &str| format!("TRY_CAST({} AS {})", sql, target);
    match (lt, rt) {
        (a, b) if a == b => Ok((l, r)),
        (Ty::Dynamic, Ty::Text) | (Ty::Text, Ty::Dynamic) => Ok((l, r)),
        (Ty::Dynamic, Ty::Number) => Ok((cast(l, "DOUBLE"), r)),
        (Ty::Number, Ty::Dynamic) => Ok((l, cast(r, "DOUBLE"))),
        (Ty::Dynamic, Ty::Bool) => Ok((cast(l, "BOOLEAN"), r)),
        (Ty::Bool, Ty::Dynamic) => Ok((l, cast(r, "BOOLEAN"))),
        (Ty::Dynamic | Ty::Text, Ty::Timestamp) => Ok((cast(l, "TIMESTAMP"), r)),
        (Ty::Timestamp, Ty::Dynamic | Ty::Text) => Ok((l, cast(r, "TIMESTAMP"))),
        (Ty::Timestamp, Ty::Number) => Ok((format!("epoch({})", l), r)),
        (Ty::Number, Ty::Timestamp) => Ok((l, format!("epoch({})", r))),
        _ => Err(QueryError::TypeMismatch(format!(
            "cannot compare {:?} with {:?}",
            lt, rt
        ))),
    }
}

fn describe(expr: &Expr) -> String {
    serde_json::to_string(expr).unwrap_or_else(|_| "expression".to_string())
}
