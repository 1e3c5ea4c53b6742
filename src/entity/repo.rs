use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Row, SqliteConnection, SqlitePool, TypeInfo, ValueRef};

use super::schema::{is_reference_table, EntitySchema, FieldKind, FieldSpec};
use crate::model::{
    ENTITY_EMPTY_UPDATE, ENTITY_HAS_DEPENDENTS, ENTITY_INVALID_SORT, ENTITY_INVALID_VALUE,
    ENTITY_NOT_FOUND, ENTITY_UNKNOWN_FIELD, VALIDATION_DATE_FORMAT, VALIDATION_REFERENCE_MISSING,
    VALIDATION_REQUIRED,
};
use crate::op_log::LogScope;
use crate::time::{now_ms, PartialDate};
use crate::{AppError, AppResult};

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub sort: Option<String>,
    pub descending: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A field value after validation, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

fn row_to_value(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let v = row.try_get_raw(idx).ok();
        let val = match v {
            Some(raw) => {
                if raw.is_null() {
                    Value::Null
                } else {
                    match raw.type_info().name() {
                        "INTEGER" => row
                            .try_get::<i64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        "REAL" => row
                            .try_get::<f64, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        _ => row
                            .try_get::<String, _>(idx)
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                    }
                }
            }
            None => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

fn bind_value<'q>(
    q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    v: &FieldValue,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match v {
        FieldValue::Null => q.bind(Option::<i64>::None),
        FieldValue::Integer(i) => q.bind(*i),
        FieldValue::Real(f) => q.bind(*f),
        FieldValue::Text(s) => q.bind(s.clone()),
    }
}

fn invalid(field: &FieldSpec, message: &str, value: &Value) -> AppError {
    AppError::new(ENTITY_INVALID_VALUE, message.to_string())
        .with_context("field", field.name)
        .with_context("value", value.to_string())
}

fn coerce(field: &FieldSpec, value: &Value) -> AppResult<FieldValue> {
    let blank = matches!(value, Value::Null)
        || matches!(value, Value::String(s) if s.trim().is_empty());
    if blank {
        if field.required {
            return Err(AppError::new(VALIDATION_REQUIRED, "A required field is empty.")
                .with_context("field", field.name));
        }
        return Ok(FieldValue::Null);
    }

    match field.kind {
        FieldKind::Text => match value {
            Value::String(s) => Ok(FieldValue::Text(s.trim().to_string())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err(invalid(field, "Expected text.", value)),
        },
        FieldKind::Integer | FieldKind::Reference(_) => match value {
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| invalid(field, "Expected a whole number.", value)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| invalid(field, "Expected a whole number.", value)),
            _ => Err(invalid(field, "Expected a whole number.", value)),
        },
        FieldKind::Real => match value {
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Real)
                .ok_or_else(|| invalid(field, "Expected a number.", value)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FieldValue::Real)
                .ok_or_else(|| invalid(field, "Expected a number.", value)),
            _ => Err(invalid(field, "Expected a number.", value)),
        },
        FieldKind::Date => match value {
            Value::String(s) if PartialDate::parse(s).is_some() => {
                Ok(FieldValue::Text(s.trim().to_string()))
            }
            Value::Number(n) if n.as_i64().is_some_and(|y| (1000..=9999).contains(&y)) => {
                Ok(FieldValue::Text(n.to_string()))
            }
            _ => Err(
                AppError::new(VALIDATION_DATE_FORMAT, "Dates must be YYYY, YYYY-MM or YYYY-MM-DD.")
                    .with_context("field", field.name)
                    .with_context("value", value.to_string()),
            ),
        },
    }
}

/// Validates a payload against the schema; `partial` skips missing required fields.
fn validate(
    schema: &EntitySchema,
    data: &Map<String, Value>,
    partial: bool,
) -> AppResult<Vec<(&'static FieldSpec, FieldValue)>> {
    let mut out = Vec::with_capacity(data.len());
    for (key, value) in data {
        let field = schema.field(key).ok_or_else(|| {
            AppError::new(ENTITY_UNKNOWN_FIELD, "Field is not part of this record type.")
                .with_context("entity", schema.name)
                .with_context("field", key.clone())
        })?;
        out.push((field, coerce(field, value)?));
    }
    if !partial {
        for field in schema.fields.iter().filter(|f| f.required) {
            if !data.contains_key(field.name) {
                return Err(AppError::new(VALIDATION_REQUIRED, "A required field is missing.")
                    .with_context("entity", schema.name)
                    .with_context("field", field.name));
            }
        }
    }
    Ok(out)
}

pub(crate) async fn row_exists(
    conn: &mut SqliteConnection,
    table: &str,
    id: i64,
) -> AppResult<bool> {
    if !is_reference_table(table) {
        return Err(AppError::new(ENTITY_INVALID_VALUE, "Unknown reference table.")
            .with_context("table", table.to_string()));
    }
    let sql = format!("SELECT 1 FROM {table} WHERE id = ?");
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

async fn check_references(
    conn: &mut SqliteConnection,
    values: &[(&'static FieldSpec, FieldValue)],
) -> AppResult<()> {
    for (field, value) in values {
        if let (FieldKind::Reference(table), FieldValue::Integer(id)) = (field.kind, value) {
            if !row_exists(conn, table, *id).await? {
                return Err(AppError::new(
                    VALIDATION_REFERENCE_MISSING,
                    "Referenced record does not exist.",
                )
                .with_context("field", field.name)
                .with_context("table", table)
                .with_context("id", id.to_string()));
            }
        }
    }
    Ok(())
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub async fn list(
    pool: &SqlitePool,
    schema: &EntitySchema,
    query: &ListQuery,
) -> AppResult<Vec<Value>> {
    let sort = query.sort.as_deref().unwrap_or(schema.default_sort);
    if !schema.is_sortable(sort) {
        return Err(
            AppError::new(ENTITY_INVALID_SORT, "Records cannot be sorted by that column.")
                .with_context("entity", schema.name)
                .with_context("sort", sort.to_string()),
        );
    }
    let direction = if query.descending { "DESC" } else { "ASC" };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let term = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let where_clause = match term {
        Some(_) if !schema.searchable.is_empty() => {
            let clauses: Vec<String> = schema
                .searchable
                .iter()
                .map(|c| format!("{c} LIKE ?1 ESCAPE '\\'"))
                .collect();
            format!("WHERE {}", clauses.join(" OR "))
        }
        _ => String::new(),
    };

    let sql = format!(
        "SELECT * FROM {table} {where_clause} ORDER BY {sort} {direction}, id ASC LIMIT ?2 OFFSET ?3",
        table = schema.table
    );
    let pattern = term.map(like_pattern).unwrap_or_default();
    let rows = sqlx::query(&sql)
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "list")
                .with_context("entity", schema.name)
        })?;
    Ok(rows.into_iter().map(row_to_value).collect())
}

pub async fn get(pool: &SqlitePool, schema: &EntitySchema, id: i64) -> AppResult<Option<Value>> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", schema.table);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "get")
                .with_context("entity", schema.name)
                .with_context("id", id.to_string())
        })?;
    Ok(row.map(row_to_value))
}

pub async fn create(
    pool: &SqlitePool,
    schema: &EntitySchema,
    data: Map<String, Value>,
) -> AppResult<i64> {
    let values = validate(schema, &data, false)?;
    let mut tx = pool.begin().await?;
    check_references(&mut tx, &values).await?;

    let mut cols: Vec<&str> = values.iter().map(|(f, _)| f.name).collect();
    let mut binds: Vec<FieldValue> = values.into_iter().map(|(_, v)| v).collect();
    if schema.timestamps {
        let now = now_ms();
        cols.extend(["created_at", "updated_at"]);
        binds.extend([FieldValue::Integer(now), FieldValue::Integer(now)]);
    }

    let sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", schema.table)
    } else {
        let placeholders: Vec<&str> = cols.iter().map(|_| "?").collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            schema.table,
            cols.join(","),
            placeholders.join(",")
        )
    };
    let mut query = sqlx::query(&sql);
    for value in &binds {
        query = bind_value(query, value);
    }
    let res = query.execute(&mut *tx).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create")
            .with_context("entity", schema.name)
    })?;
    tx.commit().await?;
    Ok(res.last_insert_rowid())
}

pub async fn update(
    pool: &SqlitePool,
    schema: &EntitySchema,
    id: i64,
    data: Map<String, Value>,
) -> AppResult<()> {
    let values = validate(schema, &data, true)?;
    if values.is_empty() {
        return Err(AppError::new(ENTITY_EMPTY_UPDATE, "Nothing to update.")
            .with_context("entity", schema.name));
    }
    for (field, value) in &values {
        if let (FieldKind::Reference(table), FieldValue::Integer(target)) = (field.kind, value) {
            if table == schema.table && *target == id {
                return Err(AppError::new(
                    crate::model::VALIDATION_SELF_REFERENCE,
                    "A record cannot reference itself.",
                )
                .with_context("field", field.name));
            }
        }
    }

    let mut tx = pool.begin().await?;
    check_references(&mut tx, &values).await?;

    let mut sets: Vec<String> = values.iter().map(|(f, _)| format!("{} = ?", f.name)).collect();
    let mut binds: Vec<FieldValue> = values.into_iter().map(|(_, v)| v).collect();
    if schema.timestamps {
        sets.push("updated_at = ?".to_string());
        binds.push(FieldValue::Integer(now_ms()));
    }
    let sql = format!("UPDATE {} SET {} WHERE id = ?", schema.table, sets.join(","));
    let mut query = sqlx::query(&sql);
    for value in &binds {
        query = bind_value(query, value);
    }
    let res = query.bind(id).execute(&mut *tx).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "update")
            .with_context("entity", schema.name)
            .with_context("id", id.to_string())
    })?;
    if res.rows_affected() == 0 {
        return Err(AppError::new(ENTITY_NOT_FOUND, "Record not found.")
            .with_context("entity", schema.name)
            .with_context("id", id.to_string()));
    }
    tx.commit().await?;
    Ok(())
}

/// Counts of dependent rows per relation label, skipping relations with none.
pub async fn dependents(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    id: i64,
) -> AppResult<Vec<(&'static str, i64)>> {
    let mut found: Vec<(&'static str, i64)> = Vec::new();
    for dep in schema.dependents {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {} = ?", dep.table, dep.column);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        if count == 0 {
            continue;
        }
        match found.iter_mut().find(|(relation, _)| *relation == dep.relation) {
            Some((_, total)) => *total += count,
            None => found.push((dep.relation, count)),
        }
    }
    Ok(found)
}

pub async fn delete(pool: &SqlitePool, schema: &EntitySchema, id: i64) -> AppResult<()> {
    let scope = LogScope::new("entity", "delete", None, None);
    let result = delete_inner(pool, schema, id).await;
    match &result {
        Ok(()) => scope.success(serde_json::json!({ "entity": schema.name, "id": id })),
        Err(err) => scope.fail(err),
    }
    result
}

async fn delete_inner(pool: &SqlitePool, schema: &EntitySchema, id: i64) -> AppResult<()> {
    let mut tx = pool.begin().await?;
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", schema.table);
    let exists: Option<i64> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(AppError::new(ENTITY_NOT_FOUND, "Record not found.")
            .with_context("entity", schema.name)
            .with_context("id", id.to_string()));
    }

    let blocking = dependents(&mut tx, schema, id).await?;
    if !blocking.is_empty() {
        let relations: Vec<&str> = blocking.iter().map(|(r, _)| *r).collect();
        let mut err = AppError::new(
            ENTITY_HAS_DEPENDENTS,
            "Record is still referenced and cannot be deleted.",
        )
        .with_context("entity", schema.name)
        .with_context("id", id.to_string())
        .with_context("blocking", relations.join(", "));
        for (relation, count) in &blocking {
            err = err.with_context(format!("count.{relation}"), count.to_string());
        }
        return Err(err);
    }

    let sql = format!("DELETE FROM {} WHERE id = ?", schema.table);
    sqlx::query(&sql).bind(id).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}
