//! SQLite implementation of `EntityStore`.
//!
//! # Responsibility
//! - Translate row-level store primitives into parameterized SQL.
//! - Check, at construction, that every registered table and column exists.
//! - Surface unique-constraint failures distinctly from other DB errors.
//!
//! # Invariants
//! - Identifiers are validated and double-quoted; values are always bound.
//! - `in_transaction` opens `BEGIN IMMEDIATE` only from autocommit state, so
//!   nested calls join the outer transaction.

use crate::error::{MtomError, MtomResult};
use crate::model::entity::{EntityId, FieldMap, FieldValue, StoredRow, ID_FIELD};
use crate::schema::{is_identifier, Schema};
use crate::store::{EntityStore, Query};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{
    ffi, params_from_iter, Connection, ErrorCode, Row, Statement, Transaction,
    TransactionBehavior,
};

/// SQLite-backed entity store bound to one connection.
pub struct SqliteEntityStore<'conn> {
    conn: &'conn Connection,
    schema: Schema,
    transactional: bool,
}

impl<'conn> SqliteEntityStore<'conn> {
    /// Creates a store over a migrated connection.
    ///
    /// # Errors
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when a registered
    ///   entity or junction table does not match the connection schema.
    pub fn try_new(conn: &'conn Connection, schema: Schema) -> MtomResult<Self> {
        ensure_store_connection_ready(conn, &schema)?;
        Ok(Self {
            conn,
            schema,
            transactional: true,
        })
    }

    /// Enables or disables transactions around multi-statement operations.
    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }
}

impl EntityStore for SqliteEntityStore<'_> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn load_row(&self, table: &str, id: EntityId) -> MtomResult<Option<StoredRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT * FROM {} WHERE id = ?1;",
            quote_table(table)?
        ))?;
        let columns = column_names(&stmt);
        let mut rows = stmt.query([id])?;
        let found = match rows.next()? {
            Some(row) => Some(parse_row(row, &columns)?),
            None => None,
        };
        Ok(found)
    }

    fn query_rows(&self, query: &Query) -> MtomResult<Vec<StoredRow>> {
        let mut sql = format!("SELECT * FROM {} WHERE 1 = 1", quote_table(&query.table)?);
        let mut bind_values: Vec<Value> = Vec::new();

        for condition in &query.conditions {
            sql.push_str(&format!(
                " AND {} = ?",
                quote_field(&query.table, &condition.field)?
            ));
            bind_values.push(to_sql_value(&condition.value)?);
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let columns = column_names(&stmt);
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut found = Vec::new();
        while let Some(row) = rows.next()? {
            found.push(parse_row(row, &columns)?);
        }

        Ok(found)
    }

    fn insert_row(
        &self,
        table: &str,
        id: Option<EntityId>,
        fields: &FieldMap,
    ) -> MtomResult<EntityId> {
        let mut columns = Vec::new();
        let mut bind_values = Vec::new();
        if let Some(id) = id {
            columns.push(format!("\"{ID_FIELD}\""));
            bind_values.push(Value::Integer(id));
        }
        for (field, value) in fields {
            columns.push(quote_field(table, field)?);
            bind_values.push(to_sql_value(value)?);
        }

        let table_sql = quote_table(table)?;
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table_sql} DEFAULT VALUES;")
        } else {
            format!(
                "INSERT INTO {table_sql} ({}) VALUES ({});",
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };

        self.conn
            .execute(&sql, params_from_iter(bind_values))
            .map_err(|err| map_write_error(table, err))?;

        Ok(id.unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    fn update_row(&self, table: &str, id: EntityId, fields: &FieldMap) -> MtomResult<bool> {
        if fields.is_empty() {
            return self.row_exists(table, id);
        }

        let mut assignments = Vec::new();
        let mut bind_values = Vec::new();
        for (field, value) in fields {
            assignments.push(format!("{} = ?", quote_field(table, field)?));
            bind_values.push(to_sql_value(value)?);
        }
        bind_values.push(Value::Integer(id));

        let changed = self
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET {} WHERE id = ?;",
                    quote_table(table)?,
                    assignments.join(", ")
                ),
                params_from_iter(bind_values),
            )
            .map_err(|err| map_write_error(table, err))?;

        Ok(changed > 0)
    }

    fn delete_row(&self, table: &str, id: EntityId) -> MtomResult<bool> {
        let changed = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", quote_table(table)?),
            [id],
        )?;
        Ok(changed > 0)
    }

    fn in_transaction<T, F>(&self, work: F) -> MtomResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> MtomResult<T>,
    {
        if !self.transactional || !self.conn.is_autocommit() {
            return work(self);
        }

        // Dropping `tx` on the error path rolls back.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let value = work(self)?;
        tx.commit()?;
        Ok(value)
    }
}

fn quote_table(table: &str) -> MtomResult<String> {
    if is_identifier(table) {
        Ok(format!("\"{table}\""))
    } else {
        Err(MtomError::InvalidData(format!(
            "`{table}` is not a valid table name"
        )))
    }
}

fn quote_field(table: &str, field: &str) -> MtomResult<String> {
    if is_identifier(field) {
        Ok(format!("\"{field}\""))
    } else {
        Err(MtomError::UnknownField {
            table: table.to_string(),
            field: field.to_string(),
        })
    }
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn parse_row(row: &Row<'_>, columns: &[String]) -> MtomResult<StoredRow> {
    let mut id = None;
    let mut fields = FieldMap::new();
    for (index, column) in columns.iter().enumerate() {
        if column == ID_FIELD {
            id = Some(row.get::<_, i64>(index)?);
        } else {
            fields.insert(column.clone(), from_sql_value(row.get_ref(index)?)?);
        }
    }

    let id = id.ok_or_else(|| MtomError::InvalidData("row has no `id` column".to_string()))?;
    Ok(StoredRow { id, fields })
}

fn to_sql_value(value: &FieldValue) -> MtomResult<Value> {
    Ok(match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        FieldValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Value::Integer(integer)
            } else if let Some(real) = number.as_f64() {
                Value::Real(real)
            } else {
                return Err(MtomError::InvalidData(format!(
                    "number `{number}` does not fit an SQLite column"
                )));
            }
        }
        FieldValue::String(text) => Value::Text(text.clone()),
        nested => Value::Text(nested.to_string()),
    })
}

fn from_sql_value(value: ValueRef<'_>) -> MtomResult<FieldValue> {
    match value {
        ValueRef::Null => Ok(FieldValue::Null),
        ValueRef::Integer(integer) => Ok(FieldValue::from(integer)),
        ValueRef::Real(real) => serde_json::Number::from_f64(real)
            .map(FieldValue::Number)
            .ok_or_else(|| MtomError::InvalidData(format!("non-finite real value `{real}`"))),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| FieldValue::String(text.to_string()))
            .map_err(|err| MtomError::InvalidData(format!("text column is not UTF-8: {err}"))),
        ValueRef::Blob(_) => Err(MtomError::InvalidData(
            "blob columns are not supported".to_string(),
        )),
    }
}

fn map_write_error(table: &str, err: rusqlite::Error) -> MtomError {
    let unique = matches!(
        &err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
    );

    if unique {
        MtomError::UniqueViolation {
            table: table.to_string(),
            message: err.to_string(),
        }
    } else {
        err.into()
    }
}

fn ensure_store_connection_ready(conn: &Connection, schema: &Schema) -> MtomResult<()> {
    for entity in schema.entities() {
        ensure_table(conn, entity.table, &[ID_FIELD])?;
    }

    for junction in schema.junctions() {
        let mut columns = vec![ID_FIELD];
        columns.extend(junction.fields.iter().map(|field| field.name));
        ensure_table(conn, junction.table, &columns)?;
    }

    Ok(())
}

fn ensure_table(conn: &Connection, table: &str, columns: &[&str]) -> MtomResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(MtomError::MissingRequiredTable(table.to_string()));
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_table(table)?))?;
    let mut rows = stmt.query([])?;
    let mut present = Vec::new();
    while let Some(row) = rows.next()? {
        present.push(row.get::<_, String>(1)?);
    }

    for column in columns {
        if !present.iter().any(|name| name == column) {
            return Err(MtomError::MissingRequiredColumn {
                table: table.to_string(),
                column: (*column).to_string(),
            });
        }
    }

    Ok(())
}
