//! Logical MySQL dump writer.
//!
//! Streams schema and data straight to the dump file: for every included
//! table a `DROP TABLE IF EXISTS` + `CREATE TABLE` pair followed by one
//! INSERT per row, then view definitions after all tables.

use crate::error::{BackupError, Result};
use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    pub include_tables: Vec<String>,
    pub include_views: Vec<String>,
    pub add_drop_table: bool,
    pub default_character_set: Option<String>,
}

pub async fn dump(pool: &MySqlPool, path: &Path, options: &DumpOptions) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "-- site-backup logical dump")?;
    writeln!(
        out,
        "-- generated at {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    if let Some(charset) = &options.default_character_set {
        writeln!(out, "SET NAMES {charset};")?;
    }
    writeln!(out, "SET FOREIGN_KEY_CHECKS=0;")?;
    writeln!(out)?;

    for table in &options.include_tables {
        dump_table(pool, &mut out, table, options.add_drop_table).await?;
    }
    for view in &options.include_views {
        dump_view(pool, &mut out, view).await?;
    }

    writeln!(out, "SET FOREIGN_KEY_CHECKS=1;")?;
    out.flush()?;
    Ok(())
}

async fn dump_table(
    pool: &MySqlPool,
    out: &mut BufWriter<File>,
    table: &str,
    add_drop_table: bool,
) -> Result<()> {
    let ident = quote_ident(table);

    let create_row = sqlx::query(&format!("SHOW CREATE TABLE {ident}"))
        .fetch_one(pool)
        .await?;
    let create_sql: String = create_row.try_get(1)?;

    writeln!(out, "-- table {table}")?;
    if add_drop_table {
        writeln!(out, "DROP TABLE IF EXISTS {ident};")?;
    }
    writeln!(out, "{create_sql};")?;

    let select_sql = format!("SELECT * FROM {ident}");
    let mut rows = sqlx::query(&select_sql).fetch(pool);
    while let Some(row) = rows.try_next().await? {
        let mut values = Vec::with_capacity(row.columns().len());
        for idx in 0..row.columns().len() {
            values.push(value_literal(&row, idx)?);
        }
        writeln!(out, "INSERT INTO {ident} VALUES ({});", values.join(","))?;
    }
    writeln!(out)?;
    Ok(())
}

async fn dump_view(pool: &MySqlPool, out: &mut BufWriter<File>, view: &str) -> Result<()> {
    let ident = quote_ident(view);

    let create_row = sqlx::query(&format!("SHOW CREATE VIEW {ident}"))
        .fetch_one(pool)
        .await?;
    let create_sql: String = create_row.try_get(1)?;

    writeln!(out, "-- view {view}")?;
    writeln!(out, "DROP VIEW IF EXISTS {ident};")?;
    writeln!(out, "{create_sql};")?;
    writeln!(out)?;
    Ok(())
}

/// Render one column value as a SQL literal.
///
/// Decoding is attempted from narrowest to widest: integers, floats, text,
/// temporal types, then raw bytes as a hex literal.
fn value_literal(row: &MySqlRow, idx: usize) -> Result<String> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok("NULL".into());
    }
    drop(raw);

    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<u64, _>(idx) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Ok(quote_string(&v));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return Ok(format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return Ok(format!("'{}'", v.format("%Y-%m-%d")));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(idx) {
        return Ok(format!("'{}'", v.format("%H:%M:%S")));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(idx) {
        return Ok(if v.is_empty() {
            "''".into()
        } else {
            format!("X'{}'", hex::encode(v))
        });
    }

    Err(BackupError::Dump(format!(
        "unsupported column type {} for column {}",
        row.column(idx).type_info().name(),
        row.column(idx).name(),
    )))
}

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-quote a string literal with MySQL escaping.
pub fn quote_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => escaped.push_str("\\'"),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\0' => escaped.push_str("\\0"),
            '\x1a' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped.push('\'');
    escaped
}
