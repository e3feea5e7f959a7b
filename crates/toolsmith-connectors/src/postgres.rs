//! Postgres inspection over `information_schema`, limited to the connection's
//! current schema.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use toolsmith_core::{map_sql_type, Column, DataSourceSchema, ForeignKey, Table};
use tracing::debug;

use crate::registry::redact;
use crate::{Connector, ConnectorError};

#[derive(Debug, Clone, Copy)]
pub struct PostgresConnector {
    pub connect_timeout: Duration,
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PostgresConnector {
    async fn pool(&self, uri: &str) -> Result<PgPool, ConnectorError> {
        PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(self.connect_timeout)
            .connect(uri)
            .await
            .map_err(|e| ConnectorError::Unreachable {
                target: redact(uri),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["postgres", "postgresql"]
    }

    async fn validate(&self, uri: &str) -> Result<(), ConnectorError> {
        let pool = self.pool(uri).await?;
        sqlx::query("select 1").execute(&pool).await?;
        pool.close().await;
        Ok(())
    }

    async fn inspect(&self, uri: &str) -> Result<DataSourceSchema, ConnectorError> {
        let pool = self.pool(uri).await?;

        let namespace: String = sqlx::query_scalar("select current_schema()::text")
            .fetch_one(&pool)
            .await?;

        let table_names: Vec<String> = sqlx::query_scalar(
            r#"
            select table_name::text
            from information_schema.tables
            where table_type = 'BASE TABLE'
              and table_schema = $1
            order by table_name
            "#,
        )
        .bind(&namespace)
        .fetch_all(&pool)
        .await?;

        // Planner estimates; exact counts would scan every table.
        let estimate_rows = sqlx::query(
            r#"
            select c.relname::text as name, greatest(c.reltuples, 0)::bigint as estimate
            from pg_class c
            join pg_namespace n on n.oid = c.relnamespace
            where n.nspname = $1 and c.relkind = 'r'
            "#,
        )
        .bind(&namespace)
        .fetch_all(&pool)
        .await?;
        let mut estimates: BTreeMap<String, i64> = BTreeMap::new();
        for row in estimate_rows {
            estimates.insert(row.try_get("name")?, row.try_get("estimate")?);
        }

        let mut schema = DataSourceSchema::new("postgres", uri).with_metadata("schema", json!(namespace));

        for name in table_names {
            let column_rows = sqlx::query(
                r#"
                select
                  c.column_name::text as column_name,
                  c.data_type::text as data_type,
                  c.is_nullable::text as is_nullable,
                  col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position::int) as description
                from information_schema.columns c
                where c.table_schema = $1 and c.table_name = $2
                order by c.ordinal_position
                "#,
            )
            .bind(&namespace)
            .bind(&name)
            .fetch_all(&pool)
            .await?;

            let primary_key: Vec<String> = sqlx::query_scalar(
                r#"
                select kcu.column_name::text
                from information_schema.table_constraints tc
                join information_schema.key_column_usage kcu
                  on tc.constraint_name = kcu.constraint_name
                 and tc.table_schema = kcu.table_schema
                where tc.constraint_type = 'PRIMARY KEY'
                  and tc.table_schema = $1
                  and tc.table_name = $2
                order by kcu.ordinal_position
                "#,
            )
            .bind(&namespace)
            .bind(&name)
            .fetch_all(&pool)
            .await?;

            let mut table = Table::new(name.clone());
            for row in column_rows {
                let column_name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let is_nullable: String = row.try_get("is_nullable")?;
                let description: Option<String> = row.try_get("description")?;

                let mut column = Column::new(column_name.clone(), map_sql_type(&data_type));
                if is_nullable != "YES" {
                    column = column.not_null();
                }
                if primary_key.contains(&column_name) {
                    column = column.primary();
                }
                if let Some(description) = description {
                    column = column.with_description(description);
                }
                table = table.with_column(column);
            }
            if let Some(estimate) = estimates.get(&name) {
                table = table.with_row_count(u64::try_from(*estimate).unwrap_or_default());
            }

            let fk_rows = sqlx::query(
                r#"
                select
                  kcu.column_name::text as column_name,
                  ccu.table_name::text as foreign_table_name,
                  ccu.column_name::text as foreign_column_name
                from information_schema.table_constraints tc
                join information_schema.key_column_usage kcu
                  on tc.constraint_name = kcu.constraint_name
                 and tc.table_schema = kcu.table_schema
                join information_schema.constraint_column_usage ccu
                  on ccu.constraint_name = tc.constraint_name
                 and ccu.table_schema = tc.table_schema
                where tc.constraint_type = 'FOREIGN KEY'
                  and tc.table_schema = $1
                  and tc.table_name = $2
                order by tc.constraint_name, kcu.ordinal_position
                "#,
            )
            .bind(&namespace)
            .bind(&name)
            .fetch_all(&pool)
            .await?;
            for fk in fk_rows {
                schema.foreign_keys.push(ForeignKey::new(
                    name.clone(),
                    fk.try_get::<String, _>("column_name")?,
                    fk.try_get::<String, _>("foreign_table_name")?,
                    fk.try_get::<String, _>("foreign_column_name")?,
                ));
            }

            debug!(table = %name, columns = table.columns.len(), "Inspected Postgres table");
            schema.tables.push(table);
        }

        pool.close().await;
        Ok(schema)
    }
}
