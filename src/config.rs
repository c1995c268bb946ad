use anyhow::{Context, Result};
use std::env;

use crate::query::{WarehouseTables, DEFAULT_TOKEN_TRANSFERS_TABLE, DEFAULT_TRANSACTIONS_TABLE};
use crate::warehouse::bigquery::{BigQueryConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT_MS};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bigquery: BigQueryConfig,
    pub tables: WarehouseTables,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_optional<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(key)
        .map(|v| v.parse::<T>().with_context(|| format!("{key} invalid: {v}")))
        .transpose()
}

pub fn load() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    from_env()
}

/// Reads the process environment without consulting `.env`.
pub fn from_env() -> Result<AppConfig> {
    let bigquery = BigQueryConfig {
        api_url: optional("BIGQUERY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into()),
        project_id: optional("BIGQUERY_PROJECT_ID").context("BIGQUERY_PROJECT_ID not set")?,
        access_token: optional("BIGQUERY_ACCESS_TOKEN").or_else(|| optional("GOOGLE_OAUTH_ACCESS_TOKEN")),
        location: optional("BIGQUERY_LOCATION"),
        timeout_ms: parse_optional("BIGQUERY_TIMEOUT_MS")?.unwrap_or(DEFAULT_TIMEOUT_MS),
        page_size: parse_optional("BIGQUERY_PAGE_SIZE")?,
    };
    let tables = WarehouseTables {
        transactions: optional("ERC721_TRANSACTIONS_TABLE")
            .unwrap_or_else(|| DEFAULT_TRANSACTIONS_TABLE.into()),
        token_transfers: optional("ERC721_TOKEN_TRANSFERS_TABLE")
            .unwrap_or_else(|| DEFAULT_TOKEN_TRANSFERS_TABLE.into()),
    };
    Ok(AppConfig { bigquery, tables })
}
