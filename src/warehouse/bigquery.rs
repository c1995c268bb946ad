//! BigQuery v2 REST client: `jobs.query` followed by `jobs.getQueryResults`
//! until the job is complete and every page has been read.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{ResultSet, Warehouse};
use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct BigQueryConfig {
    pub api_url: String,
    /// Project billed for the query job.
    pub project_id: String,
    pub access_token: Option<String>,
    pub location: Option<String>,
    /// How long the server may hold each request open waiting for the job.
    pub timeout_ms: u64,
    pub page_size: Option<u32>,
}

impl BigQueryConfig {
    pub fn new<S: Into<String>>(project_id: S) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project_id: project_id.into(),
            access_token: None,
            location: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            page_size: None,
        }
    }
}

#[derive(Clone)]
pub struct BigQueryClient {
    http: Client,
    cfg: BigQueryConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryPage {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl BigQueryClient {
    pub fn new(cfg: BigQueryConfig) -> Result<Self> {
        if cfg.project_id.trim().is_empty() {
            return Err(Error::invalid_argument("BigQuery project id is empty"));
        }
        let http = Client::builder().build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &BigQueryConfig {
        &self.cfg
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.cfg.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn start_query(&self, sql: &str) -> Result<QueryPage> {
        let url = format!(
            "{}/projects/{}/queries",
            self.cfg.api_url.trim_end_matches('/'),
            self.cfg.project_id
        );
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: self.cfg.timeout_ms,
            max_results: self.cfg.page_size,
            location: self.cfg.location.as_deref(),
        };
        let resp = self.authorize(self.http.post(url).json(&body)).send().await?;
        read_page(resp).await
    }

    async fn fetch_page(&self, job: &JobReference, page_token: Option<&str>) -> Result<QueryPage> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.cfg.api_url.trim_end_matches('/'),
            self.cfg.project_id,
            job.job_id
        );
        let mut params: Vec<(&str, String)> = vec![("timeoutMs", self.cfg.timeout_ms.to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        if let Some(location) = job.location.as_ref().or(self.cfg.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(size) = self.cfg.page_size {
            params.push(("maxResults", size.to_string()));
        }
        let resp = self.authorize(self.http.get(url).query(&params)).send().await?;
        read_page(resp).await
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn run_query(&self, sql: &str) -> Result<ResultSet> {
        debug!(project = %self.cfg.project_id, "submitting query:\n{}", sql);
        let mut page = self.start_query(sql).await?;
        let job = page.job_reference.clone();
        let mut result: Option<ResultSet> = None;
        let mut pages = 0usize;

        loop {
            if !page.job_complete {
                let job = job
                    .as_ref()
                    .ok_or_else(|| Error::upstream(None, "incomplete job without a job reference"))?;
                debug!(job_id = %job.job_id, "job still running, waiting");
                page = self.fetch_page(job, None).await?;
                continue;
            }
            // A finished page may carry warnings; only a page without a schema failed.
            if page.schema.is_none() && result.is_none() {
                if let Some(err) = page.errors.first() {
                    return Err(Error::upstream(None, describe(err)));
                }
            }

            pages += 1;
            let rs = result.get_or_insert_with(|| {
                ResultSet::new(
                    page.schema
                        .as_ref()
                        .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
                        .unwrap_or_default(),
                )
            });
            rs.rows.extend(page.rows.drain(..).map(|row| row.f.into_iter().map(cell_text).collect()));

            match (page.page_token.take(), job.as_ref()) {
                (None, _) => break,
                (Some(token), Some(job)) => {
                    debug!(job_id = %job.job_id, pages, "fetching next result page");
                    page = self.fetch_page(job, Some(&token)).await?;
                }
                (Some(_), None) => {
                    return Err(Error::upstream(None, "paged result without a job reference"))
                }
            }
        }

        let rs = result.unwrap_or_default();
        info!(rows = rs.len(), pages, "query complete");
        Ok(rs)
    }
}

async fn read_page(resp: reqwest::Response) -> Result<QueryPage> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(Error::upstream(Some(status.as_u16()), error_message(status, &text)));
    }
    Ok(serde_json::from_str(&text)?)
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.to_string()
            } else {
                trimmed.to_string()
            }
        })
}

fn describe(err: &ErrorProto) -> String {
    match (&err.reason, &err.message) {
        (Some(reason), Some(message)) => format!("{reason}: {message}"),
        (None, Some(message)) => message.clone(),
        (Some(reason), None) => reason.clone(),
        (None, None) => "unknown job error".to_string(),
    }
}

fn cell_text(cell: TableCell) -> Option<String> {
    match cell.v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
