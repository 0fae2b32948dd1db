mod schema;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use alloy_primitives::hex;
use anyhow::{Result, anyhow, bail};
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::{
    dataset::{Dataset, DatasetReference},
    error::Error as BigQueryError,
    job::query::{QueryRequest, QueryResponse},
    table::{Clustering, PartitionRange, RangePartitioning, Table as BigQueryTable, TableReference},
    tabledata::list::Value,
    types::ConnectionProperty,
};
use tracing::{info, warn};

use crate::models::logs::LogRecord;
use crate::storage::bigquery::schema::log_schema;
use crate::storage::{HeightSource, LogStore};
use crate::utils::retry::{RetryConfig, retry};

/// BigQuery caps query text at 1 MiB; leave room for the statement envelope.
const MAX_STATEMENT_BYTES: usize = 900_000;
const QUERY_TIMEOUT_MS: i64 = 120_000;
/// Blocks per `block_number` partition; BigQuery allows 10,000 partitions.
const PARTITION_BLOCKS: u64 = 100_000;
const MAX_PARTITIONS: u64 = 10_000;

const COLUMNS: &str =
    "id, block_number, tx_index, log_index, removed, address, signature, args, data_index_start";
const ROW_TYPE: &str = "STRUCT<id STRING, block_number INT64, tx_index INT64, log_index INT64, \
    removed BOOL, address STRING, signature STRING, args ARRAY<STRUCT<c ARRAY<INT64>, e INT64>>, \
    data_index_start INT64>";

/// Shared BigQuery connection: the client plus the project it bills to.
#[derive(Clone)]
pub struct BigQueryConnection {
    client: Arc<Client>,
    project_id: String,
}

impl BigQueryConnection {
    /// Authenticate with the ambient Google credentials.
    pub async fn connect(project_id: Option<&str>) -> Result<Self> {
        let (config, credentials_project) = ClientConfig::new_with_auth().await?;
        let client = Client::new(config).await?;
        let project_id = project_id
            .map(str::to_string)
            .or(credentials_project)
            .ok_or_else(|| anyhow!("Project ID not found"))?;
        info!("Initialized BigQuery client for Project ID: {}", project_id);
        Ok(Self {
            client: Arc::new(client),
            project_id,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn table_path(&self, dataset: &str, table: &str) -> String {
        format!("{}.{}.{}", self.project_id, dataset, table)
    }

    async fn execute(&self, query: String) -> Result<QueryResponse> {
        self.run_query(query_request(query, None)).await
    }

    async fn run_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let response = self.client.job().query(&self.project_id, &request).await?;
        if !response.job_complete {
            bail!("query did not complete within {}ms", QUERY_TIMEOUT_MS);
        }
        Ok(response)
    }

    /// Run `statements` as one transaction inside a fresh session, so either all
    /// of them are applied or none is.
    async fn execute_atomically(&self, statements: Vec<String>) -> Result<()> {
        let begin = QueryRequest {
            create_session: Some(true),
            ..query_request("BEGIN TRANSACTION".to_string(), None)
        };
        let session_id = self
            .run_query(begin)
            .await?
            .session_info
            .and_then(|info| info.session_id)
            .ok_or_else(|| anyhow!("BigQuery did not return a session id"))?;

        let mut outcome = Ok(());
        for statement in statements {
            if let Err(e) = self
                .run_query(query_request(statement, Some(&session_id)))
                .await
            {
                outcome = Err(e);
                break;
            }
        }
        let end = if outcome.is_ok() {
            "COMMIT TRANSACTION"
        } else {
            "ROLLBACK TRANSACTION"
        };
        match self
            .run_query(query_request(end.to_string(), Some(&session_id)))
            .await
        {
            Ok(_) => {}
            Err(e) if outcome.is_ok() => outcome = Err(e),
            Err(e) => warn!("Rollback in session {} failed: {}", session_id, e),
        }

        if let Err(e) = self
            .run_query(query_request(
                "CALL BQ.ABORT_SESSION()".to_string(),
                Some(&session_id),
            ))
            .await
        {
            warn!("Failed to close session {}: {}", session_id, e);
        }
        outcome
    }

    async fn max_block_number(&self, table_path: &str) -> Result<Option<u64>> {
        let query = format!("SELECT MAX(block_number) AS max_block FROM `{table_path}`");
        let response = self.execute(query).await?;
        let cell = response
            .rows
            .as_ref()
            .and_then(|rows| rows.first())
            .and_then(|row| row.f.first());
        match cell.map(|cell| &cell.v) {
            Some(Value::String(value)) => Ok(Some(value.parse()?)),
            Some(Value::Null) | None => Ok(None),
            Some(_) => bail!("unexpected MAX(block_number) value in {}", table_path),
        }
    }

    pub async fn verify_dataset(&self, dataset: &str) -> Result<bool> {
        match self.client.dataset().get(&self.project_id, dataset).await {
            Ok(_) => Ok(true),
            Err(BigQueryError::Response(resp)) if resp.message.contains("Not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn verify_table(&self, dataset: &str, table: &str) -> Result<bool> {
        match self.client.table().get(&self.project_id, dataset, table).await {
            Ok(_) => Ok(true),
            Err(BigQueryError::Response(resp)) if resp.message.contains("Not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn create_dataset(&self, dataset: &str, location: &str) -> Result<()> {
        if self.verify_dataset(dataset).await? {
            info!("Dataset '{}' already exists and is accessible", dataset);
            return Ok(());
        }

        let metadata = Dataset {
            dataset_reference: DatasetReference {
                project_id: self.project_id.clone(),
                dataset_id: dataset.to_string(),
            },
            location: location.to_string(),
            ..Default::default()
        };

        retry(
            || async {
                match self.client.dataset().create(&metadata).await {
                    Ok(_) => {
                        info!("Dataset '{}' created in {}", dataset, location);
                        Ok::<(), anyhow::Error>(())
                    }
                    Err(BigQueryError::Response(resp)) if resp.message.contains("Already Exists") => {
                        info!("Dataset '{}' already exists", dataset);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            },
            &RetryConfig::setup(),
            "create_dataset",
        )
        .await
    }

    pub async fn create_log_table(&self, dataset: &str, table: &str) -> Result<()> {
        if self.verify_table(dataset, table).await? {
            info!("Table '{}.{}' already exists and is accessible", dataset, table);
            return Ok(());
        }

        let metadata = log_table(&self.project_id, dataset, table);

        retry(
            || async {
                match self.client.table().create(&metadata).await {
                    Ok(_) => {
                        info!("Table '{}' created in dataset '{}'", table, dataset);
                        Ok::<(), anyhow::Error>(())
                    }
                    Err(BigQueryError::Response(resp)) if resp.message.contains("Already Exists") => {
                        info!("Table '{}' already exists in dataset '{}'", table, dataset);
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            },
            &RetryConfig::setup(),
            "create_table",
        )
        .await
    }
}

fn query_request(query: String, session_id: Option<&str>) -> QueryRequest {
    QueryRequest {
        query,
        timeout_ms: Some(QUERY_TIMEOUT_MS),
        connection_properties: session_id
            .map(|id| {
                vec![ConnectionProperty {
                    key: "session_id".to_string(),
                    value: id.to_string(),
                }]
            })
            .unwrap_or_default(),
        ..Default::default()
    }
}

/// Log table metadata: range-partitioned and clustered on `block_number` so
/// checkpoint lookups, evictions and merges only touch the blocks involved.
fn log_table(project_id: &str, dataset: &str, table: &str) -> BigQueryTable {
    BigQueryTable {
        table_reference: TableReference {
            project_id: project_id.to_string(),
            dataset_id: dataset.to_string(),
            table_id: table.to_string(),
        },
        schema: Some(log_schema()),
        range_partitioning: Some(RangePartitioning {
            field: "block_number".to_string(),
            range: PartitionRange {
                start: "0".to_string(),
                end: (PARTITION_BLOCKS * MAX_PARTITIONS).to_string(),
                interval: PARTITION_BLOCKS.to_string(),
            },
        }),
        clustering: Some(Clustering {
            fields: vec!["block_number".to_string(), "id".to_string()],
        }),
        ..Default::default()
    }
}

/// Log table in BigQuery, written with DML `MERGE` statements keyed by `id`.
pub struct BigQueryLogStore {
    connection: BigQueryConnection,
    table_path: String,
}

impl BigQueryLogStore {
    pub fn new(connection: BigQueryConnection, dataset: &str, table: &str) -> Self {
        let table_path = connection.table_path(dataset, table);
        Self {
            connection,
            table_path,
        }
    }
}

impl LogStore for BigQueryLogStore {
    async fn max_block_number(&self) -> Result<Option<u64>> {
        self.connection.max_block_number(&self.table_path).await
    }

    async fn delete_block(&self, block_number: u64) -> Result<()> {
        let query = format!(
            "DELETE FROM `{}` WHERE block_number = {}",
            self.table_path, block_number
        );
        self.connection.execute(query).await?;
        info!("Deleted rows at block {} from {}", block_number, self.table_path);
        Ok(())
    }

    async fn upsert_batch(&self, records: &[LogRecord]) -> Result<()> {
        let statements = merge_statements(&self.table_path, records, MAX_STATEMENT_BYTES);
        if statements.len() > 1 {
            warn!(
                "Splitting {} records into {} MERGE statements in one transaction",
                records.len(),
                statements.len()
            );
            return self.connection.execute_atomically(statements).await;
        }
        for statement in statements {
            self.connection.execute(statement).await?;
        }
        Ok(())
    }
}

/// Target height read from a tracker table's highest `block_number`.
pub struct BigQueryHeightTable {
    connection: BigQueryConnection,
    table_path: String,
}

impl BigQueryHeightTable {
    /// `table` is `dataset.table` inside the connection's project.
    pub fn new(connection: BigQueryConnection, table: &str) -> Self {
        let table_path = format!("{}.{}", connection.project_id, table);
        Self {
            connection,
            table_path,
        }
    }
}

impl HeightSource for BigQueryHeightTable {
    async fn target_height(&self) -> Result<u64> {
        Ok(self
            .connection
            .max_block_number(&self.table_path)
            .await?
            .unwrap_or(0))
    }
}

/// Render records as MERGE statements no longer than `max_bytes` each.
///
/// Records are grouped by block and a block is only split across statements
/// when it does not fit in one on its own.
fn merge_statements(table_path: &str, records: &[LogRecord], max_bytes: usize) -> Vec<String> {
    // MERGE rejects a target row matching several source rows; the last one wins
    let mut latest: HashMap<&str, &LogRecord> = HashMap::with_capacity(records.len());
    for record in records {
        latest.insert(record.id.as_str(), record);
    }
    let mut sorted: Vec<&LogRecord> = latest.into_values().collect();
    sorted.sort_by_key(|r| (r.block_number, r.tx_index, r.index));

    let envelope = render_merge(table_path, &[]).len();
    let budget = max_bytes.saturating_sub(envelope).max(1);

    let mut statements = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0;

    for block in sorted.chunk_by(|a, b| a.block_number == b.block_number) {
        let rows: Vec<String> = block.iter().map(|r| render_row(r)).collect();
        let block_len: usize = rows.iter().map(|row| row.len() + 2).sum();

        if current_len + block_len > budget && !current.is_empty() {
            statements.push(render_merge(table_path, &current));
            current.clear();
            current_len = 0;
        }

        if block_len > budget {
            warn!(
                "Block {} alone exceeds the statement size cap, splitting it",
                block[0].block_number
            );
            for row in rows {
                if current_len + row.len() + 2 > budget && !current.is_empty() {
                    statements.push(render_merge(table_path, &current));
                    current.clear();
                    current_len = 0;
                }
                current_len += row.len() + 2;
                current.push(row);
            }
        } else {
            current_len += block_len;
            current.extend(rows);
        }
    }

    if !current.is_empty() {
        statements.push(render_merge(table_path, &current));
    }
    statements
}

fn render_merge(table_path: &str, rows: &[String]) -> String {
    let updates = COLUMNS
        .split(", ")
        .filter(|column| *column != "id")
        .map(|column| format!("{column} = S.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    let values = COLUMNS
        .split(", ")
        .map(|column| format!("S.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "MERGE `{table_path}` T\n\
         USING (SELECT * FROM UNNEST(ARRAY<{ROW_TYPE}>[\n{rows}\n])) S\n\
         ON T.id = S.id\n\
         WHEN MATCHED THEN UPDATE SET {updates}\n\
         WHEN NOT MATCHED THEN INSERT ({COLUMNS}) VALUES ({values})",
        rows = rows.join(",\n"),
    )
}

// Every value is a number, a boolean or lowercase hex, so no quoting is needed
// beyond the surrounding single quotes.
fn render_row(record: &LogRecord) -> String {
    let mut args = String::new();
    for (i, arg) in record.args.iter().enumerate() {
        if i > 0 {
            args.push_str(", ");
        }
        let limbs = arg
            .c
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(args, "([{limbs}], {})", arg.e);
    }

    format!(
        "('{}', {}, {}, {}, {}, '{}', {}, [{}], {})",
        record.id,
        record.block_number,
        record.tx_index,
        record.index,
        if record.removed { "TRUE" } else { "FALSE" },
        hex::encode_prefixed(record.address),
        record
            .signature
            .map(|s| format!("'{}'", hex::encode_prefixed(s)))
            .unwrap_or_else(|| "NULL".to_string()),
        args,
        record
            .data_index_start
            .map(|i| i.to_string())
            .unwrap_or_else(|| "NULL".to_string()),
    )
}
