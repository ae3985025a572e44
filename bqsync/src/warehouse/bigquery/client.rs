use gcp_bigquery_client::Client;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bail;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::mutation::MutationStatement;
use crate::query::RangeQuery;
use crate::sync_error;
use crate::types::{Row, TableRef};
use crate::warehouse::bigquery::decoding::{QueryPage, decode_insert_errors, decode_rows};
use crate::warehouse::{InsertRowError, Warehouse};

/// Maximum number of follow-up requests issued to collect the result of a single job.
const MAX_RESULT_REQUESTS: usize = 10_000;

/// BigQuery project identifier.
pub type BigQueryProjectId = String;

/// Converts a BigQuery client error into a [`SyncError`].
///
/// Authentication failures map to [`ErrorKind::AuthenticationError`], transport failures map to
/// [`ErrorKind::ServiceConnectivity`] and errors returned by the service map to `failure_kind`,
/// unless their HTTP status denotes an authentication or availability problem.
fn bq_error_to_sync_error(err: BQError, failure_kind: ErrorKind) -> SyncError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::InvalidInstalledFlowAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery installed flow authenticator",
        ),
        BQError::InvalidApplicationDefaultCredentialsAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery application default credentials",
        ),
        BQError::InvalidAuthorizedUserAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery authorized user authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),

        BQError::RequestError(_) => (ErrorKind::ServiceConnectivity, "BigQuery request failed"),
        BQError::TonicTransportError(_) => {
            (ErrorKind::ServiceConnectivity, "BigQuery transport error")
        }

        BQError::ResponseError { error } => match error.error.code {
            401 | 403 => (
                ErrorKind::AuthenticationError,
                "BigQuery rejected the credentials",
            ),
            503 => (ErrorKind::ServiceConnectivity, "BigQuery unavailable"),
            _ => (failure_kind, "BigQuery response error"),
        },

        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),

        _ => (failure_kind, "BigQuery client error"),
    };

    sync_error!(kind, description, err.to_string())
}

/// Logs the warnings a job reported alongside its result.
fn log_job_messages(page: &QueryPage) {
    for message in page.messages() {
        warn!(
            job_id = page
                .job_reference
                .as_ref()
                .and_then(|job| job.job_id.as_deref()),
            detail = %message,
            "bigquery job reported a message"
        );
    }
}

/// Warehouse backed by Google BigQuery.
///
/// Range queries and point mutations run as GoogleSQL jobs in the client's project. New rows
/// are appended through the streaming insert API (`tabledata.insertAll`), each row with a random
/// insert id for best-effort deduplication of retried requests.
#[derive(Clone)]
pub struct BigQueryWarehouse {
    project_id: BigQueryProjectId,
    client: Client,
}

impl BigQueryWarehouse {
    /// Creates a new [`BigQueryWarehouse`] from a service account key file.
    pub async fn new_with_key_path(
        project_id: BigQueryProjectId,
        sa_key_file: &str,
    ) -> SyncResult<BigQueryWarehouse> {
        let client = ClientBuilder::new()
            .build_from_service_account_key_file(sa_key_file)
            .await
            .map_err(|err| bq_error_to_sync_error(err, ErrorKind::ConfigError))?;

        Ok(BigQueryWarehouse { project_id, client })
    }

    /// Creates a new [`BigQueryWarehouse`] from a service account key JSON string.
    pub async fn new_with_key(
        project_id: BigQueryProjectId,
        sa_key: &str,
    ) -> SyncResult<BigQueryWarehouse> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(|err| bq_error_to_sync_error(err, ErrorKind::ConfigError))?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(|err| bq_error_to_sync_error(err, ErrorKind::ConfigError))?;

        Ok(BigQueryWarehouse { project_id, client })
    }

    /// Creates a new [`BigQueryWarehouse`] using Application Default Credentials.
    ///
    /// Returns an error if credentials are missing or invalid.
    pub async fn new_with_adc(project_id: BigQueryProjectId) -> SyncResult<BigQueryWarehouse> {
        let client = ClientBuilder::new()
            .build_from_application_default_credentials()
            .await
            .map_err(|err| bq_error_to_sync_error(err, ErrorKind::ConfigError))?;

        Ok(BigQueryWarehouse { project_id, client })
    }

    /// Returns the project the jobs of this warehouse run in.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Runs `sql` as a query job and returns every page of its result.
    async fn run_query(&self, sql: &str, failure_kind: ErrorKind) -> SyncResult<Vec<QueryPage>> {
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(sql))
            .await
            .map_err(|err| bq_error_to_sync_error(err, failure_kind))?;

        let mut page = QueryPage::from_response(&response)?;
        log_job_messages(&page);

        let job_reference = page.job_reference.clone().unwrap_or_default();
        let mut pages = Vec::new();
        let mut requests = 0;

        loop {
            let incomplete = page.job_complete == Some(false);
            let page_token = page.page_token.clone();
            if !incomplete {
                pages.push(page);
            }

            if !incomplete && page_token.is_none() {
                break;
            }

            requests += 1;
            if requests > MAX_RESULT_REQUESTS {
                bail!(
                    failure_kind,
                    "BigQuery result could not be collected",
                    format!("stopped after {MAX_RESULT_REQUESTS} follow-up requests")
                );
            }

            let Some(job_id) = job_reference.job_id.as_deref() else {
                bail!(
                    failure_kind,
                    "BigQuery result is incomplete",
                    "the response carries no job reference"
                );
            };

            debug!(job_id, ?page_token, incomplete, "fetching next bigquery result page");

            let parameters = GetQueryResultsParameters {
                page_token: if incomplete { None } else { page_token },
                location: job_reference.location.clone(),
                ..Default::default()
            };
            let response = self
                .client
                .job()
                .get_query_results(&self.project_id, job_id, parameters)
                .await
                .map_err(|err| bq_error_to_sync_error(err, failure_kind))?;

            let mut next = QueryPage::from_response(&response)?;
            log_job_messages(&next);
            // Continuation pages may omit the schema.
            if next.schema.is_none() {
                next.schema = pages.first().and_then(|first| first.schema.clone());
            }
            page = next;
        }

        Ok(pages)
    }
}

impl fmt::Debug for BigQueryWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryWarehouse")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl Warehouse for BigQueryWarehouse {
    fn name() -> &'static str {
        "bigquery"
    }

    async fn execute_query(&self, query: &RangeQuery) -> SyncResult<Vec<Row>> {
        let pages = self.run_query(query.sql(), ErrorKind::QueryFailed).await?;

        let mut rows = Vec::new();
        for page in &pages {
            rows.extend(decode_rows(page.fields(), page.rows())?);
        }

        info!(
            table = %query.table(),
            rows = rows.len(),
            pages = pages.len(),
            "fetched rows from bigquery"
        );

        Ok(rows)
    }

    async fn execute_mutation(&self, statement: &MutationStatement) -> SyncResult<()> {
        self.run_query(statement.sql(), ErrorKind::MutationExecutionFailed)
            .await?;

        debug!(table = %statement.table(), key = %statement.key(), "executed bigquery mutation");

        Ok(())
    }

    async fn stream_insert(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> SyncResult<Vec<InsertRowError>> {
        let mut request = TableDataInsertAllRequest::new();
        for row in rows {
            request
                .add_row(Some(Uuid::new_v4().to_string()), row)
                .map_err(|err| bq_error_to_sync_error(err, ErrorKind::SerializationError))?;
        }

        let response = self
            .client
            .tabledata()
            .insert_all(&table.project_id, &table.dataset_id, &table.table_id, request)
            .await
            .map_err(|err| bq_error_to_sync_error(err, ErrorKind::StreamInsertPartialFailure))?;

        let row_errors = decode_insert_errors(&response)?;
        if row_errors.is_empty() {
            info!(%table, rows = rows.len(), "streamed rows into bigquery");
        } else {
            warn!(
                %table,
                rows = rows.len(),
                rejected = row_errors.len(),
                "bigquery rejected rows of a streaming insert"
            );
        }

        Ok(row_errors)
    }
}
