//! SQL Server connection and transactions using tiberius

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bulkup_core::{
    BulkLoader, BulkUpError, ColumnMeta, Connection, ConnectionConfig, QueryResult, Result, Row,
    StatementResult, Transaction, Value,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row as TiberiusRow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use uuid::Uuid;

/// Default time allowed to open a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) type SharedClient = Arc<Mutex<Client<Compat<TcpStream>>>>;

/// SQL Server connection errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MssqlConnectionError> for BulkUpError {
    fn from(err: MssqlConnectionError) -> Self {
        match err {
            MssqlConnectionError::ConnectionFailed(_)
            | MssqlConnectionError::AuthenticationFailed(_)
            | MssqlConnectionError::Timeout(_)
            | MssqlConnectionError::ConnectionClosed => BulkUpError::Connection(err.to_string()),
            _ => BulkUpError::Driver(err.to_string()),
        }
    }
}

/// SQL Server connection using tiberius
///
/// One TDS session. Global temporary tables created through it live until
/// they are dropped or the session ends.
pub struct MssqlConnection {
    client: SharedClient,
    closed: AtomicBool,
    database: Option<String>,
}

impl MssqlConnection {
    /// Connect with SQL Server authentication
    ///
    /// `username = None` selects integrated authentication, which is only
    /// available on Windows.
    #[tracing::instrument(skip(password))]
    pub async fn connect(
        host: &str,
        port: u16,
        database: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        trust_cert: bool,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        let config = build_config(host, port, database, username, password, trust_cert, true)?;
        Self::open(config, database.map(String::from), DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect from an ADO.NET style connection string
    ///
    /// `Server=tcp:db,1433;Database=Sales;User Id=sa;Password=...;TrustServerCertificate=true`
    #[tracing::instrument(skip(connection_string))]
    pub async fn connect_ado(
        connection_string: &str,
        timeout: Duration,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        let config = Config::from_ado_string(connection_string)?;
        Self::open(config, None, timeout).await
    }

    /// Create connection from config with standard keys
    ///
    /// Recognised params: `trust_cert`, `encrypt` and `connect_timeout` (seconds).
    pub async fn from_config(
        config: &ConnectionConfig,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        let host = config
            .get_string("host")
            .unwrap_or_else(|| "localhost".to_string());
        let port = if config.port > 0 { config.port } else { 1433 };
        let database = config.get_string("database");
        let username = config
            .get_string("user")
            .or_else(|| config.get_string("username"));
        let password = config.get_string("password");
        let trust_cert = config.get_bool("trust_cert").unwrap_or(false);
        let encrypt = config.get_bool("encrypt").unwrap_or(true);
        let timeout = config
            .get_string("connect_timeout")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let tiberius_config = build_config(
            &host,
            port,
            database.as_deref(),
            username.as_deref(),
            password.as_deref(),
            trust_cert,
            encrypt,
        )?;
        Self::open(tiberius_config, database, timeout).await
    }

    async fn open(
        config: Config,
        database: Option<String>,
        timeout: Duration,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        tracing::debug!(addr = %config.get_addr(), "connecting to SQL Server");

        let connect = async {
            let tcp = TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
            tcp.set_nodelay(true)?;

            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))
        };

        let client = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| MssqlConnectionError::Timeout(timeout))??;

        tracing::debug!("successfully connected to SQL Server");

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            closed: AtomicBool::new(false),
            database,
        })
    }

    pub(crate) fn client(&self) -> &SharedClient {
        &self.client
    }

    /// Stop using a client whose request was abandoned mid-stream
    ///
    /// The TDS stream is out of step once a request future is dropped, so
    /// every later call fails fast with `ConnectionClosed`.
    pub(crate) fn mark_broken(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::warn!("SQL Server connection abandoned after a timed-out request");
    }

    pub(crate) fn ensure_not_closed(&self) -> std::result::Result<(), MssqlConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        Ok(())
    }
}

fn build_config(
    host: &str,
    port: u16,
    database: Option<&str>,
    username: Option<&str>,
    password: Option<&str>,
    trust_cert: bool,
    encrypt: bool,
) -> std::result::Result<Config, MssqlConnectionError> {
    let mut config = Config::new();
    config.host(host);
    config.port(port);

    if let Some(db) = database {
        config.database(db);
    }

    if trust_cert {
        config.trust_cert();
    }

    config.encryption(if encrypt {
        EncryptionLevel::Required
    } else {
        EncryptionLevel::Off
    });

    match (username, password) {
        (Some(user), pass) => {
            config.authentication(AuthMethod::sql_server(user, pass.unwrap_or("")));
        }
        (None, _) => {
            #[cfg(windows)]
            {
                config.authentication(AuthMethod::Integrated);
            }
            #[cfg(not(windows))]
            {
                return Err(MssqlConnectionError::AuthenticationFailed(
                    "Windows authentication is only supported on Windows".to_string(),
                ));
            }
        }
    }

    Ok(config)
}

pub(crate) async fn execute_on(
    client: &SharedClient,
    sql: &str,
    params: &[Value],
) -> Result<StatementResult> {
    let start = Instant::now();
    let mut client = client.lock().await;

    let tiberius_params = values_to_tiberius_params(params)?;
    let param_refs: Vec<&dyn tiberius::ToSql> = tiberius_params
        .iter()
        .map(|p| p as &dyn tiberius::ToSql)
        .collect();

    match client.execute(sql, &param_refs[..]).await {
        Ok(exec_result) => {
            let affected_rows = exec_result.rows_affected().iter().sum::<u64>();
            tracing::debug!(
                affected_rows = affected_rows,
                duration_ms = start.elapsed().as_millis() as u64,
                "execute completed"
            );
            Ok(StatementResult { affected_rows })
        }
        Err(e) => {
            tracing::error!(error = %e, "execute failed");
            Err(BulkUpError::Driver(e.to_string()))
        }
    }
}

pub(crate) async fn query_on(
    client: &SharedClient,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult> {
    let start = Instant::now();
    let mut client = client.lock().await;

    let tiberius_params = values_to_tiberius_params(params)?;
    let param_refs: Vec<&dyn tiberius::ToSql> = tiberius_params
        .iter()
        .map(|p| p as &dyn tiberius::ToSql)
        .collect();

    let stream = client.query(sql, &param_refs[..]).await.map_err(|e| {
        tracing::error!(error = %e, "query failed");
        BulkUpError::Driver(e.to_string())
    })?;

    let tib_rows = stream
        .into_first_result()
        .await
        .map_err(|e| BulkUpError::Driver(e.to_string()))?;

    let columns: Vec<ColumnMeta> = tib_rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(ordinal, col)| ColumnMeta {
                    name: col.name().to_string(),
                    data_type: format!("{:?}", col.column_type()),
                    ordinal,
                })
                .collect()
        })
        .unwrap_or_default();
    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let mut rows = Vec::with_capacity(tib_rows.len());
    for tib_row in tib_rows {
        rows.push(Row::new(column_names.clone(), tiberius_row_to_values(tib_row)?));
    }

    let execution_time_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        duration_ms = execution_time_ms,
        "query completed"
    );

    Ok(QueryResult {
        id: Uuid::new_v4(),
        columns,
        rows,
        execution_time_ms,
    })
}

async fn batch_on(client: &SharedClient, sql: &str) -> Result<()> {
    let mut client = client.lock().await;
    client
        .simple_query(sql)
        .await
        .map_err(|e| BulkUpError::Driver(e.to_string()))?
        .into_results()
        .await
        .map_err(|e| BulkUpError::Driver(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "mssql"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_not_closed()?;
        execute_on(&self.client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_not_closed()?;
        query_on(&self.client, sql, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_not_closed()?;
        batch_on(&self.client, "BEGIN TRANSACTION").await?;
        tracing::debug!("transaction started");
        Ok(Box::new(MssqlTransaction {
            client: Arc::clone(&self.client),
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("SQL Server connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_bulk_loader(&self) -> Option<&dyn BulkLoader> {
        Some(self)
    }
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A transaction on the session of the `MssqlConnection` that began it
///
/// Dropping it without commit or rollback schedules a rollback.
pub struct MssqlTransaction {
    client: SharedClient,
    finished: bool,
}

#[async_trait]
impl Transaction for MssqlTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        batch_on(&self.client, "COMMIT TRANSACTION").await?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        batch_on(&self.client, ROLLBACK_SQL).await?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        query_on(&self.client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        execute_on(&self.client, sql, params).await
    }
}

const ROLLBACK_SQL: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

impl Drop for MssqlTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!("transaction dropped without commit or rollback");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            handle.spawn(async move {
                if let Err(e) = batch_on(&client, ROLLBACK_SQL).await {
                    tracing::warn!(error = %e, "deferred rollback failed");
                }
            });
        }
    }
}

impl std::fmt::Debug for MssqlTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlTransaction")
            .field("finished", &self.finished)
            .finish()
    }
}

/// Convert a tiberius row to a vector of Values by consuming the row
fn tiberius_row_to_values(row: TiberiusRow) -> Result<Vec<Value>> {
    row.into_iter().map(column_data_to_value).collect()
}

fn days_after(base: (i32, u32, u32), days: i64) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(base.0, base.1, base.2)
        .and_then(|d| d.checked_add_signed(chrono::Duration::days(days)))
        .ok_or_else(|| {
            MssqlConnectionError::TypeConversion(format!("date out of range: {} days", days)).into()
        })
}

fn time_from_increments(increments: u64, scale: u8) -> NaiveTime {
    let nanos_per_increment = 10u64.pow(9u32.saturating_sub(scale as u32));
    let total_nanos = increments.saturating_mul(nanos_per_increment);
    NaiveTime::from_num_seconds_from_midnight_opt(
        (total_nanos / 1_000_000_000) as u32,
        (total_nanos % 1_000_000_000) as u32,
    )
    .unwrap_or_default()
}

/// Convert tiberius ColumnData to a Value
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Result<Value> {
    let value: Value = match col_data {
        ColumnData::Bit(v) => v.into(),
        ColumnData::U8(v) => v.into(),
        ColumnData::I16(v) => v.into(),
        ColumnData::I32(v) => v.into(),
        ColumnData::I64(v) => v.into(),
        ColumnData::F32(v) => v.into(),
        ColumnData::F64(v) => v.into(),
        ColumnData::String(v) => v.map(|s| s.into_owned()).into(),
        ColumnData::Guid(v) => v.into(),
        ColumnData::Binary(v) => v.map(|b| b.into_owned()).into(),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |n| Value::Decimal(n.to_string())),
        ColumnData::Xml(v) => v.map(|x| x.into_owned().into_string()).into(),
        ColumnData::DateTime(None)
        | ColumnData::SmallDateTime(None)
        | ColumnData::DateTime2(None)
        | ColumnData::DateTimeOffset(None)
        | ColumnData::Date(None)
        | ColumnData::Time(None) => Value::Null,
        ColumnData::DateTime(Some(v)) => {
            let date = days_after((1900, 1, 1), v.days() as i64)?;
            // fragments are 1/300 of a second
            let nanos = (v.seconds_fragments() as u64) * 1_000_000_000 / 300;
            let time = time_from_increments(nanos, 9);
            Value::DateTime(NaiveDateTime::new(date, time))
        }
        ColumnData::SmallDateTime(Some(v)) => {
            let date = days_after((1900, 1, 1), v.days() as i64)?;
            let time = time_from_increments(v.seconds_fragments() as u64 * 60, 0);
            Value::DateTime(NaiveDateTime::new(date, time))
        }
        ColumnData::DateTime2(Some(v)) => {
            let date = days_after((1, 1, 1), v.date().days() as i64)?;
            let time = time_from_increments(v.time().increments(), v.time().scale());
            Value::DateTime(NaiveDateTime::new(date, time))
        }
        ColumnData::DateTimeOffset(Some(v)) => {
            let dt2 = v.datetime2();
            let date = days_after((1, 1, 1), dt2.date().days() as i64)?;
            let time = time_from_increments(dt2.time().increments(), dt2.time().scale());
            // the wire value is already UTC; the offset only affects display
            Value::DateTimeUtc(NaiveDateTime::new(date, time).and_utc())
        }
        ColumnData::Date(Some(v)) => Value::Date(days_after((1, 1, 1), v.days() as i64)?),
        ColumnData::Time(Some(v)) => Value::Time(time_from_increments(v.increments(), v.scale())),
    };
    Ok(value)
}

/// Container for tiberius parameter values
#[derive(Debug)]
pub(crate) enum TiberiusParam {
    Null,
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
}

impl tiberius::ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null => ColumnData::I32(None),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::U8(v) => ColumnData::U8(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::F32(v) => ColumnData::F32(Some(*v)),
            TiberiusParam::F64(v) => ColumnData::F64(Some(*v)),
            TiberiusParam::String(v) => {
                ColumnData::String(Some(std::borrow::Cow::Borrowed(v.as_str())))
            }
            TiberiusParam::Bytes(v) => {
                ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v.as_slice())))
            }
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}

/// Convert Values to tiberius parameters
pub(crate) fn values_to_tiberius_params(values: &[Value]) -> Result<Vec<TiberiusParam>> {
    values
        .iter()
        .map(|v| {
            let param = match v {
                Value::Null => TiberiusParam::Null,
                Value::Bool(b) => TiberiusParam::Bool(*b),
                Value::UInt8(i) => TiberiusParam::U8(*i),
                Value::Int16(i) => TiberiusParam::I16(*i),
                Value::Int32(i) => TiberiusParam::I32(*i),
                Value::Int64(i) => TiberiusParam::I64(*i),
                Value::Float32(f) => TiberiusParam::F32(*f),
                Value::Float64(f) => TiberiusParam::F64(*f),
                Value::Decimal(d) => TiberiusParam::String(d.clone()),
                Value::String(s) => TiberiusParam::String(s.clone()),
                Value::Bytes(b) => TiberiusParam::Bytes(b.clone()),
                Value::Uuid(u) => TiberiusParam::Uuid(*u),
                Value::Date(d) => TiberiusParam::String(d.to_string()),
                Value::Time(t) => TiberiusParam::String(t.to_string()),
                Value::DateTime(dt) => TiberiusParam::String(dt.to_string()),
                Value::DateTimeUtc(dt) => TiberiusParam::String(dt.to_rfc3339()),
            };
            Ok(param)
        })
        .collect()
}
