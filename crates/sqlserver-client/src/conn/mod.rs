//! Per-connection machinery: the handle, shared state, and the I/O task.

pub(crate) mod handshake;
pub(crate) mod task;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tds_wire::{IsolationLevel, Param, RpcRequest, TmRequest};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::cancel::CancelHandle;
use crate::config::{Config, Timeouts};
use crate::error::{Error, Result};
use crate::result::ExecutionResult;
use crate::row::Row;
use self::handshake::ConnectOutcome;
use self::task::{Request, Submission};

/// Framed transport behind a connection: plain TCP or the TLS tunnel.
pub(crate) enum Transport {
    Plain(sqlserver_framing::MessageStream<TcpStream>),
    Tls(Box<sqlserver_framing::MessageStream<sqlserver_tls::TlsStream<TcpStream>>>),
}

impl Transport {
    pub(crate) async fn send(
        &mut self,
        ty: tds_wire::PacketType,
        body: bytes::Bytes,
    ) -> std::result::Result<(), sqlserver_framing::FramingError> {
        match self {
            Self::Plain(stream) => stream.send(ty, body).await,
            Self::Tls(stream) => stream.send(ty, body).await,
        }
    }

    pub(crate) async fn send_attention(
        &mut self,
    ) -> std::result::Result<(), sqlserver_framing::FramingError> {
        match self {
            Self::Plain(stream) => stream.send_attention().await,
            Self::Tls(stream) => stream.send_attention().await,
        }
    }

    pub(crate) async fn recv(
        &mut self,
    ) -> std::result::Result<Option<sqlserver_framing::Message>, sqlserver_framing::FramingError>
    {
        match self {
            Self::Plain(stream) => stream.recv().await,
            Self::Tls(stream) => stream.recv().await,
        }
    }

    pub(crate) fn set_packet_size(&mut self, size: usize) {
        match self {
            Self::Plain(stream) => stream.set_packet_size(size),
            Self::Tls(stream) => stream.set_packet_size(size),
        }
    }
}

/// State shared between the connection handle and its I/O task.
pub(crate) struct SharedState {
    /// Current database, updated by ENVCHANGE.
    pub(crate) database: parking_lot::Mutex<Option<String>>,
    /// Active transaction descriptor; 0 in auto-commit.
    pub(crate) txn_descriptor: AtomicU64,
    /// Set when the connection can no longer be used.
    pub(crate) broken: AtomicBool,
    /// Negotiated TDS version from LOGINACK.
    pub(crate) tds_version: AtomicU32,
    /// Cancellation token of the in-flight request, if any.
    pub(crate) active_cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            database: parking_lot::Mutex::new(None),
            txn_descriptor: AtomicU64::new(0),
            broken: AtomicBool::new(false),
            tds_version: AtomicU32::new(0),
            active_cancel: parking_lot::Mutex::new(None),
        }
    }
}

/// One TDS connection.
///
/// The socket is owned by a spawned I/O task; this handle submits requests
/// over a channel and awaits their completion, which serialises requests
/// per connection by construction. All request methods take `&mut self`:
/// a connection never runs two requests at once.
pub struct Connection {
    commands: mpsc::Sender<Submission>,
    shared: Arc<SharedState>,
    timeouts: Timeouts,
}

impl Connection {
    /// Open a connection: TCP, prelogin negotiation, optional TLS, login.
    ///
    /// Server routing redirects (Azure-style) are followed up to the
    /// configured limit.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut host = config.host.clone();
        let mut port = config.port;

        for redirect in 0..=config.max_redirects {
            match handshake::connect(config, &host, port).await? {
                ConnectOutcome::Established(login) => {
                    let shared = Arc::new(SharedState::new());
                    *shared.database.lock() = login.database;
                    if let Some(version) = login.tds_version {
                        shared.tds_version.store(version, Ordering::Relaxed);
                    }

                    let (commands, receiver) = mpsc::channel(8);
                    tokio::spawn(task::run(
                        login.transport,
                        Arc::clone(&shared),
                        receiver,
                        config.timeouts.cancel_grace,
                    ));

                    return Ok(Self {
                        commands,
                        shared,
                        timeouts: config.timeouts.clone(),
                    });
                }
                ConnectOutcome::Redirect {
                    host: next_host,
                    port: next_port,
                } => {
                    tracing::info!(
                        host = %next_host,
                        port = next_port,
                        redirect = redirect + 1,
                        "following server routing"
                    );
                    host = next_host;
                    port = next_port;
                }
            }
        }

        Err(Error::Protocol(format!(
            "redirected more than {} times",
            config.max_redirects
        )))
    }

    /// Run a SQL batch and return the full result.
    pub async fn execute(&mut self, sql: &str) -> Result<ExecutionResult> {
        self.submit(Request::Batch(sql.to_owned()), self.timeouts.request)
            .await
    }

    /// Run a SQL batch with an explicit deadline (`None` waits forever).
    pub async fn execute_with_timeout(
        &mut self,
        sql: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        self.submit(Request::Batch(sql.to_owned()), timeout).await
    }

    /// Run a query and return the rows of its first result set.
    ///
    /// Extra result sets are discarded with a warning.
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let result = self.execute(sql).await?;
        if result.result_sets.len() > 1 {
            tracing::warn!(
                discarded = result.result_sets.len() - 1,
                "query returned multiple result sets; keeping the first"
            );
        }
        Ok(result.into_first_rows())
    }

    /// Run a parameterised statement through `sp_executesql`.
    pub async fn execute_params(
        &mut self,
        sql: &str,
        params: Vec<Param>,
    ) -> Result<ExecutionResult> {
        self.submit(
            Request::Rpc(RpcRequest::execute_sql(sql, params)),
            self.timeouts.request,
        )
        .await
    }

    /// Call a stored procedure.
    pub async fn call(&mut self, procedure: &str, params: Vec<Param>) -> Result<ExecutionResult> {
        let mut request = RpcRequest::named(procedure);
        for param in params {
            request = request.param(param);
        }
        self.submit(Request::Rpc(request), self.timeouts.request)
            .await
    }

    /// Begin a transaction at the given isolation level.
    ///
    /// The server's BeginTransaction ENVCHANGE installs the descriptor that
    /// subsequent requests echo until commit or rollback.
    pub async fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        self.submit(
            Request::Tm(TmRequest::Begin(isolation)),
            self.timeouts.request,
        )
        .await?;
        if !self.in_transaction() {
            return Err(Error::Protocol(
                "server did not report a transaction descriptor".into(),
            ));
        }
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.submit(Request::Tm(TmRequest::Commit), self.timeouts.request)
            .await?;
        Ok(())
    }

    /// Roll the open transaction back.
    pub async fn rollback(&mut self) -> Result<()> {
        self.submit(Request::Tm(TmRequest::Rollback), self.timeouts.request)
            .await?;
        Ok(())
    }

    /// Create a savepoint inside the open transaction.
    pub async fn save_point(&mut self, name: &str) -> Result<()> {
        self.submit(
            Request::Tm(TmRequest::Save(name.to_owned())),
            self.timeouts.request,
        )
        .await?;
        Ok(())
    }

    /// Switch the connection to another database and wait for the server to
    /// confirm via ENVCHANGE.
    pub async fn change_database(&mut self, database: &str) -> Result<()> {
        let sql = format!("USE {}", quote_ident(database));
        self.execute(&sql).await?;
        let confirmed = self
            .database()
            .is_some_and(|current| current.eq_ignore_ascii_case(database));
        if !confirmed {
            return Err(Error::Protocol(format!(
                "server did not confirm switch to database {database:?}"
            )));
        }
        Ok(())
    }

    /// The current database, as last reported by the server.
    #[must_use]
    pub fn database(&self) -> Option<String> {
        self.shared.database.lock().clone()
    }

    /// Whether a transaction is open on this connection.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.shared.txn_descriptor.load(Ordering::Acquire) != 0
    }

    /// Whether the connection has failed and must be discarded.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.shared.broken.load(Ordering::Acquire) || self.commands.is_closed()
    }

    /// A handle that cancels the request currently in flight.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.shared))
    }

    /// Close the connection. Dropping the handle has the same effect; the
    /// I/O task shuts the socket down once the command channel drains.
    pub fn close(self) {
        drop(self);
    }

    pub(crate) async fn submit(
        &mut self,
        request: Request,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        if self.is_broken() {
            return Err(Error::ConnectionClosed);
        }

        let cancel = CancellationToken::new();
        *self.shared.active_cancel.lock() = Some(cancel.clone());

        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Submission {
                request,
                reply,
                cancel,
            })
            .await
            .map_err(|_| Error::ConnectionClosed)?;

        let result = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, outcome).await {
                Ok(received) => received.map_err(|_| Error::ConnectionClosed)?,
                // The deadline lapsed. The request keeps running on the
                // connection; only the caller stops waiting.
                Err(_) => {
                    self.shared.active_cancel.lock().take();
                    return Err(Error::Timeout);
                }
            },
            None => outcome.await.map_err(|_| Error::ConnectionClosed)?,
        };

        self.shared.active_cancel.lock().take();
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.database())
            .field("in_transaction", &self.in_transaction())
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

/// Bracket-quote an identifier, doubling any closing brackets.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}
