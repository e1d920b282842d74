//! EMI protocol session
//!
//! Owns one connection to the machine controller and serializes every
//! request/response pair on it. The controller answers requests strictly in
//! order and the channel is half-duplex, so exactly one exchange may be in
//! flight: [`EmiSession::request_response`] holds the session lock across the
//! write and the matching read.
//!
//! This layer never reconnects on its own. A broken connection is dropped and
//! reported; re-establishing it is up to the caller.

use super::framing::{self, FrameError, ReadError};
use crate::config::defaults;
use super::messages;
use super::xml::{XmlElement, XmlError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// EMI protocol errors
#[derive(Debug, Error)]
pub enum EmiError {
    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connecting to {address} timed out")]
    ConnectTimeout { address: String },

    #[error("Session not established")]
    NotConnected,

    #[error("Connection closed by controller")]
    ConnectionClosed,

    #[error("No response within {after:?}")]
    ResponseTimeout { after: Duration },

    #[error("Response exceeds {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },

    #[error("Request could not be encoded: {0}")]
    Encode(#[from] XmlError),

    #[error("Undecodable response: {0}")]
    Frame(#[from] FrameError),

    #[error("Unexpected <{element}> response: {detail}")]
    MalformedResponse { element: String, detail: String },

    #[error("Login incomplete after {attempts} attempt(s): no session id returned")]
    LoginIncomplete { attempts: u32 },
}

impl EmiError {
    /// Connection-level faults halt I/O until the session is re-established.
    /// Everything else is a per-exchange fault.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            EmiError::Io(_)
                | EmiError::ConnectTimeout { .. }
                | EmiError::NotConnected
                | EmiError::ConnectionClosed
                | EmiError::ResponseTimeout { .. }
                | EmiError::FrameTooLarge { .. }
        )
    }
}

/// Login retry behaviour.
///
/// The controller occasionally answers a login without a session id. The
/// existing contract is to log out and retry until it succeeds, so
/// `max_attempts: None` (retry forever) is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPolicy {
    pub retry_interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Any byte stream the session can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

struct Connection {
    stream: BufReader<Box<dyn Transport>>,
    session_id: Option<String>,
}

/// One authenticated, stateful connection to a CC300 controller.
pub struct EmiSession {
    name: String,
    login_policy: LoginPolicy,
    /// Longest wait for one write plus its response.
    response_timeout: Duration,
    max_frame_bytes: usize,
    conn: Mutex<Option<Connection>>,
    last_activity: std::sync::Mutex<Option<Instant>>,
}

impl EmiSession {
    pub fn new(name: impl Into<String>, login_policy: LoginPolicy) -> Self {
        Self {
            name: name.into(),
            login_policy,
            response_timeout: Duration::from_millis(defaults::RESPONSE_TIMEOUT_MS),
            max_frame_bytes: defaults::MAX_FRAME_BYTES,
            conn: Mutex::new(None),
            last_activity: std::sync::Mutex::new(None),
        }
    }

    /// Bound each exchange. An unanswered request drops the connection.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn login_policy(&self) -> LoginPolicy {
        self.login_policy
    }

    /// Open a TCP connection to the controller.
    ///
    /// Returns `false` and leaves the session unconnected on any failure.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        match self.try_connect(host, port).await {
            Ok(()) => true,
            Err(e) => {
                warn!(device = %self.name, host, port, error = %e, "EMI connection failed");
                false
            }
        }
    }

    /// Open a TCP connection, reporting the failure cause.
    pub async fn try_connect(&self, host: &str, port: u16) -> Result<(), EmiError> {
        let address = format!("{}:{}", host, port);
        info!(device = %self.name, address = %address, "Connecting to EMI controller");

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| EmiError::ConnectTimeout {
                address: address.clone(),
            })??;

        // Detect dead peers on long idle periods
        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);
        let _ = stream.set_nodelay(true);

        self.attach(stream).await;
        info!(device = %self.name, address = %address, "EMI connection established");
        Ok(())
    }

    /// Install an already-open stream as the session transport, replacing any
    /// previous connection.
    pub async fn attach<T: Transport + 'static>(&self, stream: T) {
        let mut guard = self.conn.lock().await;
        *guard = Some(Connection {
            stream: BufReader::new(Box::new(stream)),
            session_id: None,
        });
    }

    /// Close the connection and clear the session state. Safe to call twice.
    pub async fn close(&self) {
        let mut guard = self.conn.lock().await;
        match guard.take() {
            Some(mut conn) => {
                let _ = conn.stream.get_mut().shutdown().await;
                info!(device = %self.name, "EMI connection closed");
            }
            None => debug!(device = %self.name, "Close requested but connection not established"),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.conn
            .lock()
            .await
            .as_ref()
            .and_then(|c| c.session_id.clone())
    }

    /// Time of the last completed exchange, if any.
    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity.lock().map(|t| *t).unwrap_or(None)
    }

    /// Send one request and wait for its response while holding the session
    /// lock, so no other exchange can interleave.
    ///
    /// Socket failures, a missing response within the response timeout and
    /// oversized frames drop the connection and return a connection fault. A
    /// response that arrives but cannot be decoded is returned as
    /// [`EmiError::Frame`]; the stream stays usable.
    pub async fn request_response(&self, request: &XmlElement) -> Result<XmlElement, EmiError> {
        let frame = framing::encode_frame(request)?;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(EmiError::NotConnected)?;

        let exchange = Self::exchange(conn, &frame, self.max_frame_bytes);
        let result = tokio::time::timeout(self.response_timeout, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(EmiError::ResponseTimeout {
                    after: self.response_timeout,
                })
            });
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                // The stream may hold half a frame now
                *guard = None;
                warn!(device = %self.name, request = %request.name, error = %e, "EMI connection dropped");
                return Err(e);
            }
        };
        drop(guard);

        self.touch();
        framing::decode_frame(&raw).map_err(|e| {
            warn!(
                device = %self.name,
                request = %request.name,
                bytes = raw.len(),
                error = %e,
                "Failed to decode EMI response"
            );
            EmiError::Frame(e)
        })
    }

    async fn exchange(conn: &mut Connection, frame: &[u8], max_len: usize) -> Result<Vec<u8>, EmiError> {
        let stream = conn.stream.get_mut();
        stream.write_all(frame).await?;
        stream.flush().await?;
        match framing::read_frame(&mut conn.stream, max_len).await {
            Ok(Some(raw)) => Ok(raw),
            Ok(None) => Err(EmiError::ConnectionClosed),
            Err(ReadError::Io(e)) => Err(EmiError::Io(e)),
            Err(ReadError::Oversized { limit }) => Err(EmiError::FrameTooLarge { limit }),
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Some(Instant::now());
        }
    }

    async fn store_session_id(&self, session_id: Option<String>) {
        if let Some(conn) = self.conn.lock().await.as_mut() {
            conn.session_id = session_id;
        }
    }

    /// Log in and return the session id.
    ///
    /// A response without a session id is followed by a pause of
    /// `retry_interval`, a logout, and another attempt. With the default policy
    /// this repeats until the controller hands out a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, EmiError> {
        let request = messages::login(username, password);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let session_id = match self.request_response(&request).await {
                Ok(response) => response.get(messages::SESSION_ID_ATTR).map(str::to_string),
                Err(e) if e.is_connection_fault() => return Err(e),
                Err(_) => None,
            };

            if let Some(id) = session_id {
                self.store_session_id(Some(id.clone())).await;
                info!(device = %self.name, attempts, "EMI login successful");
                return Ok(id);
            }

            warn!(device = %self.name, attempt = attempts, "Login response carried no session id");
            if self
                .login_policy
                .max_attempts
                .is_some_and(|max| attempts >= max)
            {
                return Err(EmiError::LoginIncomplete { attempts });
            }

            tokio::time::sleep(self.login_policy.retry_interval).await;
            self.logout().await?;
        }
    }

    /// Send a logout and discard the response. No-op when not connected.
    pub async fn logout(&self) -> Result<(), EmiError> {
        if !self.is_connected().await {
            debug!(device = %self.name, "Logout skipped: connection not established");
            return Ok(());
        }

        match self.request_response(&messages::logout()).await {
            Ok(_) => {}
            Err(e) if e.is_connection_fault() => return Err(e),
            Err(e) => debug!(device = %self.name, error = %e, "Ignoring undecodable logout response"),
        }
        self.store_session_id(None).await;
        debug!(device = %self.name, "Logged out");
        Ok(())
    }
}
