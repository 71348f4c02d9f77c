//! Session lifecycle: initialize, options, StartTLS, simple bind and unbind.

use crate::error::*;
use crate::ldap_protocol::{
    encode_ldap_message, parse_ldap_message, BindRequest, ExtendedRequest, LdapMessage, ProtocolOp,
    NOTICE_OF_DISCONNECTION_OID, START_TLS_OID,
};
use crate::search::PendingSearch;
use crate::stream::{read_one_ldap_message, write_ldap_message, LdapStream, LdapUrl};
use crate::tls;
use bytes::BytesMut;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const LDAP_OPT_DEREF: i32 = 0x02;
pub const LDAP_OPT_SIZELIMIT: i32 = 0x03;
pub const LDAP_OPT_TIMELIMIT: i32 = 0x04;
pub const LDAP_OPT_PROTOCOL_VERSION: i32 = 0x11;

pub const LDAP_VERSION2: i32 = 2;
pub const LDAP_VERSION3: i32 = 3;

pub const LDAP_DEREF_NEVER: i32 = 0;
pub const LDAP_DEREF_SEARCHING: i32 = 1;
pub const LDAP_DEREF_FINDING: i32 = 2;
pub const LDAP_DEREF_ALWAYS: i32 = 3;

/// Transport settings applied when the session is opened.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Bound on TCP connect and each TLS handshake.
    pub network_timeout: Option<Duration>,
    /// Extra trusted CA certificates (PEM), added to the system roots.
    pub tls_ca_pem: Option<Vec<u8>>,
    /// Accept any server certificate.
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialized,
    TlsUpgraded,
    Bound,
    Closed,
}

/// Defaults applied to searches that do not set their own.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SessionOptions {
    pub(crate) deref: i32,
    pub(crate) size_limit: i32,
    pub(crate) time_limit: i32,
}

/// One LDAP session. Operations take `&mut self`: a session serves one caller at a time.
pub struct Connection {
    url: String,
    target: LdapUrl,
    connect_options: ConnectOptions,
    stream: Option<LdapStream>,
    read_buf: BytesMut,
    state: ConnectionState,
    protocol_version: i32,
    pub(crate) session: SessionOptions,
    pub(crate) next_message_id: i32,
    /// Outstanding searches by message id, with responses received ahead of retrieval.
    pub(crate) pending: HashMap<i32, PendingSearch>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("protocol_version", &self.protocol_version)
            .field("pending", &self.pending.len())
            .finish()
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match limit {
        Some(d) => tokio::time::timeout(d, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl Connection {
    /// Open a session to `url` with default transport settings.
    pub async fn initialize(url: &str) -> Result<Connection> {
        Self::initialize_with(url, ConnectOptions::default()).await
    }

    /// Open a session to `ldap://host:port/` or `ldaps://host:port/`.
    pub async fn initialize_with(url: &str, options: ConnectOptions) -> Result<Connection> {
        let target = LdapUrl::parse(url).map_err(|e| LdapError::connection(LDAP_PARAM_ERROR, format!("{:#}", e)))?;
        let addr = format!("{}:{}", target.host, target.port);
        debug!("Connecting to {} ({})", url, addr);

        let tcp = match with_timeout(options.network_timeout, TcpStream::connect((target.host.as_str(), target.port))).await {
            Some(Ok(tcp)) => tcp,
            Some(Err(e)) => {
                return Err(LdapError::connection(LDAP_SERVER_DOWN, format!("connect to {}: {}", addr, e)));
            }
            None => return Err(LdapError::connection(LDAP_TIMEOUT, format!("connect to {} timed out", addr))),
        };
        let _ = tcp.set_nodelay(true);

        let mut stream = LdapStream::Tcp(tcp);
        if target.secure {
            stream = Self::handshake(stream, &target, &options).await?;
        }
        info!("Connected to {}", url);

        Ok(Connection {
            url: url.to_string(),
            target,
            connect_options: options,
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(8192),
            state: ConnectionState::Initialized,
            protocol_version: LDAP_VERSION3,
            session: SessionOptions::default(),
            next_message_id: 1,
            pending: HashMap::new(),
        })
    }

    /// TLS handshake on a plain stream; failures carry LDAP_CONNECT_ERROR or LDAP_TIMEOUT.
    async fn handshake(stream: LdapStream, target: &LdapUrl, options: &ConnectOptions) -> Result<LdapStream> {
        let config = tls::client_config(options.tls_ca_pem.as_deref(), options.tls_skip_verify)
            .map_err(|e| LdapError::connection(LDAP_CONNECT_ERROR, format!("{:#}", e)))?;
        match with_timeout(options.network_timeout, stream.into_tls(&target.host, config)).await {
            Some(Ok(tls_stream)) => Ok(tls_stream),
            Some(Err(e)) => Err(LdapError::connection(LDAP_CONNECT_ERROR, format!("{:#}", e))),
            None => Err(LdapError::connection(LDAP_TIMEOUT, "TLS handshake timed out")),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    /// Apply a session-wide option. State is unchanged on failure.
    pub fn set_option(&mut self, option: i32, value: i32) -> Result<()> {
        self.ensure_open()?;
        match option {
            LDAP_OPT_PROTOCOL_VERSION => {
                if value != LDAP_VERSION2 && value != LDAP_VERSION3 {
                    return Err(LdapError::option(LDAP_PARAM_ERROR, format!("unsupported protocol version {}", value)));
                }
                if self.state == ConnectionState::Bound && value != self.protocol_version {
                    return Err(LdapError::option(LDAP_LOCAL_ERROR, "protocol version cannot change after bind"));
                }
                self.protocol_version = value;
            }
            LDAP_OPT_DEREF => {
                if !(LDAP_DEREF_NEVER..=LDAP_DEREF_ALWAYS).contains(&value) {
                    return Err(LdapError::option(LDAP_PARAM_ERROR, format!("invalid deref value {}", value)));
                }
                self.session.deref = value;
            }
            LDAP_OPT_SIZELIMIT | LDAP_OPT_TIMELIMIT => {
                if value < 0 {
                    return Err(LdapError::option(LDAP_PARAM_ERROR, format!("negative limit {}", value)));
                }
                if option == LDAP_OPT_SIZELIMIT {
                    self.session.size_limit = value;
                } else {
                    self.session.time_limit = value;
                }
            }
            _ => {
                return Err(LdapError::option(LDAP_PARAM_ERROR, format!("unsupported option 0x{:02X}", option)));
            }
        }
        debug!("Option 0x{:02X} set to {}", option, value);
        Ok(())
    }

    /// Upgrade a plaintext session to TLS in place. Must precede bind.
    pub async fn start_tls(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state != ConnectionState::Initialized {
            return Err(LdapError::connection(
                LDAP_LOCAL_ERROR,
                format!("StartTLS not allowed in state {:?}", self.state),
            ));
        }
        if self.stream.as_ref().is_some_and(LdapStream::is_tls) {
            return Err(LdapError::connection(LDAP_LOCAL_ERROR, "session is already encrypted"));
        }
        if self.protocol_version < LDAP_VERSION3 {
            return Err(LdapError::tls(LDAP_NOT_SUPPORTED, "StartTLS requires LDAPv3"));
        }

        let message_id = self.next_id();
        let request = LdapMessage {
            message_id,
            protocol_op: ProtocolOp::ExtendedRequest(ExtendedRequest {
                request_name: START_TLS_OID.to_string(),
                request_value: None,
            }),
            controls: None,
        };
        self.send(&request).await.map_err(LdapError::into_tls)?;
        let response = self.wait_response(message_id).await.map_err(LdapError::into_tls)?;
        match response.protocol_op {
            ProtocolOp::ExtendedResponse(resp) => {
                if resp.result.result_code != LDAP_SUCCESS {
                    return Err(LdapError::tls(resp.result.result_code, resp.result.diagnostic_message));
                }
            }
            other => {
                return Err(LdapError::decode(format!("unexpected response to StartTLS: {:?}", other)));
            }
        }

        let stream = self
            .stream
            .take()
            .ok_or_else(|| LdapError::connection(LDAP_SERVER_DOWN, "connection is closed"))?;
        match Self::handshake(stream, &self.target, &self.connect_options).await {
            Ok(tls_stream) => {
                self.stream = Some(tls_stream);
                self.read_buf.clear();
                self.state = ConnectionState::TlsUpgraded;
                info!("StartTLS established with {}", self.url);
                Ok(())
            }
            Err(e) => {
                // the plain stream is consumed by the failed handshake
                self.mark_closed();
                warn!("StartTLS handshake with {} failed: {}", self.url, e);
                Err(e.into_tls())
            }
        }
    }

    /// Simple bind. An empty `dn` binds anonymously and sends no credential.
    ///
    /// A nonzero result code is an `Auth` error; a lost transport stays a `Connection` error.
    pub async fn bind(&mut self, dn: &str, credential: &str) -> Result<()> {
        self.ensure_open()?;
        if self.state == ConnectionState::Bound {
            return Err(LdapError::connection(LDAP_LOCAL_ERROR, "session is already bound"));
        }
        let password = if dn.is_empty() {
            Vec::new()
        } else {
            credential.as_bytes().to_vec()
        };
        let message_id = self.next_id();
        let request = LdapMessage {
            message_id,
            protocol_op: ProtocolOp::BindRequest(BindRequest {
                version: self.protocol_version,
                name: dn.to_string(),
                password,
            }),
            controls: None,
        };
        self.send(&request).await?;
        let response = self.wait_response(message_id).await?;
        match response.protocol_op {
            ProtocolOp::BindResponse(result) => {
                if result.result_code != LDAP_SUCCESS {
                    debug!("Bind as {:?} failed with code {}", dn, result.result_code);
                    return Err(LdapError::auth(result.result_code, result.diagnostic_message));
                }
            }
            other => {
                return Err(LdapError::decode(format!("unexpected response to bind: {:?}", other)));
            }
        }
        self.state = ConnectionState::Bound;
        if dn.is_empty() {
            info!("Anonymous bind to {} succeeded", self.url);
        } else {
            info!("Bind as {} to {} succeeded", dn, self.url);
        }
        Ok(())
    }

    /// Send UnbindRequest and close. Later calls fail with LDAP_SERVER_DOWN.
    pub async fn unbind(&mut self) -> Result<()> {
        self.ensure_open()?;
        let message_id = self.next_id();
        let request = LdapMessage {
            message_id,
            protocol_op: ProtocolOp::UnbindRequest,
            controls: None,
        };
        let encoded = encode_ldap_message(&request)
            .map_err(|e| LdapError::connection(LDAP_ENCODING_ERROR, format!("{:#}", e)))?;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = write_ldap_message(&mut stream, &encoded).await {
                debug!("Unbind to {} not delivered: {:#}", self.url, e);
            }
            let _ = stream.shutdown().await;
        }
        if !self.pending.is_empty() {
            debug!("Unbind dropped {} outstanding operations", self.pending.len());
        }
        self.mark_closed();
        info!("Unbound from {}", self.url);
        Ok(())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed || self.stream.is_none() {
            return Err(LdapError::connection(LDAP_SERVER_DOWN, "connection is closed"));
        }
        Ok(())
    }

    /// Next message id, wrapping to 1 and skipping ids of outstanding searches.
    pub(crate) fn next_id(&mut self) -> i32 {
        loop {
            let id = self.next_message_id;
            self.next_message_id = if id == i32::MAX { 1 } else { id + 1 };
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn mark_closed(&mut self) {
        self.stream = None;
        self.read_buf.clear();
        self.pending.clear();
        self.state = ConnectionState::Closed;
    }

    pub(crate) async fn send(&mut self, message: &LdapMessage) -> Result<()> {
        let encoded = encode_ldap_message(message)
            .map_err(|e| LdapError::connection(LDAP_ENCODING_ERROR, format!("{:#}", e)))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LdapError::connection(LDAP_SERVER_DOWN, "connection is closed"))?;
        if let Err(e) = write_ldap_message(stream, &encoded).await {
            warn!("Write to {} failed: {:#}", self.url, e);
            self.mark_closed();
            return Err(LdapError::connection(LDAP_SERVER_DOWN, format!("{:#}", e)));
        }
        Ok(())
    }

    /// Read and decode the next message from the server. A notice of disconnection closes the session.
    pub(crate) async fn recv(&mut self) -> Result<LdapMessage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LdapError::connection(LDAP_SERVER_DOWN, "connection is closed"))?;
        let raw = match read_one_ldap_message(stream, &mut self.read_buf).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Read from {} failed: {:#}", self.url, e);
                self.mark_closed();
                return Err(LdapError::connection(LDAP_SERVER_DOWN, format!("{:#}", e)));
            }
        };
        let message = parse_ldap_message(&raw).map_err(|e| LdapError::decode(format!("{:#}", e)))?;
        if message.message_id == 0 {
            return Err(self.unsolicited(message));
        }
        Ok(message)
    }

    fn unsolicited(&mut self, message: LdapMessage) -> LdapError {
        let (code, text, oid) = match message.protocol_op {
            ProtocolOp::ExtendedResponse(resp) => {
                (resp.result.result_code, resp.result.diagnostic_message, resp.response_name)
            }
            other => (LDAP_PROTOCOL_ERROR, format!("unsolicited {:?}", other), None),
        };
        if oid.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) {
            warn!("Server {} sent notice of disconnection ({}): {}", self.url, code, text);
        } else {
            warn!("Unexpected unsolicited message from {}: {}", self.url, text);
        }
        self.mark_closed();
        let code = if code == LDAP_SUCCESS { LDAP_SERVER_DOWN } else { code };
        LdapError::connection(code, format!("server closed the session: {}", text))
    }

    /// Wait for the response to `message_id`, queueing responses for outstanding searches.
    pub(crate) async fn wait_response(&mut self, message_id: i32) -> Result<LdapMessage> {
        loop {
            let message = self.recv().await?;
            if message.message_id == message_id {
                return Ok(message);
            }
            self.route(message);
        }
    }

    /// Queue a message for its outstanding search, or drop it.
    pub(crate) fn route(&mut self, message: LdapMessage) {
        match self.pending.get_mut(&message.message_id) {
            Some(pending) => pending.queued.push_back(message),
            None => debug!("Dropping response for unknown message id {}", message.message_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{self, ReceivedOp, TestServer};

    #[tokio::test]
    async fn test_initialize_rejects_malformed_url() {
        for url in ["http://localhost:389/", "localhost", "ldap://host:notaport/"] {
            let err = Connection::initialize(url).await.unwrap_err();
            assert!(matches!(err, LdapError::Connection { code: LDAP_PARAM_ERROR, .. }), "{}: {}", url, err);
            assert!(err.to_string().contains("(-9)"));
        }
    }

    #[tokio::test]
    async fn test_initialize_unreachable() {
        // grab a free port, then close it
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Connection::initialize(&format!("ldap://127.0.0.1:{}/", port)).await.unwrap_err();
        assert_eq!(err.code(), Some(LDAP_SERVER_DOWN));
    }

    #[tokio::test]
    async fn test_bind_simple() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 0, "")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Initialized);
        conn.set_option(LDAP_OPT_PROTOCOL_VERSION, LDAP_VERSION3).unwrap();
        conn.bind("cn=admin,dc=example,dc=com", "secret").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Bound);
        conn.unbind().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        let requests = server.finish().await;
        match &requests[0].op {
            ReceivedOp::Bind { version, name, password } => {
                assert_eq!(*version, 3);
                assert_eq!(name, "cn=admin,dc=example,dc=com");
                assert_eq!(password, b"secret");
            }
            other => panic!("expected bind, got {:?}", other),
        }
        assert!(matches!(requests.last().unwrap().op, ReceivedOp::Unbind));
    }

    #[tokio::test]
    async fn test_anonymous_bind_sends_no_credential() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 0, "")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        conn.bind("", "ignored-secret").await.unwrap();
        conn.unbind().await.unwrap();

        let requests = server.finish().await;
        match &requests[0].op {
            ReceivedOp::Bind { name, password, .. } => {
                assert!(name.is_empty());
                assert!(password.is_empty());
            }
            other => panic!("expected bind, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bind_invalid_credentials() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { password, .. } if password.as_slice() == b"right" => {
                vec![test_server::bind_response(req.message_id, 0, "")]
            }
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 49, "bad password")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        let err = conn.bind("cn=admin,dc=example,dc=com", "wrong").await.unwrap_err();
        assert!(matches!(err, LdapError::Auth { code: LDAP_INVALID_CREDENTIALS, .. }));
        assert_eq!(
            err.to_string(),
            "LDAP bind error (49) : Invalid credentials: bad password"
        );
        // a failed bind leaves the session usable
        assert_eq!(conn.state(), ConnectionState::Initialized);
        conn.bind("cn=admin,dc=example,dc=com", "right").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Bound);
    }

    #[tokio::test]
    async fn test_bind_twice_rejected() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 0, "")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        conn.bind("", "").await.unwrap();
        let err = conn.bind("", "").await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_LOCAL_ERROR, .. }));
    }

    #[tokio::test]
    async fn test_set_option_validation() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 0, "")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();

        let err = conn.set_option(LDAP_OPT_PROTOCOL_VERSION, 4).unwrap_err();
        assert!(matches!(err, LdapError::Option { code: LDAP_PARAM_ERROR, .. }));
        assert_eq!(conn.protocol_version(), LDAP_VERSION3);

        let err = conn.set_option(0x7777, 1).unwrap_err();
        assert!(matches!(err, LdapError::Option { .. }));
        assert!(conn.set_option(LDAP_OPT_DEREF, 4).is_err());
        assert!(conn.set_option(LDAP_OPT_SIZELIMIT, -1).is_err());

        conn.set_option(LDAP_OPT_PROTOCOL_VERSION, LDAP_VERSION2).unwrap();
        assert_eq!(conn.protocol_version(), LDAP_VERSION2);
        conn.set_option(LDAP_OPT_SIZELIMIT, 10).unwrap();
        conn.set_option(LDAP_OPT_DEREF, LDAP_DEREF_ALWAYS).unwrap();

        conn.bind("", "").await.unwrap();
        let err = conn.set_option(LDAP_OPT_PROTOCOL_VERSION, LDAP_VERSION3).unwrap_err();
        assert!(matches!(err, LdapError::Option { code: LDAP_LOCAL_ERROR, .. }));
        assert_eq!(conn.protocol_version(), LDAP_VERSION2);

        let requests = server.finish_now().await;
        match &requests[0].op {
            ReceivedOp::Bind { version, .. } => assert_eq!(*version, 2),
            other => panic!("expected bind, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_tls_refused_by_server() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Extended { .. } => vec![test_server::extended_response(
                req.message_id,
                2,
                "StartTLS not configured",
                None,
            )],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        let err = conn.start_tls().await.unwrap_err();
        assert!(matches!(err, LdapError::Tls { code: LDAP_PROTOCOL_ERROR, .. }));
        assert!(err.to_string().contains("(2)"));
        assert_eq!(conn.state(), ConnectionState::Initialized);

        let requests = server.finish_now().await;
        match &requests[0].op {
            ReceivedOp::Extended { name } => assert_eq!(name, START_TLS_OID),
            other => panic!("expected extended request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_tls_handshake_failure() {
        // server accepts StartTLS and then hangs up instead of negotiating
        let server = TestServer::start_closing_after_start_tls().await;
        let mut conn = Connection::initialize_with(
            &server.url(),
            ConnectOptions {
                network_timeout: Some(Duration::from_secs(5)),
                tls_skip_verify: true,
                ..ConnectOptions::default()
            },
        )
        .await
        .unwrap();
        let err = conn.start_tls().await.unwrap_err();
        assert!(matches!(err, LdapError::Tls { code: LDAP_CONNECT_ERROR, .. }), "{}", err);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_start_tls_v2_not_supported() {
        let server = TestServer::start(|_| Vec::new()).await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        conn.set_option(LDAP_OPT_PROTOCOL_VERSION, LDAP_VERSION2).unwrap();
        let err = conn.start_tls().await.unwrap_err();
        assert!(matches!(err, LdapError::Tls { code: LDAP_NOT_SUPPORTED, .. }));
    }

    #[tokio::test]
    async fn test_start_tls_after_bind_rejected() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::bind_response(req.message_id, 0, "")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        conn.bind("", "").await.unwrap();
        let err = conn.start_tls().await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_LOCAL_ERROR, .. }));
    }

    #[tokio::test]
    async fn test_unbind_twice_and_use_after_close() {
        let server = TestServer::start(|_| Vec::new()).await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        conn.unbind().await.unwrap();

        let err = conn.unbind().await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_SERVER_DOWN, .. }));
        let err = conn.bind("", "").await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_SERVER_DOWN, .. }));
        assert!(conn.set_option(LDAP_OPT_SIZELIMIT, 1).is_err());
        assert!(conn.start_tls().await.is_err());
    }

    #[tokio::test]
    async fn test_notice_of_disconnection_closes_session() {
        let server = TestServer::start(|req| match &req.op {
            ReceivedOp::Bind { .. } => vec![test_server::notice_of_disconnection(52, "shutting down")],
            _ => Vec::new(),
        })
        .await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        let err = conn.bind("cn=admin,dc=example,dc=com", "secret").await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_UNAVAILABLE, .. }), "{}", err);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_server_hangup_during_bind() {
        let server = TestServer::start_closing_on_first_request().await;
        let mut conn = Connection::initialize(&server.url()).await.unwrap();
        let err = conn.bind("", "").await.unwrap_err();
        assert!(matches!(err, LdapError::Connection { code: LDAP_SERVER_DOWN, .. }), "{}", err);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
