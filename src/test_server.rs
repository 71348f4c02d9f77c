//! Scripted LDAP server on 127.0.0.1 for session tests. Records every request it receives.

use crate::control::Control;
use crate::ldap_protocol::{
    parse_controls, BerReader, BerWriter, LDAP_CONTEXT_CONTROLS, LDAP_TAG_ABANDON_REQUEST,
    LDAP_TAG_BIND_REQUEST, LDAP_TAG_BIND_RESPONSE, LDAP_TAG_EXTENDED_REQUEST,
    LDAP_TAG_EXTENDED_RESPONSE, LDAP_TAG_SEARCH_REQUEST, LDAP_TAG_SEARCH_RESULT_DONE,
    LDAP_TAG_SEARCH_RESULT_ENTRY, LDAP_TAG_SEARCH_RESULT_REFERENCE, LDAP_TAG_UNBIND_REQUEST,
    NOTICE_OF_DISCONNECTION_OID, START_TLS_OID,
};
use crate::stream::{read_one_ldap_message, write_ldap_message};
use anyhow::{bail, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) struct ReceivedRequest {
    pub(crate) message_id: i32,
    pub(crate) op: ReceivedOp,
    pub(crate) controls: Vec<Control>,
}

#[derive(Debug, Clone)]
pub(crate) enum ReceivedOp {
    Bind {
        version: i32,
        name: String,
        password: Vec<u8>,
    },
    Search {
        base: String,
        scope: i32,
        deref: i32,
        size_limit: i32,
        time_limit: i32,
        filter: Vec<u8>,
        attributes: Vec<String>,
    },
    Extended {
        name: String,
    },
    Abandon(i32),
    Unbind,
}

pub(crate) enum Reply {
    Send(Vec<Vec<u8>>),
    SendAndClose(Vec<Vec<u8>>),
}

type Handler = Arc<dyn Fn(&ReceivedRequest) -> Reply + Send + Sync>;

pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Serve one client connection, answering each request with the messages `handler` returns.
    pub(crate) async fn start<F>(handler: F) -> TestServer
    where
        F: Fn(&ReceivedRequest) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Self::start_scripted(move |req| Reply::Send(handler(req))).await
    }

    pub(crate) async fn start_scripted<F>(handler: F) -> TestServer
    where
        F: Fn(&ReceivedRequest) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);
        let recorded = requests.clone();
        let handle = tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = BytesMut::new();
            while let Ok(raw) = read_one_ldap_message(&mut socket, &mut buf).await {
                let request = parse_request(&raw).unwrap();
                recorded.lock().unwrap().push(request.clone());
                if matches!(request.op, ReceivedOp::Unbind) {
                    break;
                }
                let (messages, close) = match handler(&request) {
                    Reply::Send(m) => (m, false),
                    Reply::SendAndClose(m) => (m, true),
                };
                for message in messages {
                    if write_ldap_message(&mut socket, &message).await.is_err() {
                        return;
                    }
                }
                if close {
                    break;
                }
            }
        });
        TestServer {
            addr,
            requests,
            handle,
        }
    }

    /// Accepts StartTLS, then hangs up before any handshake.
    pub(crate) async fn start_closing_after_start_tls() -> TestServer {
        Self::start_scripted(|req| match &req.op {
            ReceivedOp::Extended { name } if name == START_TLS_OID => {
                Reply::SendAndClose(vec![extended_response(req.message_id, 0, "", None)])
            }
            _ => Reply::Send(Vec::new()),
        })
        .await
    }

    pub(crate) async fn start_closing_on_first_request() -> TestServer {
        Self::start_scripted(|_| Reply::SendAndClose(Vec::new())).await
    }

    pub(crate) fn url(&self) -> String {
        format!("ldap://{}/", self.addr)
    }

    /// Wait for the client to unbind or disconnect, then return the recorded requests.
    pub(crate) async fn finish(self) -> Vec<ReceivedRequest> {
        let TestServer { requests, handle, .. } = self;
        let _ = handle.await;
        let recorded = requests.lock().unwrap().clone();
        recorded
    }

    /// Stop serving and return what has been recorded so far.
    pub(crate) async fn finish_now(self) -> Vec<ReceivedRequest> {
        let TestServer { requests, handle, .. } = self;
        handle.abort();
        let _ = handle.await;
        let recorded = requests.lock().unwrap().clone();
        recorded
    }
}

fn parse_request(data: &[u8]) -> Result<ReceivedRequest> {
    let mut outer = BerReader::new(data);
    let mut reader = outer.read_sequence()?;
    let message_id = reader.read_integer()?;
    let (tag, body) = reader.read_tlv()?;
    let mut op_reader = BerReader::new(body);
    let op = match tag {
        LDAP_TAG_BIND_REQUEST => {
            let version = op_reader.read_integer()?;
            let name = op_reader.read_string()?;
            let (_, password) = op_reader.read_tlv()?;
            ReceivedOp::Bind {
                version,
                name,
                password: password.to_vec(),
            }
        }
        LDAP_TAG_SEARCH_REQUEST => {
            let base = op_reader.read_string()?;
            let scope = op_reader.read_enumerated()?;
            let deref = op_reader.read_enumerated()?;
            let size_limit = op_reader.read_integer()?;
            let time_limit = op_reader.read_integer()?;
            op_reader.read_boolean()?;
            let filter_start = op_reader.cursor.position() as usize;
            op_reader.read_tlv()?;
            let filter_end = op_reader.cursor.position() as usize;
            let filter = body[filter_start..filter_end].to_vec();
            let mut attrs = op_reader.read_sequence()?;
            let mut attributes = Vec::new();
            while attrs.remaining() > 0 {
                attributes.push(attrs.read_string()?);
            }
            ReceivedOp::Search {
                base,
                scope,
                deref,
                size_limit,
                time_limit,
                filter,
                attributes,
            }
        }
        LDAP_TAG_EXTENDED_REQUEST => {
            let (_, name) = op_reader.read_tlv()?;
            ReceivedOp::Extended {
                name: String::from_utf8(name.to_vec())?,
            }
        }
        LDAP_TAG_ABANDON_REQUEST => ReceivedOp::Abandon(crate::ldap_protocol::decode_integer(body)?),
        LDAP_TAG_UNBIND_REQUEST => ReceivedOp::Unbind,
        _ => bail!("unexpected request tag 0x{:02X}", tag),
    };
    let controls = if reader.remaining() > 0 {
        let ctrl_body = reader.read_expected(LDAP_CONTEXT_CONTROLS, "controls")?;
        parse_controls(ctrl_body)?
    } else {
        Vec::new()
    };
    Ok(ReceivedRequest {
        message_id,
        op,
        controls,
    })
}

fn write_result(writer: &mut BerWriter, code: i32, diagnostic: &str) {
    writer.write_enumerated(code);
    writer.write_string("");
    writer.write_string(diagnostic);
}

fn message(message_id: i32, tag: u8, body: impl FnOnce(&mut BerWriter)) -> Vec<u8> {
    let mut writer = BerWriter::new();
    let seq = writer.start_sequence();
    writer.write_integer(message_id);
    let op = writer.start_constructed(tag);
    body(&mut writer);
    writer.end_sequence(op);
    writer.end_sequence(seq);
    writer.into_vec()
}

pub(crate) fn bind_response(message_id: i32, code: i32, diagnostic: &str) -> Vec<u8> {
    message(message_id, LDAP_TAG_BIND_RESPONSE, |w| write_result(w, code, diagnostic))
}

pub(crate) fn search_done(message_id: i32, code: i32, diagnostic: &str) -> Vec<u8> {
    message(message_id, LDAP_TAG_SEARCH_RESULT_DONE, |w| write_result(w, code, diagnostic))
}

pub(crate) fn search_done_with_control(message_id: i32, oid: &str, value: &[u8]) -> Vec<u8> {
    let mut writer = BerWriter::new();
    let seq = writer.start_sequence();
    writer.write_integer(message_id);
    let op = writer.start_constructed(LDAP_TAG_SEARCH_RESULT_DONE);
    write_result(&mut writer, 0, "");
    writer.end_sequence(op);
    let ctrls = writer.start_constructed(LDAP_CONTEXT_CONTROLS);
    let ctrl = writer.start_sequence();
    writer.write_string(oid);
    writer.write_octet_string(value);
    writer.end_sequence(ctrl);
    writer.end_sequence(ctrls);
    writer.end_sequence(seq);
    writer.into_vec()
}

pub(crate) fn entry(message_id: i32, dn: &str, attributes: &[(&str, &[&[u8]])]) -> Vec<u8> {
    message(message_id, LDAP_TAG_SEARCH_RESULT_ENTRY, |w| {
        w.write_string(dn);
        let attrs = w.start_sequence();
        for (name, values) in attributes {
            let attr = w.start_sequence();
            w.write_string(name);
            let set = w.start_constructed(0x31);
            for value in values.iter() {
                w.write_octet_string(value);
            }
            w.end_sequence(set);
            w.end_sequence(attr);
        }
        w.end_sequence(attrs);
    })
}

pub(crate) fn reference(message_id: i32, uris: &[&str]) -> Vec<u8> {
    message(message_id, LDAP_TAG_SEARCH_RESULT_REFERENCE, |w| {
        for uri in uris {
            w.write_string(uri);
        }
    })
}

pub(crate) fn extended_response(message_id: i32, code: i32, diagnostic: &str, name: Option<&str>) -> Vec<u8> {
    message(message_id, LDAP_TAG_EXTENDED_RESPONSE, |w| {
        write_result(w, code, diagnostic);
        if let Some(name) = name {
            w.write_primitive(0x8A, name.as_bytes());
        }
    })
}

pub(crate) fn notice_of_disconnection(code: i32, diagnostic: &str) -> Vec<u8> {
    extended_response(0, code, diagnostic, Some(NOTICE_OF_DISCONNECTION_OID))
}
