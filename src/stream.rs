//! Transport to the directory server: URL parsing, TCP/TLS stream and LDAPMessage framing.

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::TlsConnector;

pub const LDAP_PORT: u16 = 389;
pub const LDAPS_PORT: u16 = 636;

/// Upper bound on a single LDAPMessage accepted from the server.
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Parsed `ldap://` or `ldaps://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUrl {
    pub secure: bool,
    /// Host without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl LdapUrl {
    /// Parse `ldap[s]://host[:port][/...]`. An empty host means localhost.
    pub fn parse(url: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = strip_prefix_ignore_case(url, "ldaps://") {
            (true, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(url, "ldap://") {
            (false, rest)
        } else {
            bail!("Invalid LDAP URI scheme: {}", url);
        };
        let authority = match rest.find('/') {
            Some(idx) => &rest[..idx],
            None => rest,
        };
        if authority.contains('@') || authority.contains('?') {
            bail!("Unsupported LDAP URI authority: {}", url);
        }
        let default_port = if secure { LDAPS_PORT } else { LDAP_PORT };

        let (host, port_str) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| anyhow::anyhow!("Unterminated IPv6 host in URI: {}", url))?;
            if host.is_empty() {
                bail!("Empty IPv6 host in URI: {}", url);
            }
            if !host.contains(':') || !host.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.') {
                bail!("Invalid IPv6 host in URI: {}", url);
            }
            let port_str = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| anyhow::anyhow!("Invalid port in URI: {}", url))?),
            };
            (host, port_str)
        } else {
            let (host, port_str) = match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            };
            if !host.starts_with(|c: char| c.is_ascii_alphanumeric()) && !host.is_empty() {
                bail!("Invalid host in URI: {}", url);
            }
            if host.contains(':') {
                bail!("IPv6 host must be bracketed in URI: {}", url);
            }
            (host, port_str)
        };

        let port = match port_str {
            None | Some("") => default_port,
            Some(p) => {
                let port: u16 = p.parse().with_context(|| format!("Invalid port in URI: {}", url))?;
                if port == 0 {
                    bail!("Invalid port in URI: {}", url);
                }
                port
            }
        };
        let host = if host.is_empty() { "localhost" } else { host };
        Ok(Self {
            secure,
            host: host.to_string(),
            port,
        })
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.is_char_boundary(prefix.len()) && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Stream to the server: plain TCP (ldap://) or TLS (ldaps:// or after StartTLS).
pub enum LdapStream {
    Tcp(TcpStream),
    Tls(Box<ClientTlsStream<TcpStream>>),
}

impl LdapStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, LdapStream::Tls(_))
    }

    /// Run the TLS handshake on a plain stream; a TLS stream is rejected.
    pub async fn into_tls(
        self,
        host: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<LdapStream> {
        let tcp = match self {
            LdapStream::Tcp(tcp) => tcp,
            LdapStream::Tls(_) => bail!("Stream is already encrypted"),
        };
        let server_name = crate::tls::server_name(host)?;
        let connector = TlsConnector::from(config);
        let tls_stream = connector
            .connect(server_name, tcp)
            .await
            .with_context(|| format!("TLS handshake with {} failed", host))?;
        Ok(LdapStream::Tls(Box::new(tls_stream)))
    }
}

impl AsyncRead for LdapStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LdapStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Total size of the LDAPMessage at the front of `buf`, once its length octets are buffered.
fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != 0x30 {
        bail!("Expected LDAPMessage SEQUENCE, got tag 0x{:02X}", buf[0]);
    }
    let first_byte = buf[1];
    if (first_byte & 0x80) == 0 {
        return Ok(Some(2 + first_byte as usize));
    }
    let length_bytes = (first_byte & 0x7F) as usize;
    if length_bytes == 0 || length_bytes > 4 {
        bail!("Unsupported LDAPMessage length encoding: 0x{:02X}", first_byte);
    }
    if buf.len() < 2 + length_bytes {
        return Ok(None);
    }
    let mut length = 0usize;
    for i in 0..length_bytes {
        length = (length << 8) | buf[2 + i] as usize;
    }
    if length > MAX_MESSAGE_SIZE {
        bail!("LDAPMessage too large: {} bytes", length);
    }
    Ok(Some(2 + length_bytes + length))
}

/// Read one complete LDAPMessage. Bytes past the message stay in `buf`.
pub async fn read_one_ldap_message<S>(stream: &mut S, buf: &mut BytesMut) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut read_buf = [0u8; 4096];
    loop {
        if let Some(total) = frame_length(buf)? {
            if buf.len() >= total {
                let msg = buf.split_to(total);
                return Ok(msg.to_vec());
            }
        }
        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            bail!("Connection closed by server");
        }
        buf.extend_from_slice(&read_buf[..n]);
    }
}

/// Write one encoded message and flush it.
pub async fn write_ldap_message<S>(stream: &mut S, data: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(data).await.context("Write LDAP message")?;
    stream.flush().await.context("Flush LDAP message")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_with_port() {
        let url = LdapUrl::parse("ldap://ldap.example.com:1389/").unwrap();
        assert!(!url.secure);
        assert_eq!(url.host, "ldap.example.com");
        assert_eq!(url.port, 1389);
    }

    #[test]
    fn test_parse_url_default_ports() {
        assert_eq!(LdapUrl::parse("ldap://localhost").unwrap().port, 389);
        let url = LdapUrl::parse("ldaps://ldap.example.com/").unwrap();
        assert!(url.secure);
        assert_eq!(url.port, 636);
        assert_eq!(LdapUrl::parse("LDAP://host:").unwrap().port, 389);
    }

    #[test]
    fn test_parse_url_empty_host() {
        let url = LdapUrl::parse("ldap:///").unwrap();
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 389);
    }

    #[test]
    fn test_parse_url_ipv6() {
        let url = LdapUrl::parse("ldap://[::1]:3389/").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, 3389);
        let url = LdapUrl::parse("ldaps://[2001:db8::5]").unwrap();
        assert_eq!(url.host, "2001:db8::5");
        assert_eq!(url.port, 636);
        let url = LdapUrl::parse("ldap://[::ffff:192.0.2.1]:1389/dc=example,dc=com").unwrap();
        assert_eq!(url.host, "::ffff:192.0.2.1");
        assert_eq!(url.port, 1389);
    }

    #[test]
    fn test_parse_url_with_dn_suffix() {
        let url = LdapUrl::parse("ldap://host:389/dc=example,dc=com").unwrap();
        assert_eq!(url.host, "host");
        assert_eq!(url.port, 389);
    }

    #[test]
    fn test_parse_url_rejects_malformed() {
        for bad in [
            "http://host:389/",
            "host:389",
            "",
            "ldap://host:abc/",
            "ldap://host:0/",
            "ldap://host:70000/",
            "ldap://[::1/",
            "ldap://[ldap.example.com]/",
            "ldap://[fe80::1%eth0]/",
            "ldap://::1:389/",
            "ldap://user@host/",
        ] {
            assert!(LdapUrl::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0x30]).unwrap(), None);
        assert_eq!(frame_length(&[0x30, 0x05]).unwrap(), Some(7));
        assert_eq!(frame_length(&[0x30, 0x82, 0x01]).unwrap(), None);
        assert_eq!(frame_length(&[0x30, 0x82, 0x01, 0x00]).unwrap(), Some(260));
        assert!(frame_length(&[0x04, 0x00]).is_err());
        assert!(frame_length(&[0x30, 0x80]).is_err());
    }

    #[tokio::test]
    async fn test_read_one_ldap_message_split_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            // two messages, the second split across writes
            server.write_all(&[0x30, 0x03, 0x02, 0x01, 0x01, 0x30]).await.unwrap();
            server.write_all(&[0x03, 0x02, 0x01]).await.unwrap();
            server.write_all(&[0x02]).await.unwrap();
        });
        let mut buf = BytesMut::new();
        let first = read_one_ldap_message(&mut client, &mut buf).await.unwrap();
        assert_eq!(first, vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        let second = read_one_ldap_message(&mut client, &mut buf).await.unwrap();
        assert_eq!(second, vec![0x30, 0x03, 0x02, 0x01, 0x02]);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_one_ldap_message_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let mut buf = BytesMut::new();
        let err = read_one_ldap_message(&mut client, &mut buf).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
