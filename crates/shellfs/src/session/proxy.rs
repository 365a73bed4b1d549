//! Transport proxies for SSH sessions.
//!
//! A [`Proxy`] opens the TCP stream that the SSH handshake then runs over:
//! HTTP proxies via `CONNECT`, SOCKS5 proxies via an unauthenticated
//! CONNECT command with the target passed by name.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::constants::{DEFAULT_HTTP_PROXY_PORT, DEFAULT_SOCKS5_PROXY_PORT, MAX_PROXY_RESPONSE_LEN};
use crate::error::SessionError;

/// Proxy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl ProxyKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ProxyKind::Http => DEFAULT_HTTP_PROXY_PORT,
            ProxyKind::Socks5 => DEFAULT_SOCKS5_PROXY_PORT,
        }
    }
}

/// A proxy between this host and the SSH server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    kind: ProxyKind,
    host: String,
    port: u16,
}

impl Proxy {
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Http,
            host: host.into(),
            port,
        }
    }

    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Socks5,
            host: host.into(),
            port,
        }
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.host.is_empty() {
            return Err(SessionError::InvalidProxy(format!("{self}: empty host")));
        }
        if self.port == 0 {
            return Err(SessionError::InvalidProxy(format!("{self}: port 0")));
        }
        Ok(())
    }

    /// Open a TCP stream to `target_host:target_port` through this proxy.
    pub async fn connect(&self, target_host: &str, target_port: u16) -> Result<TcpStream, SessionError> {
        debug!(proxy = %self, target = %authority(target_host, target_port), "connecting through proxy");

        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| SessionError::ConnectionFailed(format!("proxy {self}: {e}")))?;

        match self.kind {
            ProxyKind::Http => http_connect(&mut stream, target_host, target_port).await?,
            ProxyKind::Socks5 => socks5_connect(&mut stream, target_host, target_port).await?,
        }
        Ok(stream)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), authority(&self.host, self.port))
    }
}

/// Parses `http://host[:port]` and `socks5://host[:port]`.
impl FromStr for Proxy {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(s).map_err(|e| SessionError::InvalidProxy(format!("{s}: {e}")))?;
        let kind = match url.scheme() {
            "http" => ProxyKind::Http,
            "socks5" | "socks5h" => ProxyKind::Socks5,
            other => {
                return Err(SessionError::InvalidProxy(format!(
                    "{s}: unsupported proxy scheme {other:?}"
                )));
            }
        };
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| SessionError::InvalidProxy(format!("{s}: missing host")))?;
        let proxy = Self {
            kind,
            host,
            port: url.port().unwrap_or(kind.default_port()),
        };
        proxy.validate()?;
        Ok(proxy)
    }
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn handshake_error(e: std::io::Error) -> SessionError {
    SessionError::ProxyFailed(e.to_string())
}

async fn http_connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), SessionError> {
    let target = authority(host, port);
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(handshake_error)?;

    // Byte at a time: anything after the header belongs to the SSH stream.
    let mut response = Vec::new();
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_PROXY_RESPONSE_LEN {
            return Err(SessionError::ProxyFailed("CONNECT response header too long".into()));
        }
        response.push(stream.read_u8().await.map_err(handshake_error)?);
    }

    let text = String::from_utf8_lossy(&response);
    let status_line = text.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let status = parts.next();
    if !version.starts_with("HTTP/") || status != Some("200") {
        return Err(SessionError::ProxyFailed(format!(
            "CONNECT {target} refused: {status_line}"
        )));
    }
    Ok(())
}

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_NO_AUTH: u8 = 0x00;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

async fn socks5_connect(stream: &mut TcpStream, host: &str, port: u16) -> Result<(), SessionError> {
    stream
        .write_all(&[SOCKS_VERSION, 1, SOCKS_NO_AUTH])
        .await
        .map_err(handshake_error)?;

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.map_err(handshake_error)?;
    if method != [SOCKS_VERSION, SOCKS_NO_AUTH] {
        return Err(SessionError::ProxyFailed(
            "SOCKS5 proxy requires an unsupported authentication method".into(),
        ));
    }

    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&addr.octets());
        }
        Ok(IpAddr::V6(addr)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&addr.octets());
        }
        Err(_) => {
            let name = host.as_bytes();
            let len = u8::try_from(name.len())
                .map_err(|_| SessionError::InvalidHostname(host.to_string()))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(name);
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(handshake_error)?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await.map_err(handshake_error)?;
    if head[0] != SOCKS_VERSION {
        return Err(SessionError::ProxyFailed(format!(
            "unexpected SOCKS version {}",
            head[0]
        )));
    }
    if head[1] != 0x00 {
        return Err(SessionError::ProxyFailed(socks5_reply_message(head[1]).into()));
    }

    // Bound address, discarded.
    let addr_len = match head[3] {
        SOCKS_ATYP_IPV4 => 4,
        SOCKS_ATYP_IPV6 => 16,
        SOCKS_ATYP_DOMAIN => stream.read_u8().await.map_err(handshake_error)? as usize,
        other => {
            return Err(SessionError::ProxyFailed(format!(
                "unknown SOCKS address type {other}"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await.map_err(handshake_error)?;
    Ok(())
}

fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown SOCKS error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_proxies() {
        let http: Proxy = "http://proxy.internal:3128".parse().unwrap();
        assert_eq!(http, Proxy::http("proxy.internal", 3128));

        let socks: Proxy = "socks5://bastion".parse().unwrap();
        assert_eq!(socks, Proxy::socks5("bastion", 1080));
        assert_eq!(socks.to_string(), "socks5://bastion:1080");

        let http_default: Proxy = "http://proxy.internal".parse().unwrap();
        assert_eq!(http_default.port(), 80);
    }

    #[test]
    fn test_parse_rejects_bad_proxies() {
        assert!(matches!(
            "ftp://proxy:21".parse::<Proxy>(),
            Err(SessionError::InvalidProxy(_))
        ));
        assert!(matches!(
            "not a url".parse::<Proxy>(),
            Err(SessionError::InvalidProxy(_))
        ));
        assert!(Proxy::http("", 8080).validate().is_err());
        assert!(Proxy::socks5("bastion", 0).validate().is_err());
    }

    #[tokio::test]
    async fn test_http_connect_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            while !request.ends_with(b"\r\n\r\n") {
                request.push(sock.read_u8().await.unwrap());
            }
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\nSSH-2.0-test\r\n")
                .await
                .unwrap();
            String::from_utf8(request).unwrap()
        });

        let proxy = Proxy::http("127.0.0.1", port);
        let mut stream = proxy.connect("remote.example", 2222).await.unwrap();

        // The banner after the CONNECT response is left for the SSH layer.
        let mut banner = [0u8; 14];
        stream.read_exact(&mut banner).await.unwrap();
        assert_eq!(&banner, b"SSH-2.0-test\r\n");

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT remote.example:2222 HTTP/1.1\r\n"));
        assert!(request.contains("Host: remote.example:2222\r\n"));
    }

    #[tokio::test]
    async fn test_http_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            while !request.ends_with(b"\r\n\r\n") {
                request.push(sock.read_u8().await.unwrap());
            }
            sock.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let err = Proxy::http("127.0.0.1", port)
            .connect("remote.example", 22)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProxyFailed(ref msg) if msg.contains("407")));
    }

    #[tokio::test]
    async fn test_socks5_connect_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [5, 1, 0]);
            sock.write_all(&[5, 0]).await.unwrap();

            let mut head = [0u8; 4];
            sock.read_exact(&mut head).await.unwrap();
            assert_eq!(head, [5, 1, 0, 3]);
            let len = sock.read_u8().await.unwrap() as usize;
            let mut name = vec![0u8; len];
            sock.read_exact(&mut name).await.unwrap();
            let target_port = sock.read_u16().await.unwrap();

            sock.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 22]).await.unwrap();
            (String::from_utf8(name).unwrap(), target_port)
        });

        Proxy::socks5("127.0.0.1", port)
            .connect("remote.example", 2222)
            .await
            .unwrap();

        let (name, target_port) = server.await.unwrap();
        assert_eq!(name, "remote.example");
        assert_eq!(target_port, 2222);
    }

    #[tokio::test]
    async fn test_socks5_connect_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            sock.read_exact(&mut greeting).await.unwrap();
            sock.write_all(&[5, 0]).await.unwrap();
            let mut request = [0u8; 10];
            sock.read_exact(&mut request).await.unwrap();
            sock.write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0]).await.unwrap();
        });

        let err = Proxy::socks5("127.0.0.1", port)
            .connect("10.0.0.7", 22)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProxyFailed(ref msg) if msg == "connection refused"));
    }
}
