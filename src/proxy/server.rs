//! Proxy server implementation

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::app::ProxyConfig;
use crate::error::{ProxyError, RequestError};
use crate::guard::{DecisionEngine, RequestOutcome, ResponseOutcome, TunnelDecision};
use crate::http::HttpMessage;

const FORBIDDEN: &[u8] = b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Guarding forward proxy
pub struct ProxyServer {
    /// Configuration
    config: ProxyConfig,

    /// Listen port
    port: u16,

    /// Decides what happens to each request
    engine: Arc<DecisionEngine>,

    /// Server running flag
    running: Arc<AtomicBool>,
}

impl ProxyServer {
    pub fn new(config: &ProxyConfig, port: u16, engine: Arc<DecisionEngine>) -> Self {
        Self {
            config: config.clone(),
            port,
            engine,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind the listener and spawn the accept loop
    pub async fn start(&self) -> Result<SocketAddr, ProxyError> {
        let start_error = |reason: String| ProxyError::StartError {
            port: self.port,
            reason,
        };

        let addr: SocketAddr = format!("{}:{}", self.config.listen_addr, self.port)
            .parse()
            .map_err(|e| start_error(format!("invalid listen address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| start_error(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| start_error(e.to_string()))?;

        tracing::info!("Proxy server listening on {}", local_addr);

        self.running.store(true, Ordering::SeqCst);

        let engine = self.engine.clone();
        let running = self.running.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Proxy: new connection from {}", peer_addr);

                        let engine = engine.clone();
                        let config = config.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer_addr, engine, config).await {
                                tracing::warn!("Proxy connection error: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Stop accepting new connections
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Proxy server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Request line and headers as read off the wire
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    /// Header lines in arrival order, without the trailing CRLF
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|te| te.to_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn content_length(&self) -> Result<usize, RequestError> {
        match self.header("content-length") {
            Some(value) => value.trim().parse().map_err(|_| RequestError::InvalidHeader {
                header: "content-length".to_string(),
                value: value.to_string(),
            }),
            None => Ok(0),
        }
    }

    /// Absolute URL of the request; origin-form targets are completed from `Host`
    fn absolute_url(&self) -> Result<String, RequestError> {
        if self.target.starts_with('/') {
            let host = self
                .header("host")
                .ok_or_else(|| RequestError::MissingHost(self.target.clone()))?;
            return Ok(format!("http://{}{}", host.trim(), self.target));
        }
        Ok(self.target.clone())
    }
}

async fn read_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ProxyError::InvalidRequest(request_line.trim().to_string()).into());
    }

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(RequestHead {
        method: parts[0].to_string(),
        target: parts[1].to_string(),
        headers,
    })
}

/// Handle a single connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: Arc<DecisionEngine>,
    config: ProxyConfig,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let head = read_head(&mut reader).await?;

    tracing::debug!("Proxy: {} {} from {}", head.method, head.target, peer_addr);

    if head.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(reader.into_inner(), &head.target, engine).await
    } else {
        handle_http_request(reader, head, engine, config).await
    }
}

/// Handle CONNECT method (HTTPS tunnel)
async fn handle_connect(mut stream: TcpStream, target: &str, engine: Arc<DecisionEngine>) -> Result<()> {
    if engine.on_tunnel(target) == TunnelDecision::Deny {
        stream.write_all(FORBIDDEN).await?;
        return Ok(());
    }

    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(443)),
        None => (target, 443),
    };

    stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;

    tunnel_traffic(stream, host, port).await
}

/// Pure tunnel (no MITM)
async fn tunnel_traffic(mut client: TcpStream, host: &str, port: u16) -> Result<()> {
    let mut server = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|_| ProxyError::TargetConnectionError {
            target: format!("{}:{}", host, port),
        })?;
    tracing::debug!("Proxy: tunnel established to {}:{}", host, port);

    let (mut client_read, mut client_write) = client.split();
    let (mut server_read, mut server_write) = server.split();

    let client_to_server = tokio::io::copy(&mut client_read, &mut server_write);
    let server_to_client = tokio::io::copy(&mut server_read, &mut client_write);

    tokio::select! {
        _ = client_to_server => {},
        _ = server_to_client => {},
    }

    Ok(())
}

/// Handle HTTP request (non-CONNECT)
async fn handle_http_request(
    mut reader: BufReader<TcpStream>,
    head: RequestHead,
    engine: Arc<DecisionEngine>,
    config: ProxyConfig,
) -> Result<()> {
    let body = match read_body(&mut reader, &head, config.max_request_size).await {
        Ok(body) => body,
        Err(e) => {
            reader.get_mut().write_all(FORBIDDEN).await?;
            return Err(e);
        }
    };

    let mut msg = HttpMessage::new_request(&head.method, &head.absolute_url()?);
    for (key, value) in &head.headers {
        msg.set_header(key, value);
    }
    if !body.is_empty() {
        msg.body = Some(body);
    }

    let mut stream = reader.into_inner();
    let outcome = engine.on_request(&mut msg);

    if let Some(response) = &msg.response {
        stream.write_all(&response.to_bytes()).await?;
        return Ok(());
    }
    if outcome == RequestOutcome::Deny {
        stream.write_all(FORBIDDEN).await?;
        return Ok(());
    }

    let response = match forward(&head, &msg, config.max_response_size).await {
        Ok(response) => response,
        Err(e) => {
            stream.write_all(BAD_GATEWAY).await?;
            return Err(e);
        }
    };

    let (status, status_text) = parse_status_line(&response);
    msg.set_upstream_status(status, &status_text);
    if let ResponseOutcome::Revoke { host, username } = engine.on_response(&msg) {
        tracing::debug!(host = %host, username = %username, "Credential revoked after response");
    }

    stream.write_all(&response).await?;
    Ok(())
}

/// Read the request body, de-chunking `Transfer-Encoding: chunked`
async fn read_body<R>(reader: &mut R, head: &RequestHead, max: usize) -> Result<Vec<u8>>
where
    R: AsyncBufReadExt + Unpin,
{
    let too_large = |size: usize| ProxyError::BodyTooLarge { size, max };

    if !head.is_chunked() {
        let content_length = head.content_length()?;
        if content_length > max {
            return Err(too_large(content_length).into());
        }
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        return Ok(body);
    }

    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        if reader.read_line(&mut size_line).await? == 0 {
            return Err(ProxyError::InvalidRequest("truncated chunked body".into()).into());
        }
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| RequestError::InvalidHeader {
            header: "transfer-encoding".to_string(),
            value: format!("chunk size {:?}", size_hex),
        })?;

        if size == 0 {
            // trailer section ends with an empty line
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }

        let total = body.len().saturating_add(size);
        if total > max {
            return Err(too_large(total).into());
        }
        let start = body.len();
        body.resize(total, 0);
        reader.read_exact(&mut body[start..]).await?;

        let mut crlf = String::new();
        reader.read_line(&mut crlf).await?;
    }
}

/// Send the request upstream and read the whole response
///
/// Uses HTTP/1.0 with `Connection: close` so the response ends at EOF. The
/// body goes out with a fresh `Content-Length`, never chunked.
async fn forward(head: &RequestHead, msg: &HttpMessage, max_response_size: usize) -> Result<Vec<u8>> {
    let url = url::Url::parse(&msg.url).map_err(|_| RequestError::InvalidUrl(msg.url.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| RequestError::MissingHost(msg.url.clone()))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let target = format!("{}:{}", host, port);
    let mut target_stream = TcpStream::connect(&target)
        .await
        .map_err(|_| ProxyError::TargetConnectionError {
            target: target.clone(),
        })?;

    let mut request = format!("{} {} HTTP/1.0\r\n", msg.method, path);
    if head.header("host").is_none() {
        request.push_str(&format!("Host: {}\r\n", host));
    }
    for (key, value) in &head.headers {
        let lower = key.to_lowercase();
        if matches!(
            lower.as_str(),
            "proxy-connection" | "connection" | "keep-alive" | "transfer-encoding" | "content-length"
        ) {
            continue;
        }
        request.push_str(&format!("{}: {}\r\n", key, value));
    }
    if let Some(body) = &msg.body {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("Connection: close\r\n\r\n");

    target_stream.write_all(request.as_bytes()).await?;
    if let Some(body) = &msg.body {
        target_stream.write_all(body).await?;
    }

    let response = read_limited(&mut target_stream, max_response_size).await?;
    tracing::debug!("Proxy: received {} bytes from {}", response.len(), target);
    Ok(response)
}

async fn read_limited<R>(source: &mut R, max: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut response = Vec::new();
    source
        .take(max as u64 + 1)
        .read_to_end(&mut response)
        .await
        .context("Failed to read upstream response")?;

    if response.len() > max {
        return Err(ProxyError::BodyTooLarge {
            size: response.len(),
            max,
        }
        .into());
    }
    Ok(response)
}

/// Status code and reason phrase; `(0, "")` if the status line is unreadable
fn parse_status_line(response: &[u8]) -> (u16, String) {
    let text = String::from_utf8_lossy(response);
    let line = text.lines().next().unwrap_or_default();
    let mut parts = line.splitn(3, ' ');
    let _version = parts.next();
    let status = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let reason = parts.next().unwrap_or_default().trim().to_string();
    (status, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::GuardConfig;
    use crate::guard::TrustRegistry;

    fn engine(known: &[&str]) -> Arc<DecisionEngine> {
        let mut registry = TrustRegistry::new();
        for host in known {
            registry.add_known_host(host);
        }
        Arc::new(DecisionEngine::from_config(&GuardConfig::default(), registry).unwrap())
    }

    /// Run one proxied exchange and return everything the client received
    async fn exchange(engine: Arc<DecisionEngine>, request: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = handle_connection(stream, peer, engine, ProxyConfig::default()).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request.as_bytes()).await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        server.await.unwrap();
        String::from_utf8_lossy(&received).to_string()
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line(b"HTTP/1.1 401 Unauthorized\r\n\r\n"),
            (401, "Unauthorized".to_string())
        );
        assert_eq!(parse_status_line(b"garbage"), (0, String::new()));
    }

    #[test]
    fn test_absolute_url_from_host_header() {
        let head = RequestHead {
            method: "GET".into(),
            target: "/watch?v=1".into(),
            headers: vec![("Host".into(), "www.youtube.com".into())],
        };
        assert_eq!(head.absolute_url().unwrap(), "http://www.youtube.com/watch?v=1");

        let head = RequestHead {
            method: "GET".into(),
            target: "/".into(),
            headers: Vec::new(),
        };
        assert!(head.absolute_url().is_err());
    }

    #[test]
    fn test_invalid_content_length() {
        let head = RequestHead {
            method: "POST".into(),
            target: "http://a.com/".into(),
            headers: vec![("Content-Length".into(), "ten".into())],
        };
        assert!(matches!(
            head.content_length(),
            Err(RequestError::InvalidHeader { .. })
        ));
    }

    fn post_head(headers: &[(&str, &str)]) -> RequestHead {
        RequestHead {
            method: "POST".into(),
            target: "http://a.com/login".into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_chunked_body_is_decoded() {
        let head = post_head(&[("Transfer-Encoding", "chunked")]);
        let mut wire = BufReader::new(&b"5\r\nuser=\r\n7;ext=1\r\nalice&x\r\n0\r\nX-Trailer: 1\r\n\r\nNEXT"[..]);

        let body = read_body(&mut wire, &head, 1024).await.unwrap();
        assert_eq!(body, b"user=alice&x");

        let mut rest = String::new();
        wire.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "NEXT");
    }

    #[tokio::test]
    async fn test_oversized_bodies_rejected() {
        let head = post_head(&[("Transfer-Encoding", "chunked")]);
        let mut wire = BufReader::new(&b"a\r\n0123456789\r\n0\r\n\r\n"[..]);
        assert!(read_body(&mut wire, &head, 8).await.is_err());

        let head = post_head(&[("Content-Length", "10")]);
        let mut wire = BufReader::new(&b"0123456789"[..]);
        assert!(read_body(&mut wire, &head, 8).await.is_err());
    }

    #[tokio::test]
    async fn test_chunked_login_is_checked() {
        let response = exchange(
            engine(&["site-a.com"]),
            "POST http://site-a.com/login HTTP/1.1\r\nHost: site-a.com\r\n\
             Content-Type: application/x-www-form-urlencoded\r\nTransfer-Encoding: chunked\r\n\r\n\
             f\r\nusername=alice&\r\nf\r\npassword=123456\r\n0\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("was not sent"));
    }

    #[tokio::test]
    async fn test_typo_page_served_without_upstream() {
        let response = exchange(
            engine(&["www.youtube.com"]),
            "GET http://www.youtbe.com/ HTTP/1.1\r\nHost: www.youtbe.com\r\nAccept: text/html\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("referrer-policy: no-referrer\r\n"));
        assert!(response.contains("Did you mean youtube.com?"));
    }

    #[tokio::test]
    async fn test_typo_resource_denied() {
        let response = exchange(
            engine(&["www.youtube.com"]),
            "GET http://www.youtbe.com/app.js HTTP/1.1\r\nHost: www.youtbe.com\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 403 Forbidden"));
    }

    #[tokio::test]
    async fn test_connect_to_typo_host_refused() {
        let response = exchange(
            engine(&["www.youtube.com"]),
            "CONNECT www.youtbe.com:443 HTTP/1.1\r\nHost: www.youtbe.com:443\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 403 Forbidden"));
    }

    #[tokio::test]
    async fn test_passthrough_forwards_upstream() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let origin = tokio::spawn(async move {
            let (mut stream, _) = upstream.accept().await.unwrap();
            let mut reader = BufReader::new(&mut stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).await.unwrap();
                if header.trim().is_empty() {
                    break;
                }
            }
            stream
                .write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 5\r\n\r\nhello")
                .await
                .unwrap();
            line
        });

        let engine = engine(&[]);
        let request = format!(
            "GET http://{}/index.html?x=1 HTTP/1.1\r\nHost: {}\r\nAccept: text/html\r\nProxy-Connection: keep-alive\r\n\r\n",
            upstream_addr, upstream_addr
        );
        let response = exchange(engine.clone(), &request).await;

        assert!(response.ends_with("hello"));
        assert_eq!(origin.await.unwrap(), "GET /index.html?x=1 HTTP/1.0\r\n");
        assert!(engine.registry().read().lookup_known("127.0.0.1").is_some());
    }
}
