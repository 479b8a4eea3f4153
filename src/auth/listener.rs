//! One-shot localhost listener standing in for the registered redirect URI.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::AuthError;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

// Browsers open speculative connections that never carry a request.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

const CLOSE_PAGE: &str = "<html><body><p>Authentication complete. You may close this window.</p>\
<script>window.close();</script></body></html>";

// Fragments never reach the server; the page reads it and posts it back.
const RELAY_PAGE: &str = "<html><body><script>\n\
var xhr = new XMLHttpRequest();\n\
xhr.open(\"POST\", \"/\");\n\
xhr.setRequestHeader(\"Content-Type\", \"application/x-www-form-urlencoded\");\n\
xhr.onloadend = function () { window.close(); };\n\
xhr.send(window.location.hash);\n\
</script></body></html>";

/// What the redirect delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectPayload {
    /// Authorization code from `GET /?code=...`.
    Code(String),
    /// Key/value pairs relayed from the URL fragment (implicit grant).
    Fragment(HashMap<String, String>),
}

/// Local HTTP listener bound before the browser is sent to the authorize URL.
///
/// The listener is consumed by [`RedirectListener::wait`]; the port is released
/// as soon as the first completion, failure or timeout happens.
#[derive(Debug)]
pub struct RedirectListener {
    port: u16,
    listener_v4: Option<TcpListener>,
    listener_v6: Option<TcpListener>,
}

impl RedirectListener {
    /// Bind loopback on `port` (IPv4 and, when available, IPv6). Port `0`
    /// picks a free port.
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let mut bind_errors = Vec::new();
        let listener_v4 = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                bind_errors.push(format!("127.0.0.1:{port} ({err})"));
                None
            }
        };
        let port = match &listener_v4 {
            Some(listener) => listener.local_addr()?.port(),
            None => port,
        };
        let listener_v6 = match TcpListener::bind(("::1", port)).await {
            Ok(listener) => Some(listener),
            Err(err) => {
                bind_errors.push(format!("[::1]:{port} ({err})"));
                None
            }
        };
        let port = match (&listener_v4, &listener_v6) {
            (None, None) => {
                return Err(AuthError::Listener(format!(
                    "bind failed: {}",
                    bind_errors.join("; ")
                )))
            }
            (None, Some(v6)) => v6.local_addr()?.port(),
            _ => port,
        };
        tracing::debug!(port, "Redirect listener bound");
        Ok(Self {
            port,
            listener_v4,
            listener_v6,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI registered with the authorize request.
    pub fn redirect_uri(&self) -> String {
        redirect_uri(self.port)
    }

    /// Serve requests until one completes the redirect, then unbind. Fails
    /// with [`AuthError::Timeout`] once `timeout` elapses.
    pub async fn wait(self, timeout: Duration) -> Result<RedirectPayload, AuthError> {
        let port = self.port;
        let result = tokio::time::timeout(timeout, self.serve())
            .await
            .unwrap_or_else(|_| Err(AuthError::Timeout(timeout.as_millis() as u64)));
        match &result {
            Ok(_) => tracing::debug!(port, "Redirect listener completed"),
            Err(err) => tracing::debug!(port, error = %err, "Redirect listener failed"),
        }
        result
    }

    async fn serve(mut self) -> Result<RedirectPayload, AuthError> {
        loop {
            let mut socket = self.accept().await?;
            let request =
                match tokio::time::timeout(IDLE_CONNECTION_TIMEOUT, read_request(&mut socket)).await
                {
                    Ok(Ok(Some(request))) => request,
                    Ok(Ok(None)) | Err(_) => {
                        tracing::debug!(port = self.port, "Skipping idle redirect connection");
                        continue;
                    }
                    Ok(Err(err)) => {
                        respond(&mut socket, "400 Bad Request", "").await;
                        return Err(err);
                    }
                };
            match route(&request) {
                Route::Complete(Ok(payload)) => {
                    respond(&mut socket, "200 OK", CLOSE_PAGE).await;
                    return Ok(payload);
                }
                Route::Complete(Err(err)) => {
                    respond(&mut socket, "400 Bad Request", CLOSE_PAGE).await;
                    return Err(err);
                }
                Route::Relay => {
                    respond(&mut socket, "200 OK", RELAY_PAGE).await;
                }
            }
        }
    }

    async fn accept(&mut self) -> Result<TcpStream, AuthError> {
        let accepted = match (self.listener_v4.as_mut(), self.listener_v6.as_mut()) {
            (Some(v4), Some(v6)) => {
                tokio::select! {
                    result = v4.accept() => result,
                    result = v6.accept() => result,
                }
            }
            (Some(v4), None) => v4.accept().await,
            (None, Some(v6)) => v6.accept().await,
            (None, None) => {
                return Err(AuthError::Listener("listener is not bound".to_string()));
            }
        };
        let (socket, _) =
            accepted.map_err(|e| AuthError::Listener(format!("accept failed: {e}")))?;
        Ok(socket)
    }
}

/// `http://localhost:<port>`.
pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}")
}

#[derive(Debug)]
struct InboundRequest {
    method: String,
    target: String,
    body: Vec<u8>,
}

enum Route {
    Complete(Result<RedirectPayload, AuthError>),
    Relay,
}

fn route(request: &InboundRequest) -> Route {
    if request.method.eq_ignore_ascii_case("GET") {
        let query = match parse_target_query(&request.target) {
            Ok(query) => query,
            Err(err) => return Route::Complete(Err(err)),
        };
        if let Some(err) = redirect_error(&query) {
            return Route::Complete(Err(err));
        }
        return match query.get("code") {
            Some(code) if !code.is_empty() => {
                Route::Complete(Ok(RedirectPayload::Code(code.clone())))
            }
            _ => Route::Relay,
        };
    }
    Route::Complete(parse_fragment_body(&request.body).and_then(|pairs| {
        match redirect_error(&pairs) {
            Some(err) => Err(err),
            None => Ok(RedirectPayload::Fragment(pairs)),
        }
    }))
}

fn parse_target_query(target: &str) -> Result<HashMap<String, String>, AuthError> {
    let url = Url::parse(&format!("http://localhost{target}"))
        .map_err(|e| AuthError::Listener(format!("invalid request target: {e}")))?;
    Ok(url.query_pairs().into_owned().collect())
}

/// Parse the relayed `#key=value&...` body.
fn parse_fragment_body(body: &[u8]) -> Result<HashMap<String, String>, AuthError> {
    let raw = std::str::from_utf8(body)
        .map_err(|_| AuthError::Listener("fragment body is not UTF-8".to_string()))?;
    let raw = raw.trim();
    let raw = raw.strip_prefix('#').unwrap_or(raw);
    if raw.is_empty() {
        return Err(AuthError::Listener("redirect carried no fragment".to_string()));
    }
    let mut url = Url::parse("http://localhost/")
        .map_err(|e| AuthError::Listener(format!("invalid base url: {e}")))?;
    url.set_query(Some(raw));
    let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
    if pairs.keys().any(String::is_empty) {
        return Err(AuthError::Listener(format!("malformed fragment: {raw}")));
    }
    Ok(pairs)
}

fn redirect_error(pairs: &HashMap<String, String>) -> Option<AuthError> {
    let code = pairs.get("error")?;
    Some(AuthError::Authorization {
        code: code.clone(),
        message: pairs.get("error_description").cloned().unwrap_or_default(),
    })
}

/// Read one HTTP request. `Ok(None)` means the peer closed without sending
/// anything.
async fn read_request(socket: &mut TcpStream) -> Result<Option<InboundRequest>, AuthError> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(AuthError::Listener("request headers too large".to_string()));
        }
        let read = socket
            .read(&mut chunk)
            .await
            .map_err(|e| AuthError::Listener(format!("read failed: {e}")))?;
        if read == 0 && buffer.is_empty() {
            return Ok(None);
        }
        if read == 0 {
            return Err(AuthError::Listener(
                "connection closed before request was complete".to_string(),
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let head = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| AuthError::Listener("request head is not UTF-8".to_string()))?;
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (method, target) = match (request_line.next(), request_line.next()) {
        (Some(method), Some(target)) if target.starts_with('/') => {
            (method.to_string(), target.to_string())
        }
        _ => return Err(AuthError::Listener("malformed request line".to_string())),
    };
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.trim().parse::<usize>())
        .transpose()
        .map_err(|_| AuthError::Listener("invalid content-length".to_string()))?
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(AuthError::Listener("request body too large".to_string()));
    }

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let read = socket
            .read(&mut chunk)
            .await
            .map_err(|e| AuthError::Listener(format!("read failed: {e}")))?;
        if read == 0 {
            return Err(AuthError::Listener("request body truncated".to_string()));
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(Some(InboundRequest {
        method,
        target,
        body,
    }))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
