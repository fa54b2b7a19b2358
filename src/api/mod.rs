//! HTTP/1.1 JSON API.
//!
//! - `GET /`: service metadata (detector name to model reference)
//! - `GET /health`: liveness
//! - `POST /predict`: run the cascade over one uploaded image
//!
//! Uploads are accepted as `multipart/form-data` (field `file`) or as a raw
//! image body, with the filename taken from the `filename` query parameter.
//!
//! At most `max_in_flight` connections are served at once; the rest are
//! answered with 503 straight from the accept loop.

mod multipart;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::CascadeError;
use crate::service::CascadeService;

const MAX_HEADER_BYTES: usize = 8192;
const DEFAULT_UPLOAD_NAME: &str = "upload";
const MAX_DRAIN_BYTES: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    /// Connections handled concurrently; extra ones get 503.
    pub max_in_flight: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            max_body_bytes: 16 * 1024 * 1024,
            max_in_flight: 8,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<CascadeService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<CascadeService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        if self.cfg.max_in_flight == 0 {
            return Err(anyhow!("max_in_flight must be greater than zero"));
        }
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, service, shutdown_thread) {
                log::error!("cascade api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    service: Arc<CascadeService>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let in_flight = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => match InFlight::acquire(&in_flight, cfg.max_in_flight) {
                Some(slot) => {
                    let service = service.clone();
                    let max_body_bytes = cfg.max_body_bytes;
                    std::thread::spawn(move || {
                        let _slot = slot;
                        if let Err(err) = handle_connection(stream, &service, max_body_bytes) {
                            log::warn!("cascade api request from {} failed: {}", peer, err);
                        }
                    });
                }
                None => {
                    log::warn!(
                        "cascade api busy ({} requests in flight), rejecting {}",
                        cfg.max_in_flight,
                        peer
                    );
                    if let Err(err) = reject_busy(stream) {
                        log::warn!("cascade api busy reply to {} failed: {}", peer, err);
                    }
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// One occupied request slot, released on drop.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self(counter.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn reject_busy(mut stream: TcpStream) -> Result<()> {
    stream.set_nonblocking(false)?;
    write_detail(&mut stream, 503, "Server busy, retry later")?;
    close_after_reply(&mut stream);
    Ok(())
}

/// Finish a reply sent before the request was fully read.
///
/// Closing a socket with unread input makes the kernel send RST, which can
/// discard the reply before the client reads it. Half-close instead and
/// discard what the client still sends, up to `MAX_DRAIN_BYTES`.
fn close_after_reply(stream: &mut TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(250)));
    let mut sink = [0u8; 8192];
    let mut drained = 0;
    while drained < MAX_DRAIN_BYTES {
        match stream.read(&mut sink) {
            Ok(0) | Err(_) => break,
            Ok(n) => drained += n,
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    service: &CascadeService,
    max_body_bytes: usize,
) -> Result<()> {
    // Accepted sockets inherit the listener's non-blocking flag on some platforms.
    stream.set_nonblocking(false)?;

    let request = match read_request(&mut stream, max_body_bytes) {
        Ok(request) => request,
        Err(err) => {
            write_detail(&mut stream, err.status, &err.detail)?;
            close_after_reply(&mut stream);
            return Err(anyhow!("{}", err.detail));
        }
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_json(&mut stream, 200, &service.info()),
        ("GET", "/health") => write_json(&mut stream, 200, &json!({"status": "ok"})),
        ("POST", "/predict") => handle_predict(&mut stream, service, &request),
        (_, "/") | (_, "/health") | (_, "/predict") => {
            write_detail(&mut stream, 405, "Method Not Allowed")
        }
        _ => write_detail(&mut stream, 404, "Not Found"),
    }
}

fn handle_predict(stream: &mut TcpStream, service: &CascadeService, request: &HttpRequest) -> Result<()> {
    let (filename, data) = match upload_from_request(request) {
        Ok(upload) => upload,
        Err(err) => return write_detail(stream, 422, &err.to_string()),
    };

    match service.predict(&filename, &data) {
        Ok(response) => write_json(stream, 200, &response),
        Err(err) => {
            log::warn!("predict {} failed ({}): {}", filename, err.code(), err);
            let (status, detail) = error_response(&err);
            write_detail(stream, status, &detail)
        }
    }
}

fn upload_from_request(request: &HttpRequest) -> Result<(String, Vec<u8>)> {
    let content_type = request
        .headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or("");
    let (filename, data) = match multipart::boundary(content_type) {
        Some(boundary) => {
            let upload = multipart::extract_file(&request.body, &boundary, "file")?;
            (upload.filename, upload.data)
        }
        None => (request.query_param("filename"), request.body.clone()),
    };
    if data.is_empty() {
        return Err(anyhow!("no image payload in request"));
    }
    let filename = filename
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_UPLOAD_NAME.to_string());
    Ok((filename, data))
}

/// Status code and client-facing message for a failed prediction.
pub fn error_response(err: &CascadeError) -> (u16, String) {
    match err {
        CascadeError::DetectorUnavailable { .. } => {
            (500, "Models not initialized correctly".to_string())
        }
        CascadeError::DeadlineExceeded { .. } => (504, format!("Error processing image: {}", err)),
        CascadeError::Decode { .. } | CascadeError::DetectorInvocation { .. } => {
            (500, format!("Error processing image: {}", err))
        }
    }
}

struct HttpError {
    status: u16,
    detail: String,
}

impl HttpError {
    fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

fn read_request(
    stream: &mut TcpStream,
    max_body_bytes: usize,
) -> std::result::Result<HttpRequest, HttpError> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| HttpError::new(400, e.to_string()))?;
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream
            .read(&mut buf)
            .map_err(|e| HttpError::new(400, format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(HttpError::new(400, "connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            if pos > MAX_HEADER_BYTES {
                return Err(HttpError::new(431, "request headers too large"));
            }
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(HttpError::new(431, "request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::new(400, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "missing method"))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| HttpError::new(400, "missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::new(400, "invalid content-length"))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(HttpError::new(
            413,
            format!("payload exceeds {} bytes", max_body_bytes),
        ));
    }

    let body_start = header_end + 4;
    let mut body = data.split_off(body_start.min(data.len()));
    while body.len() < content_length {
        let n = stream
            .read(&mut buf)
            .map_err(|e| HttpError::new(400, format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(HttpError::new(400, "connection closed before body completed"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let mut split = raw_path.splitn(2, '?');
    let path = split.next().unwrap_or(raw_path).to_string();
    let query = split.next().unwrap_or("").to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body,
    })
}

fn write_detail(stream: &mut TcpStream, status: u16, detail: &str) -> Result<()> {
    write_json(stream, status, &json!({ "detail": detail }))
}

fn write_json<T: Serialize>(stream: &mut TcpStream, status: u16, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        422 => "HTTP/1.1 422 Unprocessable Entity",
        431 => "HTTP/1.1 431 Request Header Fields Too Large",
        503 => "HTTP/1.1 503 Service Unavailable",
        504 => "HTTP/1.1 504 Gateway Timeout",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Decoded value of a query parameter (`%XX` and `+` unescaped).
    fn query_param(&self, key: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}
