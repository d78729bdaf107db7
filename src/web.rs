//! # Stage: HTTP Surface
//!
//! ## Responsibility
//! Accepts HTTP/1.1 connections, parses query parameters, calls the
//! [`QueryService`] or the seed loader, and writes JSON responses.
//!
//! ## Routes
//! - `POST /seed`
//! - `GET  /participants`
//! - `GET  /participants/count`
//! - `GET  /chart-data/{gender,state,age,diagnosis}`
//!
//! One request per connection; every response carries `Connection: close`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{DashboardError, Result};
use crate::filter::{Dimension, ParticipantFilter};
use crate::loader;
use crate::query::{Page, QueryService};
use crate::store::Store;

/// Largest request head (request line plus headers) we accept.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Largest request body we drain before answering.
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_HEADERS: usize = 100;
/// Pause after a failed `accept` so descriptor exhaustion cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Query string helpers
// ---------------------------------------------------------------------------

/// Percent-decoding for URL query components (`+` is a space).
///
/// Invalid escapes are kept literally; invalid UTF-8 is replaced.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match decoded {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a query string into key-value pairs. Later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = url_decode(parts.next()?);
            let val = parts.next().map(url_decode).unwrap_or_default();
            Some((key, val))
        })
        .collect()
}

fn int_param(params: &HashMap<String, String>, key: &str) -> Result<Option<i64>> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DashboardError::validation(key, format!("expected an integer, got `{raw}`"))),
    }
}

/// Build a filter from query parameters.
///
/// Parameters belonging to `excluded` are not read at all, so a malformed
/// value for them is ignored rather than rejected.
pub fn filter_from_params(
    params: &HashMap<String, String>,
    excluded: Option<Dimension>,
) -> Result<ParticipantFilter> {
    let accepts = |key: &str| excluded.map_or(true, |dim| !dim.filter_params().contains(&key));
    let text = |key: &str| {
        if accepts(key) {
            params.get(key).filter(|v| !v.is_empty()).cloned()
        } else {
            None
        }
    };
    let int = |key: &str| {
        if accepts(key) {
            int_param(params, key)
        } else {
            Ok(None)
        }
    };

    Ok(ParticipantFilter {
        state: text("state"),
        gender: text("gender"),
        diagnosis: text("diagnosis"),
        age_min: int("age_min")?,
        age_max: int("age_max")?,
    })
}

/// Validated `limit`/`offset` from query parameters.
pub fn page_from_params(params: &HashMap<String, String>) -> Result<Page> {
    Page::new(int_param(params, "limit")?, int_param(params, "offset")?)
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Seed,
    Participants,
    ParticipantCount,
    Chart(Dimension),
}

impl Route {
    pub fn resolve(path: &str) -> Option<Self> {
        let path = path.strip_suffix('/').filter(|p| !p.is_empty()).unwrap_or(path);
        match path {
            "/seed" => Some(Route::Seed),
            "/participants" => Some(Route::Participants),
            "/participants/count" => Some(Route::ParticipantCount),
            _ => path
                .strip_prefix("/chart-data/")
                .and_then(Dimension::from_path_segment)
                .map(Route::Chart),
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Route::Seed => "POST",
            _ => "GET",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
    allow: Option<&'static str>,
}

impl Response {
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body, allow: None },
            Err(e) => Self::from_error(&DashboardError::Malformed(e)),
        }
    }

    pub fn from_error(err: &DashboardError) -> Self {
        Self::json(err.status(), &json!({ "error": err.to_string() }))
    }

    fn not_found() -> Self {
        Self::json(404, &json!({ "error": "not found" }))
    }

    fn method_not_allowed(allow: &'static str) -> Self {
        let mut resp = Self::json(405, &json!({ "error": "method not allowed" }));
        resp.allow = Some(allow);
        resp
    }

    fn preflight(allow: &'static str) -> Self {
        Self {
            status: 204,
            body: String::new(),
            allow: Some(allow),
        }
    }

    fn bad_request(detail: &str) -> Self {
        Self::json(400, &json!({ "error": detail }))
    }

    fn head_too_large() -> Self {
        Self::json(431, &json!({ "error": "request head too large" }))
    }

    fn payload_too_large() -> Self {
        Self::json(413, &json!({ "error": "request body too large" }))
    }

    /// Serialize status line, headers and body.
    pub fn to_http(&self) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        // 204 carries neither a body nor its framing headers
        if self.status != 204 {
            head.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n",
                self.body.len()
            ));
        }
        head.push_str("Access-Control-Allow-Origin: *\r\nConnection: close\r\n");
        if let Some(allow) = self.allow {
            head.push_str(&format!(
                "Allow: {allow}, OPTIONS\r\nAccess-Control-Allow-Methods: {allow}, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\n"
            ));
        }
        head.push_str("\r\n");
        head.push_str(&self.body);
        head
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        _ => "Internal Server Error",
    }
}

// ---------------------------------------------------------------------------
// Application state and dispatch
// ---------------------------------------------------------------------------

/// Everything a request handler needs. Built once, shared by every connection.
pub struct AppState {
    queries: QueryService,
    seed_file: PathBuf,
}

impl AppState {
    pub fn new(store: Store, seed_file: impl Into<PathBuf>) -> Self {
        Self {
            queries: QueryService::new(store),
            seed_file: seed_file.into(),
        }
    }

    /// Route one request and produce its response.
    pub async fn handle(&self, method: &str, target: &str) -> Response {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        let Some(route) = Route::resolve(path) else {
            return Response::not_found();
        };
        if method == "OPTIONS" {
            return Response::preflight(route.method());
        }
        if method != route.method() {
            return Response::method_not_allowed(route.method());
        }

        let params = parse_query(query);
        let result = match route {
            Route::Seed => self.seed().await,
            Route::Participants => self.list(&params).await,
            Route::ParticipantCount => self.count(&params).await,
            Route::Chart(dim) => self.chart(dim, &params).await,
        };
        result.unwrap_or_else(|e| {
            if !e.is_client_error() {
                warn!(error = %e, path, "request failed");
            }
            Response::from_error(&e)
        })
    }

    async fn seed(&self) -> Result<Response> {
        let added = loader::seed(self.queries.store(), &self.seed_file).await?;
        info!(added, file = %self.seed_file.display(), "seeded participants");
        Ok(Response::json(
            200,
            &json!({ "message": format!("{added} participants added") }),
        ))
    }

    async fn list(&self, params: &HashMap<String, String>) -> Result<Response> {
        let filter = filter_from_params(params, None)?;
        let page = page_from_params(params)?;
        let rows = self.queries.list(&filter, page).await?;
        Ok(Response::json(200, &rows))
    }

    async fn count(&self, params: &HashMap<String, String>) -> Result<Response> {
        let filter = filter_from_params(params, None)?;
        let count = self.queries.count(&filter).await?;
        Ok(Response::json(200, &json!({ "count": count })))
    }

    async fn chart(&self, dim: Dimension, params: &HashMap<String, String>) -> Result<Response> {
        let filter = filter_from_params(params, Some(dim))?;
        let groups = match dim {
            Dimension::Gender => self.queries.by_gender(&filter).await?,
            Dimension::State => self.queries.by_state(&filter).await?,
            Dimension::Age => self.queries.by_age(&filter).await?,
            Dimension::Diagnosis => self.queries.by_diagnosis(&filter).await?,
        };
        Ok(Response::json(200, &groups))
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

struct RequestHead {
    method: String,
    target: String,
}

enum ReadOutcome {
    Request(RequestHead),
    Closed,
    Rejected(Response),
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<ReadOutcome> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    let (head, header_len, content_length) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(ReadOutcome::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(header_len)) => {
                let content_length = req
                    .headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                    .and_then(|h| std::str::from_utf8(h.value).ok())
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let head = RequestHead {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or("/").to_string(),
                };
                break (head, header_len, content_length);
            }
            Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD_BYTES => {
                return Ok(ReadOutcome::Rejected(Response::head_too_large()));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(httparse::Error::TooManyHeaders) => {
                return Ok(ReadOutcome::Rejected(Response::head_too_large()));
            }
            Err(e) => {
                return Ok(ReadOutcome::Rejected(Response::bad_request(&format!(
                    "malformed request: {e}"
                ))))
            }
        }
    };

    // Drain the body so closing the socket does not reset the connection.
    if content_length > MAX_BODY_BYTES {
        return Ok(ReadOutcome::Rejected(Response::payload_too_large()));
    }
    let mut remaining = content_length.saturating_sub(buf.len() - header_len);
    while remaining > 0 {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Ok(ReadOutcome::Request(head))
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    let started = Instant::now();
    let response = match read_request(&mut stream).await? {
        ReadOutcome::Closed => return Ok(()),
        ReadOutcome::Rejected(resp) => resp,
        ReadOutcome::Request(head) => {
            let resp = state.handle(&head.method, &head.target).await;
            debug!(
                method = %head.method,
                target = %head.target,
                status = resp.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request handled"
            );
            resp
        }
    };

    stream.write_all(response.to_http().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Bind `addr` (use port 0 for an ephemeral port).
    pub async fn bind(addr: &str, state: AppState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(addr = %self.local_addr()?, "server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            warn!(peer = %peer, error = %e, "connection error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Accept connections forever.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }
}
