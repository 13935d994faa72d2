//! Minimal HTTP/1.1 front end for the REST router.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flsd_log::{log_debug, log_warn, Category};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::rest::{RestContext, RestError, RestResponse, RestRouter, HTTP_NOT_FOUND};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Accepts connections until `shutdown` flips to true.
pub async fn serve_rest(
    listener: TcpListener,
    router: Arc<RwLock<RestRouter>>,
    ctx: Arc<dyn RestContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|err| format!("rest accept failed: {err}"))?;
                let router = Arc::clone(&router);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, router, ctx).await {
                        log_debug!(cat: Category::Rest, "rest connection {peer} failed: {err}");
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    router: Arc<RwLock<RestRouter>>,
    ctx: Arc<dyn RestContext>,
) -> Result<(), String> {
    let request = read_http_request(&mut stream).await?;
    let response = if request.method != "GET" && request.method != "POST" {
        RestError::new(405, "method not allowed").into_response()
    } else {
        match router.read() {
            Ok(router) => router.dispatch(ctx.as_ref(), &request.path, &request.body),
            Err(_) => {
                log_warn!(cat: Category::Rest, "rest router lock poisoned");
                RestError::new(HTTP_NOT_FOUND, "not found").into_response()
            }
        }
    };
    stream
        .write_all(&build_response(&response))
        .await
        .map_err(|err| err.to_string())
}

pub async fn read_http_request(stream: &mut TcpStream) -> Result<HttpRequest, String> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 4096];
    let mut header_end = None;
    while buffer.len() < MAX_REQUEST_BYTES {
        let read = stream
            .read(&mut temp)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&temp[..read]);
        if let Some(pos) = find_header_end(&buffer) {
            header_end = Some(pos);
            break;
        }
    }

    let header_end = header_end.ok_or_else(|| "invalid http request".to_string())?;
    let mut lines = buffer[..header_end].split(|byte| *byte == b'\n');
    let request_line = lines
        .next()
        .ok_or_else(|| "invalid http request".to_string())?;
    let request_line = String::from_utf8_lossy(request_line);
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let raw_path = parts.next().unwrap_or("/");
    let path = raw_path
        .split_once('?')
        .map_or(raw_path, |(path, _)| path)
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        let line = String::from_utf8_lossy(line).trim().to_string();
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let mut body = buffer[header_end..].to_vec();
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(body.len());
    if content_length > MAX_REQUEST_BYTES {
        return Err("request too large".to_string());
    }
    while body.len() < content_length {
        let read = stream
            .read(&mut temp)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&temp[..read]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

pub fn build_response(response: &RestResponse) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len()
    )
    .into_bytes();
    out.extend_from_slice(&response.body);
    out
}
