//! HTTP response writing and static file service.
//!
//! Responses carry only the headers the dashboard needs; the connection
//! is closed after every response, so there is no keep-alive machinery.

use homed_core::HomedResult;
use std::path::{Component, Path};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Logout control injected into the index page for authenticated sessions.
const LOGOUT_FRAGMENT: &str = "<span id=\"logout\"><i class=\"icon-enable\"></i> LOGOUT</span>";

fn status_line(code: u16) -> &'static str {
    match code {
        200 => "HTTP/1.1 200 OK",
        301 => "HTTP/1.1 301 Moved Permanently",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

/// Content type from the file extension, `text/html` for anything else.
fn content_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default() {
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "woff2" => "font/woff2",
        _ => "text/html",
    }
}

/// Write a complete response and flush it. The caller closes the socket.
pub async fn write_response<W>(
    writer: &mut W,
    code: u16,
    headers: &[(&str, &str)],
    body: &[u8],
) -> HomedResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut head = String::from(status_line(code));
    for (name, value) in headers {
        head.push_str("\r\n");
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
    }
    head.push_str("\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    if !body.is_empty() {
        writer.write_all(body).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Serve a file from under the frontend root.
///
/// Missing files answer 404, unreadable ones 500. The index page gets its
/// `%1` (service version) and `%2` (logout control) placeholders filled in
/// before the length is computed.
pub async fn write_file<W>(
    writer: &mut W,
    frontend: &Path,
    file_name: &str,
    authenticated: bool,
) -> HomedResult<()>
where
    W: AsyncWrite + Unpin,
{
    if Path::new(file_name)
        .components()
        .any(|part| matches!(part, Component::ParentDir))
    {
        return write_response(writer, 404, &[], b"").await;
    }

    let path = frontend.join(file_name.trim_start_matches('/'));
    let mut data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return write_response(writer, 404, &[], b"").await;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read frontend file");
            return write_response(writer, 500, &[], b"").await;
        }
    };

    if file_name == "/index.html" {
        data = String::from_utf8_lossy(&data)
            .replace("%1", env!("CARGO_PKG_VERSION"))
            .replace("%2", if authenticated { LOGOUT_FRAGMENT } else { "" })
            .into_bytes();
    }

    let length = data.len().to_string();
    let headers = [
        ("Content-Type", content_type(file_name)),
        ("Content-Length", length.as_str()),
    ];
    write_response(writer, 200, &headers, &data).await
}
