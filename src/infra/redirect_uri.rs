//! Local listener standing in for the extension's redirect page: the
//! authorize page sends the browser back to it with `code` or `error`.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use std::{
  io::prelude::*,
  net::{TcpListener, TcpStream},
};

const CLOSE_TAB_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
<title>ytm-album-art</title></head><body><p>Spotify authorization received. \
You can close this tab.</p><script>window.close()</script></body></html>";

/// Blocks until one request hits `127.0.0.1:port` and returns its full URL.
/// Requests for anything other than `path` (favicons and the like) are
/// answered with a 404 and skipped.
pub fn capture_redirect(port: u16, path: &str) -> Result<String> {
  let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
    .map_err(|e| anyhow!("Could not listen on 127.0.0.1:{}: {}", port, e))?;
  debug!("waiting for redirect on 127.0.0.1:{}{}", port, path);

  for stream in listener.incoming() {
    match stream {
      Ok(stream) => {
        if let Some(url) = handle_connection(stream, path)? {
          return Ok(url);
        }
      }
      Err(e) => warn!("redirect listener connection failed: {}", e),
    }
  }

  Err(anyhow!("redirect listener closed before a redirect arrived"))
}

fn handle_connection(mut stream: TcpStream, expected_path: &str) -> Result<Option<String>> {
  // The request line and headers fit comfortably
  let mut buffer = [0; 2048];
  let read = stream.read(&mut buffer)?;
  let request = String::from_utf8_lossy(&buffer[..read]);

  let Some(target) = request.split_whitespace().nth(1) else {
    respond(&mut stream, "400 Bad Request", "text/plain", "Malformed request")?;
    return Ok(None);
  };

  let request_path = target.split('?').next().unwrap_or_default();
  if request_path != expected_path {
    respond(&mut stream, "404 Not Found", "text/plain", "Not found")?;
    return Ok(None);
  }

  let host = request
    .lines()
    .find_map(|line| {
      let (name, value) = line.split_once(':')?;
      name.eq_ignore_ascii_case("host").then(|| value.trim())
    })
    .unwrap_or("127.0.0.1");

  respond(
    &mut stream,
    "200 OK",
    "text/html; charset=utf-8",
    CLOSE_TAB_PAGE,
  )?;
  Ok(Some(format!("http://{}{}", host, target)))
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &str) -> Result<()> {
  let response = format!(
    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
    status,
    content_type,
    body.len(),
    body
  );
  stream.write_all(response.as_bytes())?;
  stream.flush()?;
  Ok(())
}
