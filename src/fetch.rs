// src/fetch.rs

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Build the blocking client used for one pipeline run.
/// `None` leaves the library's default timeout in place.
pub fn build_client(timeout: Option<Duration>) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(t) = timeout {
        builder = builder.timeout(t);
    }
    builder.build().context("building HTTP client")
}

/// Single GET; any transport error or non-success status is returned as an error.
pub fn get_text(client: &Client, url: &Url) -> Result<String> {
    debug!("Fetching text from {}", url);
    client
        .get(url.clone())
        .send()
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()
        .with_context(|| format!("Non-success status {}", url))?
        .text()
        .with_context(|| format!("Reading text from {}", url))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP response on an ephemeral local port and
    /// return the URL to request.
    pub fn serve_once(status: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let mut seen = Vec::new();
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    seen.extend_from_slice(&buf[..n]);
                    if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });
        format!("http://{}/", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::serve_once;
    use super::*;

    #[test]
    fn get_text_returns_body() {
        let url = Url::parse(&serve_once("200 OK", "<p>hello</p>")).unwrap();
        let client = build_client(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(get_text(&client, &url).unwrap(), "<p>hello</p>");
    }

    #[test]
    fn get_text_fails_on_error_status() {
        let url = Url::parse(&serve_once("404 Not Found", "gone")).unwrap();
        let client = build_client(Some(Duration::from_secs(5))).unwrap();
        let err = get_text(&client, &url).unwrap_err();
        assert!(format!("{:#}", err).contains("Non-success status"));
    }
}
