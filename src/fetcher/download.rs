//! A single download attempt

use crate::fetcher::{FetchErrorKind, FetchOptions};
use reqwest::header::ACCEPT;
use reqwest::Client;
use url::Url;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// A fully-read response body
#[derive(Debug)]
pub(crate) struct Downloaded {
    pub status_code: u16,
    pub final_url: String,
    pub html: String,
}

/// A classified attempt failure
#[derive(Debug)]
pub(crate) struct AttemptError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl AttemptError {
    fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            FetchErrorKind::Timeout
        } else {
            FetchErrorKind::DownloadFailed
        };
        Self::new(kind, e.to_string())
    }
}

/// Downloads `url` once, streaming the body under a byte cap
///
/// The whole attempt (connect, headers, body) runs under `options.timeout`.
/// The body is read chunk by chunk and the attempt is abandoned as soon as the
/// running total passes `options.max_bytes`, so an oversized body is never
/// buffered in full. A `Content-Length` above the cap fails before any body
/// bytes are read.
pub(crate) async fn download(
    client: &Client,
    url: &Url,
    options: &FetchOptions,
) -> Result<Downloaded, AttemptError> {
    let max_bytes = options.max_bytes;

    let attempt = async {
        let mut response = client
            .get(url.clone())
            .header(ACCEPT, HTML_ACCEPT)
            .send()
            .await?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(AttemptError::new(
                    FetchErrorKind::MaxBytesExceeded,
                    format!("Content-Length {} exceeds cap of {} bytes", length, max_bytes),
                ));
            }
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(AttemptError::new(
                    FetchErrorKind::MaxBytesExceeded,
                    format!("Body exceeded cap of {} bytes", max_bytes),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(Downloaded {
            status_code,
            final_url,
            html: String::from_utf8_lossy(&body).into_owned(),
        })
    };

    match tokio::time::timeout(options.timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(AttemptError::new(
            FetchErrorKind::Timeout,
            format!("No complete response within {:?}", options.timeout),
        )),
    }
}
