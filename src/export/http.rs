//! Gzip-compressed report upload to the remote collector.

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, LOCATION};
use reqwest::{redirect, StatusCode};
use serde::Serialize;
use tracing::debug;

/// Uploads `payload` to `url` and returns the viewer URL the collector
/// redirects to. Any other response is a transport failure.
pub fn upload<T: Serialize>(url: &str, timeout: Duration, payload: &T) -> Result<String> {
    let json = serde_json::to_vec(payload).context("serializing report payload")?;
    let body = gzip(&json).context("compressing report payload")?;
    debug!(
        url,
        raw_bytes = json.len(),
        compressed_bytes = body.len(),
        "uploading report",
    );

    let client = Client::builder()
        .timeout(timeout)
        // The redirect itself is the success signal; never follow it.
        .redirect(redirect::Policy::none())
        .build()
        .context("building http client")?;

    let response = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_ENCODING, "gzip")
        .body(body)
        .send()
        .context("posting report to collector")?;

    let status = response.status();
    let headers = response.headers().clone();
    match redirect_location(status, &headers) {
        Some(location) => Ok(location),
        None => bail!("collector rejected report: status {status}"),
    }
}

/// Extracts the viewer URL from a redirect response. Only redirection
/// statuses with a `Location` header count as acceptance.
fn redirect_location(status: StatusCode, headers: &HeaderMap) -> Option<String> {
    if !status.is_redirection() {
        return None;
    }
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
