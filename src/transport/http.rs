//! HTTP transport backed by reqwest

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{finish_part, part_path, prepare_parent, Transport, TransportResult};
use crate::error::TransportError;

/// Fetches content from a base URL (e.g. a static bucket website)
pub struct HttpTransport {
	client: Client,
	base: Url,
}

impl HttpTransport {
	pub fn new(base: &str, timeout: Duration, user_agent: &str) -> TransportResult<Self> {
		// Url::join drops the last segment unless the base ends with a slash
		let normalized =
			if base.ends_with('/') { base.to_string() } else { format!("{}/", base) };
		let base = Url::parse(&normalized).map_err(|e| TransportError::InvalidUrl {
			url: normalized.clone(),
			message: e.to_string(),
		})?;

		let client = Client::builder()
			.timeout(timeout)
			.user_agent(user_agent.to_string())
			.build()
			.map_err(|e| TransportError::Request { url: normalized, source: Box::new(e) })?;

		Ok(HttpTransport { client, base })
	}

	fn url_for(&self, path: &str) -> TransportResult<Url> {
		self.base.join(path).map_err(|e| TransportError::InvalidUrl {
			url: format!("{}{}", self.base, path),
			message: e.to_string(),
		})
	}

	async fn get(&self, url: &Url) -> TransportResult<reqwest::Response> {
		let response = self
			.client
			.get(url.clone())
			.send()
			.await
			.map_err(|e| TransportError::Request { url: url.to_string(), source: Box::new(e) })?;
		check_status(url, response.status())?;
		Ok(response)
	}
}

fn check_status(url: &Url, status: StatusCode) -> TransportResult<()> {
	if status == StatusCode::NOT_FOUND {
		return Err(TransportError::NotFound { url: url.to_string() });
	}
	if !status.is_success() {
		return Err(TransportError::Status { url: url.to_string(), status: status.as_u16() });
	}
	Ok(())
}

#[async_trait]
impl Transport for HttpTransport {
	async fn head_version_tag(&self, name: &str) -> TransportResult<Option<String>> {
		let url = self.url_for(name)?;
		debug!("HEAD {}", url);
		let response = self
			.client
			.head(url.clone())
			.send()
			.await
			.map_err(|e| TransportError::Request { url: url.to_string(), source: Box::new(e) })?;
		check_status(&url, response.status())?;

		let tag = response
			.headers()
			.get(reqwest::header::ETAG)
			.and_then(|v| v.to_str().ok())
			.map(|s| s.to_string());
		if tag.is_none() {
			warn!("{} did not report an ETag", url);
		}
		Ok(tag)
	}

	async fn fetch(&self, name: &str) -> TransportResult<Vec<u8>> {
		let url = self.url_for(name)?;
		debug!("GET {}", url);
		let response = self.get(&url).await?;
		let body = response
			.bytes()
			.await
			.map_err(|e| TransportError::Request { url: url.to_string(), source: Box::new(e) })?;
		Ok(body.to_vec())
	}

	async fn download(&self, path: &str, dest: &Path) -> TransportResult<()> {
		let url = self.url_for(path)?;
		debug!("GET {} -> {}", url, dest.display());
		let response = self.get(&url).await?;

		prepare_parent(dest).await?;
		let part = part_path(dest);
		let mut file =
			OpenOptions::new().create(true).write(true).truncate(true).open(&part).await?;

		let mut stream = response.bytes_stream();
		let mut bytes_written: u64 = 0;
		while let Some(chunk) = stream.next().await {
			let chunk = match chunk {
				Ok(chunk) => chunk,
				Err(e) => {
					warn!("Body error for {} after {} bytes: {}", url, bytes_written, e);
					drop(file);
					let _ = tokio::fs::remove_file(&part).await;
					return Err(TransportError::Request {
						url: url.to_string(),
						source: Box::new(e),
					});
				}
			};
			file.write_all(&chunk).await?;
			bytes_written += chunk.len() as u64;
		}
		file.flush().await?;
		file.sync_all().await?;
		drop(file);

		finish_part(&part, dest).await
	}
}


// vim: ts=4
