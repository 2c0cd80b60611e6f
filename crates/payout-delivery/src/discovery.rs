//! Best-effort discovery of public RPC URLs.
//!
//! The chain metadata page embeds its RPC list as JSON inside the HTML. We
//! scrape plain `https` URLs out of it; anything requiring an API key
//! placeholder or a websocket transport is skipped.

use crate::DeliveryError;
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

const RPC_URL_PATTERN: &str = r#""url"\s*:\s*"(https://[^"\s]+)""#;

#[async_trait]
pub trait RpcDiscovery: Send + Sync {
	async fn discover(&self, chain_id: u64) -> Result<Vec<String>, DeliveryError>;
}

/// Scrapes a chainlist-style page, with `{chain_id}` in the URL template
/// replaced by the numeric chain id.
pub struct ChainlistDiscovery {
	http: reqwest::Client,
	url_template: String,
	pattern: Regex,
}

impl ChainlistDiscovery {
	pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
		let http = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| DeliveryError::Configuration(e.to_string()))?;
		let pattern =
			Regex::new(RPC_URL_PATTERN).map_err(|e| DeliveryError::Configuration(e.to_string()))?;
		Ok(Self {
			http,
			url_template: url_template.into(),
			pattern,
		})
	}
}

#[async_trait]
impl RpcDiscovery for ChainlistDiscovery {
	async fn discover(&self, chain_id: u64) -> Result<Vec<String>, DeliveryError> {
		let url = self
			.url_template
			.replace("{chain_id}", &chain_id.to_string());

		let html = self
			.http
			.get(&url)
			.send()
			.await
			.and_then(|r| r.error_for_status())
			.map_err(|e| DeliveryError::Network(format!("Failed to fetch {}: {}", url, e)))?
			.text()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to read {}: {}", url, e)))?;

		let urls = extract_rpc_urls(&self.pattern, &html);
		tracing::debug!(chain_id, found = urls.len(), "Discovered external RPC URLs");
		Ok(urls)
	}
}

/// Pulls unique `https` RPC URLs out of a chain metadata page.
fn extract_rpc_urls(pattern: &Regex, html: &str) -> Vec<String> {
	let mut urls: Vec<String> = Vec::new();
	for capture in pattern.captures_iter(html) {
		let url = &capture[1];
		if url.contains("${") || url.contains('{') || urls.iter().any(|u| u == url) {
			continue;
		}
		urls.push(url.to_string());
	}
	urls
}
