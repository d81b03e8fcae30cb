//! Finds the smallest timestamp `t ≥ start_t` for which the origin actually
//! has a segment, by bounded-parallel HEAD probes over a sliding window.
//!
//! This is the piece that lets the past worker resume after a gap without
//! walking one timestamp at a time: segment durations vary, so only a probe
//! (HEAD or, more commonly, the ffprobe `duration_ts`) is trustworthy.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::http::{self, HeadStatus, RetryPolicy};
use crate::manifest::substitute_time;

#[derive(Debug, Clone, Copy)]
pub struct DiscoverConfig {
	pub end_stream_miss_threshold: i64,
	pub search_chunk_size: i64,
	pub max_search_requests: usize,
	pub head_retry_policy: RetryPolicy,
}

/// Searches forward from `start_t` for the smallest existing timestamp.
///
/// Probes are launched in sorted chunks of `search_chunk_size`. The call
/// waits for every probe in a chunk to finish (or be skipped once a hit is
/// already known) before advancing, so that out-of-order completion inside
/// a chunk can never produce anything but the smallest successful `t` in
/// that chunk. Because chunks are visited in ascending order, the first
/// chunk containing any hit determines the answer. Every task this call
/// spawns is awaited before it returns; nothing is fired and forgotten.
pub async fn find_first_existing(
	client: &Client,
	base_url: &Url,
	media_template: &str,
	start_t: i64,
	cfg: DiscoverConfig,
) -> Option<i64> {
	let semaphore = Arc::new(Semaphore::new(cfg.max_search_requests.max(1)));

	let mut searched = 0i64;
	while searched < cfg.end_stream_miss_threshold {
		let chunk_start = start_t + searched;
		let chunk_end = chunk_start + cfg.search_chunk_size;
		tracing::debug!(chunk_start, chunk_end, "searching chunk for next existing segment");

		let mut tasks: JoinSet<Option<i64>> = JoinSet::new();
		for t in chunk_start..chunk_end {
			let client = client.clone();
			let built_url = build_probe_url(base_url, media_template, t);
			let semaphore = semaphore.clone();
			let policy = cfg.head_retry_policy;
			tasks.spawn(async move {
				// A template that fails to join against base_url can never
				// be probed; treat it as non-existent rather than falling
				// back to probing base_url itself, which could spuriously
				// answer 200 and make find_first_existing report a
				// fabricated hit.
				let url = built_url?;
				let _permit = semaphore.acquire_owned().await.ok()?;
				match http::head_status(&client, &url, policy).await {
					HeadStatus::Exists => Some(t),
					HeadStatus::Absent | HeadStatus::Unknown => None,
				}
			});
		}

		let mut smallest: Option<i64> = None;
		while let Some(joined) = tasks.join_next().await {
			if let Ok(Some(t)) = joined {
				smallest = Some(smallest.map_or(t, |best: i64| best.min(t)));
			}
		}

		if let Some(found) = smallest {
			tracing::info!(t = found, "found first available segment");
			return Some(found);
		}

		searched += cfg.search_chunk_size;
	}

	tracing::warn!(
		start_t,
		threshold = cfg.end_stream_miss_threshold,
		"could not find any segment within the search threshold"
	);
	None
}

/// `None` if the substituted template can't be joined against `base_url`;
/// callers must not probe `base_url` itself as a fallback in that case.
fn build_probe_url(base_url: &Url, media_template: &str, t: i64) -> Option<Url> {
	let relative = substitute_time(media_template, t);
	base_url.join(&relative).ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::convert::Infallible;
	use std::net::SocketAddr;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use tokio::net::TcpListener;

	/// A tiny in-process HTTP server that answers 200 to HEAD requests whose
	/// path equals one of `hits`, and 404 to everything else. Used to drive
	/// `find_first_existing` without reaching out to the network.
	async fn spawn_mock_server(hits: Vec<i64>) -> (SocketAddr, Arc<AtomicUsize>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let concurrent = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let hits = Arc::new(hits);

		let concurrent_clone = concurrent.clone();
		let peak_clone = peak.clone();
		tokio::spawn(async move {
			loop {
				let (mut stream, _) = match listener.accept().await {
					Ok(pair) => pair,
					Err(_) => break,
				};
				let hits = hits.clone();
				let concurrent = concurrent_clone.clone();
				let peak = peak_clone.clone();
				tokio::spawn(async move {
					use tokio::io::{AsyncReadExt, AsyncWriteExt};
					let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
					peak.fetch_max(now, Ordering::SeqCst);

					let mut buf = vec![0u8; 2048];
					let n = stream.read(&mut buf).await.unwrap_or(0);
					let request = String::from_utf8_lossy(&buf[..n]);
					let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

					// Simulate network latency so requests genuinely overlap.
					tokio::time::sleep(std::time::Duration::from_millis(20)).await;

					let t: Result<i64, Infallible> = path
						.trim_start_matches("/seg/")
						.trim_end_matches(".m4s")
						.parse()
						.map_err(|_| unreachable!());
					let found = t.map(|t| hits.contains(&t)).unwrap_or(false);
					let status_line = if found { "HTTP/1.1 200 OK\r\n\r\n" } else { "HTTP/1.1 404 Not Found\r\n\r\n" };
					let _ = stream.write_all(status_line.as_bytes()).await;
					concurrent.fetch_sub(1, Ordering::SeqCst);
				});
			}
		});

		(addr, peak)
	}

	#[tokio::test]
	async fn finds_smallest_hit_regardless_of_completion_order() {
		let (addr, peak) = spawn_mock_server(vec![11]).await;
		let base = Url::parse(&format!("http://{addr}/")).unwrap();
		let client = Client::new();
		let cfg = DiscoverConfig {
			end_stream_miss_threshold: 16,
			search_chunk_size: 8,
			max_search_requests: 4,
			head_retry_policy: RetryPolicy { retries: 0, initial_delay: std::time::Duration::from_millis(1) },
		};

		let found = find_first_existing(&client, &base, "seg/$Time$.m4s", 0, cfg).await;
		assert_eq!(found, Some(11));
		assert!(peak.load(Ordering::SeqCst) <= 4, "concurrency bound exceeded");
	}

	#[tokio::test]
	async fn returns_none_past_threshold() {
		let (addr, _peak) = spawn_mock_server(vec![]).await;
		let base = Url::parse(&format!("http://{addr}/")).unwrap();
		let client = Client::new();
		let cfg = DiscoverConfig {
			end_stream_miss_threshold: 8,
			search_chunk_size: 4,
			max_search_requests: 4,
			head_retry_policy: RetryPolicy { retries: 0, initial_delay: std::time::Duration::from_millis(1) },
		};

		let found = find_first_existing(&client, &base, "seg/$Time$.m4s", 0, cfg).await;
		assert_eq!(found, None);
	}
}
