//! Downloads one video+audio segment pair and appends both to the store, or
//! neither: a pair is always either both-written or both-skipped.

use reqwest::Client;
use url::Url;

use crate::http::{self, RetryPolicy};
use crate::manifest::substitute_time;
use crate::store::{Phase, SegmentStore, Stream};

/// Builds both segment URLs by literal `$Time$` substitution, GETs them in
/// parallel, and appends to `store` only if both succeed.
///
/// Returns `true` on success. The caller decides how to advance on `false`;
/// this function never retries beyond what the HTTP client already does,
/// and never itself records the timestamp as missing.
pub async fn download_pair(
	client: &Client,
	base_url: &Url,
	store: &SegmentStore,
	phase: Phase,
	video_media_template: &str,
	audio_media_template: &str,
	t: i64,
	policy: RetryPolicy,
) -> bool {
	let video_url = match base_url.join(&substitute_time(video_media_template, t)) {
		Ok(url) => url,
		Err(error) => {
			tracing::warn!(t, %error, "failed to build video segment URL");
			return false;
		}
	};
	let audio_url = match base_url.join(&substitute_time(audio_media_template, t)) {
		Ok(url) => url,
		Err(error) => {
			tracing::warn!(t, %error, "failed to build audio segment URL");
			return false;
		}
	};

	let (video_result, audio_result) = tokio::join!(
		http::fetch_body(client, &video_url, policy),
		http::fetch_body(client, &audio_url, policy),
	);

	match (video_result, audio_result) {
		(Ok((video_bytes, _)), Ok((audio_bytes, _))) => {
			// Remember each file's length before appending so a lone success
			// can be rolled back if its paired append fails: a pair must be
			// both-written or both-skipped, never one orphaned in one file.
			let video_len_before = store.len(Stream::Video, phase).await;
			let audio_len_before = store.len(Stream::Audio, phase).await;

			let video_write = store.append(Stream::Video, phase, &video_bytes).await;
			let audio_write = store.append(Stream::Audio, phase, &audio_bytes).await;

			match (video_write, audio_write) {
				(Ok(()), Ok(())) => {
					tracing::debug!(t, "downloaded segment pair");
					true
				}
				(video_write, audio_write) => {
					// Roll both streams back to their pre-append length
					// whenever the pair isn't a clean double success, not
					// just the side whose append returned Ok: an append that
					// itself returned Err may still have flushed part of its
					// bytes before failing (e.g. disk full mid-write), and
					// those partial bytes are just as much an orphan as a
					// lone successful append would be.
					if let Err(error) = &video_write {
						tracing::error!(t, %error, "failed to append video segment to disk");
					}
					if let Ok(len) = video_len_before {
						rollback_append(store, Stream::Video, phase, t, len).await;
					}
					if let Err(error) = &audio_write {
						tracing::error!(t, %error, "failed to append audio segment to disk");
					}
					if let Ok(len) = audio_len_before {
						rollback_append(store, Stream::Audio, phase, t, len).await;
					}
					false
				}
			}
		}
		(video_result, audio_result) => {
			if let Err(error) = video_result {
				tracing::warn!(t, %error, "video segment fetch failed");
			}
			if let Err(error) = audio_result {
				tracing::warn!(t, %error, "audio segment fetch failed");
			}
			false
		}
	}
}

/// Truncates `stream`'s file back to `len_before`, undoing an append whose
/// paired stream's append failed.
async fn rollback_append(store: &SegmentStore, stream: Stream, phase: Phase, t: i64, len_before: u64) {
	if let Err(error) = store.truncate(stream, phase, len_before).await {
		tracing::error!(t, ?stream, %error, "failed to roll back orphaned segment append");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// A tiny in-process server: `/video/...` always returns 200, `/audio/...`
	/// always returns 404. Used to force exactly one half of a pair to fail.
	async fn spawn_half_failing_server() -> std::net::SocketAddr {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let (mut stream, _) = match listener.accept().await {
					Ok(pair) => pair,
					Err(_) => break,
				};
				tokio::spawn(async move {
					use tokio::io::{AsyncReadExt, AsyncWriteExt};
					let mut buf = vec![0u8; 2048];
					let n = stream.read(&mut buf).await.unwrap_or(0);
					let request = String::from_utf8_lossy(&buf[..n]);
					let path = request.split_whitespace().nth(1).unwrap_or("/");
					let response = if path.starts_with("/video/") {
						"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nVIDEODATA"
					} else {
						"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n"
					};
					let _ = stream.write_all(response.as_bytes()).await;
				});
			}
		});
		addr
	}

	#[tokio::test]
	async fn one_sided_failure_leaves_no_orphaned_append() {
		let tmp = tempfile::tempdir().unwrap();
		let store = SegmentStore::new(tmp.path());
		store.ensure_dir().await.unwrap();

		let addr = spawn_half_failing_server().await;
		let base_url = Url::parse(&format!("http://{addr}/")).unwrap();
		let client = Client::new();
		let policy = RetryPolicy { retries: 0, initial_delay: std::time::Duration::from_millis(1) };

		// A prior, already-recorded segment, so rollback must restore this
		// exact length rather than just truncating to zero.
		store.append(Stream::Video, Phase::Past, b"PRIOR").await.unwrap();
		store.append(Stream::Audio, Phase::Past, b"PRIOR").await.unwrap();

		let ok = download_pair(&client, &base_url, &store, Phase::Past, "video/$Time$.m4s", "audio/$Time$.m4s", 42, policy).await;

		assert!(!ok);
		let video = store.read_all(Stream::Video, Phase::Past).await.unwrap();
		let audio = store.read_all(Stream::Audio, Phase::Past).await.unwrap();
		assert_eq!(video, b"PRIOR", "the successful video append must be rolled back");
		assert_eq!(audio, b"PRIOR", "the failed audio fetch must never be appended");
	}
}
