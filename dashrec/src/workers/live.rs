//! Live tail: a poller that watches the manifest for newly published
//! timestamps and a downloader that drains them in order.
//!
//! The two halves communicate over a bounded FIFO channel. The poller is the
//! sole producer and the sole party allowed to close it (by sending the
//! end-of-stream sentinel `None`); the downloader is the sole consumer.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::fetch;
use crate::manifest::{self, BROADCAST_ENDED_HEADER};
use crate::session::Session;
use crate::store::{Phase, Stream};

pub type LiveSender = mpsc::Sender<Option<i64>>;
pub type LiveReceiver = mpsc::Receiver<Option<i64>>;

/// Channel capacity: generous enough that the poller never blocks behind a
/// slow downloader for more than a handful of poll cycles, while still
/// applying backpressure if the downloader ever falls far behind.
pub const QUEUE_CAPACITY: usize = 4096;

pub fn channel() -> (LiveSender, LiveReceiver) {
	mpsc::channel(QUEUE_CAPACITY)
}

/// Polls the manifest every `poll_interval`, enqueueing unseen timestamps
/// `>= initial_t`. Exits after sending the end sentinel, either because the
/// response carried the end-of-broadcast header or because nothing new has
/// appeared for `live_end_timeout`.
pub async fn poll(session: &Session, manifest_url: &url::Url, tx: LiveSender, cancel: &CancellationToken) {
	tracing::info!("starting live manifest poller");

	let mut queued: HashSet<i64> = HashSet::new();
	let mut last_new_segment: Option<Instant> = None;
	let started_at = Instant::now();

	loop {
		if cancel.is_cancelled() {
			tracing::info!("cancellation requested, shutting down live poller");
			let _ = tx.send(None).await;
			return;
		}

		tokio::time::sleep(session.config.poll_interval).await;

		let body = crate::http::fetch_body(&session.client, manifest_url, session.config.download_retry_policy()).await;

		let (xml, ended_by_header) = match body {
			Ok((bytes, headers)) => {
				let ended = headers
					.keys()
					.any(|name| name.as_str().eq_ignore_ascii_case(BROADCAST_ENDED_HEADER));
				(Some(bytes), ended)
			}
			Err(error) => {
				tracing::warn!(%error, "failed to fetch live manifest, continuing");
				(None, false)
			}
		};

		// The end-of-broadcast response can still carry the final segments in
		// its own SegmentTimeline, so enqueue whatever it has before honoring
		// the header. Otherwise the last few segments a stream ever publishes
		// are silently dropped instead of downloaded or counted as missing.
		if let Some(xml) = &xml {
			let xml = String::from_utf8_lossy(xml);
			match manifest::parse(&xml) {
				Some(mpd) => {
					for t in manifest::timeline_timestamps(&mpd, &session.stream_info.video.id) {
						if t >= session.stream_info.initial_t && queued.insert(t) {
							last_new_segment = Some(Instant::now());
							if tx.send(Some(t)).await.is_err() {
								tracing::warn!("live downloader channel closed, stopping poller");
								return;
							}
						}
					}
				}
				None => tracing::warn!("failed to parse live manifest, continuing"),
			}
		}

		if ended_by_header {
			tracing::info!("broadcast ended header observed, shutting down live poller");
			let _ = tx.send(None).await;
			return;
		}

		if xml.is_none() {
			continue;
		}

		let since = last_new_segment.unwrap_or(started_at).elapsed();
		if since > session.config.live_end_timeout {
			tracing::info!(elapsed = ?since, "no new segments within live-end-timeout, shutting down live poller");
			let _ = tx.send(None).await;
			return;
		}
	}
}

/// Drains the live queue, downloading segment pairs until the end sentinel
/// is seen.
pub async fn download(session: &Session, mut rx: LiveReceiver, cancel: &CancellationToken) {
	tracing::info!("starting live segment downloader");

	if let Err(error) = session.staging.touch_live(Stream::Video).await {
		tracing::error!(%error, "failed to create video_live file");
		return;
	}
	if let Err(error) = session.staging.touch_live(Stream::Audio).await {
		tracing::error!(%error, "failed to create audio_live file");
		return;
	}

	while let Some(item) = rx.recv().await {
		if cancel.is_cancelled() {
			tracing::info!("cancellation requested, stopping live downloader early");
			break;
		}

		let Some(t) = item else {
			tracing::info!("stop signal received, ending live downloads");
			break;
		};

		session.stats.increment_expected();
		let ok = fetch::download_pair(
			&session.client,
			&session.base_url,
			&session.staging,
			Phase::Live,
			&session.stream_info.video.media_template,
			&session.stream_info.audio.media_template,
			t,
			session.config.download_retry_policy(),
		)
		.await;

		if !ok {
			session.stats.record_missing(t);
		}
	}
}
