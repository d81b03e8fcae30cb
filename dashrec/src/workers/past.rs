//! Walks forward from the earliest discoverable timestamp to `initial_t`,
//! downloading each segment pair. This is the "probe-then-search" loop at
//! the heart of backlog recovery: trust the muxer's reported `duration_ts`
//! for the common contiguous case, and only fall back to a HEAD sweep when
//! the probe goes silent (a gap, or the very first segment).

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::discover::{self, DiscoverConfig};
use crate::fetch;
use crate::probe;
use crate::session::Session;
use crate::store::{Phase, Stream};

fn discover_config(session: &Session) -> DiscoverConfig {
	DiscoverConfig {
		end_stream_miss_threshold: session.config.end_stream_miss_threshold,
		search_chunk_size: session.config.search_chunk_size,
		max_search_requests: session.config.max_search_requests,
		head_retry_policy: session.config.head_retry_policy(),
	}
}

async fn search_from(session: &Session, start_t: i64) -> Option<i64> {
	discover::find_first_existing(
		&session.client,
		&session.base_url,
		&session.stream_info.video.media_template,
		start_t,
		discover_config(session),
	)
	.await
}

/// Runs the past backlog to completion. A no-op (not an error) if no past
/// segment can be found at all, in which case the overall run continues with
/// the live tail only. Checks `cancel` once per loop iteration so a shutdown
/// request stops the backlog promptly without abandoning an in-flight
/// download.
pub async fn run(session: &Session, cancel: &CancellationToken) {
	tracing::info!("starting past segment downloader");

	if let Err(error) = session.staging.seed_past_from_init(Stream::Video).await {
		tracing::error!(%error, "failed to seed video past file from init segment");
		return;
	}
	if let Err(error) = session.staging.seed_past_from_init(Stream::Audio).await {
		tracing::error!(%error, "failed to seed audio past file from init segment");
		return;
	}

	let starting_point = match session.stream_info.publish_frame_time {
		Some(hint) => {
			tracing::debug!(publish_frame_time = hint, "starting past backlog from publishFrameTime hint");
			Some(hint)
		}
		None => {
			tracing::info!("manifest has no publishFrameTime, searching from t=0");
			search_from(session, 0).await
		}
	};

	let Some(mut t) = starting_point else {
		tracing::error!("could not find any past segments, aborting past download");
		return;
	};

	let initial_t = session.stream_info.initial_t;
	let video_past_path = session.staging.path(Stream::Video, Phase::Past);

	while t < initial_t {
		if cancel.is_cancelled() {
			tracing::info!("cancellation requested, stopping past backlog early");
			break;
		}

		let loop_start = Instant::now();
		session.stats.increment_expected();

		let ok = fetch::download_pair(
			&session.client,
			&session.base_url,
			&session.staging,
			Phase::Past,
			&session.stream_info.video.media_template,
			&session.stream_info.audio.media_template,
			t,
			session.config.download_retry_policy(),
		)
		.await;

		let next_t = if ok {
			session.stats.observe_first_segment_t(t);
			match probe::next_expected_t(&session.config.ffprobe_path, &video_past_path).await {
				Some(next) => Some(next),
				None => {
					tracing::warn!(t, "probe returned no next timestamp, searching forward");
					search_from(session, t + 1).await
				}
			}
		} else {
			session.stats.record_missing(t);
			tracing::warn!(t, "segment missing, searching for next available");
			search_from(session, t + 1).await
		};

		match next_t {
			Some(next) => t = next,
			None => {
				tracing::warn!("search exhausted without finding a further segment, ending past backlog");
				break;
			}
		}

		let elapsed = loop_start.elapsed();
		if elapsed < session.config.past_segment_delay {
			tokio::time::sleep(session.config.past_segment_delay - elapsed).await;
		}
	}

	tracing::info!("past segment download task finished");
}
