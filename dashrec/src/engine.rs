//! Supervisor: brings up the manifest fetch, init-segment download, the
//! past and live workers, and the finaliser, in that order, and guarantees
//! the finaliser and summary writer run on every exit path, including a
//! startup failure or a Ctrl-C. This is the one part of the pipeline with
//! no "skip on error" branch: a bad manifest or a failed init segment still
//! produces whatever staging exists and a loss report for it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::manifest;
use crate::session::{Config, Session, Stats};
use crate::store::{SegmentStore, Stream};
use crate::workers::{live, past};
use crate::{finalize, http, summary};

/// Everything the CLI layer supplies that isn't a tuning knob (those live in
/// `Config`): where to record from, where to write to, and where to report
/// loss to.
pub struct RecordingRequest {
	pub manifest_url: Url,
	pub output_path: std::path::PathBuf,
	pub summary_file: Option<std::path::PathBuf>,
	pub summary_file_korean: Option<std::path::PathBuf>,
}

/// Downloads both init segments and writes them into the staging directory.
async fn fetch_init_segments(session: &Session) -> Result<()> {
	let video_url = session
		.base_url
		.join(&session.stream_info.video.init_template)
		.map_err(|e| Error::InvalidManifestUrl(session.stream_info.video.init_template.clone(), e))?;
	let audio_url = session
		.base_url
		.join(&session.stream_info.audio.init_template)
		.map_err(|e| Error::InvalidManifestUrl(session.stream_info.audio.init_template.clone(), e))?;

	let (video, audio) = tokio::join!(
		http::fetch_body(&session.client, &video_url, session.config.download_retry_policy()),
		http::fetch_body(&session.client, &audio_url, session.config.download_retry_policy()),
	);

	let (video_bytes, _) = video.map_err(|_| Error::InitSegmentFailure { url: video_url.to_string() })?;
	let (audio_bytes, _) = audio.map_err(|_| Error::InitSegmentFailure { url: audio_url.to_string() })?;

	session.staging.write_init(Stream::Video, &video_bytes).await?;
	session.staging.write_init(Stream::Audio, &audio_bytes).await?;
	Ok(())
}

async fn build_session(
	req: &RecordingRequest,
	config: Config,
	staging: Arc<SegmentStore>,
	stats: Arc<Stats>,
) -> Result<Session> {
	let client = http::build_client(config.proxy.as_deref())?;

	let (body, _headers) = http::fetch_body(&client, &req.manifest_url, config.download_retry_policy()).await?;
	let xml = String::from_utf8_lossy(&body);
	let mpd = manifest::parse(&xml).ok_or(Error::EmptyManifest)?;
	let stream_info = manifest::parse_initial_info(&mpd, &config.preferred_video_ids, &config.preferred_audio_ids)?;

	tracing::info!(
		video = %stream_info.video.id,
		audio = %stream_info.audio.id,
		initial_t = stream_info.initial_t,
		"selected representations"
	);

	let base_url = Session::base_url_of(&req.manifest_url);

	Ok(Session {
		base_url,
		stream_info,
		staging,
		client,
		config,
		stats,
	})
}

/// Resolves the manifest, downloads init segments, and races the past/live
/// workers against a Ctrl-C signal. Any error here (a bad manifest, a failed
/// init segment, a worker panic) is returned to the caller, which still
/// finalizes and reports on whatever was staged before returning it.
async fn record(req: &RecordingRequest, config: Config, staging: Arc<SegmentStore>, stats: Arc<Stats>) -> Result<()> {
	let session = Arc::new(build_session(req, config, staging, stats).await?);

	tracing::info!("downloading init segments");
	fetch_init_segments(&session).await?;

	let cancel = CancellationToken::new();
	let (live_tx, live_rx) = live::channel();

	// Spawned rather than raced in-place so that a Ctrl-C signal cancels the
	// workers cooperatively (they each check `cancel` at their next loop
	// head) instead of dropping them mid-write the instant the signal
	// future resolves.
	let worker_session = session.clone();
	let worker_cancel = cancel.clone();
	let manifest_url = req.manifest_url.clone();
	let mut workers = tokio::spawn(async move {
		// Past and live run concurrently: they append to disjoint staging
		// files (`*_past` vs `*_live`), so there is nothing to serialize
		// between them.
		tokio::join!(
			async {
				if worker_session.config.no_past {
					tracing::info!("past backlog disabled by configuration, recording live only");
				} else {
					past::run(&worker_session, &worker_cancel).await;
				}
			},
			live::poll(&worker_session, &manifest_url, live_tx, &worker_cancel),
			live::download(&worker_session, live_rx, &worker_cancel),
		);
	});

	tokio::select! {
		result = &mut workers => {
			match result {
				Ok(()) => {
					tracing::info!("recording workers finished");
					Ok(())
				}
				Err(join_error) => {
					tracing::error!(error = %join_error, "a recording worker panicked");
					Err(Error::WorkerPanicked(join_error.to_string()))
				}
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("interrupt received, winding down workers before finalizing");
			cancel.cancel();
			match tokio::time::timeout(Duration::from_secs(5), &mut workers).await {
				Ok(Ok(())) => {
					tracing::info!("workers wound down cleanly after cancellation");
					Ok(())
				}
				Ok(Err(join_error)) => {
					tracing::error!(error = %join_error, "a recording worker panicked during shutdown");
					Err(Error::WorkerPanicked(join_error.to_string()))
				}
				Err(_) => {
					workers.abort();
					tracing::warn!("workers did not wind down within timeout, finalizing with partial data");
					Ok(())
				}
			}
		}
	}
}

/// Runs a full recording and guarantees finalisation and summary writing
/// happen before returning, whether `record` succeeded, failed during
/// startup, or was interrupted. The startup error (if any) is what this
/// function ultimately returns, once finalisation and reporting are done.
pub async fn run(req: RecordingRequest, config: Config) -> Result<()> {
	let started_at = std::time::Instant::now();

	let staging = Arc::new(SegmentStore::new(Session::staging_dir_for(&req.output_path)));
	staging.ensure_dir().await?;
	let stats = Arc::new(Stats::default());

	let record_result = record(&req, config.clone(), staging.clone(), stats.clone()).await;
	if let Err(error) = &record_result {
		tracing::error!(%error, "recording failed before finalizing");
	}

	let finalize_result = finalize::finalize(&staging, &config, &req.output_path).await;

	if req.summary_file.is_some() || req.summary_file_korean.is_some() {
		let output_size_bytes = tokio::fs::metadata(&req.output_path).await.ok().map(|m| m.len());
		let data = summary::SummaryData::from_stats(&stats, req.output_path.clone(), output_size_bytes, started_at.elapsed());

		if let Some(path) = &req.summary_file {
			if let Err(error) = summary::write_english(&data, path).await {
				tracing::warn!(%error, path = %path.display(), "failed to write English summary");
			}
		}
		if let Some(path) = &req.summary_file_korean {
			if let Err(error) = summary::write_korean(&data, path).await {
				tracing::warn!(%error, path = %path.display(), "failed to write Korean summary");
			}
		}
	}

	record_result?;
	finalize_result?;

	tracing::info!(
		expected = stats.total_expected(),
		missing = stats.missing_count(),
		"recording complete"
	);

	Ok(())
}
