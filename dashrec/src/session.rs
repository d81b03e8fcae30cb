//! Engine-wide shared state.
//!
//! A single `Session` is passed by reference into every worker instead of
//! going through a singleton. Write access is restricted by convention (see
//! each field's doc comment); every mutable field here is a type that makes
//! its own concurrency discipline explicit (`AtomicU64`, `Mutex<_>`) rather
//! than relying on ambient aliasing.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::http::RetryPolicy;
use crate::manifest::StreamInfo;
use crate::store::SegmentStore;

/// Immutable tuning values, built once from CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
	pub poll_interval: Duration,
	pub max_search_requests: usize,
	pub download_retries: u32,
	pub download_retry_delay: Duration,
	pub check_url_retries: u32,
	pub proxy: Option<String>,
	pub no_past: bool,
	pub end_stream_miss_threshold: i64,
	pub search_chunk_size: i64,
	pub live_end_timeout: Duration,
	pub past_segment_delay: Duration,
	pub keep_segments: bool,
	pub ffmpeg_path: String,
	pub ffprobe_path: String,
	pub preferred_video_ids: Vec<String>,
	pub preferred_audio_ids: Vec<String>,
}

impl Config {
	pub fn download_retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			retries: self.download_retries,
			initial_delay: self.download_retry_delay,
		}
	}

	pub fn head_retry_policy(&self) -> RetryPolicy {
		RetryPolicy {
			retries: self.check_url_retries,
			initial_delay: Duration::from_millis(500),
		}
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs_f64(2.0),
			max_search_requests: 50,
			download_retries: 5,
			download_retry_delay: Duration::from_secs_f64(1.0),
			check_url_retries: 3,
			proxy: None,
			no_past: false,
			end_stream_miss_threshold: 30_000,
			search_chunk_size: 500,
			live_end_timeout: Duration::from_secs_f64(180.0),
			past_segment_delay: Duration::from_secs_f64(0.1),
			keep_segments: false,
			ffmpeg_path: "ffmpeg".to_string(),
			ffprobe_path: "ffprobe".to_string(),
			preferred_video_ids: Vec::new(),
			preferred_audio_ids: Vec::new(),
		}
	}
}

/// Run-wide counters and loss tracking. Written by at most two workers
/// (past, live-downloader); read by the summary writer once both have
/// finished. The first-segment timestamp and the miss set use a mutex;
/// the segment counter is a plain atomic.
#[derive(Debug, Default)]
pub struct Stats {
	first_segment_t: AtomicI64,
	has_first_segment_t: std::sync::atomic::AtomicBool,
	total_expected_segments: AtomicU64,
	missing_segment_timestamps: Mutex<BTreeSet<i64>>,
}

impl Stats {
	/// Records a new minimum past timestamp iff it is smaller than (or the
	/// first) one seen so far. Written only by the past worker.
	pub fn observe_first_segment_t(&self, t: i64) {
		loop {
			if !self.has_first_segment_t.load(Ordering::Acquire) {
				if self
					.has_first_segment_t
					.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
					.is_ok()
				{
					self.first_segment_t.store(t, Ordering::Release);
					return;
				}
				continue;
			}
			let current = self.first_segment_t.load(Ordering::Acquire);
			if t < current {
				self.first_segment_t.store(t, Ordering::Release);
			}
			return;
		}
	}

	pub fn first_segment_t(&self) -> Option<i64> {
		if self.has_first_segment_t.load(Ordering::Acquire) {
			Some(self.first_segment_t.load(Ordering::Acquire))
		} else {
			None
		}
	}

	pub fn increment_expected(&self) {
		self.total_expected_segments.fetch_add(1, Ordering::Relaxed);
	}

	pub fn total_expected(&self) -> u64 {
		self.total_expected_segments.load(Ordering::Relaxed)
	}

	pub fn record_missing(&self, t: i64) {
		self.missing_segment_timestamps.lock().expect("stats mutex poisoned").insert(t);
	}

	pub fn missing_sorted(&self) -> Vec<i64> {
		self.missing_segment_timestamps
			.lock()
			.expect("stats mutex poisoned")
			.iter()
			.copied()
			.collect()
	}

	pub fn missing_count(&self) -> usize {
		self.missing_segment_timestamps.lock().expect("stats mutex poisoned").len()
	}
}

/// Everything the workers need, bundled so the supervisor can hand out
/// shared references without threading a dozen parameters through every
/// call. `staging` and `stats` are `Arc`-wrapped so the supervisor can keep
/// its own handle to both after a worker-side `Session` is torn down, and
/// still finalize and report on whatever was staged before the failure.
pub struct Session {
	pub base_url: Url,
	pub stream_info: StreamInfo,
	pub staging: Arc<SegmentStore>,
	pub client: Client,
	pub config: Config,
	pub stats: Arc<Stats>,
}

impl Session {
	/// Everything before the last `/` of the manifest URL.
	pub fn base_url_of(manifest_url: &Url) -> Url {
		let mut base = manifest_url.clone();
		if let Ok(mut segments) = base.path_segments_mut() {
			segments.pop();
			segments.push("");
		}
		base
	}

	pub fn staging_dir_for(output_path: &std::path::Path) -> PathBuf {
		let mut name = output_path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
		name.push(".segments");
		output_path.with_file_name(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn base_url_strips_filename() {
		let url = Url::parse("https://cdn.example.com/live/abc/playback.mpd").unwrap();
		let base = Session::base_url_of(&url);
		assert_eq!(base.as_str(), "https://cdn.example.com/live/abc/");
	}

	#[test]
	fn staging_dir_appends_segments_suffix() {
		let out = PathBuf::from("/tmp/output.mkv");
		let dir = Session::staging_dir_for(&out);
		assert_eq!(dir, PathBuf::from("/tmp/output.mkv.segments"));
	}

	#[test]
	fn stats_tracks_minimum_first_segment() {
		let stats = Stats::default();
		stats.observe_first_segment_t(100);
		stats.observe_first_segment_t(50);
		stats.observe_first_segment_t(75);
		assert_eq!(stats.first_segment_t(), Some(50));
	}

	#[test]
	fn stats_accounting_matches_invariant() {
		let stats = Stats::default();
		stats.increment_expected();
		stats.increment_expected();
		stats.increment_expected();
		stats.record_missing(10);
		assert_eq!(stats.total_expected(), 3);
		assert_eq!(stats.missing_count(), 1);
	}
}
