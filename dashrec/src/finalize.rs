//! Finaliser: concatenates the past and live staging files into the two
//! inputs ffmpeg needs and muxes them into the single output container.
//!
//! Runs exactly once per recording, after the past and live workers have
//! both finished (or been cancelled); the caller is responsible for that
//! ordering, this module only does the muxing and cleanup. It takes the
//! staging store and config directly rather than a full `Session` so it can
//! run even when session construction itself failed partway through.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::session::Config;
use crate::store::{Phase, SegmentStore, Stream};

/// Appends `path`'s contents to `out` by streaming, not buffering the whole
/// file in memory; a missing input is skipped silently (spec.md §4.9).
/// Broadcasts this engine records can run for hours, so the staged files can
/// run into gigabytes.
async fn append_file_streaming(out: &mut File, path: &Path) -> Result<()> {
	if !fs::try_exists(path).await? {
		return Ok(());
	}
	let mut input = File::open(path).await?;
	tokio::io::copy(&mut input, out).await?;
	Ok(())
}

/// `video_past ++ video_live` and `audio_past ++ audio_live`, written next to
/// the staging directory so ffmpeg can read them as plain files.
async fn concatenate(staging: &SegmentStore, stream: Stream) -> Result<PathBuf> {
	let out_path = staging.dir().join(match stream {
		Stream::Video => "video_concat.mp4",
		Stream::Audio => "audio_concat.mp4",
	});

	let mut out = File::create(&out_path).await?;
	append_file_streaming(&mut out, &staging.path(stream, Phase::Past)).await?;
	append_file_streaming(&mut out, &staging.path(stream, Phase::Live)).await?;
	out.flush().await?;

	Ok(out_path)
}

/// True when `output_path`'s extension is `mp4` (case-insensitively), the
/// only container `-movflags +faststart` applies to.
fn is_mp4_output(output_path: &Path) -> bool {
	output_path
		.extension()
		.and_then(OsStr::to_str)
		.is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

/// Invokes ffmpeg to mux the two concatenated streams into `output_path`,
/// copying codecs rather than re-encoding. `-movflags +faststart` is only
/// added for an `.mp4` output; it is meaningless (and rejected by some
/// muxers) for other containers such as `.mkv`.
async fn mux(ffmpeg_path: &str, video: &Path, audio: &Path, output_path: &Path) -> Result<()> {
	let mut command = Command::new(ffmpeg_path);
	command
		.args(["-y", "-i"])
		.arg(video)
		.arg("-i")
		.arg(audio)
		.args(["-c", "copy"]);

	if is_mp4_output(output_path) {
		command.args(["-movflags", "+faststart"]);
	}

	let output = command.arg(output_path).output().await?;

	if !output.status.success() {
		return Err(Error::MuxerFailure {
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	Ok(())
}

async fn file_len(path: &Path) -> u64 {
	fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// True if `stream` has at least one real segment appended, in either phase.
/// `*_past` is seeded with a byte-for-byte copy of the init segment before
/// any segment is appended (`SegmentStore::seed_past_from_init`), so a
/// `*_past` file no larger than its init segment holds init bytes only, not
/// recorded media; checking its length against zero would miss that case.
async fn stream_has_segment_data(staging: &SegmentStore, stream: Stream) -> bool {
	let init_len = file_len(&staging.init_path(stream)).await;
	let past_len = file_len(&staging.path(stream, Phase::Past)).await;
	let live_len = file_len(&staging.path(stream, Phase::Live)).await;
	live_len > 0 || past_len > init_len
}

/// Concatenates, muxes, and, unless `keep_segments` is set, removes the
/// staging directory. This never fails the overall run: an empty recording
/// or a muxer failure is logged and the staging directory is kept for
/// inspection, but the process still completes normally. Only an I/O error
/// while reading back the staged files (not the muxer's own exit status)
/// propagates.
pub async fn finalize(staging: &SegmentStore, config: &Config, output_path: &Path) -> Result<()> {
	if !stream_has_segment_data(staging, Stream::Video).await {
		tracing::error!(path = %output_path.display(), "no video data was downloaded, cannot mux");
		return Ok(());
	}
	if !stream_has_segment_data(staging, Stream::Audio).await {
		tracing::error!(path = %output_path.display(), "no audio data was downloaded, cannot mux");
		return Ok(());
	}

	tracing::info!("concatenating staged segments");
	let video_concat = concatenate(staging, Stream::Video).await?;
	let audio_concat = concatenate(staging, Stream::Audio).await?;

	tracing::info!(output = %output_path.display(), "muxing final recording");
	if let Err(error) = mux(&config.ffmpeg_path, &video_concat, &audio_concat, output_path).await {
		tracing::error!(%error, "muxer failed, keeping staging segments for inspection");
		return Ok(());
	}

	if config.keep_segments {
		tracing::info!(dir = %staging.dir().display(), "keeping staging segments as requested");
	} else if let Err(error) = staging.remove().await {
		tracing::warn!(%error, "failed to remove staging directory after finalizing");
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mux_failure_carries_stderr() {
		let err = Error::MuxerFailure { stderr: "unknown codec".to_string() };
		assert!(err.to_string().contains("unknown codec"));
	}

	#[test]
	fn faststart_only_applies_to_mp4_output() {
		assert!(is_mp4_output(Path::new("/tmp/out.mp4")));
		assert!(is_mp4_output(Path::new("/tmp/out.MP4")));
		assert!(!is_mp4_output(Path::new("/tmp/out.mkv")));
		assert!(!is_mp4_output(Path::new("/tmp/out")));
	}

	#[tokio::test]
	async fn finalize_refuses_to_mux_when_audio_never_downloaded() {
		let tmp = tempfile::tempdir().unwrap();
		let staging = SegmentStore::new(tmp.path().join("staging"));
		staging.ensure_dir().await.unwrap();

		// Video has real data in both phases; audio was seeded with its init
		// segment but every segment fetch failed, so it never got past that.
		staging.write_init(Stream::Video, b"video-init").await.unwrap();
		staging.write_init(Stream::Audio, b"audio-init").await.unwrap();
		staging.seed_past_from_init(Stream::Video).await.unwrap();
		staging.seed_past_from_init(Stream::Audio).await.unwrap();
		staging.append(Stream::Video, Phase::Past, b"video-segment").await.unwrap();
		staging.touch_live(Stream::Video).await.unwrap();
		staging.touch_live(Stream::Audio).await.unwrap();

		let config = Config::default();
		let output_path = tmp.path().join("out.mp4");
		finalize(&staging, &config, &output_path).await.unwrap();

		assert!(!output_path.exists(), "must not mux with no real audio data");
	}
}
