//! Append-only on-disk staging area for the four media streams plus their
//! init segments.
//!
//! Only the past worker ever touches `*_past`; only the live downloader ever
//! touches `*_live`. Because the two pairs of files are disjoint, no locking
//! is needed between the two writers.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
	Video,
	Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Past,
	Live,
}

/// Owns the staging directory layout:
/// `video_init`, `audio_init`, `video_past`, `audio_past`, `video_live`, `audio_live`.
pub struct SegmentStore {
	dir: PathBuf,
}

impl SegmentStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub async fn ensure_dir(&self) -> Result<()> {
		fs::create_dir_all(&self.dir).await?;
		Ok(())
	}

	fn file_name(stream: Stream, phase: Option<Phase>) -> &'static str {
		match (stream, phase) {
			(Stream::Video, None) => "video_init",
			(Stream::Audio, None) => "audio_init",
			(Stream::Video, Some(Phase::Past)) => "video_past",
			(Stream::Audio, Some(Phase::Past)) => "audio_past",
			(Stream::Video, Some(Phase::Live)) => "video_live",
			(Stream::Audio, Some(Phase::Live)) => "audio_live",
		}
	}

	pub fn init_path(&self, stream: Stream) -> PathBuf {
		self.dir.join(Self::file_name(stream, None))
	}

	pub fn path(&self, stream: Stream, phase: Phase) -> PathBuf {
		self.dir.join(Self::file_name(stream, Some(phase)))
	}

	/// Writes the init segment bytes, creating the file if absent.
	pub async fn write_init(&self, stream: Stream, bytes: &[u8]) -> Result<()> {
		let path = self.init_path(stream);
		let mut file = File::create(&path).await?;
		file.write_all(bytes).await?;
		file.flush().await?;
		Ok(())
	}

	/// Seeds a `*_past` file with a byte-for-byte copy of the matching init
	/// file, so the concatenation is muxable from the first appended segment.
	pub async fn seed_past_from_init(&self, stream: Stream) -> Result<()> {
		let init = self.init_path(stream);
		let past = self.path(stream, Phase::Past);
		fs::copy(&init, &past).await?;
		Ok(())
	}

	/// Creates an empty `*_live` file.
	pub async fn touch_live(&self, stream: Stream) -> Result<()> {
		File::create(self.path(stream, Phase::Live)).await?;
		Ok(())
	}

	/// Appends `bytes` to the given stream/phase file, flushing before return.
	pub async fn append(&self, stream: Stream, phase: Phase, bytes: &[u8]) -> Result<()> {
		let path = self.path(stream, phase);
		let mut file = OpenOptions::new().append(true).create(true).open(&path).await?;
		file.write_all(bytes).await?;
		file.flush().await?;
		Ok(())
	}

	/// Current length of the given stream/phase file, or 0 if it doesn't
	/// exist yet. Used to remember a rollback point before an append that
	/// might need to be undone.
	pub async fn len(&self, stream: Stream, phase: Phase) -> Result<u64> {
		let path = self.path(stream, phase);
		match fs::metadata(&path).await {
			Ok(meta) => Ok(meta.len()),
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(0),
			Err(error) => Err(error.into()),
		}
	}

	/// Truncates the given stream/phase file back to `len` bytes. Used to
	/// undo a successful append when its paired stream's append failed, so a
	/// pair is never left both-written in one file and missing in the other.
	pub async fn truncate(&self, stream: Stream, phase: Phase, len: u64) -> Result<()> {
		let path = self.path(stream, phase);
		let file = OpenOptions::new().write(true).open(&path).await?;
		file.set_len(len).await?;
		Ok(())
	}

	pub async fn read_all(&self, stream: Stream, phase: Phase) -> Result<Vec<u8>> {
		let path = self.path(stream, phase);
		if !fs::try_exists(&path).await? {
			return Ok(Vec::new());
		}
		let mut file = File::open(&path).await?;
		let mut buf = Vec::new();
		file.read_to_end(&mut buf).await?;
		Ok(buf)
	}

	/// Removes the whole staging directory. Best-effort: callers decide
	/// whether the cleanup failure should be fatal (the finaliser doesn't
	/// treat it as one).
	pub async fn remove(&self) -> Result<()> {
		if fs::try_exists(&self.dir).await? {
			fs::remove_dir_all(&self.dir).await?;
		}
		Ok(())
	}
}
