/// Errors raised by the recording engine.
///
/// Most segment-level failures never reach this type: the HTTP client,
/// probe wrapper, and backlog discoverer collapse transient failures into
/// `Option`/`bool` results so a single segment miss never aborts a worker.
/// `Error` is reserved for failures that are fatal to startup, or that a
/// caller needs to distinguish (e.g. a 404 on a segment GET).
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("transport error fetching {url}: {source}")]
	NetworkTransient { url: String, #[source] source: reqwest::Error },

	#[error("not found: {url}")]
	NotFound { url: String },

	#[error("manifest had no SegmentTimeline S elements")]
	EmptyManifest,

	#[error("no representation with mimeType {0:?} in manifest")]
	NoSuchRepresentation(crate::manifest::MimeType),

	#[error("failed to download init segment: {url}")]
	InitSegmentFailure { url: String },

	#[error("ffmpeg muxer failed: {stderr}")]
	MuxerFailure { stderr: String },

	#[error("a recording worker panicked: {0}")]
	WorkerPanicked(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("invalid manifest URL {0:?}: {1}")]
	InvalidManifestUrl(String, #[source] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
