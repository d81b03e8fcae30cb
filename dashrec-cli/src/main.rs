mod identity;
mod interactive;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dashrec::engine::RecordingRequest;
use dashrec::session::Config;
use tracing_subscriber::EnvFilter;

/// Record a live MPEG-DASH broadcast, including its pre-attachment backlog,
/// to a single muxed file.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
	/// The URL of the .mpd manifest.
	url: String,

	/// The destination filepath for the final video (e.g. video.mkv).
	output_path: PathBuf,

	/// Interactively select video and audio quality from a list.
	#[arg(short, long)]
	interactive: bool,

	#[command(flatten)]
	logging: LoggingArgs,

	#[command(flatten)]
	selection: StreamSelectionArgs,

	#[command(flatten)]
	network: NetworkArgs,

	#[command(flatten)]
	stream_logic: StreamLogicArgs,

	#[command(flatten)]
	output: OutputArgs,
}

#[derive(clap::Args)]
#[command(next_help_heading = "Logging")]
struct LoggingArgs {
	/// Path to a file to write logs to.
	#[arg(long)]
	log_file: Option<PathBuf>,

	/// Enable verbose (DEBUG level) logging.
	#[arg(short, long, conflicts_with = "quiet")]
	verbose: bool,

	/// Suppress informational logging, showing only warnings and errors.
	#[arg(short, long, conflicts_with = "verbose")]
	quiet: bool,
}

#[derive(clap::Args)]
#[command(next_help_heading = "Stream Selection")]
struct StreamSelectionArgs {
	/// Representation IDs to try for video, in order of preference.
	/// Overridden by --interactive.
	#[arg(long, num_args = 1.., value_delimiter = ' ')]
	video_quality: Vec<String>,

	/// Representation IDs to try for audio, in order of preference.
	/// Overridden by --interactive.
	#[arg(long, num_args = 1.., value_delimiter = ' ')]
	audio_quality: Vec<String>,
}

#[derive(clap::Args)]
#[command(next_help_heading = "Network Settings")]
struct NetworkArgs {
	/// Seconds to wait between polling the manifest for live segments.
	#[arg(long, default_value_t = 2.0)]
	poll_interval: f64,

	/// Maximum number of concurrent requests when searching for past segments.
	#[arg(long, default_value_t = 50)]
	max_search_requests: usize,

	/// Number of retries for a failed segment download.
	#[arg(long, default_value_t = 5)]
	download_retries: u32,

	/// Initial delay in seconds between download retries (exponential backoff).
	#[arg(long, default_value_t = 1.0)]
	download_retry_delay: f64,

	/// Number of retries for a failed URL check (HEAD request).
	#[arg(long, default_value_t = 3)]
	check_url_retries: u32,

	/// Proxy URL to route all HTTP(S) requests through.
	#[arg(long)]
	proxy: Option<String>,
}

#[derive(clap::Args)]
#[command(next_help_heading = "Stream Logic")]
struct StreamLogicArgs {
	/// Number of consecutive timestamps to search before assuming the past
	/// stream has ended.
	#[arg(long, default_value_t = 30_000)]
	end_stream_miss_threshold: i64,

	/// Number of segments to check for existence in a single search batch.
	#[arg(long, default_value_t = 500)]
	search_chunk_size: i64,

	/// Seconds of no new segments before the live tail is considered ended.
	#[arg(long, default_value_t = 180.0)]
	live_end_timeout: f64,

	/// Seconds to wait between past-segment downloads.
	#[arg(long, default_value_t = 0.1)]
	past_segment_delay: f64,

	/// Do not download past segments, start with the live stream.
	#[arg(long)]
	no_past: bool,
}

#[derive(clap::Args)]
#[command(next_help_heading = "Output Settings")]
struct OutputArgs {
	/// Do not delete the temporary segments directory after finishing.
	#[arg(long)]
	keep_segments: bool,

	/// Path to the ffmpeg executable.
	#[arg(long, default_value = "ffmpeg")]
	ffmpeg_path: String,

	/// Path to the ffprobe executable.
	#[arg(long, default_value = "ffprobe")]
	ffprobe_path: String,

	/// Write an English loss summary to this path after recording.
	#[arg(long)]
	summary_file: Option<PathBuf>,

	/// Write a Korean loss summary to this path after recording.
	#[arg(long)]
	summary_file_korean: Option<PathBuf>,

	/// Optional cookies file. Accepted as a CLI flag for forward
	/// compatibility; the HTTP client does not yet attach it to requests.
	#[arg(long)]
	cookies: Option<PathBuf>,
}

fn init_logging(args: &LoggingArgs) -> Result<()> {
	let level = if args.verbose {
		"debug"
	} else if args.quiet {
		"warn"
	} else {
		"info"
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("dashrec={level},dashrec_cli={level}")));

	let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

	if let Some(path) = &args.log_file {
		let file = std::fs::File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
		subscriber.with_writer(std::sync::Mutex::new(file)).init();
	} else {
		subscriber.init();
	}
	Ok(())
}

fn output_path_with_default_extension(path: PathBuf) -> PathBuf {
	if path.extension().is_none() {
		path.with_extension("mkv")
	} else {
		path
	}
}

fn build_config(cli: &Cli, preferred_video_ids: Vec<String>, preferred_audio_ids: Vec<String>) -> Config {
	Config {
		poll_interval: Duration::from_secs_f64(cli.network.poll_interval),
		max_search_requests: cli.network.max_search_requests,
		download_retries: cli.network.download_retries,
		download_retry_delay: Duration::from_secs_f64(cli.network.download_retry_delay),
		check_url_retries: cli.network.check_url_retries,
		proxy: cli.network.proxy.clone(),
		no_past: cli.stream_logic.no_past,
		end_stream_miss_threshold: cli.stream_logic.end_stream_miss_threshold,
		search_chunk_size: cli.stream_logic.search_chunk_size,
		live_end_timeout: Duration::from_secs_f64(cli.stream_logic.live_end_timeout),
		past_segment_delay: Duration::from_secs_f64(cli.stream_logic.past_segment_delay),
		keep_segments: cli.output.keep_segments,
		ffmpeg_path: cli.output.ffmpeg_path.clone(),
		ffprobe_path: cli.output.ffprobe_path.clone(),
		preferred_video_ids,
		preferred_audio_ids,
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging(&cli.logging)?;

	let manifest_url = identity::resolve_manifest_url(&cli.url)?;
	let output_path = output_path_with_default_extension(cli.output_path.clone());

	let (preferred_video_ids, preferred_audio_ids) = if cli.interactive {
		let probe_config = build_config(&cli, Vec::new(), Vec::new());
		let selection = interactive::select_streams(&manifest_url, &probe_config).await?;
		(
			selection.video_id.into_iter().collect::<Vec<_>>(),
			selection.audio_id.into_iter().collect::<Vec<_>>(),
		)
	} else {
		(cli.selection.video_quality.clone(), cli.selection.audio_quality.clone())
	};

	let config = build_config(&cli, preferred_video_ids, preferred_audio_ids);

	let request = RecordingRequest {
		manifest_url,
		output_path,
		summary_file: cli.output.summary_file.clone(),
		summary_file_korean: cli.output.summary_file_korean.clone(),
	};

	match dashrec::run(request, config).await {
		Ok(()) => Ok(()),
		Err(error) => {
			tracing::error!(%error, "recording failed");
			Err(error.into())
		}
	}
}
