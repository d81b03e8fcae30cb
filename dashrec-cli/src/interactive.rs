//! Interactive stream picker, gated behind `-i`/`--interactive`.
//!
//! Lists each representation sorted by descending bandwidth, auto-selects
//! when there is only one candidate, and otherwise prompts on stdin with
//! "press Enter for best" as the default.

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use dashrec::manifest::{self, MimeType, Representation};
use dashrec::{http, session::Config};
use url::Url;

pub struct Selection {
	pub video_id: Option<String>,
	pub audio_id: Option<String>,
}

fn sorted_by_bandwidth(reps: &[&Representation]) -> Vec<&Representation> {
	let mut sorted: Vec<&Representation> = reps.to_vec();
	sorted.sort_by_key(|r| std::cmp::Reverse(r.bandwidth.unwrap_or(0)));
	sorted
}

fn display(reps: &[&Representation], label: &str) {
	println!("\n--- Available {label} Streams ---");
	for (i, rep) in reps.iter().enumerate() {
		println!("[{}] {}", i + 1, rep.describe());
	}
}

fn prompt_for_selection(reps: &[&Representation], label: &str, input: &mut impl BufRead) -> Result<Option<String>> {
	loop {
		print!("Select a {label} stream (enter number, press Enter for best): ");
		io::stdout().flush().ok();

		let mut line = String::new();
		if input.read_line(&mut line).context("reading stdin")? == 0 {
			println!("\nSelection cancelled.");
			return Ok(reps.first().and_then(|r| r.id.clone()));
		}
		let line = line.trim();

		if line.is_empty() {
			let id = reps.first().and_then(|r| r.id.clone());
			println!("Defaulting to best {label} stream: {:?}", id);
			return Ok(id);
		}

		match line.parse::<usize>() {
			Ok(n) if n >= 1 && n <= reps.len() => {
				let id = reps[n - 1].id.clone();
				if id.is_none() {
					// Selection is plumbed through as a preferred `@id`, so a
					// representation without one can't be pinned; the engine
					// will fall back to highest-bandwidth instead of this pick.
					println!(
						"Warning: the selected {label} stream has no representation ID in the manifest \
						 and cannot be pinned; recording will fall back to the highest-bandwidth {label} stream instead."
					);
				} else {
					println!("Selected {label} stream: {:?}", id);
				}
				return Ok(id);
			}
			Ok(_) => println!("Invalid selection. Please enter a number between 1 and {}.", reps.len()),
			Err(_) => println!("Invalid input. Please enter a number."),
		}
	}
}

/// Fetches the manifest and walks the user through selecting a video and an
/// audio representation. Returns `None` for audio if the manifest has none.
pub async fn select_streams(manifest_url: &Url, config: &Config) -> Result<Selection> {
	println!("Fetching stream information for interactive selection...");
	let client = http::build_client(config.proxy.as_deref())?;
	let (body, _headers) = http::fetch_body(&client, manifest_url, config.download_retry_policy())
		.await
		.context("could not fetch manifest for interactive selection")?;
	let xml = String::from_utf8_lossy(&body);
	let mpd = manifest::parse(&xml).context("manifest was not valid DASH XML")?;

	let by_mime = manifest::representations_by_mime(&mpd);
	let video_reps = by_mime.get(&MimeType::VideoMp4).cloned().unwrap_or_default();
	anyhow::ensure!(!video_reps.is_empty(), "no video streams found in the manifest");
	let video_sorted = sorted_by_bandwidth(&video_reps);

	let stdin = io::stdin();
	let mut input = stdin.lock();

	let video_id = if video_sorted.len() == 1 {
		let id = video_sorted[0].id.clone();
		println!("\n--- Video Stream ---");
		println!("Only one video stream found. Automatically selecting: ID={:?}", id);
		id
	} else {
		display(&video_sorted, "Video");
		prompt_for_selection(&video_sorted, "video", &mut input)?
	};

	let audio_reps = by_mime.get(&MimeType::AudioMp4).cloned().unwrap_or_default();
	let audio_id = if audio_reps.is_empty() {
		println!("\nWarning: No audio streams found in the manifest.");
		None
	} else {
		let audio_sorted = sorted_by_bandwidth(&audio_reps);
		if audio_sorted.len() == 1 {
			let id = audio_sorted[0].id.clone();
			println!("\n--- Audio Stream ---");
			println!("Only one audio stream found. Automatically selecting: ID={:?}", id);
			id
		} else {
			display(&audio_sorted, "Audio");
			prompt_for_selection(&audio_sorted, "audio", &mut input)?
		}
	};

	Ok(Selection { video_id, audio_id })
}
