//! Writes the post-recording loss report: output file, size, duration, the
//! first recorded timestamp, how many segments were expected, how many are
//! missing, and which timestamps those are. Renders bilingual summary files,
//! one English and one Korean, both from the same `SummaryData` snapshot so
//! the two can never disagree on the numbers, only on the labels.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::session::Stats;

/// Everything the two renderers need, gathered once by the supervisor after
/// finalisation so neither language re-derives it differently.
#[derive(Debug, Clone)]
pub struct SummaryData {
	pub output_path: PathBuf,
	pub output_size_bytes: Option<u64>,
	pub duration: Duration,
	pub first_segment_t: Option<i64>,
	pub total_expected: u64,
	pub missing_count: usize,
	pub missing_timestamps: Vec<i64>,
}

impl SummaryData {
	pub fn from_stats(stats: &Stats, output_path: PathBuf, output_size_bytes: Option<u64>, duration: Duration) -> Self {
		Self {
			output_path,
			output_size_bytes,
			duration,
			first_segment_t: stats.first_segment_t(),
			total_expected: stats.total_expected(),
			missing_count: stats.missing_count(),
			missing_timestamps: stats.missing_sorted(),
		}
	}

	fn missing_ratio(&self) -> f64 {
		if self.total_expected == 0 {
			return 0.0;
		}
		self.missing_count as f64 / self.total_expected as f64 * 100.0
	}
}

/// Thousands-separated byte count, e.g. `1,234,567`.
fn format_with_thousands(n: u64) -> String {
	let digits = n.to_string();
	let mut out = String::with_capacity(digits.len() + digits.len() / 3);
	for (i, ch) in digits.chars().enumerate() {
		if i > 0 && (digits.len() - i) % 3 == 0 {
			out.push(',');
		}
		out.push(ch);
	}
	out
}

/// `HH:MM:SS`, extended with a leading `Nd ` day count once the duration
/// reaches 24 hours; broadcasts this engine targets can run that long.
fn format_duration(duration: Duration) -> String {
	let total_seconds = duration.as_secs();
	let days = total_seconds / 86_400;
	let hours = (total_seconds % 86_400) / 3600;
	let minutes = (total_seconds % 3600) / 60;
	let seconds = total_seconds % 60;
	if days > 0 {
		format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
	} else {
		format!("{hours:02}:{minutes:02}:{seconds:02}")
	}
}

fn format_timestamps(missing: &[i64]) -> String {
	missing.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

/// English-language summary. When nothing was ever downloaded, the report
/// collapses to a single status line rather than a table of zeroes.
pub fn render_english(data: &SummaryData) -> String {
	if data.total_expected == 0 {
		return "No segments were downloaded during this recording.\n".to_string();
	}

	let mut out = String::new();
	out.push_str("Recording summary\n");
	out.push_str("==================\n");
	out.push_str(&format!("Output file:        {}\n", data.output_path.display()));
	match data.output_size_bytes {
		Some(size) => out.push_str(&format!("File size:           {} bytes\n", format_with_thousands(size))),
		None => out.push_str("File size:           unknown\n"),
	}
	out.push_str(&format!("Duration:            {}\n", format_duration(data.duration)));
	match data.first_segment_t {
		Some(t) => out.push_str(&format!("First segment t:     {t}\n")),
		None => out.push_str("First segment t:     n/a\n"),
	}
	out.push_str(&format!("Segments expected:   {}\n", data.total_expected));
	out.push_str(&format!(
		"Segments missing:    {} ({:.2}%)\n",
		data.missing_count,
		data.missing_ratio()
	));
	if data.missing_timestamps.is_empty() {
		out.push_str("No segments were lost during recording.\n");
	} else {
		out.push_str(&format!("Missing timestamps:  {}\n", format_timestamps(&data.missing_timestamps)));
	}
	out
}

/// Korean-language summary, same data, translated labels.
pub fn render_korean(data: &SummaryData) -> String {
	if data.total_expected == 0 {
		return "이번 녹화에서는 다운로드된 세그먼트가 없습니다.\n".to_string();
	}

	let mut out = String::new();
	out.push_str("녹화 요약\n");
	out.push_str("==================\n");
	out.push_str(&format!("출력 파일: {}\n", data.output_path.display()));
	match data.output_size_bytes {
		Some(size) => out.push_str(&format!("파일 크기: {} 바이트\n", format_with_thousands(size))),
		None => out.push_str("파일 크기: 알 수 없음\n"),
	}
	out.push_str(&format!("녹화 시간: {}\n", format_duration(data.duration)));
	match data.first_segment_t {
		Some(t) => out.push_str(&format!("첫 세그먼트 t: {t}\n")),
		None => out.push_str("첫 세그먼트 t: 없음\n"),
	}
	out.push_str(&format!("예상 세그먼트 수: {}\n", data.total_expected));
	out.push_str(&format!(
		"손실된 세그먼트 수: {} ({:.2}%)\n",
		data.missing_count,
		data.missing_ratio()
	));
	if data.missing_timestamps.is_empty() {
		out.push_str("녹화 중 손실된 세그먼트가 없습니다.\n");
	} else {
		out.push_str(&format!("손실된 타임스탬프: {}\n", format_timestamps(&data.missing_timestamps)));
	}
	out
}

pub async fn write_english(data: &SummaryData, path: &Path) -> Result<()> {
	tokio::fs::write(path, render_english(data)).await?;
	Ok(())
}

pub async fn write_korean(data: &SummaryData, path: &Path) -> Result<()> {
	tokio::fs::write(path, render_korean(data)).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_data(total: u64, missing: Vec<i64>) -> SummaryData {
		SummaryData {
			output_path: PathBuf::from("/tmp/broadcast.mkv"),
			output_size_bytes: Some(1_234_567),
			duration: Duration::from_secs(3 * 3600 + 4 * 60 + 5),
			first_segment_t: Some(100),
			total_expected: total,
			missing_count: missing.len(),
			missing_timestamps: missing,
		}
	}

	#[test]
	fn clean_recording_reports_zero_loss() {
		let data = sample_data(2, vec![]);
		let report = render_english(&data);
		assert!(report.contains("Segments expected:   2"));
		assert!(report.contains("No segments were lost"));
		assert!(report.contains("File size:           1,234,567 bytes"));
		assert!(report.contains("Duration:            03:04:05"));
	}

	#[test]
	fn lossy_recording_lists_missing_timestamps() {
		let data = sample_data(4, vec![100, 300]);
		let en = render_english(&data);
		assert!(en.contains("Segments missing:    2 (50.00%)"));
		assert!(en.contains("100, 300"));

		let ko = render_korean(&data);
		assert!(ko.contains("손실된 세그먼트 수: 2 (50.00%)"));
		assert!(ko.contains("100, 300"));
	}

	#[test]
	fn empty_run_emits_single_status_line() {
		let data = sample_data(0, vec![]);
		assert_eq!(render_english(&data), "No segments were downloaded during this recording.\n");
		assert_eq!(render_korean(&data), "이번 녹화에서는 다운로드된 세그먼트가 없습니다.\n");
	}

	#[test]
	fn duration_extends_with_day_count_past_24_hours() {
		assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
		assert_eq!(format_duration(Duration::from_secs(25 * 3600 + 61)), "1d 01:01:01");
	}

	#[test]
	fn thousands_separator_matches_expected_grouping() {
		assert_eq!(format_with_thousands(7), "7");
		assert_eq!(format_with_thousands(1234), "1,234");
		assert_eq!(format_with_thousands(1_234_567), "1,234,567");
	}
}
