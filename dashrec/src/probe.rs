//! Wraps `ffprobe` to answer one question: given what has been appended to
//! `video_past` so far, what is the `$Time$` of the next un-downloaded
//! segment? The DASH `$Time$` value of that segment equals the cumulative
//! `duration_ts` of the current concatenation, so re-parsing the manifest is
//! never necessary on the common contiguous stretch.

use std::path::Path;

use tokio::process::Command;

/// Returns `None` on any failure: missing file, non-zero exit, unparsable
/// stdout. The past worker treats `None` as "unknown next timestamp" and
/// falls back to a forward HEAD search; it never treats this as fatal.
pub async fn next_expected_t(ffprobe_path: &str, concatenated_file: &Path) -> Option<i64> {
	match tokio::fs::metadata(concatenated_file).await {
		Ok(meta) if meta.len() > 0 => {}
		_ => return None,
	}

	let output = Command::new(ffprobe_path)
		.args([
			"-v",
			"error",
			"-show_entries",
			"stream=duration_ts",
			"-of",
			"default=nw=1:nk=1",
		])
		.arg(concatenated_file)
		.output()
		.await
		.ok()?;

	if !output.status.success() {
		tracing::warn!(path = %concatenated_file.display(), "ffprobe exited non-zero");
		return None;
	}

	let stdout = String::from_utf8_lossy(&output.stdout);
	stdout.trim().lines().next()?.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_file_returns_none() {
		let result = next_expected_t("ffprobe", Path::new("/nonexistent/path/for/dashrec-tests")).await;
		assert_eq!(result, None);
	}
}
