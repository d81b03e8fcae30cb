//! DASH MPD manifest model, parsing and representation selection.
//!
//! The wire format is deserialised directly from XML via `quick-xml`'s serde
//! integration, following the same approach used by the DASH-parsing crates
//! in the ecosystem: a handful of plain structs whose field names match the
//! XML attribute/element names, no XPath engine involved.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{Error, Result};

/// The DASH namespace this engine understands. Anything else is rejected at
/// the CLI boundary, not here; the manifest model has no opinion on it.
pub const NAMESPACE: &str = "urn:mpeg:dash:schema:mpd:2011";

/// Response header announcing that no further segments will be published.
pub const BROADCAST_ENDED_HEADER: &str = "x-fb-video-broadcast-ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
	VideoMp4,
	AudioMp4,
}

impl MimeType {
	fn as_str(self) -> &'static str {
		match self {
			MimeType::VideoMp4 => "video/mp4",
			MimeType::AudioMp4 => "audio/mp4",
		}
	}
}

impl std::fmt::Display for MimeType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Deserialize, Clone)]
pub struct S {
	pub t: Option<i64>,
	#[serde(default)]
	pub d: i64,
	pub r: Option<i64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTimeline {
	#[serde(rename = "S", default)]
	pub segments: Vec<S>,
}

/// Upper bound on how many occurrences a single `S@r` can expand to. A
/// well-formed manifest never approaches this; it exists to keep a malformed
/// or adversarial `@r` from forcing an unbounded allocation or a multi-minute
/// loop on every live poll.
const MAX_REPEAT_EXPANSION: i64 = 100_000;

/// Expands a `SegmentTimeline`'s `S` entries into the flat list of segment
/// start timestamps they imply, honoring `@r` (repeat count): `r=0`/absent
/// is one segment, `r=N>0` repeats the entry `N` further times at `d`-sized
/// intervals, and `r=-1` ("indefinite") repeats until the next `S`'s `@t`
/// when there is one. A trailing `r=-1` entry (the manifest hasn't published
/// the entry that would close it yet) only yields its own start; subsequent
/// occurrences show up as their own `S` entries once the manifest updates.
/// An absent `@t` on any but the first entry defaults to the previous
/// entry's end time, per the DASH spec.
pub fn expand_timeline(segments: &[S]) -> Vec<i64> {
	let mut out = Vec::new();
	let mut cursor: i64 = 0;

	for (i, s) in segments.iter().enumerate() {
		let start = s.t.unwrap_or(cursor);
		let mut repeat = s.r.unwrap_or(0);

		if repeat >= 0 {
			if repeat > MAX_REPEAT_EXPANSION {
				tracing::warn!(repeat, cap = MAX_REPEAT_EXPANSION, "S@r exceeds sanity cap, truncating expansion");
				repeat = MAX_REPEAT_EXPANSION;
			}
			for k in 0..=repeat {
				out.push(start + s.d * k);
			}
			cursor = start + s.d * (repeat + 1);
		} else {
			let next_t = segments.get(i + 1).and_then(|next| next.t);
			match next_t {
				Some(limit) => {
					let mut t = start;
					let mut count = 0i64;
					while t < limit && count < MAX_REPEAT_EXPANSION {
						out.push(t);
						t += s.d.max(1);
						count += 1;
					}
					if t < limit {
						tracing::warn!(cap = MAX_REPEAT_EXPANSION, "S@r=-1 expansion exceeds sanity cap, truncating");
					}
					cursor = limit;
				}
				None => {
					out.push(start);
					cursor = start + s.d;
				}
			}
		}
	}

	out
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTemplate {
	pub initialization: Option<String>,
	pub media: Option<String>,
	pub SegmentTimeline: Option<SegmentTimeline>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Representation {
	pub id: Option<String>,
	pub mimeType: Option<String>,
	pub codecs: Option<String>,
	pub bandwidth: Option<u64>,
	pub width: Option<u64>,
	pub height: Option<u64>,
	pub frameRate: Option<String>,
	pub audioSamplingRate: Option<u64>,
	pub SegmentTemplate: Option<SegmentTemplate>,
}

impl Representation {
	fn bandwidth_or_zero(&self) -> u64 {
		self.bandwidth.unwrap_or(0)
	}

	fn mime_matches(&self, mime: MimeType) -> bool {
		self.mimeType.as_deref() == Some(mime.as_str())
	}

	/// Human-readable summary used for logging.
	pub fn describe(&self) -> String {
		let mut parts = vec![format!("id={:?}", self.id.as_deref().unwrap_or("?"))];
		if let (Some(w), Some(h)) = (self.width, self.height) {
			parts.push(format!("resolution={w}x{h}"));
		}
		if let Some(rate) = &self.frameRate {
			parts.push(format!("frame_rate={rate}"));
		}
		if let Some(rate) = self.audioSamplingRate {
			parts.push(format!("sampling_rate={rate}"));
		}
		parts.push(format!("bandwidth={}", format_bandwidth(self.bandwidth_or_zero())));
		if let Some(codecs) = &self.codecs {
			parts.push(format!("codecs={codecs}"));
		}
		parts.join(", ")
	}
}

/// Formats a bitrate into a human-readable kbps/Mbps string.
pub fn format_bandwidth(bits_per_second: u64) -> String {
	if bits_per_second > 1_000_000 {
		format!("{:.2} Mbps", bits_per_second as f64 / 1_000_000.0)
	} else {
		format!("{:.1} kbps", bits_per_second as f64 / 1_000.0)
	}
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdaptationSet {
	#[serde(rename = "Representation", default)]
	pub representations: Vec<Representation>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Period {
	#[serde(rename = "AdaptationSet", default)]
	pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Mpd {
	pub publishFrameTime: Option<i64>,
	#[serde(rename = "Period", default)]
	pub periods: Vec<Period>,
}

impl Mpd {
	fn representations(&self) -> impl Iterator<Item = &Representation> {
		self.periods
			.iter()
			.flat_map(|p| p.adaptation_sets.iter())
			.flat_map(|a| a.representations.iter())
	}
}

/// Parses a raw MPD document. Returns `None` (not an error) on malformed
/// XML: end-of-stream often produces truncated or empty bodies and the live
/// poller must keep going rather than treat this as fatal.
pub fn parse(xml: &str) -> Option<Mpd> {
	quick_xml::de::from_str(xml).ok()
}

/// Enumerates all `Representation` elements matching `mime`. If
/// `preferred_ids` is non-empty, the first ID present in the manifest (in
/// the order given) wins. Otherwise the representation with the numerically
/// largest `bandwidth` is chosen, ties broken by document order.
pub fn select_representation<'a>(
	mpd: &'a Mpd,
	mime: MimeType,
	preferred_ids: &[String],
) -> Result<&'a Representation> {
	let candidates: Vec<&Representation> = mpd.representations().filter(|r| r.mime_matches(mime)).collect();
	if candidates.is_empty() {
		return Err(Error::NoSuchRepresentation(mime));
	}

	if !preferred_ids.is_empty() {
		for id in preferred_ids {
			if let Some(rep) = candidates.iter().find(|r| r.id.as_deref() == Some(id.as_str())) {
				tracing::info!(mime = %mime, rep = %rep.describe(), "selected user-preferred representation");
				return Ok(rep);
			}
		}
		tracing::warn!(mime = %mime, ?preferred_ids, "none of the preferred representation IDs were found, falling back to highest bitrate");
	}

	let best = candidates
		.into_iter()
		.enumerate()
		.max_by_key(|(order, rep)| (rep.bandwidth_or_zero(), std::cmp::Reverse(*order)))
		.map(|(_, rep)| rep)
		.expect("candidates is non-empty");
	tracing::info!(mime = %mime, rep = %best.describe(), "selected highest-bitrate representation");
	Ok(best)
}

/// The selected video/audio pair plus the facts the engine needs to start
/// recording: the live/past boundary `initial_t`, and the optional
/// producer-supplied `publishFrameTime` hint.
#[derive(Debug, Clone)]
pub struct StreamInfo {
	pub video: SelectedRepresentation,
	pub audio: SelectedRepresentation,
	pub initial_t: i64,
	pub publish_frame_time: Option<i64>,
}

/// The two URL templates an engine needs from a representation, extracted
/// once at selection time so later code never has to re-unwrap `Option`s.
#[derive(Debug, Clone)]
pub struct SelectedRepresentation {
	pub id: String,
	pub init_template: String,
	pub media_template: String,
}

fn extract_templates(rep: &Representation, mime: MimeType) -> Result<SelectedRepresentation> {
	let template = rep
		.SegmentTemplate
		.as_ref()
		.ok_or(Error::NoSuchRepresentation(mime))?;
	let init_template = template.initialization.clone().ok_or(Error::NoSuchRepresentation(mime))?;
	let media_template = template.media.clone().ok_or(Error::NoSuchRepresentation(mime))?;
	Ok(SelectedRepresentation {
		id: rep.id.clone().unwrap_or_default(),
		init_template,
		media_template,
	})
}

/// Selects video and audio representations, reads their `SegmentTemplate`s,
/// and expands the video `SegmentTimeline` (honoring each `S`'s `@r` repeat
/// count, not just its own `@t`) to find the last implied segment
/// timestamp, which becomes `initial_t`. Fails with `EmptyManifest` if the
/// video representation has no segment timeline entries at all.
pub fn parse_initial_info(
	mpd: &Mpd,
	preferred_video_ids: &[String],
	preferred_audio_ids: &[String],
) -> Result<StreamInfo> {
	let video_rep = select_representation(mpd, MimeType::VideoMp4, preferred_video_ids)?;
	let audio_rep = select_representation(mpd, MimeType::AudioMp4, preferred_audio_ids)?;

	let video = extract_templates(video_rep, MimeType::VideoMp4)?;
	let audio = extract_templates(audio_rep, MimeType::AudioMp4)?;

	let timestamps = video_rep
		.SegmentTemplate
		.as_ref()
		.and_then(|t| t.SegmentTimeline.as_ref())
		.map(|tl| expand_timeline(&tl.segments))
		.unwrap_or_default();
	let initial_t = *timestamps.last().ok_or(Error::EmptyManifest)?;

	Ok(StreamInfo {
		video,
		audio,
		initial_t,
		publish_frame_time: mpd.publishFrameTime,
	})
}

/// Every segment timestamp implied by the video `SegmentTimeline` (each `S`
/// expanded per its `@r` repeat count), used by the live poller to discover
/// newly published segments.
pub fn timeline_timestamps(mpd: &Mpd, video_rep_id: &str) -> Vec<i64> {
	mpd.representations()
		.filter(|r| r.id.as_deref() == Some(video_rep_id))
		.filter_map(|r| r.SegmentTemplate.as_ref())
		.filter_map(|t| t.SegmentTimeline.as_ref())
		.flat_map(|tl| expand_timeline(&tl.segments))
		.collect()
}

/// Substitutes the literal `$Time$` token in a DASH template with `t`. Other
/// DASH placeholders (`$Number$`, `$RepresentationID$`, width specifiers)
/// are intentionally left untouched; they are not in scope, and silently
/// "handling" them would hide a manifest this engine cannot actually serve.
pub fn substitute_time(template: &str, t: i64) -> String {
	template.replace("$Time$", &t.to_string())
}

/// Interactive/CLI callers need a flat list of representations grouped by
/// mime type for display purposes; this is the read-only view they get.
pub fn representations_by_mime(mpd: &Mpd) -> HashMap<MimeType, Vec<&Representation>> {
	let mut out: HashMap<MimeType, Vec<&Representation>> = HashMap::new();
	for rep in mpd.representations() {
		if rep.mime_matches(MimeType::VideoMp4) {
			out.entry(MimeType::VideoMp4).or_default().push(rep);
		} else if rep.mime_matches(MimeType::AudioMp4) {
			out.entry(MimeType::AudioMp4).or_default().push(rep);
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" publishFrameTime="100">
  <Period>
    <AdaptationSet>
      <Representation id="v1" mimeType="video/mp4" bandwidth="5000000" width="1920" height="1080">
        <SegmentTemplate initialization="v1/init.mp4" media="v1/$Time$.m4s">
          <SegmentTimeline>
            <S t="100" d="1000"/>
            <S t="1100" d="1000"/>
            <S t="2100" d="900"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
      <Representation id="v2" mimeType="video/mp4" bandwidth="1000000" width="640" height="360">
        <SegmentTemplate initialization="v2/init.mp4" media="v2/$Time$.m4s">
          <SegmentTimeline>
            <S t="100" d="1000"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
      <Representation id="a1" mimeType="audio/mp4" bandwidth="128000">
        <SegmentTemplate initialization="a1/init.mp4" media="a1/$Time$.m4s">
          <SegmentTimeline>
            <S t="100" d="1000"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

	#[test]
	fn parses_and_selects_by_highest_bandwidth() {
		let mpd = parse(SAMPLE).expect("valid manifest");
		let rep = select_representation(&mpd, MimeType::VideoMp4, &[]).unwrap();
		assert_eq!(rep.id.as_deref(), Some("v1"));
	}

	#[test]
	fn preferred_id_overrides_bandwidth() {
		let mpd = parse(SAMPLE).expect("valid manifest");
		let rep = select_representation(&mpd, MimeType::VideoMp4, &["v2".to_string()]).unwrap();
		assert_eq!(rep.id.as_deref(), Some("v2"));
	}

	#[test]
	fn unknown_preferred_id_falls_back_to_bandwidth() {
		let mpd = parse(SAMPLE).expect("valid manifest");
		let rep = select_representation(&mpd, MimeType::VideoMp4, &["missing".to_string()]).unwrap();
		assert_eq!(rep.id.as_deref(), Some("v1"));
	}

	#[test]
	fn initial_t_is_last_segment_timestamp() {
		let mpd = parse(SAMPLE).expect("valid manifest");
		let info = parse_initial_info(&mpd, &[], &[]).unwrap();
		assert_eq!(info.initial_t, 2100);
		assert_eq!(info.publish_frame_time, Some(100));
	}

	#[test]
	fn malformed_xml_returns_none_not_error() {
		assert!(parse("<not-an-mpd").is_none());
	}

	#[test]
	fn time_substitution_is_literal() {
		assert_eq!(substitute_time("v1/$Time$.m4s?x=$Time$", 42), "v1/42.m4s?x=42");
	}

	#[test]
	fn empty_manifest_without_segments_is_rejected() {
		let xml = r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011">
          <Period><AdaptationSet>
            <Representation id="v1" mimeType="video/mp4" bandwidth="1">
              <SegmentTemplate initialization="i" media="m"/>
            </Representation>
            <Representation id="a1" mimeType="audio/mp4" bandwidth="1">
              <SegmentTemplate initialization="i" media="m">
                <SegmentTimeline><S t="0" d="1"/></SegmentTimeline>
              </SegmentTemplate>
            </Representation>
          </AdaptationSet></Period>
        </MPD>"#;
		let mpd = parse(xml).unwrap();
		let err = parse_initial_info(&mpd, &[], &[]).unwrap_err();
		assert!(matches!(err, Error::EmptyManifest));
	}

	#[test]
	fn expand_timeline_applies_repeat_count() {
		let segments = vec![S { t: Some(100), d: 1000, r: Some(2) }];
		// r=2 means 2 *further* repeats beyond the first: 3 segments total.
		assert_eq!(expand_timeline(&segments), vec![100, 1100, 2100]);
	}

	#[test]
	fn expand_timeline_defaults_t_from_previous_entry() {
		let segments = vec![S { t: Some(0), d: 500, r: None }, S { t: None, d: 500, r: None }];
		assert_eq!(expand_timeline(&segments), vec![0, 500]);
	}

	#[test]
	fn expand_timeline_indefinite_repeat_fills_up_to_next_entry() {
		let segments = vec![S { t: Some(0), d: 100, r: Some(-1) }, S { t: Some(350), d: 100, r: None }];
		assert_eq!(expand_timeline(&segments), vec![0, 100, 200, 300, 350]);
	}

	#[test]
	fn expand_timeline_trailing_indefinite_repeat_yields_its_own_start_only() {
		let segments = vec![S { t: Some(0), d: 1000, r: Some(-1) }];
		assert_eq!(expand_timeline(&segments), vec![0]);
	}

	#[test]
	fn initial_t_accounts_for_repeat_count_not_just_last_s_element() {
		let xml = r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011">
          <Period><AdaptationSet>
            <Representation id="v1" mimeType="video/mp4" bandwidth="1">
              <SegmentTemplate initialization="i" media="v/$Time$.m4s">
                <SegmentTimeline><S t="0" d="1000" r="3"/></SegmentTimeline>
              </SegmentTemplate>
            </Representation>
            <Representation id="a1" mimeType="audio/mp4" bandwidth="1">
              <SegmentTemplate initialization="i" media="a/$Time$.m4s">
                <SegmentTimeline><S t="0" d="1000" r="3"/></SegmentTimeline>
              </SegmentTemplate>
            </Representation>
          </AdaptationSet></Period>
        </MPD>"#;
		let mpd = parse(xml).unwrap();
		let info = parse_initial_info(&mpd, &[], &[]).unwrap();
		// r=3 means 4 occurrences at t=0,1000,2000,3000; the single `S`
		// element's own `@t` of 0 must not be mistaken for `initial_t`.
		assert_eq!(info.initial_t, 3000);
	}
}
