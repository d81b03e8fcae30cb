//! Resolves the positional `url-or-username` argument to a manifest URL.
//!
//! Username-to-manifest-URL resolution against a platform's private API is
//! explicitly out of scope: this accepts only a literal manifest URL and
//! rejects anything else with a typed error naming what's missing, rather
//! than silently guessing.

use anyhow::{bail, Result};
use url::Url;

pub fn resolve_manifest_url(input: &str) -> Result<Url> {
	match Url::parse(input) {
		Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(url),
		Ok(url) => bail!("unsupported URL scheme {:?}; pass an http(s) manifest URL", url.scheme()),
		Err(_) => bail!(
			"{input:?} is not a manifest URL. Resolving a username to a manifest URL is not supported by this tool; \
			 pass the .mpd URL directly."
		),
	}
}
