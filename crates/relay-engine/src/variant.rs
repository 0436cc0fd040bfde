//! Variant selection from master playlists.

use m3u8_rs::parse_playlist_res;
use tracing::debug;
use url::Url;

use crate::error::{RelayError, Result};

/// Requested quality for a materialized download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Best,
    /// Target vertical resolution, e.g. 720.
    Height(u32),
}

impl Quality {
    /// Lenient parse: `"best"`, `"720"`, and `"720p"` are all accepted;
    /// anything unrecognized means best available.
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() || value == "best" {
            return Self::Best;
        }
        match value.trim_end_matches('p').parse::<u32>() {
            Ok(height) if height > 0 => Self::Height(height),
            _ => Self::Best,
        }
    }
}

/// One stream-information record from a master playlist, resolved absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistVariant {
    pub url: Url,
    /// Vertical resolution, when the record declares one.
    pub resolution: Option<u32>,
    pub bandwidth: u64,
}

/// Outcome of looking at a fetched playlist.
#[derive(Debug, Clone)]
pub enum VariantSelection {
    /// The input was already a media playlist; use it as-is, nothing to re-fetch.
    Media,
    /// A variant chosen from a master playlist; its media playlist must be fetched.
    Variant(PlaylistVariant),
}

/// Parse the master playlist's variants, sorted best-first by
/// `(resolution desc, bandwidth desc)`.
pub fn parse_variants(text: &str, base: &Url) -> Result<Vec<PlaylistVariant>> {
    let playlist = parse_playlist_res(text.as_bytes())
        .map_err(|e| RelayError::playlist(format!("unparseable playlist at {base}: {e}")))?;

    let master = match playlist {
        m3u8_rs::Playlist::MasterPlaylist(master) => master,
        m3u8_rs::Playlist::MediaPlaylist(_) => return Ok(Vec::new()),
    };

    let mut variants = Vec::with_capacity(master.variants.len());
    for variant in &master.variants {
        let url = base
            .join(&variant.uri)
            .map_err(|e| RelayError::invalid_url(&variant.uri, e.to_string()))?;
        variants.push(PlaylistVariant {
            url,
            resolution: variant.resolution.map(|r| r.height as u32),
            bandwidth: variant.bandwidth,
        });
    }

    variants.sort_by(|a, b| {
        (b.resolution.unwrap_or(0), b.bandwidth).cmp(&(a.resolution.unwrap_or(0), a.bandwidth))
    });
    Ok(variants)
}

/// Choose a media playlist by requested quality.
///
/// `Best` takes the top entry; a height target takes the first (largest)
/// variant at or below it, falling back to the top entry when every variant
/// exceeds the target. Media playlists come back unchanged.
pub fn select_variant(text: &str, base: &Url, quality: Quality) -> Result<VariantSelection> {
    if !text.contains("#EXT-X-STREAM-INF") {
        return Ok(VariantSelection::Media);
    }

    let variants = parse_variants(text, base)?;
    if variants.is_empty() {
        return Err(RelayError::playlist(format!(
            "master playlist at {base} has no variants"
        )));
    }

    let chosen = match quality {
        Quality::Best => &variants[0],
        Quality::Height(target) => variants
            .iter()
            .find(|v| v.resolution.is_some_and(|h| h <= target))
            .unwrap_or(&variants[0]),
    };
    debug!(
        url = %chosen.url,
        resolution = ?chosen.resolution,
        bandwidth = chosen.bandwidth,
        "selected variant"
    );
    Ok(VariantSelection::Variant(chosen.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
ep-360/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
ep-720/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080\n\
ep-1080/index.m3u8\n";

    fn base() -> Url {
        Url::parse("https://cdn.example.com/hls/master.m3u8").unwrap()
    }

    #[test]
    fn quality_parsing_is_lenient() {
        assert_eq!(Quality::parse("best"), Quality::Best);
        assert_eq!(Quality::parse(""), Quality::Best);
        assert_eq!(Quality::parse("720"), Quality::Height(720));
        assert_eq!(Quality::parse("720p"), Quality::Height(720));
        assert_eq!(Quality::parse("gibberish"), Quality::Best);
    }

    #[test]
    fn variants_sort_best_first() {
        let variants = parse_variants(MASTER, &base()).unwrap();
        let heights: Vec<_> = variants.iter().map(|v| v.resolution).collect();
        assert_eq!(heights, vec![Some(1080), Some(720), Some(360)]);
        assert_eq!(
            variants[0].url.as_str(),
            "https://cdn.example.com/hls/ep-1080/index.m3u8"
        );
    }

    #[test]
    fn requested_720_returns_the_720p_entry() {
        let selection = select_variant(MASTER, &base(), Quality::Height(720)).unwrap();
        match selection {
            VariantSelection::Variant(v) => {
                assert_eq!(v.resolution, Some(720));
                assert_eq!(v.bandwidth, 2000000);
                assert_eq!(v.url.as_str(), "https://cdn.example.com/hls/ep-720/index.m3u8");
            }
            VariantSelection::Media => panic!("expected a variant"),
        }
    }

    #[test]
    fn best_returns_1080p() {
        match select_variant(MASTER, &base(), Quality::Best).unwrap() {
            VariantSelection::Variant(v) => assert_eq!(v.resolution, Some(1080)),
            VariantSelection::Media => panic!("expected a variant"),
        }
    }

    #[test]
    fn target_below_everything_falls_back_to_best() {
        match select_variant(MASTER, &base(), Quality::Height(144)).unwrap() {
            VariantSelection::Variant(v) => assert_eq!(v.resolution, Some(1080)),
            VariantSelection::Media => panic!("expected a variant"),
        }
    }

    #[test]
    fn target_between_variants_picks_largest_at_or_below() {
        match select_variant(MASTER, &base(), Quality::Height(900)).unwrap() {
            VariantSelection::Variant(v) => assert_eq!(v.resolution, Some(720)),
            VariantSelection::Media => panic!("expected a variant"),
        }
    }

    #[test]
    fn media_playlists_pass_through() {
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg-0001.ts\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            select_variant(media, &base(), Quality::Best).unwrap(),
            VariantSelection::Media
        ));
    }
}
