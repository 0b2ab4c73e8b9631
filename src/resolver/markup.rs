//! Site-specific markup adapter
//!
//! Every literal marker, regular expression, and delimiter convention of the
//! upstream site lives here, behind small pure functions. The markup is
//! expected to drift; when it does, this file is the only thing that changes.
//! The resolver proper never touches a literal.

use crate::config::MirrorPriority;
use crate::types::Quality;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Body substrings that mark a captcha or WAF interstitial
const BLOCK_MARKERS: [&str; 2] = ["captcha", "cloudflare"];

/// Body substrings that mark a rights-holder geo restriction
const GEO_MARKERS: [&str; 2] = [
    "недоступен по просьбе правообладателей",
    "на територии РФ",
];

/// Delimiter between candidate URLs inside one quality bracket
const CANDIDATE_DELIMITER: &str = " or ";

/// Compile a hardcoded pattern; the literals in this file are tested below
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("hardcoded markup pattern is valid")
}

fn variant_map_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"(?s)var data\s*=\s*(\{.*?\});"))
}

fn variant_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#"["'](.*?)["']\s*:\s*["']?(\d+)["']?"#))
}

fn display_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#"(?s)<div class="shortstoryHead">\s*<h1>\s*(.*?)\s*</h1>"#))
}

fn player_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#""file"\s*:\s*"(.*?)""#))
}

fn button_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#"(?s)<div[^>]*id="dow"[^>]*>(.*?)</div>"#))
}

fn button_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r#"(?s)<a[^>]*href="(http[^"]+)"[^>]*>(.*?)</a>"#))
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r",\s*\}"))
}

fn fhd_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"(?i)\[FHD\s*\(1080[pр]\)\](.*?)(?:,\[|$)"))
}

fn hd_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| compile(r"(?i)\[HD\s*\(720[pр]\)\](.*?)(?:,\[|$)"))
}

/// Whether the body is a captcha/WAF interstitial rather than content
pub(crate) fn is_blocked(body: &str) -> bool {
    BLOCK_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Whether the player payload carries a rights-restriction marker
pub(crate) fn is_geo_restricted(body: &str) -> bool {
    GEO_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Extract the display name from the page heading
///
/// The heading carries release tags in square brackets after the title;
/// everything from the first `[` on is dropped.
pub(crate) fn extract_display_name(html: &str) -> Option<String> {
    let raw = display_name_re().captures(html)?.get(1)?.as_str();
    let primary = raw.split('[').next().unwrap_or(raw).trim();
    if primary.is_empty() {
        None
    } else {
        Some(primary.to_string())
    }
}

/// Extract the embedded variant map as `(key, variant_id)` pairs
///
/// The payload is near-JSON with single quotes and trailing commas; after a
/// quote fixup it parses as an object. When even that fails (obfuscation
/// changes), a per-entry regex recovers what it can. Returns `None` when the
/// page carries no variant map at all.
pub(crate) fn extract_variant_map(html: &str) -> Option<Vec<(String, String)>> {
    let raw = variant_map_re().captures(html)?.get(1)?.as_str();

    let fixed = raw.replace('\'', "\"");
    let fixed = trailing_comma_re().replace_all(&fixed, "}").into_owned();

    if let Ok(map) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&fixed) {
        let entries: Vec<(String, String)> = map
            .into_iter()
            .map(|(key, value)| {
                let id = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, id)
            })
            .collect();
        return Some(entries);
    }

    tracing::warn!("Variant map JSON parse failed, using per-entry fallback");
    let entries: Vec<(String, String)> = variant_entry_re()
        .captures_iter(raw)
        .filter_map(|c| Some((c.get(1)?.as_str().to_string(), c.get(2)?.as_str().to_string())))
        .collect();
    Some(entries)
}

/// Numeric suffix of a variant key ("Серия 10" → 10); keys without digits
/// sort first as 0
pub(crate) fn numeric_suffix(key: &str) -> u64 {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Pick the first variant by numeric key order, regardless of insertion order
pub(crate) fn first_variant(entries: &[(String, String)]) -> Option<&(String, String)> {
    entries.iter().min_by_key(|(key, _)| numeric_suffix(key))
}

/// Extract the raw link blob from a player payload
///
/// Preference order: the player configuration `"file"` field, then the
/// download-button fallback (buttons survive script obfuscation changes),
/// normalized into the same `[label]url` comma-joined shape the bracket
/// scanner expects.
pub(crate) fn extract_link_blob(player_html: &str) -> Option<String> {
    if let Some(captures) = player_file_re().captures(player_html)
        && let Some(blob) = captures.get(1)
    {
        tracing::debug!("Found links in player configuration");
        return Some(blob.as_str().to_string());
    }

    let block = button_block_re().captures(player_html)?.get(1)?.as_str();
    let entries: Vec<String> = button_link_re()
        .captures_iter(block)
        .filter_map(|c| {
            let href = c.get(1)?.as_str();
            let label = c.get(2)?.as_str().trim();
            Some(format!("[{}]{}", label, href))
        })
        .collect();

    if entries.is_empty() {
        None
    } else {
        tracing::debug!(buttons = entries.len(), "Found links via download buttons");
        Some(entries.join(","))
    }
}

/// Scan the blob for the highest quality bracket with ≥1 confirmed URL
///
/// Brackets are scanned in fixed priority order (1080p family first). Within
/// a bracket, candidates are split on the upstream delimiter, kept only when
/// the URL path structurally confirms the claimed resolution, deduplicated,
/// and ranked by the mirror-host priority table. The first bracket that
/// yields anything wins; lower brackets are never consulted after that.
pub(crate) fn rank_candidates(
    blob: &str,
    priorities: &[MirrorPriority],
) -> Option<(Quality, Vec<String>)> {
    for quality in [Quality::Fhd1080, Quality::Hd720] {
        let bracket_re = match quality {
            Quality::Fhd1080 => fhd_bracket_re(),
            Quality::Hd720 => hd_bracket_re(),
        };
        let Some(block) = bracket_re.captures(blob).and_then(|c| c.get(1)) else {
            continue;
        };

        let mut seen = HashSet::new();
        let mut urls: Vec<String> = block
            .as_str()
            .split(CANDIDATE_DELIMITER)
            .map(str::trim)
            .filter(|url| url.starts_with("http"))
            .filter(|url| url.contains(quality.path_marker()))
            .filter(|url| seen.insert(url.to_string()))
            .map(str::to_string)
            .collect();

        if urls.is_empty() {
            continue;
        }

        urls.sort_by_key(|url| std::cmp::Reverse(mirror_score(url, priorities)));
        return Some((quality, urls));
    }
    None
}

/// URL of the legacy player endpoint for a variant
///
/// `old=1` pins the unobfuscated player revision, whose payload still carries
/// the plain link blob.
pub(crate) fn player_url(base_url: &str, variant_id: &str) -> String {
    format!(
        "{}/frame5.php?play={}&old=1",
        base_url.trim_end_matches('/'),
        variant_id
    )
}

/// Ranking weight of a candidate URL per the mirror priority table
fn mirror_score(url: &str, priorities: &[MirrorPriority]) -> u32 {
    priorities
        .iter()
        .find(|p| url.contains(&p.host))
        .map(|p| p.weight)
        .unwrap_or(0)
}

/// Host portion of a mirror URL, for logs and status texts
pub(crate) fn mirror_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
