//! Normalization helpers shared by every adapter.
//!
//! Backends disagree about everything: integers arrive as JSON numbers or
//! numeric strings, timestamps as epoch seconds, ISO datetimes, ruby-style
//! datetimes, or `{"s": ...}` objects, URLs as absolute, protocol-relative
//! or site-relative. Everything here is total: an absent or malformed
//! field yields a zero/empty default, never an error.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::booru::post::TagGroups;

/// Read a string-ish property: JSON strings come back verbatim, numbers
/// are stringified (ids arrive both ways), everything else is None.
pub fn json_str(element: &Value, key: &str) -> Option<String> {
    match element.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Two-level [`json_str`]: `element[first][second]`.
pub fn json_nested_str(element: &Value, first: &str, second: &str) -> Option<String> {
    let child = element.get(first)?;
    if !child.is_object() {
        return None;
    }
    json_str(child, second)
}

/// Read an integer that may be a JSON number or a numeric string.
pub fn json_int(element: &Value, key: &str) -> i64 {
    match element.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Two-level [`json_int`]: `element[first][second]`.
pub fn json_nested_int(element: &Value, first: &str, second: &str) -> i64 {
    match element.get(first) {
        Some(child) if child.is_object() => json_int(child, second),
        _ => 0,
    }
}

/// Read a creation timestamp property as epoch seconds. Accepts epoch
/// numbers, datetime strings, and the `{"s": seconds}` object shape some
/// backends emit.
pub fn json_unix_time(element: &Value, key: &str) -> i64 {
    match element.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => parse_unix_time(s),
        Some(Value::Object(map)) => match map.get("s") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(Value::String(s)) => parse_unix_time(s),
            _ => 0,
        },
        _ => 0,
    }
}

/// Parse a timestamp string: raw epoch seconds, RFC 3339, a bare
/// `YYYY-MM-DD HH:MM:SS` assumed UTC, or the ruby-style
/// `Mon Jul 18 14:46:52 -0500 2022` DAPI emits.
pub fn parse_unix_time(value: &str) -> i64 {
    let value = value.trim();
    if value.is_empty() {
        return 0;
    }

    if let Ok(direct) = value.parse::<i64>() {
        return direct;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return parsed.timestamp();
    }

    if let Ok(parsed) = DateTime::parse_from_str(value, "%a %b %d %H:%M:%S %z %Y") {
        return parsed.timestamp();
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc().timestamp();
    }

    0
}

/// Lenient integer parse, 0 on failure.
pub fn parse_int(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

/// Positive-only dimension parse; zero and negatives collapse to 0.
pub fn parse_positive_u32(value: &str) -> u32 {
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => u32::try_from(parsed).unwrap_or(0),
        _ => 0,
    }
}

/// Map a backend tag-category name onto the canonical group casing.
pub fn canonical_group_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "General".to_string();
    }

    match trimmed.to_lowercase().as_str() {
        "artist" => "Artist".to_string(),
        "character" => "Character".to_string(),
        "copyright" => "Copyright".to_string(),
        "species" => "Species".to_string(),
        "general" => "General".to_string(),
        "meta" => "Meta".to_string(),
        "lore" => "Lore".to_string(),
        "invalid" => "Invalid".to_string(),
        lower => {
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => "General".to_string(),
            }
        }
    }
}

/// Split a whitespace-separated tag string into trimmed, case-insensitively
/// deduplicated tokens, first occurrence wins.
pub fn split_tags(raw: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for token in raw.split_whitespace() {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let folded = token.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        out.push(token.to_string());
    }
    out
}

/// Flat tag strings become one "General" group.
pub fn single_tag_group(tags: &str) -> TagGroups {
    let values = split_tags(tags);
    let mut groups = TagGroups::new();
    if !values.is_empty() {
        groups.insert("General".to_string(), values);
    }
    groups
}

/// Display tags: prefer the General group, fall back to the raw string.
pub fn preferred_display_tags(groups: &TagGroups, fallback: &str) -> String {
    if let Some(general) = groups.get("General") {
        if !general.is_empty() {
            return general.join(" ");
        }
    }
    fallback.to_string()
}

/// Resolve a possibly relative or protocol-relative media URL against a
/// site base. Blank input stays blank; unresolvable input is returned
/// verbatim rather than dropped.
pub fn absolute_url(base_url: &str, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }

    if raw.starts_with("//") {
        return format!("https:{raw}");
    }

    if url::Url::parse(raw).is_ok() {
        return raw.to_string();
    }

    match url::Url::parse(base_url).and_then(|base| base.join(raw)) {
        Ok(joined) => joined.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// URL-path heuristics for resized/cropped media variants that must not be
/// mistaken for the original asset.
pub fn is_sample_or_thumbnail_url(raw: &str) -> bool {
    if raw.trim().is_empty() {
        return false;
    }

    let path = match url::Url::parse(raw) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => raw.to_string(),
    };
    let normalized = path.trim().to_lowercase();

    normalized.contains("/samples/")
        || normalized.contains("/sample/")
        || normalized.contains("/thumbnails/")
        || normalized.contains("/thumbnail/")
        || normalized.contains("sample_")
        || normalized.contains("thumbnail_")
}

/// booru.org records point originals at the `thumbs.` subdomain; the real
/// files are served from `img.`.
pub fn fix_thumbs_subdomain(url: &str) -> String {
    if url.trim().is_empty() {
        return url.to_string();
    }

    let lower = url.to_lowercase();
    if let Some(idx) = lower.find("://thumbs.") {
        let mut fixed = String::with_capacity(url.len());
        fixed.push_str(&url[..idx]);
        fixed.push_str("://img.");
        fixed.push_str(&url[idx + "://thumbs.".len()..]);
        return fixed;
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_int_accepts_numbers_and_numeric_strings() {
        let obj = json!({"a": 12, "b": "12", "c": "nope", "d": 3.9});
        assert_eq!(json_int(&obj, "a"), 12);
        assert_eq!(json_int(&obj, "b"), 12);
        assert_eq!(json_int(&obj, "c"), 0);
        assert_eq!(json_int(&obj, "d"), 3);
        assert_eq!(json_int(&obj, "missing"), 0);
    }

    #[test]
    fn nested_lookup_defaults_instead_of_failing() {
        let obj = json!({"score": {"total": "12"}, "file": 3});
        assert_eq!(json_nested_int(&obj, "score", "total"), 12);
        assert_eq!(json_nested_int(&obj, "score", "up"), 0);
        // Non-object intermediate node is an absent path, not an error.
        assert_eq!(json_nested_int(&obj, "file", "url"), 0);
        assert_eq!(json_nested_str(&obj, "file", "url"), None);
    }

    #[test]
    fn unix_time_accepts_all_backend_shapes() {
        let obj = json!({
            "epoch": 1700000000,
            "iso": "2023-11-14T22:13:20+00:00",
            "wrapped": {"s": 1700000000},
        });
        assert_eq!(json_unix_time(&obj, "epoch"), 1_700_000_000);
        assert_eq!(json_unix_time(&obj, "iso"), 1_700_000_000);
        assert_eq!(json_unix_time(&obj, "wrapped"), 1_700_000_000);

        assert_eq!(parse_unix_time("1700000000"), 1_700_000_000);
        assert_eq!(parse_unix_time("2023-11-14 22:13:20"), 1_700_000_000);
        assert_eq!(
            parse_unix_time("Tue Nov 14 17:13:20 -0500 2023"),
            1_700_000_000
        );
        assert_eq!(parse_unix_time("not a date"), 0);
    }

    #[test]
    fn group_names_map_to_canonical_casing() {
        assert_eq!(canonical_group_name("artist"), "Artist");
        assert_eq!(canonical_group_name("SPECIES"), "Species");
        assert_eq!(canonical_group_name("director"), "Director");
        assert_eq!(canonical_group_name(""), "General");
    }

    #[test]
    fn split_tags_dedups_case_insensitively() {
        let tags = split_tags("Sky  sky cloud SKY tree");
        assert_eq!(tags, vec!["Sky", "cloud", "tree"]);
    }

    #[test]
    fn absolute_url_resolves_all_flavors() {
        assert_eq!(
            absolute_url("https://safebooru.org", "//img.example.org/a.jpg"),
            "https://img.example.org/a.jpg"
        );
        assert_eq!(
            absolute_url("https://safebooru.org", "/images/a.jpg"),
            "https://safebooru.org/images/a.jpg"
        );
        assert_eq!(
            absolute_url("https://safebooru.org", "https://other.org/a.jpg"),
            "https://other.org/a.jpg"
        );
        assert_eq!(absolute_url("https://safebooru.org", "  "), "");
    }

    #[test]
    fn sample_heuristics_check_path_not_query() {
        assert!(is_sample_or_thumbnail_url(
            "https://img.example.org/sample/ab/sample_x.jpg"
        ));
        assert!(is_sample_or_thumbnail_url(
            "https://img.example.org/thumbnails/ab/thumbnail_x.jpg"
        ));
        assert!(!is_sample_or_thumbnail_url(
            "https://img.example.org/images/ab/x.jpg?from=sample_page"
        ));
        assert!(!is_sample_or_thumbnail_url(""));
    }

    #[test]
    fn thumbs_subdomain_rewrites_to_img() {
        assert_eq!(
            fix_thumbs_subdomain("https://thumbs.booru.org/x//images/1/a.jpg"),
            "https://img.booru.org/x//images/1/a.jpg"
        );
        assert_eq!(
            fix_thumbs_subdomain("https://img.booru.org/a.jpg"),
            "https://img.booru.org/a.jpg"
        );
    }
}
