//! Byte-level media fetching with referer and candidate-URL retry.
//!
//! Image CDNs behind these sites are picky in different ways: some demand
//! a Referer/Origin matching the owning site, some refuse exactly that,
//! and one only serves media over plain HTTP. The fetcher therefore
//! builds an ordered candidate list and tries each candidate twice, with
//! site headers and without, returning the first non-empty payload.
//! Nothing here is an error: exhausting all candidates means
//! "unavailable".

use reqwest::header;
use tracing::{debug, trace};
use url::Url;

use crate::booru::site::BooruSite;
use crate::booru::transport::HttpTransport;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";

#[derive(Clone)]
pub struct MediaFetchClient {
    transport: HttpTransport,
}

impl MediaFetchClient {
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// Fetch media bytes. `site_hint` names the owning site when the
    /// caller knows it, improving referer resolution for CDN hosts that
    /// do not reveal it.
    pub async fn fetch(&self, url: &str, site_hint: Option<BooruSite>) -> Option<Vec<u8>> {
        let url = url.trim();
        if url.is_empty() {
            return None;
        }

        for candidate in build_candidates(url, site_hint) {
            for with_referer in [true, false] {
                if let Some(bytes) = self.try_fetch(&candidate, site_hint, with_referer).await {
                    return Some(bytes);
                }
            }
        }

        debug!(url, "media unavailable after exhausting all candidates");
        None
    }

    async fn try_fetch(
        &self,
        url: &str,
        site_hint: Option<BooruSite>,
        with_referer: bool,
    ) -> Option<Vec<u8>> {
        let mut request = self
            .transport
            .client()
            .get(url)
            .header(header::ACCEPT, IMAGE_ACCEPT);

        if with_referer {
            if let Some(referer) = resolve_referer(url, site_hint) {
                let origin = format!("{}://{}", referer.scheme(), referer.host_str()?);
                request = request
                    .header(header::REFERER, referer.as_str())
                    .header(header::ORIGIN, origin);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                trace!(url, error = %err, "media request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes.to_vec()),
            _ => None,
        }
    }
}

/// Normalize and expand a media URL into the ordered candidate list.
pub(crate) fn build_candidates(url: &str, site_hint: Option<BooruSite>) -> Vec<String> {
    let normalized = if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    };

    let mut candidates = vec![normalized.clone()];

    let Ok(parsed) = Url::parse(&normalized) else {
        // Site-relative path: resolve against the hinted site and stop.
        if let Some(site) = site_hint {
            if let Ok(base) = Url::parse(site.base_url()) {
                if let Ok(joined) = base.join(&normalized) {
                    let joined = joined.to_string();
                    if !candidates.contains(&joined) {
                        candidates.push(joined);
                    }
                }
            }
        }
        return candidates;
    };

    // Scheme downgrade for hosts that only serve media over plain HTTP.
    if parsed.scheme() == "https" {
        if let Some(host) = parsed.host_str() {
            let needs_downgrade = BooruSite::ALL
                .iter()
                .filter(|site| site.requires_plain_http_media())
                .any(|site| host_matches(host, referer_needle(*site)));
            if needs_downgrade {
                let mut downgraded = parsed.clone();
                if downgraded.set_scheme("http").is_ok() {
                    candidates.push(downgraded.to_string());
                }
            }
        }
    }

    candidates
}

/// Referer for a media URL: the hinted site's base wins; otherwise the
/// media host is matched back against the known sites; otherwise the
/// media host itself.
pub(crate) fn resolve_referer(url: &str, site_hint: Option<BooruSite>) -> Option<Url> {
    if let Some(site) = site_hint {
        if let Ok(base) = Url::parse(&format!("{}/", site.base_url())) {
            return Some(base);
        }
    }

    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    for site in BooruSite::ALL {
        if host_matches(host, referer_needle(site)) {
            return Url::parse(&format!("{}/", site.base_url())).ok();
        }
    }

    Url::parse(&format!("{}://{}/", parsed.scheme(), host)).ok()
}

/// The host fragment that identifies a site's media CDN. Danbooru media
/// lives on `donmai.us` subdomains rather than the site host.
fn referer_needle(site: BooruSite) -> &'static str {
    match site {
        BooruSite::Safebooru => "safebooru.org",
        BooruSite::E621 => "e621.net",
        BooruSite::Danbooru => "donmai.us",
        BooruSite::Gelbooru => "gelbooru.com",
        BooruSite::XBooru => "xbooru.com",
        BooruSite::TabBooru => "tab.booru.org",
        BooruSite::AllGirlBooru => "allgirl.booru.org",
        BooruSite::TheCollectionBooru => "the-collection.booru.org",
    }
}

fn host_matches(host: &str, needle: &str) -> bool {
    let host = host.to_lowercase();
    host == needle || host.ends_with(&format!(".{needle}")) || host.contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_relative_urls_are_normalized() {
        let candidates = build_candidates("//img.example.org/a.jpg", None);
        assert_eq!(candidates, vec!["https://img.example.org/a.jpg"]);
    }

    #[test]
    fn plain_http_hosts_get_a_downgraded_candidate() {
        let candidates = build_candidates("https://img.xbooru.com/images/1/a.jpg", None);
        assert_eq!(
            candidates,
            vec![
                "https://img.xbooru.com/images/1/a.jpg",
                "http://img.xbooru.com/images/1/a.jpg",
            ]
        );
    }

    #[test]
    fn other_hosts_get_a_single_candidate() {
        let candidates = build_candidates("https://img3.gelbooru.com/images/1/a.jpg", None);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn relative_paths_resolve_against_the_hinted_site() {
        let candidates = build_candidates("/images/1/a.jpg", Some(BooruSite::Safebooru));
        assert!(candidates.contains(&"https://safebooru.org/images/1/a.jpg".to_string()));
    }

    #[test]
    fn referer_prefers_the_site_hint() {
        let referer =
            resolve_referer("https://cdn.example.net/a.jpg", Some(BooruSite::Gelbooru)).unwrap();
        assert_eq!(referer.as_str(), "https://gelbooru.com/");
    }

    #[test]
    fn referer_falls_back_to_host_matching() {
        let referer = resolve_referer("https://static1.e621.net/data/a.jpg", None).unwrap();
        assert_eq!(referer.as_str(), "https://e621.net/");

        let referer = resolve_referer("https://cdn.donmai.us/original/a.jpg", None).unwrap();
        assert_eq!(referer.as_str(), "https://danbooru.donmai.us/");
    }

    #[test]
    fn unknown_hosts_refer_to_themselves() {
        let referer = resolve_referer("https://mirror.example.org/a.jpg", None).unwrap();
        assert_eq!(referer.as_str(), "https://mirror.example.org/");
    }
}
