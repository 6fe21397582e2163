//! Site descriptors for every supported backend.
//!
//! Each backend is a variant of [`BooruSite`] with static metadata: base
//! URL, protocol family, auth capabilities, and the quirk flags the
//! adapters and the media fetcher consult (browser-like User-Agent
//! requirement, HTML fallback capability, thumbs-subdomain media fix,
//! plain-HTTP media requirement).

use serde::{Deserialize, Serialize};

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BooruSite {
    Safebooru,
    E621,
    Danbooru,
    Gelbooru,
    XBooru,
    TabBooru,
    AllGirlBooru,
    TheCollectionBooru,
}

/// Protocol family a site speaks, used to pick the adapter at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// JSON REST API, further split by response shape.
    JsonRest(JsonFamily),
    /// Gelbooru-style XML attribute API (`index.php?page=dapi`).
    XmlDapi,
    /// No structured API; list/post pages are scraped directly.
    HtmlOnly,
}

/// The two JSON response shapes we understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonFamily {
    /// `{"posts": [...]}` wrapper with nested `file`/`sample`/`preview`
    /// objects and categorized tag arrays.
    E621,
    /// Root array with flat fields and `tag_string_*` properties.
    Danbooru,
}

impl BooruSite {
    /// Every supported site, in presentation order.
    pub const ALL: [BooruSite; 8] = [
        BooruSite::Safebooru,
        BooruSite::E621,
        BooruSite::Danbooru,
        BooruSite::Gelbooru,
        BooruSite::XBooru,
        BooruSite::TabBooru,
        BooruSite::AllGirlBooru,
        BooruSite::TheCollectionBooru,
    ];

    /// Lowercase site key. This is the exact left-hand side of the
    /// composite post key `"{site}::{id}"` and must stay stable: favorite
    /// matching and dedup depend on it.
    pub fn key(self) -> &'static str {
        match self {
            BooruSite::Safebooru => "safebooru",
            BooruSite::E621 => "e621",
            BooruSite::Danbooru => "danbooru",
            BooruSite::Gelbooru => "gelbooru",
            BooruSite::XBooru => "xbooru",
            BooruSite::TabBooru => "tab.booru.org",
            BooruSite::AllGirlBooru => "allgirl.booru.org",
            BooruSite::TheCollectionBooru => "the-collection.booru.org",
        }
    }

    /// Human-facing site name, as shown in result summaries.
    pub fn display_name(self) -> &'static str {
        match self {
            BooruSite::Safebooru => "Safebooru",
            BooruSite::E621 => "e621",
            BooruSite::Danbooru => "Danbooru",
            BooruSite::Gelbooru => "Gelbooru",
            BooruSite::XBooru => "XBooru",
            BooruSite::TabBooru => "tab.booru.org",
            BooruSite::AllGirlBooru => "allgirl.booru.org",
            BooruSite::TheCollectionBooru => "the-collection.booru.org",
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(self) -> &'static str {
        match self {
            BooruSite::Safebooru => "https://safebooru.org",
            BooruSite::E621 => "https://e621.net",
            BooruSite::Danbooru => "https://danbooru.donmai.us",
            BooruSite::Gelbooru => "https://gelbooru.com",
            BooruSite::XBooru => "https://xbooru.com",
            BooruSite::TabBooru => "https://tab.booru.org",
            BooruSite::AllGirlBooru => "https://allgirl.booru.org",
            BooruSite::TheCollectionBooru => "https://the-collection.booru.org",
        }
    }

    pub fn protocol(self) -> ProtocolKind {
        match self {
            BooruSite::E621 => ProtocolKind::JsonRest(JsonFamily::E621),
            BooruSite::Danbooru => ProtocolKind::JsonRest(JsonFamily::Danbooru),
            _ => ProtocolKind::XmlDapi,
        }
    }

    /// Whether the DAPI endpoint accepts `user_id`/`api_key` parameters.
    pub fn supports_api_key_auth(self) -> bool {
        matches!(self, BooruSite::Gelbooru)
    }

    /// Sites behind anti-bot filtering that reject the default client
    /// User-Agent; requests to them carry a browser-like one instead.
    pub fn requires_browser_user_agent(self) -> bool {
        matches!(
            self,
            BooruSite::TabBooru | BooruSite::AllGirlBooru | BooruSite::TheCollectionBooru
        )
    }

    /// Sites whose structured API sometimes silently blocks or errors and
    /// for which the HTML listing/post pages are a usable fallback.
    pub fn html_fallback_capable(self) -> bool {
        matches!(
            self,
            BooruSite::Gelbooru
                | BooruSite::TabBooru
                | BooruSite::AllGirlBooru
                | BooruSite::TheCollectionBooru
        )
    }

    /// Whether the rating attribute the site reports is trustworthy enough
    /// to filter on. Safebooru hosts only curated-safe content and reports
    /// rating tokens inconsistently, so the rating policy skips it.
    pub fn trusts_rating_metadata(self) -> bool {
        !matches!(self, BooruSite::Safebooru)
    }

    /// booru.org project sites serve media records pointing at the
    /// `thumbs.` subdomain even for originals; the real files live under
    /// `img.`.
    pub fn uses_thumbs_subdomain_fix(self) -> bool {
        matches!(
            self,
            BooruSite::TabBooru | BooruSite::AllGirlBooru | BooruSite::TheCollectionBooru
        )
    }

    /// Sites whose media hosts refuse HTTPS; the fetcher adds a
    /// scheme-downgraded candidate URL for them.
    pub fn requires_plain_http_media(self) -> bool {
        matches!(self, BooruSite::XBooru)
    }

    /// Parse a site key back into a variant. Accepts the historical
    /// aliases that appear in persisted favorite keys.
    pub fn from_key(key: &str) -> Option<BooruSite> {
        match key.trim().to_lowercase().as_str() {
            "safebooru" => Some(BooruSite::Safebooru),
            "e621" => Some(BooruSite::E621),
            "danbooru" => Some(BooruSite::Danbooru),
            "gelbooru" => Some(BooruSite::Gelbooru),
            "xbooru" => Some(BooruSite::XBooru),
            "tabbooru" | "tab.booru.org" => Some(BooruSite::TabBooru),
            "allgirlbooru" | "allgirl.booru.org" => Some(BooruSite::AllGirlBooru),
            "thecollectionbooru" | "the-collection.booru.org" => {
                Some(BooruSite::TheCollectionBooru)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for BooruSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Optional per-site login. Absence is valid everywhere and degrades to
/// anonymous access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    /// API key or password, depending on the site.
    pub secret: String,
}

impl Credentials {
    /// Both halves must be non-blank for the pair to be attached to a
    /// request; a half-filled pair is treated as anonymous.
    pub fn is_usable(&self) -> bool {
        !self.username.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

/// Read-only credentials lookup. How credentials are stored is the
/// settings collaborator's business.
pub trait CredentialsProvider: Send + Sync {
    fn credentials_for(&self, site: BooruSite) -> Option<Credentials>;
}

/// Provider with no credentials for any site.
pub struct AnonymousCredentials;

impl CredentialsProvider for AnonymousCredentials {
    fn credentials_for(&self, _site: BooruSite) -> Option<Credentials> {
        None
    }
}
