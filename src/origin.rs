use std::fmt;

use url::Url;

/// Serialise the origin (`scheme://host[:port]`) of a URL.
///
/// Non-special schemes such as `mock://` are treated like `https://` here:
/// `Url::origin` would report them as opaque, which makes them unusable as a
/// declared domain.
pub fn origin_of(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", url.scheme(), host),
        (None, _) => "null".to_string(),
    }
}

/// The origin a component's child window is expected to live on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Domain {
    /// No domain declared: messages go out with target origin `*` and any
    /// sender origin is accepted (the window check still applies).
    Any,
    Exact(String),
}

impl Domain {
    /// Parse a declared domain. `*` means [`Domain::Any`]; anything else must
    /// be an absolute URL and is reduced to its origin.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self::Any);
        }
        let url = Url::parse(raw)?;
        if url.host_str().is_none() {
            return Err(url::ParseError::EmptyHost);
        }
        Ok(Self::Exact(origin_of(&url)))
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == origin,
        }
    }

    /// Target origin for outbound messages.
    pub fn target_origin(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Exact(origin) => origin,
        }
    }

    /// Base URL used to resolve relative child URLs.
    pub fn base_url(&self) -> Option<Url> {
        match self {
            Self::Any => None,
            Self::Exact(origin) => Url::parse(origin).ok(),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target_origin())
    }
}
