use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::child::{INSTANCE_PARAM, PARENT_PARAM};
use crate::error::BridgeError;
use crate::origin::{origin_of, Domain};
use crate::props::{PropDefinition, PropType, ON_CLOSE, ON_ERROR, ON_RENDERED};
use crate::window::{Context, Dimensions};

pub type UrlFuture = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;

/// Computes the child URL from the instance's prop snapshot.
#[derive(Clone)]
pub struct UrlResolver(Arc<dyn Fn(&Map<String, Value>) -> UrlFuture + Send + Sync>);

impl UrlResolver {
    /// An asynchronous resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> UrlFuture + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A resolver that answers immediately.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        Self::new(move |props| {
            let url = f(props);
            Box::pin(async move { Ok(url) })
        })
    }

    pub async fn resolve(&self, props: &Map<String, Value>) -> Result<String, String> {
        (self.0)(props).await
    }
}

impl fmt::Debug for UrlResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UrlResolver(..)")
    }
}

/// A component definition as written by the provider, before validation.
///
/// Deserializable from TOML/JSON for static URLs; resolvers are attached in
/// code with [`ComponentConfig::url_fn`] or [`ComponentConfig::url_resolver`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip)]
    pub resolver: Option<UrlResolver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub context: Context,
    #[serde(default = "default_popup_proxy")]
    pub popup_proxy: bool,
    #[serde(default)]
    pub props: BTreeMap<String, PropDefinition>,
}

fn default_popup_proxy() -> bool {
    true
}

impl ComponentConfig {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            url: None,
            resolver: None,
            domain: None,
            dimensions: Dimensions::default(),
            context: Context::default(),
            popup_proxy: default_popup_proxy(),
            props: BTreeMap::new(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn url_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> String + Send + Sync + 'static,
    {
        self.resolver = Some(UrlResolver::from_fn(f));
        self
    }

    pub fn url_resolver(mut self, resolver: UrlResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Dimensions::new(width, height);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn popup_proxy(mut self, enabled: bool) -> Self {
        self.popup_proxy = enabled;
        self
    }

    pub fn prop(mut self, name: impl Into<String>, definition: PropDefinition) -> Self {
        self.props.insert(name.into(), definition);
        self
    }
}

#[derive(Clone, Debug)]
pub enum UrlSource {
    Static(String),
    Resolver(UrlResolver),
}

/// A validated, immutable component definition.
#[derive(Clone, Debug)]
pub struct ComponentSpec {
    pub tag: String,
    pub url: UrlSource,
    pub domain: Domain,
    pub dimensions: Dimensions,
    pub context: Context,
    pub popup_proxy: bool,
    pub props: BTreeMap<String, PropDefinition>,
}

impl ComponentSpec {
    /// Validate and normalise a raw config.
    ///
    /// The domain defaults to the origin of an absolute static URL. With no
    /// domain and no way to derive one the spec runs with [`Domain::Any`].
    pub fn from_config(config: ComponentConfig) -> Result<Self, BridgeError> {
        let tag = config.tag;
        if tag.is_empty()
            || !tag
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(BridgeError::spec(
                &tag,
                "tag must be non-empty lowercase letters, digits, '-' or '_'",
            ));
        }

        let url = match (config.url, config.resolver) {
            (Some(_), Some(_)) => {
                return Err(BridgeError::spec(&tag, "set either `url` or a resolver, not both"))
            }
            (None, None) => return Err(BridgeError::spec(&tag, "missing `url`")),
            (Some(url), None) => UrlSource::Static(url),
            (None, Some(resolver)) => UrlSource::Resolver(resolver),
        };

        let declared = match config.domain.as_deref() {
            Some(raw) => Some(
                Domain::parse(raw)
                    .map_err(|err| BridgeError::spec(&tag, format!("invalid domain `{raw}`: {err}")))?,
            ),
            None => None,
        };

        let domain = match &url {
            UrlSource::Static(raw) => match Url::parse(raw) {
                Ok(absolute) => {
                    let origin = origin_of(&absolute);
                    match declared {
                        Some(Domain::Exact(expected)) if expected != origin => {
                            return Err(BridgeError::spec(
                                &tag,
                                format!("url origin {origin} does not match domain {expected}"),
                            ));
                        }
                        Some(domain) => domain,
                        None => Domain::Exact(origin),
                    }
                }
                Err(url::ParseError::RelativeUrlWithoutBase) => match declared {
                    Some(domain @ Domain::Exact(_)) => domain,
                    _ => {
                        return Err(BridgeError::spec(
                            &tag,
                            "a relative `url` needs a concrete `domain`",
                        ))
                    }
                },
                Err(err) => {
                    return Err(BridgeError::spec(&tag, format!("invalid url `{raw}`: {err}")))
                }
            },
            UrlSource::Resolver(_) => declared.unwrap_or(Domain::Any),
        };
        if domain == Domain::Any {
            warn!(%tag, "no domain declared; messages are sent with target origin `*`");
        }

        if config.dimensions.width == 0 || config.dimensions.height == 0 {
            return Err(BridgeError::spec(&tag, "dimensions must be non-zero"));
        }

        let mut props = config.props;
        for (name, definition) in &props {
            if name == INSTANCE_PARAM || name == PARENT_PARAM {
                return Err(BridgeError::spec(
                    &tag,
                    format!("prop `{name}` is reserved for the child handshake"),
                ));
            }
            if let Some(default) = &definition.default {
                if definition.prop_type == PropType::Function {
                    return Err(BridgeError::spec(
                        &tag,
                        format!("prop `{name}`: function props cannot have a default"),
                    ));
                }
                if !definition.prop_type.accepts_json(default) {
                    return Err(BridgeError::spec(
                        &tag,
                        format!("prop `{name}`: default is not a {}", definition.prop_type),
                    ));
                }
            }
            if definition.query_param && !definition.prop_type.is_scalar() {
                return Err(BridgeError::spec(
                    &tag,
                    format!("prop `{name}`: only scalar props can be query params"),
                ));
            }
        }
        for builtin in [ON_RENDERED, ON_CLOSE, ON_ERROR] {
            match props.get(builtin) {
                Some(definition) if definition.prop_type != PropType::Function => {
                    return Err(BridgeError::spec(
                        &tag,
                        format!("prop `{builtin}` is reserved for a function"),
                    ));
                }
                Some(_) => {}
                None => {
                    props.insert(builtin.to_string(), PropDefinition::new(PropType::Function));
                }
            }
        }

        Ok(Self {
            tag,
            url,
            domain,
            dimensions: config.dimensions,
            context: config.context,
            popup_proxy: config.popup_proxy,
            props,
        })
    }

    /// Resolve the child URL for one instance. Relative URLs are joined onto
    /// the declared domain; the result must stay on that domain.
    pub(crate) async fn resolve_url(&self, values: &Map<String, Value>) -> Result<Url, BridgeError> {
        let raw = match &self.url {
            UrlSource::Static(raw) => raw.clone(),
            UrlSource::Resolver(resolver) => resolver
                .resolve(values)
                .await
                .map_err(|reason| BridgeError::Url { reason })?,
        };

        let url = match Url::parse(&raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.domain.base_url().ok_or_else(|| BridgeError::Url {
                    reason: format!("relative url `{raw}` without a declared domain"),
                })?;
                base.join(&raw).map_err(|err| BridgeError::Url {
                    reason: err.to_string(),
                })?
            }
            Err(err) => {
                return Err(BridgeError::Url {
                    reason: format!("`{raw}`: {err}"),
                })
            }
        };

        if !self.domain.matches(&origin_of(&url)) {
            return Err(BridgeError::Url {
                reason: format!("`{url}` is outside domain {}", self.domain),
            });
        }
        Ok(url)
    }
}
