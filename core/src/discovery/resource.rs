//! The HAL discovery document.

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::error::{DiscoveryError, TemplateError};
use crate::template::UriTemplate;

/// One `_links` entry: a literal URL or a URI template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalLink {
    template: UriTemplate,
}

impl HalLink {
    pub fn parse(href: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            template: UriTemplate::parse(href)?,
        })
    }

    pub fn href(&self) -> &str {
        self.template.as_str()
    }

    pub fn is_templated(&self) -> bool {
        self.template.is_templated()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.template.variable_names()
    }

    /// Expands the link and resolves the result against `base`. Absolute
    /// links ignore the base.
    pub fn url(&self, variables: &Map<String, Value>, base: &Url) -> Option<Url> {
        base.join(&self.template.expand(variables)).ok()
    }
}

/// A parsed discovery document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HalResource {
    homepage: Option<Url>,
    links: BTreeMap<String, HalLink>,
}

impl HalResource {
    pub fn new(homepage: Option<Url>) -> Self {
        Self {
            homepage,
            links: BTreeMap::new(),
        }
    }

    /// Parses a HAL document. Links may be plain strings (simplified form),
    /// objects with an `href`, or arrays of such objects, in which case the
    /// first entry wins. Entries that cannot be read are skipped.
    ///
    /// The document's own `homepage` takes precedence over `base`.
    pub fn from_json(data: &[u8], base: Option<&Url>) -> Result<Self, DiscoveryError> {
        let document: HalDocument = serde_json::from_slice(data).map_err(|_| DiscoveryError::ParsingFailed)?;

        let homepage = document
            .homepage
            .as_deref()
            .and_then(|homepage| Url::parse(homepage).ok())
            .or_else(|| base.cloned());
        let mut resource = Self::new(homepage);

        for (name, repr) in document.links {
            let Some(href) = repr.href() else {
                warn!(relation = %name, "skipping link without href");
                continue;
            };
            match HalLink::parse(href) {
                Ok(link) => resource.insert_link(name, link),
                Err(err) => warn!(relation = %name, error = %err, "skipping link with invalid template"),
            }
        }
        Ok(resource)
    }

    /// Serializes to the simplified form `{"homepage": .., "_links": {name: href}}`.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let document = HalDocument {
            homepage: self.homepage.as_ref().map(Url::to_string),
            links: self
                .links
                .iter()
                .map(|(name, link)| (name.clone(), LinkRepr::Href(link.href().to_string())))
                .collect(),
        };
        serde_json::to_vec_pretty(&document)
    }

    pub fn homepage(&self) -> Option<&Url> {
        self.homepage.as_ref()
    }

    pub fn link(&self, name: &str) -> Option<&HalLink> {
        self.links.get(name)
    }

    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn insert_link(&mut self, name: impl Into<String>, link: HalLink) {
        self.links.insert(name.into(), link);
    }
}

/// Wire shape of a discovery document, and of the persisted snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct HalDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    homepage: Option<String>,
    #[serde(rename = "_links", default)]
    links: BTreeMap<String, LinkRepr>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LinkRepr {
    Href(String),
    List(Vec<LinkRepr>),
    Object {
        #[serde(default)]
        href: Option<String>,
    },
    #[serde(skip_serializing)]
    Unreadable(IgnoredAny),
}

impl LinkRepr {
    fn href(&self) -> Option<&str> {
        match self {
            LinkRepr::Href(href) => Some(href),
            LinkRepr::Object { href } => href.as_deref(),
            LinkRepr::List(links) => links.first().and_then(LinkRepr::href),
            LinkRepr::Unreadable(_) => None,
        }
    }
}
