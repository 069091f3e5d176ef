use crate::request::{Destination, InterceptedRequest, RequestMode};
use url::{Origin, Url};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OriginClass {
    SameOrigin,
    /// Allow-listed third-party asset host.
    Trusted,
    Foreign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentClass {
    Navigation,
    /// Script, style or worker.
    Asset,
    Image,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    NetworkFirst,
    StaleWhileRevalidate,
    CacheFirst,
    Passthrough,
}

/// Which requests the interceptor owns and how it treats them.
#[derive(Clone, Debug)]
pub struct Scope {
    origin: Origin,
    trusted_hosts: Vec<String>,
}

impl Scope {
    pub fn new(origin: &Url, trusted_hosts: &[String]) -> Self {
        Self {
            origin: origin.origin(),
            trusted_hosts: trusted_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    pub fn origin_class(&self, url: &Url) -> OriginClass {
        if url.origin() == self.origin {
            return OriginClass::SameOrigin;
        }
        let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
            return OriginClass::Foreign;
        };
        let trusted = self
            .trusted_hosts
            .iter()
            .any(|t| host == *t || host.ends_with(&format!(".{t}")));
        if trusted {
            OriginClass::Trusted
        } else {
            OriginClass::Foreign
        }
    }

    pub fn content_class(request: &InterceptedRequest) -> ContentClass {
        if request.mode == RequestMode::Navigate {
            return ContentClass::Navigation;
        }
        match request.destination {
            Destination::Script | Destination::Style | Destination::Worker => ContentClass::Asset,
            Destination::Image => ContentClass::Image,
            _ => ContentClass::Other,
        }
    }

    pub fn policy(&self, request: &InterceptedRequest) -> Policy {
        let origin = self.origin_class(&request.url);
        let class = Self::content_class(request);
        // Network-first never writes the cache, so it takes any method.
        if (class, origin) == (ContentClass::Navigation, OriginClass::SameOrigin) {
            return Policy::NetworkFirst;
        }
        // The caching policies only store GETs.
        if !request.is_get() {
            return Policy::Passthrough;
        }
        match (class, origin) {
            (ContentClass::Asset, OriginClass::SameOrigin) => Policy::StaleWhileRevalidate,
            (ContentClass::Image, OriginClass::SameOrigin | OriginClass::Trusted) => {
                Policy::CacheFirst
            }
            _ => Policy::Passthrough,
        }
    }
}
