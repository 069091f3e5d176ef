use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was issued, mirroring `Sec-Fetch-Mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    Cors,
    NoCors,
}

impl RequestMode {
    pub fn from_fetch_mode(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "navigate" => RequestMode::Navigate,
            "same-origin" => RequestMode::SameOrigin,
            "cors" => RequestMode::Cors,
            _ => RequestMode::NoCors,
        }
    }
}

/// What the response will be used for, mirroring `Sec-Fetch-Dest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    Document,
    Script,
    Style,
    Worker,
    Image,
    Audio,
    Font,
    Manifest,
    Empty,
    Other,
}

impl Destination {
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "script" => Destination::Script,
            "style" => Destination::Style,
            "worker" | "sharedworker" | "serviceworker" => Destination::Worker,
            "image" => Destination::Image,
            "audio" => Destination::Audio,
            "font" => Destination::Font,
            "manifest" => Destination::Manifest,
            "" | "empty" => Destination::Empty,
            _ => Destination::Other,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InterceptedRequest {
    pub url: Url,
    pub method: String,
    pub mode: RequestMode,
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl InterceptedRequest {
    pub fn get(url: Url, destination: Destination) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            mode: RequestMode::NoCors,
            destination,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url, Destination::Document)
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Cache key: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Basic,
    Cors,
    /// Cross-origin response whose status and body cannot be inspected.
    Opaque,
    /// A network error; never a real response from anywhere.
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    pub fn ok(body: impl Into<Bytes>, content_type: &str) -> Self {
        Self::new(200, body).with_header("content-type", content_type)
    }

    /// The generic network-error response.
    pub fn error() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            kind: ResponseKind::Error,
        }
    }

    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// 2xx and inspectable.
    pub fn is_ok(&self) -> bool {
        !matches!(self.kind, ResponseKind::Error | ResponseKind::Opaque)
            && (200..300).contains(&self.status)
    }
}
