use axum::http::{HeaderMap, Method, Uri};
use bytes::Bytes;
use interceptor::{Destination, InterceptedRequest, RequestMode};
use shared::{Error, Result};
use url::Url;

/// Headers that describe one hop, never forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Turns incoming HTTP requests into intercepted requests.
#[derive(Clone, Debug)]
pub struct RequestMapper {
    origin: Url,
}

impl RequestMapper {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Absolute-form URIs keep their own origin; origin-form ones belong to
    /// the application.
    pub fn resolve(&self, uri: &Uri) -> Result<Url> {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Url::parse(&uri.to_string())
                .map_err(|e| Error::InvalidInput(format!("bad request target {uri}: {e}")));
        }
        let target = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        self.origin
            .join(target)
            .map_err(|e| Error::InvalidInput(format!("bad request target {target}: {e}")))
    }

    pub fn map(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: Bytes) -> Result<InterceptedRequest> {
        let url = self.resolve(uri)?;
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let mode = match header("sec-fetch-mode") {
            Some(mode) => RequestMode::from_fetch_mode(mode),
            None if *method == Method::GET && accepts_html(header("accept")) => RequestMode::Navigate,
            None => RequestMode::NoCors,
        };
        let destination = match header("sec-fetch-dest") {
            Some(dest) => Destination::from_fetch_dest(dest),
            None if mode == RequestMode::Navigate => Destination::Document,
            None => guess_destination(&url),
        };

        let forwarded = headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(InterceptedRequest {
            url,
            method: method.as_str().to_string(),
            mode,
            destination,
            headers: forwarded,
            body,
        })
    }
}

fn accepts_html(accept: Option<&str>) -> bool {
    accept.is_some_and(|a| a.contains("text/html"))
}

/// Clients without fetch metadata (curl, older browsers) get a destination
/// from the path's extension.
fn guess_destination(url: &Url) -> Destination {
    let extension = url
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "js" | "mjs" => Destination::Script,
        "css" => Destination::Style,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" => Destination::Image,
        "mp3" | "m4a" | "ogg" | "wav" => Destination::Audio,
        "woff" | "woff2" | "ttf" | "otf" => Destination::Font,
        _ => Destination::Empty,
    }
}
