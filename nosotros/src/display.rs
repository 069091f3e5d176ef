use crate::domain::Blob;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

type Live = Arc<RwLock<HashMap<String, Blob>>>;

/// Blobs currently shown somewhere, addressable by an opaque `blob:` URL.
#[derive(Clone, Default)]
pub struct DisplayRegistry {
    live: Live,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `blob` for display. The registration lives as long as the handle.
    pub fn acquire(&self, blob: Blob) -> DisplayHandle {
        let url = format!("blob:nosotros/{}", Uuid::new_v4());
        self.live.write().insert(url.clone(), blob);
        DisplayHandle {
            url,
            live: self.live.clone(),
        }
    }

    pub fn resolve(&self, url: &str) -> Option<Blob> {
        self.live.read().get(url).cloned()
    }

    /// Number of registrations not yet released.
    pub fn live(&self) -> usize {
        self.live.read().len()
    }
}

#[derive(Debug)]
pub struct DisplayHandle {
    url: String,
    live: Live,
}

impl DisplayHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.live.write().remove(&self.url);
    }
}
