use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheItemEvent {
    Added(ItemStoredEvent),
    Updated(ItemStoredEvent),
    Deleted(ItemRemovedEvent),
    Evicted(ItemRemovedEvent),
}

impl CacheItemEvent {
    pub fn partition(&self) -> &str {
        match self {
            CacheItemEvent::Added(e) | CacheItemEvent::Updated(e) => &e.partition,
            CacheItemEvent::Deleted(e) | CacheItemEvent::Evicted(e) => &e.partition,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            CacheItemEvent::Added(e) | CacheItemEvent::Updated(e) => &e.id,
            CacheItemEvent::Deleted(e) | CacheItemEvent::Evicted(e) => &e.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStoredEvent {
    pub partition: String,
    pub id: String,
    pub size: usize,
    pub mime_type: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRemovedEvent {
    pub partition: String,
    pub id: String,
    pub timestamp: i64,
}
