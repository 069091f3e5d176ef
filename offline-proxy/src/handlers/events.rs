use crate::state::AppState;
use axum::{
    extract::State,
    http::Uri,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use nosotros::CacheItemEvent;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventFilter {
    partition: Vec<String>,
    event_type: Vec<String>,
}

impl EventFilter {
    /// Parse query string with CSV support for multiple values
    /// Examples: ?partition=photo-cache-v1/orig&type=added,evicted
    fn from_query_string(query: &str) -> Self {
        let mut filter = Self::default();

        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                let values = value.split(',').map(|s| s.trim().to_string());
                match key {
                    "partition" => filter.partition.extend(values),
                    "type" => filter.event_type.extend(values),
                    _ => {}
                }
            }
        }

        filter
    }

    /// A filter entry names either a whole partition (`photo-cache-v1/orig`)
    /// or every partition of one cache (`photo-cache-v1`).
    fn matches_partition(&self, partition: &str) -> bool {
        self.partition.is_empty()
            || self.partition.iter().any(|p| {
                partition == p
                    || partition
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }
}

/// SSE endpoint that streams cache item events to clients
pub async fn stream_events(
    State(state): State<AppState>,
    uri: Uri,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = uri
        .query()
        .map(EventFilter::from_query_string)
        .unwrap_or_default();

    tracing::info!(
        "New SSE client connected. Filters: partition={:?}, type={:?}",
        filter.partition,
        filter.event_type
    );

    let rx = state.event_channel.subscribe();
    let stream = BroadcastStream::new(rx);

    let filtered_stream = stream.filter_map(move |result| {
        let filter = filter.clone();
        async move {
            match result {
                Ok(event) => {
                    let send = should_send(&event, &filter);
                    tracing::debug!(
                        "Received event: partition={}, id={}, should_send={}",
                        event.partition(),
                        event.id(),
                        send
                    );
                    send.then(|| Ok(to_sse_event(event)))
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => Some(Ok(Event::default()
                    .event("error")
                    .data(format!("Lagged by {} events", n)))),
            }
        }
    });

    Sse::new(filtered_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn event_type(event: &CacheItemEvent) -> &'static str {
    match event {
        CacheItemEvent::Added(_) => "added",
        CacheItemEvent::Updated(_) => "updated",
        CacheItemEvent::Deleted(_) => "deleted",
        CacheItemEvent::Evicted(_) => "evicted",
    }
}

/// Check if an event should be sent based on the filter criteria
fn should_send(event: &CacheItemEvent, filter: &EventFilter) -> bool {
    if !filter.matches_partition(event.partition()) {
        return false;
    }
    filter.event_type.is_empty() || filter.event_type.iter().any(|t| t == event_type(event))
}

fn to_sse_event(event: CacheItemEvent) -> Event {
    let name = format!("item.{}", event_type(&event));
    let built = match event {
        CacheItemEvent::Added(e) | CacheItemEvent::Updated(e) => Event::default().event(name).json_data(e),
        CacheItemEvent::Deleted(e) | CacheItemEvent::Evicted(e) => Event::default().event(name).json_data(e),
    };
    built.unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
