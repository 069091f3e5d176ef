//! Request interception in front of the media cache.
//!
//! Requests are classified by origin and content class and answered with a
//! per-class policy (network-first navigations, stale-while-revalidate
//! assets, cache-first images). The [`Interceptor`] also owns the
//! install/activate lifecycle that migrates versioned partitions, and the
//! page↔worker message channel used for push registration.

pub mod cache;
pub mod classify;
pub mod client;
pub mod messages;
pub mod notifications;
pub mod ports;
pub mod push;
pub mod request;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::ResponseCache;
pub use classify::{ContentClass, OriginClass, Policy, Scope};
pub use client::WorkerClient;
pub use messages::{PageMessage, SubscribeResult, WorkerMessage};
pub use notifications::Notification;
pub use ports::{FetchCacheMode, Network};
pub use push::{Permission, PushError, PushManager, PushSubscriber, PushSubscription, SubscriptionKeys};
pub use request::{Destination, InterceptedRequest, RequestMode, Response, ResponseKind};
pub use worker::{Decision, Interceptor, InterceptorConfig, LifecycleState, WorkerStatus};
