pub mod daily;
pub mod events;
pub mod health;
pub mod intercept;
pub mod media;
pub mod worker;

pub use daily::daily_pick;
pub use events::stream_events;
pub use health::health_check;
pub use intercept::intercept;
pub use media::{forget_asset, get_asset};
pub use worker::{post_message, push_received, subscription_changed, worker_status};
