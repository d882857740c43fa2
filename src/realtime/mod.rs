//! Push channel: topic parsing, live state, MQTT and the in-process feed.

pub mod feed;
pub mod merge;
pub mod mqtt;
pub mod topic;

pub use feed::{EventHub, FeedEvent};
pub use merge::LiveState;
pub use mqtt::MqttBridge;
