pub mod matched;
pub mod resilient;
pub mod sink;

pub use matched::MatchedGmr;
pub use resilient::ResilientPublisher;
pub use sink::{LogSink, PublishSink, WebhookSink};
