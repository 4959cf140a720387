pub mod api;
pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod feed;
pub mod read_state;
pub mod receipts;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{FeedSource, ParleyApi};
pub use cache::MessageCache;
pub use channel::{ChannelHandle, PendingChannel};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use feed::{FeedSession, OlderRequest, PageState};
pub use read_state::SeenWriter;
