pub mod errors;
pub mod id;

pub use errors::{ConfigError, PresenceError, PublishError, SubscribeError};
pub use id::{new_id, RecordId, ViewerId};

pub type Result<T> = std::result::Result<T, PresenceError>;
