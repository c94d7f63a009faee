pub mod config;
pub mod error;
pub mod types;

pub use config::FeedcronConfig;
pub use error::{FeedcronError, Result};
pub use types::{Frequency, TenantKey, TimeOfDay};
