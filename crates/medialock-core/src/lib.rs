pub mod config;
pub mod error;
pub mod types;

pub use config::MediaLockConfig;
pub use error::{MediaError, MediaResult};
pub use types::MediaType;
