pub mod types;
pub mod errors;
#[cfg(feature = "server")]
pub mod middleware;
#[cfg(feature = "server")]
pub mod clients;

pub use types::*;
pub use errors::{AppError, ErrorCode, AppResult};
