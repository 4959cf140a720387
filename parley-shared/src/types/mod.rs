pub mod api;
pub mod auth;
pub mod chat;
pub mod pagination;

pub use api::*;
pub use auth::*;
pub use chat::*;
pub use pagination::*;
