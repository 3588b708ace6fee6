pub mod auth;
pub mod error;
pub mod middleware;
pub mod polls;
pub mod routes;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
