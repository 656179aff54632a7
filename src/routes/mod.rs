pub mod api;
mod error;
mod extract;
pub mod health;

pub use api::{api_routes, endpoint_not_found, method_not_allowed};
pub use error::{ApiError, INTERNAL_ERROR_MESSAGE};
