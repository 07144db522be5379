pub mod commerce;
pub mod config;
pub mod error;

pub use commerce::{commerce_router, commerce_routes};
pub use error::{CommerceError, CommerceResult, UserAction};
