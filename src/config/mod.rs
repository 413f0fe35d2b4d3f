mod loader;
mod types;

pub use loader::{CONFIG_FILE, load};
pub use types::{Config, SUPPRESS_REMOVE_ERRORS_ENV};
