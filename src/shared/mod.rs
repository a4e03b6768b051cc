pub mod bootstrap;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod schema;
pub mod state;
pub mod utils;
