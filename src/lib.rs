pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
