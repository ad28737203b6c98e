pub mod auth;
pub mod cache;
pub mod compactor;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod time;
pub mod wal;
