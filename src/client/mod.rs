//! Caller-facing API: connection strings and the connection pool

mod connection_string;
mod pool;

pub use pool::Pool;
