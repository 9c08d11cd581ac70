//! Query parameters and results

pub mod literal;
pub mod result;

pub use literal::{format_query, quote_literal, SqlValue};
pub use result::{ActiveQuery, QueryResult, Row};
