pub mod config;
pub mod daemon;
pub mod error;
pub mod fetch;
pub mod lock;
pub mod output;
pub mod parser;
pub mod query;
