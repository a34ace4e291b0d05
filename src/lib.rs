pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod manifest;
pub mod output;
pub mod sync;
