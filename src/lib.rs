#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod bridge;
pub mod capture;
pub mod config;
pub mod document;
pub mod extract;
pub mod feed;
pub mod gate;
pub mod geometry;
pub mod logging;
pub mod mount;
pub mod sink;
pub mod sites;
pub mod storage;
pub mod version;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::App;
