#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod data;
pub mod events;
pub mod executor;
pub mod logging;
pub mod model;
pub mod post_list;
pub mod post_utils;
pub mod post_view;
pub mod sidebar;
pub mod store;
pub mod suggestion;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
