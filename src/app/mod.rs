pub mod collection;
pub mod confirm;
pub mod dashboard;
pub mod data_io;
pub mod error;
pub mod gateway;
pub mod pagination;
pub mod panel;
pub mod runtime;
pub mod scheduler;
pub mod tabs;
pub mod templates;
pub mod tui;
pub mod types;
pub mod ui_utils;

pub use runtime::run;
