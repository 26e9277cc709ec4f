pub mod api;
pub mod app;
pub mod captions;
pub mod cli;
pub mod config;
pub mod detector;
pub mod directory;
pub mod global;
pub mod model;
pub mod room;
pub mod session;
pub mod speech;
pub mod store;
pub mod sync;
