//! API route modules.

pub mod captions;
pub mod detector;
pub mod room;
pub mod users;
