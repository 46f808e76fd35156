//! REST route handlers.

pub mod health;
pub mod info;
