//! Request handling services.

pub mod github;
pub mod router;
