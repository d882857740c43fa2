//! Password hashing and bearer-token sessions.

pub mod password;
pub mod session;

pub use session::{Session, SessionManager};
