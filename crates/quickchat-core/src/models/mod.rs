//! Data models for the chat auth backend.
//!
//! - `AuthUser`: the signed-in user's profile
//! - `AuthMode`, `Credentials`: login/signup request bodies
//! - `ProfilePatch`: profile update request body

pub mod user;

pub use user::{AuthMode, AuthUser, Credentials, ProfilePatch};
