//! Registry V2 protocol: authentication and blob/manifest endpoints

mod auth;
mod client;

pub use auth::BearerChallenge;
pub use client::{Credentials, RegistryClient, normalize_endpoint};
