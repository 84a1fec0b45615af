//! Minimal client for the VRChat web API.
//!
//! The client covers exactly what a presence exporter needs: logging in (including the
//! two-factor handshake) and listing the online friends of the logged-in user.
//!
//! # Examples
//!
//! ```no_run
//! use vrchat_api::{Client, Credentials, DEFAULT_API_URL};
//!
//! # async fn test() -> Result<(), vrchat_api::Error> {
//! let credentials = Credentials::new("user", "password").with_totp("123456");
//! let client = Client::new(DEFAULT_API_URL.parse().unwrap())?;
//! let session = client.authenticate(&credentials).await?;
//! for friend in session.friends().await? {
//!     println!("{} is {} at {}", friend.display_name, friend.status, friend.location);
//! }
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    client::{Client, Session, DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT},
    error::Error,
    types::{Credentials, CurrentUser, Friend, UserStatus},
};

mod client;
mod error;
mod types;
