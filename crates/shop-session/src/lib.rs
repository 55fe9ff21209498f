//! Session state for the shop console
//!
//! Owns the caller's access and renewal credentials and the wire types the
//! authentication endpoints speak. This crate performs no HTTP itself; the
//! request pipeline in `shop-client` reads the store on every call and the
//! renewal coordinator and login flow are the only writers.
//!
//! Session lifecycle:
//! 1. Startup seeds the store from the session file (`SessionStore::load`)
//! 2. Login stores a fresh pair via `SessionStore::set`
//! 3. Renewal replaces the pair via `SessionStore::set`
//! 4. Logout or a rejected renewal wipes it via `SessionStore::clear`
//!
//! Every mutation writes through to disk.

pub mod endpoints;
pub mod error;
pub mod session;
pub mod store;
pub mod wire;

pub use error::{Error, Result};
pub use session::Session;
pub use store::SessionStore;
pub use wire::{AuthResponse, JwtResponse, LoginRequest, RenewalRequest, RenewalResponse};
