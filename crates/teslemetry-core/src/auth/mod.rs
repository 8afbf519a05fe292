//! OAuth2 authorization-code-with-PKCE credentials.
//!
//! [`TokenManager`] is the only writer of the token record. Persistence is
//! delegated to a [`TokenStore`]; change notifications go out as
//! [`TokenEvent`]s.

pub mod manager;
pub mod pkce;
pub mod store;
pub mod token;

pub use manager::{TokenEvent, TokenManager};
pub use pkce::PkceChallenge;
pub use store::{MemoryTokenStore, TOKEN_SETTINGS_KEY, TokenStore};
pub use token::Token;
