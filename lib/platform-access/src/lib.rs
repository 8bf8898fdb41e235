//! Request authentication for beyond-ops.
//!
//! Callers are identified by the `beyond_ai_session` cookie set by the
//! sign-in flow. This crate decodes it into a [`SessionUser`]; it does not
//! issue or verify signatures.
//!
//! # Example
//!
//! ```
//! use beyond_ops_platform_access::{SessionUser, decode_session, encode_session};
//!
//! let cookie = encode_session(&SessionUser::new("sam@beyond.example", None));
//! let user = decode_session(Some(&cookie)).unwrap();
//! assert_eq!(user.email(), "sam@beyond.example");
//! ```

pub mod error;
pub mod session;
pub mod user;

pub use error::AuthenticationError;
pub use session::{SESSION_COOKIE, decode_session, encode_session};
pub use user::SessionUser;
