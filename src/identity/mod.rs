//! Identity, sessions and the admin session authority.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod roles;
mod error;
mod provider;
mod token_cache;
mod local;
mod remote;
mod authority;

pub use principal::{Principal, looks_like_email, normalize_identity};
pub use session::{Session, SessionToken, SessionManager};
pub use roles::{Role, RoleGrants};
pub use error::AuthError;
pub use provider::{AuthBackend, AuthStore, LoginRequest, SessionChange, SessionEvent, DEFAULT_MIN_SECRET_LEN};
pub use token_cache::TokenCache;
pub use local::LocalAuthStore;
pub use remote::{ClientConfig, HttpAuthStore, RoleCheck};
pub use authority::{AuthPhase, Authorization, SessionAuthority};
