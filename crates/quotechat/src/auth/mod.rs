//! Authentication: HS256 JWTs issued at login, checked by middleware.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError};
pub use error::AuthError;
pub use middleware::{
    AUTH_COOKIE, AuthState, CurrentUser, OptionalUser, auth_middleware, optional_auth_middleware,
};
