//! Chat users: registration and local password login.

mod models;
mod repository;
mod service;

pub use models::{Credentials, User, UserInfo};
pub use repository::UserRepository;
pub use service::UserService;
