//! Application state shared across handlers.

use crate::auth::AuthState;
use crate::chat::ChatService;
use crate::user::UserService;
use crate::ws::Hub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub chat: ChatService,
    pub users: UserService,
    pub auth: AuthState,
}

impl AppState {
    pub fn new(hub: Hub, chat: ChatService, users: UserService, auth: AuthState) -> Self {
        Self {
            hub,
            chat,
            users,
            auth,
        }
    }
}
