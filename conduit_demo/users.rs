mod handlers;
mod module;
mod store;

pub use handlers::*;
pub use module::UsersModule;
pub use store::*;

use serde::{Deserialize, Serialize};

use conduit_app::cqrs::{Notification, Request};
use conduit_types::MessageKind;

/// Registers a new user and returns its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Request for CreateUser {
    type Response = u32;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUser {
    pub id: u32,
}

impl Request for GetUser {
    type Response = UserDto;
    const KIND: MessageKind = MessageKind::Query;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: u32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Published once a user has been stored.
#[derive(Debug, Clone)]
pub struct UserCreated {
    pub id: u32,
    pub email: String,
}

impl Notification for UserCreated {}
