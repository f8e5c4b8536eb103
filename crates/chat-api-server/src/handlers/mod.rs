pub mod branches;
pub mod chat;
pub mod conversations;
pub mod health;
pub mod messages;
pub mod models;
pub mod users;
