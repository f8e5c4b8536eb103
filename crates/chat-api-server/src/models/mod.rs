pub mod branch;
pub mod chat;
pub mod common;
pub mod conversation;
pub mod message;
