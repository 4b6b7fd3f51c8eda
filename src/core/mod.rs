pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod events;
pub mod export;
pub mod interaction;
pub mod message;
pub mod session;
pub mod store;
