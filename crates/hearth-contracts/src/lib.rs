pub mod chat;
pub mod domain;
pub mod events;
pub mod models;
pub mod shopping;
pub mod summary;
pub mod view;
