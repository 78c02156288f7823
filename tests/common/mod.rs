#![allow(dead_code)]

pub mod connection;
pub mod entities;
pub mod repositories;

pub use connection::MemoryConnection;
pub use entities::User;
pub use repositories::UserRepository;
