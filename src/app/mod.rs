// Application layer - Server, sessions and client driver

pub mod client;
pub mod container;
pub mod server;
pub mod session;

// Re-export entry points
pub use client::{ClientEvent, ClientSettings, StreamingClient};
pub use container::AppContainer;
pub use server::{ServerSettings, StreamingServer};
