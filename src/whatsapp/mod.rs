pub mod client;
pub mod message;
pub mod payload;

pub use client::WhatsAppClient;
