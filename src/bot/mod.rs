//! Conversation engine: webhook payload normalization, per-user session
//! routing, the guided booking flow, and the assistant bridge.

pub mod assistant;
pub mod catalog;
pub mod memory;
pub mod normalize;
pub mod router;
pub mod session;
pub mod store;
pub mod whatsapp;

pub use router::{ConversationRouter, RouterSettings};
pub use store::Store;

#[cfg(test)]
mod tests;
