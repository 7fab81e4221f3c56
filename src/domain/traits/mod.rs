//! Domain traits - Abstractions for infrastructure implementations

pub mod publisher;
pub mod store;
pub mod transport;

pub use publisher::{GistPublisher, PublishedFile, StreamStatus};
pub use store::CommandStore;
pub use transport::{Transport, TransportInfo};
