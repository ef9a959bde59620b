//! Session handoff between stages.
//!
//! Stages never share memory. Authenticated state moves through a
//! [`SessionStore`] and produced values through the [`ArtifactStore`].

mod artifacts;
mod browser;
mod state;
mod store;

pub use artifacts::ArtifactStore;
pub use browser::{AutomationSession, HeadlessSession, HeadlessSessionFactory, SessionFactory};
pub use state::{Cookie, OriginState, SameSite, SessionState, StorageEntry};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
