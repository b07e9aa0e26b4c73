//! Synchronization primitives for in-process communication.
//!
//! Currently just the single-slot [`Mailbox`] used for TCP sends.

pub mod mailbox;

pub use mailbox::Mailbox;
