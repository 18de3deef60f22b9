#![deny(unused)]
//! Remote command dispatch for Codemode.
//!
//! Forwards a shell command to one of several configured hosts over SSH and
//! scrubs host identifiers from whatever comes back.

pub mod dispatcher;
pub mod sanitize;
pub mod transport;

pub use dispatcher::RemoteDispatcher;
pub use sanitize::Sanitizer;
pub use transport::{RemoteOutput, RemoteTransport, SshTransport};
