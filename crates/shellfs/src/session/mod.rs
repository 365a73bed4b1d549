//! SSH sessions.
//!
//! - [`SessionFactory`] - immutable connection description, derived per filesystem
//! - [`Proxy`] - HTTP CONNECT / SOCKS5 tunnel for the TCP leg
//! - [`ClientHandler`] - russh handler enforcing the [`HostKeyPolicy`]

mod client;
mod factory;
mod proxy;

pub use client::{ClientHandler, HostKeyPolicy};
pub use factory::{Identity, SessionFactory, SessionOverrides, build_session_factory};
pub use proxy::{Proxy, ProxyKind};
