//! Handler module - inbound payload dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps logical packet ids to exactly one handler
//! - [`TypedHandler`] - adapts a closure over a concrete payload type
//!
//! # Example
//!
//! ```
//! use craftwire::handler::HandlerRegistry;
//! use craftwire::packets::KeepAliveServerbound;
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers
//!     .register(|_conn, keep_alive: KeepAliveServerbound| {
//!         tracing::trace!(id = keep_alive.keep_alive_id, "keep alive");
//!         Ok(())
//!     })
//!     .unwrap();
//! assert_eq!(handlers.len(), 1);
//! ```

mod registry;

pub use registry::{Handler, HandlerRegistry, HandlerResult, TypedHandler};
