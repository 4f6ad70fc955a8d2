//! Transport module - TCP listener and socket setup.

mod tcp;

pub use tcp::{bind, configure_stream};
