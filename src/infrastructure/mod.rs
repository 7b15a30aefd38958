//! Infrastructure layer: the ambient stack that carries even though the
//! swarm runtime's own Non-goals exclude persistence, transport, and auth.
//! - Configuration loading (figment, YAML + env)
//! - Structured logging (tracing, JSON + rotation + secret scrubbing)

pub mod config;
pub mod logging;
