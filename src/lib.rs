//! Media request dispatcher library.
//!
//! Routes two-byte client requests to a fixed pool of video and music
//! backends, choosing the backend with the smallest projected completion
//! time and keeping one persistent connection per backend.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod net;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::DispatcherConfig;
pub use dispatch::DispatchServer;
pub use lifecycle::Shutdown;
pub use load_balancer::BackendRegistry;
