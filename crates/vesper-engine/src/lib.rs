//! Vesper Engine -- frame loop and session persistence over the pool.
//!
//! This crate builds on [`vesper_pool`] to provide the simulation driver: a
//! fixed-timestep frame loop that drains deferred prepares at each tick
//! boundary and fans Update/PostUpdate across the live population, plus the
//! small persistence layer that carries the stable-identifier counter across
//! sessions.
//!
//! # Quick Start
//!
//! ```
//! use vesper_engine::prelude::*;
//!
//! let mut classes = ClassRegistry::new();
//! // classes.register("Turret", |_h, _sid, _p| Box::new(Turret::default()));
//!
//! let pool = PoolRegistry::new(classes);
//! let mut frame_loop = FrameLoop::new(pool, TickConfig::default());
//!
//! frame_loop.run_ticks(100);
//! assert_eq!(frame_loop.tick_count(), 100);
//! ```

#![deny(unsafe_code)]

pub mod persist;
pub mod tick;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the pool crate for convenience.
pub use vesper_pool;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use vesper_pool::prelude::*;

    pub use crate::persist::{CounterStore, PersistError};
    pub use crate::tick::{FrameLoop, FrameReport, TickConfig};
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global tracing subscriber, honoring `RUST_LOG` and defaulting
/// to `warn`. Call once at startup; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}
