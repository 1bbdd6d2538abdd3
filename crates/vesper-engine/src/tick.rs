//! Fixed-timestep frame loop driving the pool.
//!
//! Each tick:
//!
//! 1. The deferred-prepare queue is drained (FIFO), constructing any
//!    instances whose prepare was requested since the last tick.
//! 2. Update, then PostUpdate, fan out across every live instance in
//!    ascending stable-id order.
//! 3. The tick counter and simulation time advance.
//!
//! Because prepares drain FIFO and the live set iterates in ascending
//! stable-id order, a frame is fully deterministic for a given sequence of
//! pool operations.
//!
//! # Example
//!
//! ```
//! use vesper_engine::tick::{FrameLoop, TickConfig};
//! use vesper_pool::prelude::*;
//!
//! let pool = PoolRegistry::new(ClassRegistry::new());
//! let mut frame_loop = FrameLoop::new(pool, TickConfig::default());
//!
//! frame_loop.run_ticks(10);
//! assert_eq!(frame_loop.tick_count(), 10);
//! ```

use vesper_pool::registry::PoolRegistry;

// ---------------------------------------------------------------------------
// TickConfig
// ---------------------------------------------------------------------------

/// Configuration for the fixed-timestep frame loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Fixed time step in seconds per tick. Must be positive and finite.
    pub fixed_dt: f32,
}

impl Default for TickConfig {
    /// Defaults to 60 Hz (1/60 second per tick).
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameReport
// ---------------------------------------------------------------------------

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameReport {
    /// Deferred prepares constructed at the tick boundary.
    pub constructed: usize,
    /// Participant hooks visited across the Update/PostUpdate passes.
    pub participants: usize,
    /// Hooks that faulted (isolated, reported to the pool's sink).
    pub faults: usize,
}

// ---------------------------------------------------------------------------
// FrameLoop
// ---------------------------------------------------------------------------

/// Owns the pool and advances it one fixed step at a time.
pub struct FrameLoop {
    pool: PoolRegistry,
    config: TickConfig,
    tick_counter: u64,
    sim_time: f64,
}

impl FrameLoop {
    pub fn new(pool: PoolRegistry, config: TickConfig) -> Self {
        Self {
            pool,
            config,
            tick_counter: 0,
            sim_time: 0.0,
        }
    }

    /// Advance the simulation by one fixed step.
    pub fn tick(&mut self) -> FrameReport {
        let constructed = self.pool.begin_tick();
        let report = self.pool.update(self.config.fixed_dt);

        self.tick_counter += 1;
        self.sim_time += f64::from(self.config.fixed_dt);

        FrameReport {
            constructed,
            participants: report.participants,
            faults: report.faults,
        }
    }

    /// Run `n` ticks back to back. Returns the aggregate report.
    pub fn run_ticks(&mut self, n: u64) -> FrameReport {
        let mut total = FrameReport::default();
        for _ in 0..n {
            let report = self.tick();
            total.constructed += report.constructed;
            total.participants += report.participants;
            total.faults += report.faults;
        }
        total
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Simulation time in seconds (`tick_count * fixed_dt`).
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    /// The pool, for operations between ticks.
    pub fn pool(&self) -> &PoolRegistry {
        &self.pool
    }

    /// Mutable pool access (bookmark, prepare, return, reload).
    pub fn pool_mut(&mut self) -> &mut PoolRegistry {
        &mut self.pool
    }

    /// Tear the loop down, handing the pool back (e.g. to persist the
    /// identifier counter at shutdown).
    pub fn into_pool(self) -> PoolRegistry {
        self.pool
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
