//! Monte Carlo retirement drawdown simulation engine.
//!
//! The `core` module holds the stateless compute pipeline: seeded return
//! generation, the year-by-year path kernel with its funding-order state
//! machine, mortality-weighted success metrics, the max-spending binary
//! search, and the grid sweep driver. The `api` module is the HTTP boundary.

pub mod api;
pub mod core;
