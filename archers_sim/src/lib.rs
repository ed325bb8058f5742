//! Archer Line Simulation Harness
//!
//! Runs a line of archers over the in-memory transport with fault
//! injection, or over real TCP sockets, and checks the volley against the
//! line's invariants.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SimNetwork                           │
//! │   ┌─────────┐  /fromleft  ┌─────────┐  /fromleft  ┌───────┐  │
//! │   │ Archer  │ ──────────► │ Archer  │ ──────────► │ ...   │  │
//! │   │   #1    │ ◄────────── │   #2    │ ◄────────── │       │  │
//! │   └─────────┘  /fromright └─────────┘  /fromright └───────┘  │
//! │        ▲                                                     │
//! │   ┌────┴─────────────────────────────┐                       │
//! │   │ SimNetworkController             │                       │
//! │   │ (partition / loss / corruption)  │                       │
//! │   └──────────────────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use archers_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 5).run(ScenarioId::BrokenLink).await;
//! assert!(result.passed);
//! ```

mod network;
mod runner;
pub mod scenarios;

pub use network::{NetworkStats, SimEndpoint, SimNetwork, SimNetworkController};
pub use runner::{run_line, FireRecord, LineConfig, LineReport, RunError, ScenarioResult, ScenarioRunner};
