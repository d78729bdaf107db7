//! # NeuroBoard
//!
//! Analytics dashboard backend over a single table of participant records.
//!
//! ## Pipeline
//!
//! ```text
//! HTTP request -> web (params) -> filter -> query -> store -> JSON response
//!                                  feeder ----^        ^---- loader
//! ```
//!
//! - [`filter`]: optional criteria to a conjunction of predicates
//! - [`query`]: list, count and grouped aggregations
//! - [`store`]: the SQLite `participants` table
//! - [`feeder`]: background task inserting synthetic participants
//! - [`loader`]: seed documents and the full-replace bulk loader
//! - [`web`]: the HTTP surface

pub mod cli;
pub mod config;
pub mod error;
pub mod feeder;
pub mod filter;
pub mod loader;
pub mod models;
pub mod query;
pub mod store;
pub mod web;

pub use error::{DashboardError, Result};
pub use filter::{Dimension, ParticipantFilter};
pub use models::{GroupCount, NewParticipant, Participant};
pub use query::{Page, QueryService};
pub use store::Store;
