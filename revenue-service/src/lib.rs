//! Revenue service: invoice issuance, gateway sync, payment initiation
//! and reconciliation for land-administration charges.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{Application, AppState};
