//! Node reconciliation controller
//!
//! Architecture:
//! - `core/`: data model, user diffing and collaborator traits
//! - `controller/`: reconciliation controller, periodic tasks, supervisor
//! - `business/`: concrete collaborators (panel HTTP client, local engine,
//!   lego certificate renewal, host sampling)
//! - `config`, `logger`, `error`: ambient plumbing

pub mod business;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod logger;

pub use controller::{Collaborators, Controller, Phase, Supervisor};
pub use error::{ControllerError, Result};
