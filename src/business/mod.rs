//! Concrete collaborators: panel client, local engine, certificate renewal
//! and host sampling

pub mod api;
pub mod cert;
pub mod engine;
pub mod limiter;
pub mod rules;
pub mod stats;
pub mod status;

pub use api::PanelClient;
pub use cert::LegoRenewer;
pub use engine::LocalEngine;
pub use limiter::{Admission, Limiter};
pub use stats::TrafficCounters;
pub use status::SystemSampler;
