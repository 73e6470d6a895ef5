//! Remote panel access

mod client;

pub use client::PanelClient;
