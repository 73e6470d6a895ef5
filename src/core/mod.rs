//! Core controller domain
//!
//! This module contains the engine-independent pieces:
//! - Data model (node, users, tag, reports)
//! - Engine objects built from the model
//! - Collaborator traits
//! - User set differ

mod diff;
pub mod hooks;
mod model;
pub mod objects;

pub use diff::compare_user_list;
pub use hooks::{CertRenewal, PanelApi, ProxyEngine, StatusSampler};
pub use model::{
    ClientInfo, DetectResult, DetectRule, NodeInfo, NodeStatus, NodeType, OnlineUser, Tag,
    UserId, UserInfo, UserTraffic,
};
