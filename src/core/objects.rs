//! Engine-side objects created by the controller

use std::path::PathBuf;

use super::model::UserId;

/// Inbound protocol understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundProtocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

impl InboundProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundProtocol::Vless => "vless",
            InboundProtocol::Vmess => "vmess",
            InboundProtocol::Trojan => "trojan",
            InboundProtocol::Shadowsocks => "shadowsocks",
        }
    }
}

/// Transport carried by the inbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    WebSocket { path: String, host: String },
    Grpc { service_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub server_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundConfig {
    pub tag: String,
    pub listen: String,
    pub port: u16,
    pub protocol: InboundProtocol,
    pub transport: Transport,
    pub tls: Option<TlsSettings>,
    pub sniffing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainStrategy {
    AsIs,
    UseIp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundConfig {
    pub tag: String,
    pub send_through: Option<String>,
    pub domain_strategy: DomainStrategy,
}

/// Protocol credentials of an engine user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Account {
    Vless { id: String },
    Vmess { id: String, alter_id: u16 },
    Trojan { password: String },
    Shadowsocks { password: String, cipher: String },
}

/// A user as pushed to the engine, addressed by its tag-qualified key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineUser {
    /// `tag|email|uid`
    pub key: String,
    pub uid: UserId,
    pub account: Account,
}
