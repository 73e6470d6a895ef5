//! Builds engine objects from the declared node configuration

use crate::config::ControllerConfig;
use crate::core::objects::{
    Account, DomainStrategy, EngineUser, InboundConfig, InboundProtocol, OutboundConfig,
    TlsSettings, Transport,
};
use crate::core::{NodeInfo, NodeType, Tag, UserInfo};
use crate::error::{ControllerError, Result};

/// Default gRPC service name (Xray compatible)
pub const DEFAULT_GRPC_SERVICE_NAME: &str = "GunService";

/// Default WebSocket path (Xray compatible)
pub const DEFAULT_WS_PATH: &str = "/";

fn inbound_protocol(node: &NodeInfo) -> Result<InboundProtocol> {
    match &node.node_type {
        NodeType::V2ray if node.enable_vless => Ok(InboundProtocol::Vless),
        NodeType::V2ray => Ok(InboundProtocol::Vmess),
        NodeType::Trojan => Ok(InboundProtocol::Trojan),
        NodeType::Shadowsocks => Ok(InboundProtocol::Shadowsocks),
        NodeType::Unsupported(name) => Err(ControllerError::UnsupportedNodeType(name.clone())),
    }
}

fn transport(node: &NodeInfo) -> Result<Transport> {
    match node.transport_protocol.to_lowercase().as_str() {
        "" | "tcp" => Ok(Transport::Tcp),
        "ws" | "websocket" => Ok(Transport::WebSocket {
            path: if node.path.is_empty() {
                DEFAULT_WS_PATH.to_string()
            } else {
                node.path.clone()
            },
            host: node.host.clone(),
        }),
        "grpc" => Ok(Transport::Grpc {
            service_name: if node.service_name.is_empty() {
                DEFAULT_GRPC_SERVICE_NAME.to_string()
            } else {
                node.service_name.clone()
            },
        }),
        other => Err(ControllerError::Config(format!(
            "unsupported transport protocol '{}'",
            other
        ))),
    }
}

/// Build the inbound for a node
pub fn inbound_builder(config: &ControllerConfig, node: &NodeInfo) -> Result<InboundConfig> {
    let protocol = inbound_protocol(node)?;

    let tls = if node.enable_tls && protocol != InboundProtocol::Shadowsocks {
        let cert = &config.cert_config;
        let (cert_file, key_file) = cert.cert_paths().ok_or_else(|| {
            ControllerError::Config(format!(
                "node {} enables TLS but cert_mode is none",
                node.node_id
            ))
        })?;
        let server_name = if cert.cert_domain.is_empty() {
            node.host.clone()
        } else {
            cert.cert_domain.clone()
        };
        Some(TlsSettings {
            cert_file,
            key_file,
            server_name,
        })
    } else {
        None
    };

    Ok(InboundConfig {
        tag: Tag::for_node(node).to_string(),
        listen: config.listen_ip.clone(),
        port: node.port,
        protocol,
        transport: transport(node)?,
        tls,
        sniffing: true,
    })
}

/// Build the outbound paired with a node's inbound
pub fn outbound_builder(config: &ControllerConfig, node: &NodeInfo) -> OutboundConfig {
    OutboundConfig {
        tag: Tag::for_node(node).to_string(),
        send_through: config.send_ip.clone(),
        domain_strategy: if config.enable_dns {
            DomainStrategy::UseIp
        } else {
            DomainStrategy::AsIs
        },
    }
}

/// Build engine users for `tag` according to the node's protocol
pub fn build_users(tag: &Tag, node: &NodeInfo, users: &[UserInfo]) -> Result<Vec<EngineUser>> {
    let protocol = inbound_protocol(node)?;

    users
        .iter()
        .map(|u| {
            let account = match protocol {
                InboundProtocol::Vless => Account::Vless { id: u.uuid.clone() },
                InboundProtocol::Vmess => Account::Vmess {
                    id: u.uuid.clone(),
                    alter_id: node.alter_id,
                },
                InboundProtocol::Trojan => Account::Trojan {
                    password: u.uuid.clone(),
                },
                InboundProtocol::Shadowsocks => {
                    let cipher = if u.method.is_empty() {
                        node.cypher_method.clone()
                    } else {
                        u.method.clone()
                    };
                    if cipher.is_empty() {
                        return Err(ControllerError::Config(format!(
                            "no shadowsocks cipher for user {}",
                            u.uid
                        )));
                    }
                    Account::Shadowsocks {
                        password: u.passwd.clone(),
                        cipher,
                    }
                }
            };
            Ok(EngineUser {
                key: tag.user_key(u),
                uid: u.uid,
                account,
            })
        })
        .collect()
}
