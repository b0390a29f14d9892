use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use fleet_errors::{FleetError, FleetResult};
use tracing::{debug, warn};
use uuid::Uuid;

/// 本节点身份
///
/// 节点ID格式为 `<ip>:<uuid>`，同一台机器上的多个进程互不冲突，
/// 同时可以从ID中还原出IP用于黑名单判断。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: String,
    ip: String,
    hostname: String,
}

impl NodeIdentity {
    /// 按配置构造；未指定节点ID时用探测到的IP生成
    pub fn resolve(node_id: Option<&str>, ip: Option<&str>) -> FleetResult<Self> {
        match node_id {
            Some(node_id) => Self::from_node_id(node_id),
            None => {
                let ip = ip.map(str::to_string).unwrap_or_else(detect_local_ip);
                Ok(Self::generate(&ip))
            }
        }
    }

    pub fn generate(ip: &str) -> Self {
        Self {
            node_id: format!("{ip}:{}", Uuid::new_v4()),
            ip: ip.to_string(),
            hostname: local_hostname(),
        }
    }

    pub fn from_node_id(node_id: &str) -> FleetResult<Self> {
        let ip = Self::ip_of(node_id)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| FleetError::InvalidNodeId(node_id.to_string()))?;
        Ok(Self {
            node_id: node_id.to_string(),
            ip: ip.to_string(),
            hostname: local_hostname(),
        })
    }

    /// 从任意节点ID中取出IP部分（兼容IPv6）
    pub fn ip_of(node_id: &str) -> Option<&str> {
        node_id.rsplit_once(':').map(|(ip, _)| ip)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 通过UDP路由选择找出对外网卡地址，不会真正发包
fn detect_local_ip() -> String {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => {
            debug!("探测到本机IP: {}", ip);
            ip.to_string()
        }
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST).to_string(),
        Err(e) => {
            warn!("探测本机IP失败，使用127.0.0.1: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_embeds_ip() {
        let identity = NodeIdentity::generate("10.0.0.5");
        assert!(identity.node_id().starts_with("10.0.0.5:"));
        assert_eq!(NodeIdentity::ip_of(identity.node_id()), Some("10.0.0.5"));
        assert_ne!(identity, NodeIdentity::generate("10.0.0.5"));
    }

    #[test]
    fn test_ip_of_handles_ipv6() {
        assert_eq!(
            NodeIdentity::ip_of("fe80::1:6f1c0c9e-1d4f-4c7b-9a43-5b0e0f6c8d21"),
            Some("fe80::1")
        );
        assert_eq!(NodeIdentity::ip_of("no-colon"), None);
    }

    #[test]
    fn test_resolve_with_fixed_node_id() {
        let identity = NodeIdentity::resolve(Some("192.168.1.9:node-a"), None).unwrap();
        assert_eq!(identity.ip(), "192.168.1.9");
        assert_eq!(identity.node_id(), "192.168.1.9:node-a");

        let err = NodeIdentity::resolve(Some("bogus"), None).unwrap_err();
        assert!(matches!(err, FleetError::InvalidNodeId(_)));
    }

    #[test]
    fn test_resolve_with_ip_override() {
        let identity = NodeIdentity::resolve(None, Some("172.16.0.2")).unwrap();
        assert_eq!(identity.ip(), "172.16.0.2");
    }
}
