//! Connection descriptors - immutable identity and credentials for a target runtime.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The kind of runtime a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    RemoteShell,
    Local,
    Container,
    ContainerApi,
    Pod,
    Distro,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionKind::RemoteShell => "remote-shell",
            ConnectionKind::Local => "local",
            ConnectionKind::Container => "container",
            ConnectionKind::ContainerApi => "container-api",
            ConnectionKind::Pod => "pod",
            ConnectionKind::Distro => "distro",
        };
        write!(f, "{}", s)
    }
}

/// Identity + credentials for one target runtime.
///
/// Never mutated after creation: a changed target is a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Stable key used by the connection registry
    pub id: String,
    /// Kind-specific fields
    #[serde(flatten)]
    pub target: Target,
}

/// Kind-specific connection fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Target {
    RemoteShell(RemoteShellTarget),
    Local,
    Container(ContainerTarget),
    ContainerApi(ContainerApiTarget),
    Pod(PodTarget),
    Distro(DistroTarget),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteShellTarget {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Password auth (requires `sshpass` on the host running shellpilot)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Key auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

fn default_ssh_port() -> u16 {
    22
}

impl RemoteShellTarget {
    /// `user@host:port`, used for logging and control socket naming.
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTarget {
    /// Container name or id
    pub container: String,
    /// Preferred shell inside the container (default `bash`, falls back to `sh`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// When set, container commands are issued on this host over a remote shell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteShellTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerApiTarget {
    /// Engine endpoint, e.g. `https://build-host:2376`
    pub endpoint: String,
    /// Container name or id
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,
}

/// PEM files for talking to a TLS-protected engine API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTarget {
    pub pod: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// kubectl context to use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
}

fn default_namespace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroTarget {
    /// WSL distribution name, e.g. `Ubuntu-22.04`
    pub distro: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(id: impl Into<String>, target: Target) -> Self {
        Self { id: id.into(), target }
    }

    /// Descriptor for the host shellpilot runs on.
    pub fn local(id: impl Into<String>) -> Self {
        Self::new(id, Target::Local)
    }

    pub fn kind(&self) -> ConnectionKind {
        match &self.target {
            Target::RemoteShell(_) => ConnectionKind::RemoteShell,
            Target::Local => ConnectionKind::Local,
            Target::Container(_) => ConnectionKind::Container,
            Target::ContainerApi(_) => ConnectionKind::ContainerApi,
            Target::Pod(_) => ConnectionKind::Pod,
            Target::Distro(_) => ConnectionKind::Distro,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_descriptor_kind() {
        let desc = ConnectionDescriptor::local("laptop");
        assert_eq!(desc.id, "laptop");
        assert_eq!(desc.kind(), ConnectionKind::Local);
    }

    #[test]
    fn test_remote_shell_from_yaml_defaults_port() {
        let yaml = r#"
id: web-1
kind: remote-shell
host: 10.0.0.5
user: deploy
private_key: /home/deploy/.ssh/id_ed25519
"#;
        let desc: ConnectionDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.kind(), ConnectionKind::RemoteShell);
        match &desc.target {
            Target::RemoteShell(t) => {
                assert_eq!(t.port, 22);
                assert_eq!(t.address(), "deploy@10.0.0.5:22");
                assert!(t.password.is_none());
            }
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_pod_defaults_namespace() {
        let json = r#"{"id":"api","kind":"pod","pod":"api-7d9c"}"#;
        let desc: ConnectionDescriptor = serde_json::from_str(json).unwrap();
        match desc.target {
            Target::Pod(p) => assert_eq!(p.namespace, "default"),
            other => panic!("unexpected target: {:?}", other),
        }
    }

    #[test]
    fn test_local_kind_serializes_flat() {
        let json = serde_json::to_value(ConnectionDescriptor::local("here")).unwrap();
        assert_eq!(json["id"], "here");
        assert_eq!(json["kind"], "local");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ConnectionKind::ContainerApi.to_string(), "container-api");
        assert_eq!(ConnectionKind::RemoteShell.to_string(), "remote-shell");
    }
}
