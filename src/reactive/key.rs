use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one host (model element) inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(Uuid);

impl HostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell hosts apart in logs
        let text = self.0.simple().to_string();
        f.write_str(&text[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamKey {
    pub host: HostId,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    pub host: HostId,
    pub name: &'static str,
}

/// Edge target in the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKey {
    Param(ParamKey),
    Method(MethodKey),
}

impl DependencyKey {
    pub fn host(&self) -> HostId {
        match self {
            DependencyKey::Param(key) => key.host,
            DependencyKey::Method(key) => key.host,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DependencyKey::Param(key) => key.name,
            DependencyKey::Method(key) => key.name,
        }
    }
}

impl From<ParamKey> for DependencyKey {
    fn from(key: ParamKey) -> Self {
        DependencyKey::Param(key)
    }
}

impl From<MethodKey> for DependencyKey {
    fn from(key: MethodKey) -> Self {
        DependencyKey::Method(key)
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::Param(key) => write!(f, "param:{}/{}", key.host, key.name),
            DependencyKey::Method(key) => write!(f, "method:{}/{}", key.host, key.name),
        }
    }
}
