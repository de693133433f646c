//! Persisted desired-state records and the configuration delta

use std::fmt;
use std::str::FromStr;

use netmaster_common::{StateRecord, TagKind};
use serde::{Deserialize, Serialize};

use crate::error::{MasterError, MasterResult};

/// Fabric integration mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InfraMode {
    /// Plain overlay
    #[default]
    Default,
    /// ACI-integrated
    Aci,
    /// ACI with OpFlex
    AciOpflex,
}

impl InfraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InfraMode::Default => "default",
            InfraMode::Aci => "aci",
            InfraMode::AciOpflex => "aci-opflex",
        }
    }
}

impl FromStr for InfraMode {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(InfraMode::Default),
            "aci" => Ok(InfraMode::Aci),
            "aci-opflex" => Ok(InfraMode::AciOpflex),
            other => Err(MasterError::InvalidConfig(format!(
                "invalid fabric mode '{other}', expected default | aci | aci-opflex"
            ))),
        }
    }
}

impl fmt::Display for InfraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fabric-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub infra_mode: InfraMode,
    pub fwd_mode: String,
    pub arp_mode: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            infra_mode: InfraMode::Default,
            fwd_mode: "bridge".into(),
            arp_mode: "proxy".into(),
        }
    }
}

impl GlobalSettings {
    /// Apply the non-empty fields of a validated delta
    pub fn apply(&mut self, infra_mode: Option<InfraMode>, delta: &GlobalConfigDelta) {
        if let Some(mode) = infra_mode {
            self.infra_mode = mode;
        }
        if let Some(fwd) = supplied(&delta.fwd_mode) {
            self.fwd_mode = fwd.to_string();
        }
        if let Some(arp) = supplied(&delta.arp_mode) {
            self.arp_mode = arp.to_string();
        }
    }
}

impl StateRecord for GlobalSettings {
    const KEY: &'static str = "master/config/global";
}

/// Desired VLAN/VXLAN identifier space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePoolConfig {
    pub vlans: String,
    pub vxlans: String,
}

impl ResourcePoolConfig {
    pub fn set_spec(&mut self, kind: TagKind, spec: &str) {
        match kind {
            TagKind::Vlan => self.vlans = spec.to_string(),
            TagKind::Vxlan => self.vxlans = spec.to_string(),
        }
    }
}

impl StateRecord for ResourcePoolConfig {
    const KEY: &'static str = "global/config/global";
}

/// Partial global configuration accepted by create/update.
///
/// Absent and empty fields both mean "no change".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfigDelta {
    pub infra_mode: Option<String>,
    pub vlans: Option<String>,
    pub vxlans: Option<String>,
    pub fwd_mode: Option<String>,
    pub arp_mode: Option<String>,
}

impl GlobalConfigDelta {
    pub fn with_infra_mode(mut self, mode: &str) -> Self {
        self.infra_mode = Some(mode.to_string());
        self
    }

    pub fn with_vlans(mut self, spec: &str) -> Self {
        self.vlans = Some(spec.to_string());
        self
    }

    pub fn with_vxlans(mut self, spec: &str) -> Self {
        self.vxlans = Some(spec.to_string());
        self
    }

    pub fn with_fwd_mode(mut self, mode: &str) -> Self {
        self.fwd_mode = Some(mode.to_string());
        self
    }

    pub fn with_arp_mode(mut self, mode: &str) -> Self {
        self.arp_mode = Some(mode.to_string());
        self
    }

    /// Validated infrastructure mode, if one was supplied
    pub fn parsed_infra_mode(&self) -> MasterResult<Option<InfraMode>> {
        supplied(&self.infra_mode)
            .map(str::parse::<InfraMode>)
            .transpose()
    }

    /// Supplied range spec for `kind`
    pub fn range_spec(&self, kind: TagKind) -> Option<&str> {
        match kind {
            TagKind::Vlan => supplied(&self.vlans),
            TagKind::Vxlan => supplied(&self.vxlans),
        }
    }
}

fn supplied(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}
