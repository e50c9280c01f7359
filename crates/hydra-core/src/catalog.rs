//! Static resource catalog (C1): presets, node descriptors, and thresholds.
//!
//! Everything here is configuration data, not behavior — it is loaded once
//! at startup and treated as read-only for the life of the process.

use std::collections::HashMap;

use hydra_orchestrator::StorageClass;
use serde::{Deserialize, Serialize};

/// The reserved HTTP endpoint names every container registers by default.
pub const RESERVED_ENDPOINTS: &[&str] = &["vscode", "jupyter"];

/// Container ports already claimed by the default routes; user-registered
/// routes may not reuse them.
pub const RESERVED_PORTS: &[u16] = &[P_EDITOR, P_NOTEBOOK, P_SSH_INTERNAL];

/// Port the editor (VS Code) process listens on inside the container.
pub const P_EDITOR: u16 = 8080;
/// Port the notebook (Jupyter) process listens on inside the container.
pub const P_NOTEBOOK: u16 = 8888;
/// Port the in-container SSH endpoint listens on.
pub const P_SSH_INTERNAL: u16 = 22;

/// Base port for the host-side forwarded SSH port the multiplexer exposes.
pub const SSH_MUX_BASE_PORT: u32 = 22000;
/// Width of the deterministic port range derived from a username's hash.
pub const SSH_MUX_PORT_RANGE: u32 = 10000;

/// Process names (case-insensitive substrings) the security monitor treats
/// as evidence of cryptomining.
pub const MINING_PROCESS_BLOCKLIST: &[&str] = &[
    "xmrig", "minerd", "cpuminer", "ethminer", "nheqminer", "ccminer", "cgminer", "bfgminer",
];

/// One resource tier a user may select when provisioning a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub tier: String,
    pub memory_gb: f64,
    pub cpus: f64,
    pub storage_gb: f64,
    pub gpu_count: u32,
    /// Whether a request for exactly this preset, targeting the
    /// control-plane node, may auto-approve (still subject to the
    /// per-resource auto-approval thresholds).
    pub auto_approvable: bool,
}

/// What a caller asked for when provisioning or requesting resources:
/// either a named catalog tier, or an explicit bundle of the kind the
/// specification's `init` and resource-request paths both accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSelection {
    Preset { tier: String },
    Explicit { memory_gb: f64, cpus: f64, storage_gb: f64, gpu_count: u32 },
}

impl ResourceSelection {
    /// The label recorded on the container/approval record for this
    /// selection; explicit bundles have no preset name of their own.
    #[must_use]
    pub fn tier_label(&self) -> &str {
        match self {
            Self::Preset { tier } => tier,
            Self::Explicit { .. } => "custom",
        }
    }
}

/// A resource bundle resolved from either path of a [`ResourceSelection`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedResources {
    pub memory_gb: f64,
    pub cpus: f64,
    pub storage_gb: f64,
    pub gpu_count: u32,
}

/// A node the control plane can place workloads on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub role: String,
    pub gpu_enabled: bool,
    pub storage_class: StorageClass,
}

/// Auto-approval and security-monitor thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub auto_approve_max_memory_gb: f64,
    pub auto_approve_max_cpus: f64,
    pub auto_approve_max_storage_gb: f64,
    pub warning_cpu_pct: f64,
    pub critical_cpu_pct: f64,
    pub warning_mem_pct: f64,
    pub critical_mem_pct: f64,
    pub rolling_window_samples: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_approve_max_memory_gb: 4.0,
            auto_approve_max_cpus: 2.0,
            auto_approve_max_storage_gb: 20.0,
            warning_cpu_pct: 80.0,
            critical_cpu_pct: 95.0,
            warning_mem_pct: 85.0,
            critical_mem_pct: 95.0,
            rolling_window_samples: 5,
        }
    }
}

/// The full static catalog: presets, nodes and thresholds.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    presets: HashMap<String, Preset>,
    nodes: HashMap<String, NodeDescriptor>,
    pub thresholds: Thresholds,
    pub default_preset_tier: String,
}

impl ResourceCatalog {
    /// The catalog shipped by default: a conservative control-plane preset
    /// and two GPU node presets, plus the three-node topology the
    /// specification names (one control plane, two GPU nodes).
    #[must_use]
    pub fn default_for_cluster() -> Self {
        let presets = vec![
            Preset {
                tier: "conservative".to_owned(),
                memory_gb: 2.0,
                cpus: 1.0,
                storage_gb: 10.0,
                gpu_count: 0,
                auto_approvable: true,
            },
            Preset {
                tier: "standard".to_owned(),
                memory_gb: 8.0,
                cpus: 4.0,
                storage_gb: 50.0,
                gpu_count: 0,
                auto_approvable: true,
            },
            Preset {
                tier: "gpu-training".to_owned(),
                memory_gb: 32.0,
                cpus: 8.0,
                storage_gb: 200.0,
                gpu_count: 1,
                auto_approvable: false,
            },
        ];

        let nodes = vec![
            NodeDescriptor {
                name: "control-plane".to_owned(),
                role: "control-plane".to_owned(),
                gpu_enabled: false,
                storage_class: StorageClass::Hot,
            },
            NodeDescriptor {
                name: "gpu_node_a".to_owned(),
                role: "training".to_owned(),
                gpu_enabled: true,
                storage_class: StorageClass::Nfs,
            },
            NodeDescriptor {
                name: "gpu_node_b".to_owned(),
                role: "inference".to_owned(),
                gpu_enabled: true,
                storage_class: StorageClass::Hot,
            },
        ];

        Self {
            presets: presets.into_iter().map(|p| (p.tier.clone(), p)).collect(),
            nodes: nodes.into_iter().map(|n| (n.name.clone(), n)).collect(),
            thresholds: Thresholds::default(),
            default_preset_tier: "conservative".to_owned(),
        }
    }

    #[must_use]
    pub fn preset(&self, tier: &str) -> Option<&Preset> {
        self.presets.get(tier)
    }

    #[must_use]
    pub fn default_preset(&self) -> Option<&Preset> {
        self.presets.get(&self.default_preset_tier)
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(name)
    }

    #[must_use]
    pub fn control_plane_node(&self) -> &str {
        self.nodes
            .values()
            .find(|n| n.role == "control-plane")
            .map_or("control-plane", |n| n.name.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values()
    }

    /// Whether a resource bundle is within the auto-approval thresholds,
    /// independent of preset or target node.
    #[must_use]
    pub fn within_auto_approval_thresholds(&self, memory_gb: f64, cpus: f64, storage_gb: f64, gpu_count: u32) -> bool {
        gpu_count == 0
            && memory_gb <= self.thresholds.auto_approve_max_memory_gb
            && cpus <= self.thresholds.auto_approve_max_cpus
            && storage_gb <= self.thresholds.auto_approve_max_storage_gb
    }

    /// Resolve a selection to a concrete resource bundle, plus whether the
    /// preset gate for auto-approval is satisfied (always true for an
    /// explicit bundle, since only named presets carry `auto_approvable`).
    /// Returns `None` for an unknown preset tier.
    #[must_use]
    pub fn resolve_selection(&self, selection: &ResourceSelection) -> Option<(ResolvedResources, bool)> {
        match selection {
            ResourceSelection::Preset { tier } => {
                let preset = self.presets.get(tier)?;
                Some((
                    ResolvedResources {
                        memory_gb: preset.memory_gb,
                        cpus: preset.cpus,
                        storage_gb: preset.storage_gb,
                        gpu_count: preset.gpu_count,
                    },
                    preset.auto_approvable,
                ))
            }
            ResourceSelection::Explicit { memory_gb, cpus, storage_gb, gpu_count } => Some((
                ResolvedResources { memory_gb: *memory_gb, cpus: *cpus, storage_gb: *storage_gb, gpu_count: *gpu_count },
                true,
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_preset_is_present_in_catalog() {
        let catalog = ResourceCatalog::default_for_cluster();
        assert!(catalog.preset(&catalog.default_preset_tier).is_some());
    }

    #[test]
    fn gpu_preset_is_never_auto_approvable() {
        let catalog = ResourceCatalog::default_for_cluster();
        let gpu = catalog.preset("gpu-training").expect("gpu-training preset");
        assert!(!gpu.auto_approvable);
        assert!(!catalog.within_auto_approval_thresholds(gpu.memory_gb, gpu.cpus, gpu.storage_gb, gpu.gpu_count));
    }

    #[test]
    fn control_plane_node_is_found_by_role() {
        let catalog = ResourceCatalog::default_for_cluster();
        assert_eq!(catalog.control_plane_node(), "control-plane");
    }
}
