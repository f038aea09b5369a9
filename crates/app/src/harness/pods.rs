//! Subset of the cluster's `get pods -o json` document that readiness and teardown consume.

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: PodMetadata,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PodMetadata {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Volume {
    #[serde(default, rename = "hostPath")]
    pub host_path: Option<HostPath>,
}

#[derive(Debug, Deserialize)]
pub struct HostPath {
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

impl PodStatus {
    /// The cluster has not reported anything for this pod yet.
    pub fn is_empty(&self) -> bool {
        self.phase.is_none() && self.conditions.is_empty()
    }
}

impl Pod {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn is_ready(&self) -> bool {
        if self.status.is_empty() {
            return false;
        }
        self.status.phase.as_deref() == Some("Running")
            && self
                .status
                .conditions
                .iter()
                .filter(|condition| condition.kind == "Ready")
                .all(|condition| condition.status == "True")
    }
}

impl PodList {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Ready only when at least one pod exists and every pod is ready.
    pub fn all_ready(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(Pod::is_ready)
    }

    pub fn pending(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|pod| !pod.is_ready())
            .map(Pod::name)
            .collect()
    }

    /// Distinct host-mounted volume paths, in discovery order.
    pub fn host_volume_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for volume in self.items.iter().flat_map(|pod| &pod.spec.volumes) {
            if let Some(host) = &volume.host_path
                && !paths.contains(&host.path)
            {
                paths.push(host.path.clone());
            }
        }
        paths
    }
}
