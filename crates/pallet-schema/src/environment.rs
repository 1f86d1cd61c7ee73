//! Environment snapshot and the template context handed to the templating
//! collaborator.

use crate::range::{parse_version, VersionError};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Platform flavor a cluster runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlatformName {
    /// Plain Kubernetes.
    Kubernetes,
    /// Red Hat OpenShift.
    OpenShift,
}

impl fmt::Display for PlatformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformName::Kubernetes => write!(f, "Kubernetes"),
            PlatformName::OpenShift => write!(f, "OpenShift"),
        }
    }
}

/// Environment information, supplied once per reconciliation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Always set.
    pub kubernetes: KubernetesEnvironment,
    /// Only set when OpenShift is detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_shift: Option<OpenShiftEnvironment>,
    /// Cluster-wide proxy, only on OpenShift with the Proxy enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyEnvironment>,
    /// Only set when installed alongside HyperShift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyper_shift: Option<HyperShiftEnvironment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KubernetesEnvironment {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenShiftEnvironment {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEnvironment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub https_proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HyperShiftEnvironment {
    pub hosted_cluster: Option<HostedCluster>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostedCluster {
    pub metadata: TemplateObjectMeta,
    /// Namespace of the control-plane components of this hosted cluster.
    pub hosted_cluster_namespace: String,
}

/// One platform the environment runs, with its reported version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: PlatformName,
    pub version: String,
}

impl Platform {
    pub fn parsed_version(&self) -> Result<Version, VersionError> {
        parse_version(&self.version)
    }
}

impl Environment {
    pub fn kubernetes(version: impl Into<String>) -> Self {
        Self {
            kubernetes: KubernetesEnvironment {
                version: version.into(),
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_openshift(mut self, version: impl Into<String>) -> Self {
        self.open_shift = Some(OpenShiftEnvironment {
            version: version.into(),
        });
        self
    }

    /// Platforms present in this environment. Kubernetes is always present;
    /// OpenShift is layered on top of it when detected.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut out = vec![Platform {
            name: PlatformName::Kubernetes,
            version: self.kubernetes.version.clone(),
        }];
        if let Some(ocp) = &self.open_shift {
            out.push(Platform {
                name: PlatformName::OpenShift,
                version: ocp.version.clone(),
            });
        }
        out
    }

    pub fn platform(&self, name: PlatformName) -> Option<Platform> {
        self.platforms().into_iter().find(|p| p.name == name)
    }

    /// Most specific platform, used for display.
    pub fn primary_platform(&self) -> Platform {
        let mut platforms = self.platforms();
        platforms.pop().unwrap_or(Platform {
            name: PlatformName::Kubernetes,
            version: self.kubernetes.version.clone(),
        })
    }
}

/// Simplified object metadata exposed to templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplatePackage {
    pub metadata: TemplateObjectMeta,
}

/// Data available to the templating collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateContext {
    pub package: TemplatePackage,
    /// Configuration as admitted by the package API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    pub environment: Environment,
}

impl TemplateContext {
    pub fn new(
        package: TemplateObjectMeta,
        config: Option<serde_json::Value>,
        environment: Environment,
    ) -> Self {
        Self {
            package: TemplatePackage { metadata: package },
            config,
            environment,
        }
    }
}
