//! Node configuration (`NodeConfig`) and per-flow options.

use crate::error::{Error, IoContext, Result};
use crate::platform::{ContainerdSource, CredentialProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "node.eks.aws/v1alpha1";
pub const KIND: &str = "NodeConfig";

/// Whole-flow deadline when `--timeout` is not given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

pub const DEFAULT_SANDBOX_IMAGE: &str = "registry.k8s.io/pause:3.10";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub api_version: String,
    pub kind: String,
    pub spec: NodeSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub cluster: ClusterDetails,
    #[serde(default)]
    pub hybrid: HybridOptions,
    #[serde(default)]
    pub containerd: ContainerdOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_endpoint: Option<String>,
    /// Base64 PEM bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssm: Option<SsmOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_roles_anywhere: Option<IamRolesAnywhereOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsmOptions {
    pub activation_code: String,
    pub activation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamRolesAnywhereOptions {
    pub trust_anchor_arn: String,
    pub profile_arn: String,
    pub role_arn: String,
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerdOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_image: Option<String>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(|| format!("read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: NodeConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_version != API_VERSION {
            return Err(Error::config(format!(
                "apiVersion {:?}, expected {}",
                self.api_version, API_VERSION
            )));
        }
        if self.kind != KIND {
            return Err(Error::config(format!("kind {:?}, expected {}", self.kind, KIND)));
        }
        if self.spec.cluster.name.is_empty() {
            return Err(Error::config("spec.cluster.name is required"));
        }
        if self.spec.cluster.region.is_empty() {
            return Err(Error::config("spec.cluster.region is required"));
        }
        match (&self.spec.hybrid.ssm, &self.spec.hybrid.iam_roles_anywhere) {
            (Some(_), Some(_)) => Err(Error::config(
                "spec.hybrid: only one of ssm and iamRolesAnywhere may be set",
            )),
            (None, None) => Err(Error::config(
                "spec.hybrid: one of ssm or iamRolesAnywhere is required",
            )),
            (Some(_), None) => Ok(()),
            (None, Some(ira)) => {
                if self.spec.hybrid.node_name.is_none() {
                    return Err(Error::config(
                        "spec.hybrid.nodeName is required with iamRolesAnywhere",
                    ));
                }
                if ira.role_arn.is_empty() || ira.trust_anchor_arn.is_empty() {
                    return Err(Error::config(
                        "spec.hybrid.iamRolesAnywhere needs roleArn and trustAnchorArn",
                    ));
                }
                Ok(())
            }
        }
    }

    pub fn credential_provider(&self) -> CredentialProvider {
        if self.spec.hybrid.iam_roles_anywhere.is_some() {
            CredentialProvider::IamRolesAnywhere
        } else {
            CredentialProvider::Ssm
        }
    }

    pub fn sandbox_image(&self) -> &str {
        self.spec
            .containerd
            .sandbox_image
            .as_deref()
            .unwrap_or(DEFAULT_SANDBOX_IMAGE)
    }
}

/// Pre-flight checks that can be disabled with `--skip`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Skip {
    PodValidation,
    NodeValidation,
}

impl std::str::FromStr for Skip {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pod-validation" => Ok(Skip::PodValidation),
            "node-validation" => Ok(Skip::NodeValidation),
            other => Err(Error::unsupported(format!("skip phase {:?}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub kubernetes_version: String,
    pub credential_provider: CredentialProvider,
    pub containerd_source: ContainerdSource,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UninstallOptions {
    pub skip: HashSet<Skip>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub kubernetes_version: String,
    pub config: NodeConfig,
    pub skip: HashSet<Skip>,
    pub timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSM: &str = r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-prod
    region: us-west-2
  hybrid:
    ssm:
      activationCode: code
      activationId: id
"#;

    #[test]
    fn test_parse_ssm_config() {
        let config = NodeConfig::parse(SSM).unwrap();
        assert_eq!(config.spec.cluster.name, "hybrid-prod");
        assert_eq!(config.credential_provider(), CredentialProvider::Ssm);
        assert_eq!(config.sandbox_image(), DEFAULT_SANDBOX_IMAGE);
    }

    #[test]
    fn test_iam_roles_anywhere_needs_node_name() {
        let content = r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: c
    region: eu-west-1
  hybrid:
    iamRolesAnywhere:
      trustAnchorArn: arn:aws:rolesanywhere:eu-west-1:1:trust-anchor/t
      profileArn: arn:aws:rolesanywhere:eu-west-1:1:profile/p
      roleArn: arn:aws:iam::1:role/node
      certificatePath: /etc/iam/pki/server.pem
      privateKeyPath: /etc/iam/pki/server.key
"#;
        let err = NodeConfig::parse(content).unwrap_err();
        assert!(err.to_string().contains("nodeName"));

        let with_name = content.replace("  hybrid:\n", "  hybrid:\n    nodeName: edge-01\n");
        let config = NodeConfig::parse(&with_name).unwrap();
        assert_eq!(config.credential_provider(), CredentialProvider::IamRolesAnywhere);
    }

    #[test]
    fn test_rejects_both_or_neither_provider() {
        let neither = SSM.replace(
            "    ssm:\n      activationCode: code\n      activationId: id\n",
            "    nodeName: n\n",
        );
        assert!(NodeConfig::parse(&neither).is_err());

        let wrong_kind = SSM.replace("kind: NodeConfig", "kind: Cluster");
        assert!(NodeConfig::parse(&wrong_kind).is_err());
    }

    #[test]
    fn test_skip_names() {
        assert_eq!("pod-validation".parse::<Skip>().unwrap(), Skip::PodValidation);
        assert!("everything".parse::<Skip>().is_err());
    }
}
