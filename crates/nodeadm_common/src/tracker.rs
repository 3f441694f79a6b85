//! Installed-state tracker.
//!
//! The tracker file is the only record of what nodeadm put on this host. No
//! file means nothing is installed. Uninstall and upgrade only touch what it
//! lists, so a half-finished run can always be re-run.
//!
//! There is no schema version and no lock: one nodeadm process per host.

use crate::artifact::{self, CONFIG_MODE};
use crate::error::{Error, Result};
use crate::platform::{ContainerdSource, CredentialProvider};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Optional components tracked with a boolean flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    CniPlugins,
    Kubectl,
    Kubelet,
    Ssm,
    Iptables,
    IamAuthenticator,
    IamRolesAnywhere,
    EcrCredentialProvider,
}

impl Component {
    pub const ALL: [Component; 8] = [
        Component::CniPlugins,
        Component::Kubectl,
        Component::Kubelet,
        Component::Ssm,
        Component::Iptables,
        Component::IamAuthenticator,
        Component::IamRolesAnywhere,
        Component::EcrCredentialProvider,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::CniPlugins => "cni-plugins",
            Component::Kubectl => "kubectl",
            Component::Kubelet => "kubelet",
            Component::Ssm => "ssm",
            Component::Iptables => "iptables",
            Component::IamAuthenticator => "aws-iam-authenticator",
            Component::IamRolesAnywhere => "iam-roles-anywhere",
            Component::EcrCredentialProvider => "ecr-credential-provider",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Component::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnknownComponent(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstalledArtifacts {
    pub cni_plugins: bool,
    pub kubectl: bool,
    pub kubelet: bool,
    pub ssm: bool,
    pub iptables: bool,
    pub iam_authenticator: bool,
    pub iam_roles_anywhere: bool,
    pub ecr_credential_provider: bool,
    pub containerd: ContainerdSource,
    /// Docker package repository added for the runtime
    pub docker_repo: bool,
}

impl InstalledArtifacts {
    fn flag_mut(&mut self, component: Component) -> &mut bool {
        match component {
            Component::CniPlugins => &mut self.cni_plugins,
            Component::Kubectl => &mut self.kubectl,
            Component::Kubelet => &mut self.kubelet,
            Component::Ssm => &mut self.ssm,
            Component::Iptables => &mut self.iptables,
            Component::IamAuthenticator => &mut self.iam_authenticator,
            Component::IamRolesAnywhere => &mut self.iam_roles_anywhere,
            Component::EcrCredentialProvider => &mut self.ecr_credential_provider,
        }
    }

    fn flag(&self, component: Component) -> bool {
        match component {
            Component::CniPlugins => self.cni_plugins,
            Component::Kubectl => self.kubectl,
            Component::Kubelet => self.kubelet,
            Component::Ssm => self.ssm,
            Component::Iptables => self.iptables,
            Component::IamAuthenticator => self.iam_authenticator,
            Component::IamRolesAnywhere => self.iam_roles_anywhere,
            Component::EcrCredentialProvider => self.ecr_credential_provider,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrackerFile {
    #[serde(default)]
    artifacts: InstalledArtifacts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    path: PathBuf,
    pub artifacts: InstalledArtifacts,
}

impl Tracker {
    /// Empty tracker that will be saved to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            artifacts: InstalledArtifacts::default(),
        }
    }

    /// Load the tracker; `Error::TrackerNotFound` if no install ever ran.
    pub fn get_installed_artifacts(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TrackerNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
        };
        let file: TrackerFile = serde_yaml::from_str(&content)?;
        Ok(Self {
            path: path.to_path_buf(),
            artifacts: file.artifacts,
        })
    }

    /// Like [`Tracker::get_installed_artifacts`] but an absent file is an empty tracker
    pub fn get_current_state(path: &Path) -> Result<Self> {
        match Self::get_installed_artifacts(path) {
            Err(e) if e.is_not_found() => Ok(Self::new(path)),
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the flag named `name`
    pub fn add(&mut self, name: &str) -> Result<()> {
        let component = name.parse::<Component>()?;
        self.mark(component);
        Ok(())
    }

    pub fn mark(&mut self, component: Component) {
        *self.artifacts.flag_mut(component) = true;
    }

    pub fn remove(&mut self, component: Component) {
        *self.artifacts.flag_mut(component) = false;
    }

    pub fn is_installed(&self, component: Component) -> bool {
        self.artifacts.flag(component)
    }

    pub fn mark_containerd(&mut self, source: ContainerdSource) {
        self.artifacts.containerd = source;
    }

    pub fn mark_docker_repo(&mut self, added: bool) {
        self.artifacts.docker_repo = added;
    }

    /// Repository files nodeadm must remove on uninstall
    pub fn owns_docker_repo(&self) -> bool {
        self.artifacts.docker_repo || self.artifacts.containerd == ContainerdSource::Docker
    }

    /// Runtime installed by nodeadm (not pre-existing)
    pub fn manages_containerd(&self) -> bool {
        self.artifacts.containerd != ContainerdSource::None
    }

    pub fn credential_provider(&self) -> Option<CredentialProvider> {
        if self.artifacts.ssm {
            Some(CredentialProvider::Ssm)
        } else if self.artifacts.iam_roles_anywhere {
            Some(CredentialProvider::IamRolesAnywhere)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts == InstalledArtifacts::default()
    }

    pub fn save(&self) -> Result<()> {
        let file = TrackerFile {
            artifacts: self.artifacts.clone(),
        };
        let content = serde_yaml::to_string(&file)?;
        artifact::write_file(&self.path, content.as_bytes(), CONFIG_MODE)
    }

    /// Delete the tracker file
    pub fn clear(&mut self) -> Result<()> {
        self.artifacts = InstalledArtifacts::default();
        artifact::remove_file(&self.path)
    }
}
