//! Host platform and install-time choices.
//!
//! Every dimension is a closed enum so that an unhandled combination shows up
//! as a missing match arm. String parsing only happens at the CLI boundary.

use crate::error::{Error, IoContext, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Ubuntu,
    Rhel,
    AmazonLinux,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Ubuntu => "ubuntu",
            Os::Rhel => "rhel",
            Os::AmazonLinux => "amzn",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Architecture of the running binary
    pub fn current() -> Result<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Arch::Amd64),
            "aarch64" => Ok(Arch::Arm64),
            other => Err(Error::unsupported(format!("architecture {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the node obtains AWS credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProvider {
    Ssm,
    IamRolesAnywhere,
}

impl CredentialProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialProvider::Ssm => "ssm",
            CredentialProvider::IamRolesAnywhere => "iam-ra",
        }
    }
}

impl fmt::Display for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ssm" => Ok(CredentialProvider::Ssm),
            "iam-ra" => Ok(CredentialProvider::IamRolesAnywhere),
            other => Err(Error::unsupported(format!(
                "credential provider {:?} (expected ssm or iam-ra)",
                other
            ))),
        }
    }
}

/// Where the container runtime comes from.
///
/// `None` means a runtime already exists on the host; nodeadm never upgrades
/// or removes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerdSource {
    #[default]
    None,
    Distro,
    Docker,
}

impl ContainerdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerdSource::None => "none",
            ContainerdSource::Distro => "distro",
            ContainerdSource::Docker => "docker",
        }
    }

    /// Reject combinations nodeadm cannot provision
    pub fn validate_for(&self, os: Os) -> Result<()> {
        match (os, self) {
            (_, ContainerdSource::None) => Ok(()),
            (Os::Ubuntu, ContainerdSource::Distro | ContainerdSource::Docker) => Ok(()),
            (Os::Rhel, ContainerdSource::Docker) => Ok(()),
            (Os::AmazonLinux, ContainerdSource::Distro) => Ok(()),
            (Os::Rhel, ContainerdSource::Distro) => Err(Error::precondition(
                "containerd source distro is not supported on rhel, use docker",
            )),
            (Os::AmazonLinux, ContainerdSource::Docker) => Err(Error::precondition(
                "containerd source docker is not supported on amazon linux, use distro",
            )),
        }
    }
}

impl fmt::Display for ContainerdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerdSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(ContainerdSource::None),
            "distro" => Ok(ContainerdSource::Distro),
            "docker" => Ok(ContainerdSource::Docker),
            other => Err(Error::unsupported(format!(
                "containerd source {:?} (expected none, distro or docker)",
                other
            ))),
        }
    }
}

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsInfo {
    pub os: Os,
    pub version_id: String,
    /// Debian-family codename, used for the docker apt source
    pub codename: Option<String>,
}

impl OsInfo {
    pub fn detect(root: &Path) -> Result<Self> {
        let path = paths::rooted(root, paths::OS_RELEASE);
        let content =
            std::fs::read_to_string(&path).context(|| format!("read {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut id = None;
        let mut version_id = String::new();
        let mut codename = None;

        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').to_string();
                match key.trim() {
                    "ID" => id = Some(value),
                    "VERSION_ID" => version_id = value,
                    "VERSION_CODENAME" if !value.is_empty() => codename = Some(value),
                    _ => {}
                }
            }
        }

        let os = match id.as_deref() {
            Some("ubuntu") => Os::Ubuntu,
            Some("rhel") => Os::Rhel,
            Some("amzn") => Os::AmazonLinux,
            Some(other) => return Err(Error::unsupported(format!("operating system {}", other))),
            None => return Err(Error::unsupported("os-release has no ID field")),
        };

        Ok(Self {
            os,
            version_id,
            codename,
        })
    }
}
