//! Artifact sources.
//!
//! Components ask an [`ArtifactFetcher`] for a checksummed stream and never
//! care where the bytes come from. [`ManifestFetcher`] resolves artifacts from
//! the published release manifest; [`MemoryFetcher`] serves fixed bytes for
//! tests.

use super::checksum::{parse_gnu_checksum, ChecksumSource, Source};
use crate::error::{Error, IoContext, Result};
use crate::platform::Arch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::sync::Mutex;
use tracing::{debug, info, Span};

/// Default location of the release manifest
pub const DEFAULT_MANIFEST_URL: &str = "https://hybrid-assets.eks.amazonaws.com/manifest.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Kubelet,
    Kubectl,
    CniPlugins,
    EcrCredentialProvider,
    IamAuthenticator,
    SigningHelper,
    SsmSetupCli,
}

impl Artifact {
    /// Name used in the release manifest
    pub fn as_str(&self) -> &'static str {
        match self {
            Artifact::Kubelet => "kubelet",
            Artifact::Kubectl => "kubectl",
            Artifact::CniPlugins => "cni-plugins",
            Artifact::EcrCredentialProvider => "ecr-credential-provider",
            Artifact::IamAuthenticator => "aws-iam-authenticator",
            Artifact::SigningHelper => "aws_signing_helper",
            Artifact::SsmSetupCli => "ssm-setup-cli",
        }
    }

    /// Versioned together with Kubernetes
    pub fn is_kubernetes(&self) -> bool {
        match self {
            Artifact::Kubelet
            | Artifact::Kubectl
            | Artifact::CniPlugins
            | Artifact::EcrCredentialProvider
            | Artifact::IamAuthenticator => true,
            Artifact::SigningHelper | Artifact::SsmSetupCli => false,
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, artifact: Artifact) -> Result<Box<dyn Source>>;
}

// ============================================================================
// Release manifest
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestArtifact {
    pub name: String,
    pub arch: String,
    pub os: String,
    pub uri: String,
    pub checksum_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesRelease {
    pub major_minor_version: String,
    pub patch_version: String,
    pub artifacts: Vec<ManifestArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub kubernetes_releases: Vec<KubernetesRelease>,
    /// Version-independent tools (SSM setup CLI, signing helper)
    #[serde(default)]
    pub tool_artifacts: Vec<ManifestArtifact>,
}

impl ReleaseManifest {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Match `1.31` against the major/minor line or `1.31.2` exactly
    pub fn kubernetes_release(&self, version: &str) -> Result<&KubernetesRelease> {
        let version = version.trim_start_matches('v');
        self.kubernetes_releases
            .iter()
            .find(|r| r.major_minor_version == version || r.patch_version == version)
            .ok_or_else(|| Error::unsupported(format!("kubernetes version {}", version)))
    }
}

/// Downloads artifacts listed in a release manifest.
///
/// Each artifact is spooled to an anonymous temp file; its digest is checked
/// when the installer reads it back.
pub struct ManifestFetcher {
    manifest: ReleaseManifest,
    kubernetes_version: String,
    arch: Arch,
    client: reqwest::Client,
    log: Span,
}

impl ManifestFetcher {
    pub fn new(manifest: ReleaseManifest, kubernetes_version: &str, arch: Arch, log: Span) -> Self {
        Self {
            manifest,
            kubernetes_version: kubernetes_version.to_string(),
            arch,
            client: reqwest::Client::new(),
            log,
        }
    }

    /// Fetch and parse the manifest at `url`
    pub async fn load(url: &str, kubernetes_version: &str, arch: Arch, log: Span) -> Result<Self> {
        info!(parent: &log, url, "Fetching release manifest");
        let body = reqwest::get(url).await?.error_for_status()?.text().await?;
        let manifest = ReleaseManifest::parse(&body)?;
        // Fail early on an unknown version rather than on the first download
        manifest.kubernetes_release(kubernetes_version)?;
        Ok(Self::new(manifest, kubernetes_version, arch, log))
    }

    fn lookup(&self, artifact: Artifact) -> Result<&ManifestArtifact> {
        let candidates = if artifact.is_kubernetes() {
            &self
                .manifest
                .kubernetes_release(&self.kubernetes_version)?
                .artifacts
        } else {
            &self.manifest.tool_artifacts
        };
        candidates
            .iter()
            .find(|a| a.name == artifact.as_str() && a.arch == self.arch.as_str() && a.os == "linux")
            .ok_or_else(|| Error::ArtifactNotFound(format!("{} ({})", artifact, self.arch)))
    }
}

#[async_trait]
impl ArtifactFetcher for ManifestFetcher {
    async fn fetch(&self, artifact: Artifact) -> Result<Box<dyn Source>> {
        let entry = self.lookup(artifact)?;

        let checksum = self
            .client
            .get(&entry.checksum_uri)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let expected = parse_gnu_checksum(&checksum)?;

        debug!(parent: &self.log, artifact = %artifact, uri = %entry.uri, "Downloading");
        let mut response = self.client.get(&entry.uri).send().await?.error_for_status()?;
        let mut spool = tempfile::tempfile().context(|| "create download spool".to_string())?;
        while let Some(chunk) = response.chunk().await? {
            spool
                .write_all(&chunk)
                .context(|| format!("spool {}", artifact))?;
        }
        spool
            .seek(SeekFrom::Start(0))
            .context(|| format!("rewind {}", artifact))?;

        Ok(Box::new(ChecksumSource::new(spool, expected)))
    }
}

// ============================================================================
// Memory Fetcher (Testing)
// ============================================================================

/// Serves fixed bytes with a correct (or deliberately wrong) digest
#[derive(Default)]
pub struct MemoryFetcher {
    artifacts: HashMap<Artifact, (Vec<u8>, Vec<u8>)>,
    fetched: Mutex<Vec<Artifact>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, artifact: Artifact, bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes).to_vec();
        self.artifacts.insert(artifact, (bytes.to_vec(), digest));
        self
    }

    /// Publish `bytes` under a digest that will never match
    pub fn with_bad_checksum(mut self, artifact: Artifact, bytes: &[u8]) -> Self {
        self.artifacts
            .insert(artifact, (bytes.to_vec(), vec![0u8; 32]));
        self
    }

    /// Every artifact requested so far
    pub fn fetched(&self) -> Vec<Artifact> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactFetcher for MemoryFetcher {
    async fn fetch(&self, artifact: Artifact) -> Result<Box<dyn Source>> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(artifact);
        }
        let (bytes, digest) = self
            .artifacts
            .get(&artifact)
            .ok_or_else(|| Error::ArtifactNotFound(artifact.to_string()))?;
        Ok(Box::new(ChecksumSource::new(
            Cursor::new(bytes.clone()),
            digest.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const MANIFEST: &str = r#"
kubernetes_releases:
  - major_minor_version: "1.31"
    patch_version: "1.31.2"
    artifacts:
      - name: kubelet
        arch: amd64
        os: linux
        uri: https://example.com/1.31.2/bin/linux/amd64/kubelet
        checksum_uri: https://example.com/1.31.2/bin/linux/amd64/kubelet.sha256
  - major_minor_version: "1.30"
    patch_version: "1.30.6"
    artifacts: []
tool_artifacts:
  - name: ssm-setup-cli
    arch: arm64
    os: linux
    uri: https://example.com/ssm/arm64/ssm-setup-cli
    checksum_uri: https://example.com/ssm/arm64/ssm-setup-cli.sha256
"#;

    #[test]
    fn test_manifest_release_lookup() {
        let manifest = ReleaseManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.kubernetes_release("1.31").unwrap().patch_version, "1.31.2");
        assert_eq!(
            manifest.kubernetes_release("v1.30.6").unwrap().major_minor_version,
            "1.30"
        );
        assert!(manifest.kubernetes_release("1.25").is_err());
    }

    #[test]
    fn test_manifest_fetcher_lookup_respects_arch() {
        let manifest = ReleaseManifest::parse(MANIFEST).unwrap();
        let fetcher = ManifestFetcher::new(manifest, "1.31", Arch::Amd64, Span::none());
        assert!(fetcher.lookup(Artifact::Kubelet).is_ok());
        assert!(matches!(
            fetcher.lookup(Artifact::SsmSetupCli),
            Err(Error::ArtifactNotFound(_))
        ));
        assert!(fetcher.lookup(Artifact::Kubectl).is_err());
    }

    #[tokio::test]
    async fn test_memory_fetcher_serves_verified_stream() {
        let fetcher = MemoryFetcher::new().with(Artifact::Kubectl, b"kubectl-bytes");
        let mut src = fetcher.fetch(Artifact::Kubectl).await.unwrap();
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"kubectl-bytes");
        assert!(src.verify_checksum());
        assert_eq!(fetcher.fetched(), vec![Artifact::Kubectl]);
        assert!(fetcher.fetch(Artifact::Kubelet).await.is_err());
    }
}
