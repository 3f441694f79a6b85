//! Shared fixtures: a fake host under a temp dir with every artifact served.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use nodeadm_common::artifact::{self, Artifact, MemoryFetcher, CONFIG_MODE};
use nodeadm_common::command::FakeRunner;
use nodeadm_common::config::NodeConfig;
use nodeadm_common::daemon::FakeDaemonManager;
use nodeadm_common::host::Host;
use nodeadm_common::paths;
use std::path::Path;
use std::sync::Arc;

pub const NODE_NAME: &str = "edge-node-01";

pub const SSM_CONFIG: &str = r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-prod
    region: us-west-2
    apiServerEndpoint: https://api.example.com
    certificateAuthority: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
  hybrid:
    ssm:
      activationCode: code
      activationId: id
"#;

pub const IAM_RA_CONFIG: &str = r#"
apiVersion: node.eks.aws/v1alpha1
kind: NodeConfig
spec:
  cluster:
    name: hybrid-prod
    region: us-west-2
    apiServerEndpoint: https://api.example.com
    certificateAuthority: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
  hybrid:
    nodeName: edge-node-01
    iamRolesAnywhere:
      trustAnchorArn: arn:aws:rolesanywhere:us-west-2:1:trust-anchor/t
      profileArn: arn:aws:rolesanywhere:us-west-2:1:profile/p
      roleArn: arn:aws:iam::1:role/node
      certificatePath: /etc/iam/pki/server.pem
      privateKeyPath: /etc/iam/pki/server.key
"#;

pub fn ssm_config() -> NodeConfig {
    NodeConfig::parse(SSM_CONFIG).unwrap()
}

pub fn iam_ra_config() -> NodeConfig {
    NodeConfig::parse(IAM_RA_CONFIG).unwrap()
}

/// gzipped tarball holding one `bridge` plugin
pub fn cni_bundle(contents: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, "bridge", contents).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Every artifact, each carrying `tag` so upgrades can be told apart
pub fn release(tag: &str) -> MemoryFetcher {
    let mut fetcher = MemoryFetcher::new();
    for artifact in [
        Artifact::Kubelet,
        Artifact::Kubectl,
        Artifact::EcrCredentialProvider,
        Artifact::IamAuthenticator,
        Artifact::SigningHelper,
        Artifact::SsmSetupCli,
    ] {
        fetcher = fetcher.with(artifact, format!("{} {}", artifact, tag).as_bytes());
    }
    fetcher.with(Artifact::CniPlugins, &cni_bundle(tag.as_bytes()))
}

pub struct Fixture {
    pub host: Host,
    pub runner: Arc<FakeRunner>,
    pub daemons: Arc<FakeDaemonManager>,
    pub fetcher: Arc<MemoryFetcher>,
}

impl Fixture {
    pub fn new(root: &Path, fetcher: MemoryFetcher) -> Self {
        Self::with(root, FakeRunner::new(), FakeDaemonManager::new(), fetcher)
    }

    pub fn with(
        root: &Path,
        runner: FakeRunner,
        daemons: FakeDaemonManager,
        fetcher: MemoryFetcher,
    ) -> Self {
        let runner = Arc::new(runner);
        let daemons = Arc::new(daemons);
        let fetcher = Arc::new(fetcher);
        let host = Host::with_fakes(root, runner.clone(), daemons.clone(), fetcher.clone());
        artifact::write_file(
            &host.path(paths::HOSTNAME_FILE),
            format!("{}\n", NODE_NAME).as_bytes(),
            CONFIG_MODE,
        )
        .unwrap();
        Self {
            host,
            runner,
            daemons,
            fetcher,
        }
    }
}

pub fn read(host: &Host, path: &str) -> String {
    std::fs::read_to_string(host.path(path)).unwrap()
}

/// Index of the first call containing `pattern`
pub fn position(calls: &[String], pattern: &str) -> usize {
    calls
        .iter()
        .position(|c| c.contains(pattern))
        .unwrap_or_else(|| panic!("no call matching {:?} in {:#?}", pattern, calls))
}
