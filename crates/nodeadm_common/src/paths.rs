//! Filesystem layout for a hybrid node.
//!
//! Every path is absolute on the real host. Flows resolve them against a root
//! directory (`/` in production) through [`rooted`], which lets tests run the
//! whole engine inside a temp dir.

use std::path::{Path, PathBuf};

/// Installed-state tracker
pub const TRACKER_FILE: &str = "/opt/nodeadm/tracker";

pub const KUBELET_BIN: &str = "/usr/bin/kubelet";
pub const KUBELET_UNIT: &str = "/etc/systemd/system/kubelet.service";
pub const KUBELET_CONFIG: &str = "/etc/kubernetes/kubelet/config.json";
pub const KUBELET_KUBECONFIG: &str = "/var/lib/kubelet/kubeconfig";
pub const KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const CLUSTER_CA: &str = "/etc/kubernetes/pki/ca.crt";
pub const KUBELET_DATA_DIR: &str = "/var/lib/kubelet";
/// Extra kubelet flags written at init (carries the node name)
pub const KUBELET_ENV: &str = "/etc/eks/kubelet/environment";
pub const KUBELET_CONFIG_DIR: &str = "/etc/kubernetes/kubelet";

pub const KUBECTL_BIN: &str = "/usr/local/bin/kubectl";

pub const CNI_BIN_DIR: &str = "/opt/cni/bin";
pub const CNI_CONFIG_DIR: &str = "/etc/cni/net.d";
pub const CNI_DIR: &str = "/opt/cni";

pub const ECR_CREDENTIAL_PROVIDER_BIN: &str =
    "/etc/eks/image-credential-provider/ecr-credential-provider";
pub const IMAGE_CREDENTIAL_PROVIDER_CONFIG: &str = "/etc/eks/image-credential-provider/config.json";
pub const EKS_DIR: &str = "/etc/eks";

pub const IAM_AUTHENTICATOR_BIN: &str = "/usr/local/bin/aws-iam-authenticator";

pub const SIGNING_HELPER_BIN: &str = "/usr/local/bin/aws_signing_helper";
pub const SIGNING_HELPER_UNIT: &str = "/etc/systemd/system/aws_signing_helper_update.service";
pub const AWS_CONFIG_FILE: &str = "/etc/aws/hybrid/config";
/// Written by the signing helper in update mode
pub const AWS_CREDENTIALS_FILE: &str = "/eks-hybrid/.aws/credentials";
pub const AWS_HYBRID_DIR: &str = "/etc/aws/hybrid";

pub const SSM_SETUP_CLI: &str = "/opt/ssm/ssm-setup-cli";
pub const SSM_DIR: &str = "/opt/ssm";
pub const SSM_REGISTRATION_FILE: &str = "/var/lib/amazon/ssm/registration";
pub const SSM_DATA_DIR: &str = "/var/lib/amazon/ssm";

pub const CONTAINERD_CONFIG: &str = "/etc/containerd/config.toml";
/// Where a runtime installed outside nodeadm would live
pub const CONTAINERD_BINS: [&str; 2] = ["/usr/bin/containerd", "/usr/local/bin/containerd"];

pub const DOCKER_APT_KEY: &str = "/etc/apt/keyrings/docker.asc";
pub const DOCKER_APT_SOURCE: &str = "/etc/apt/sources.list.d/docker.list";
pub const DOCKER_YUM_REPO: &str = "/etc/yum.repos.d/docker-ce.repo";

pub const OS_RELEASE: &str = "/etc/os-release";
pub const HOSTNAME_FILE: &str = "/etc/hostname";

/// Resolve an absolute host path under `root`.
pub fn rooted(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}
