//! kubelet binary, unit and node configuration.

use super::binary::KUBELET;
use super::{ssm, Daemon};
use crate::artifact::{self, UpgradeOutcome, CONFIG_MODE};
use crate::config::NodeConfig;
use crate::error::{Error, IoContext, Result};
use crate::host::Host;
use crate::paths;
use crate::platform::CredentialProvider;
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::fs;
use tokio::time::Instant;
use tracing::info;

pub const DAEMON_NAME: &str = "kubelet";

const HOSTNAME_OVERRIDE: &str = "--hostname-override=";

fn unit_file() -> String {
    format!(
        "[Unit]
Description=Kubernetes Kubelet
Documentation=https://github.com/kubernetes/kubernetes
After=containerd.service
Wants=containerd.service

[Service]
EnvironmentFile=-{env}
ExecStartPre=/sbin/iptables -P FORWARD ACCEPT -w 5
ExecStart={bin} \\
    --config {config} \\
    --kubeconfig {kubeconfig} \\
    --image-credential-provider-bin-dir {provider_dir} \\
    --image-credential-provider-config {provider_config} \\
    $NODEADM_KUBELET_ARGS
Restart=on-failure
RestartForceExitStatus=SIGPIPE
RestartSec=5
KillMode=process
CPUAccounting=true
MemoryAccounting=true

[Install]
WantedBy=multi-user.target
",
        env = paths::KUBELET_ENV,
        bin = paths::KUBELET_BIN,
        config = paths::KUBELET_CONFIG,
        kubeconfig = paths::KUBELET_KUBECONFIG,
        provider_dir = "/etc/eks/image-credential-provider",
        provider_config = paths::IMAGE_CREDENTIAL_PROVIDER_CONFIG,
    )
}

pub async fn install(host: &Host) -> Result<()> {
    KUBELET.install(host).await?;
    artifact::write_file(&host.path(paths::KUBELET_UNIT), unit_file().as_bytes(), CONFIG_MODE)
}

pub async fn upgrade(host: &Host) -> Result<UpgradeOutcome> {
    let outcome = KUBELET.upgrade(host).await?;
    artifact::write_file(&host.path(paths::KUBELET_UNIT), unit_file().as_bytes(), CONFIG_MODE)?;
    Ok(outcome)
}

pub fn uninstall(host: &Host) -> Result<()> {
    KUBELET.uninstall(host)?;
    artifact::remove_file(&host.path(paths::KUBELET_UNIT))?;
    artifact::remove_file(&host.path(paths::KUBELET_ENV))?;
    artifact::remove_dir_all(&host.path(paths::KUBELET_CONFIG_DIR))?;
    artifact::remove_dir_all(&host.path(paths::KUBELET_DATA_DIR))
}

/// Name this node registers under.
///
/// First match wins: `spec.hybrid.nodeName`, the name written at the last
/// init, the SSM managed instance id, `/etc/hostname`.
pub fn resolve_node_name(host: &Host, config: Option<&NodeConfig>) -> Result<String> {
    if let Some(name) = config.and_then(|c| c.spec.hybrid.node_name.as_ref()) {
        return Ok(name.clone());
    }
    if let Some(name) = written_node_name(host)? {
        return Ok(name);
    }
    if let Some(id) = ssm::managed_instance_id(host)? {
        return Ok(id);
    }
    let path = host.path(paths::HOSTNAME_FILE);
    let name = fs::read_to_string(&path).context(|| format!("read {}", path.display()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::precondition(format!("{} is empty", path.display())));
    }
    Ok(name.to_string())
}

fn written_node_name(host: &Host) -> Result<Option<String>> {
    let path = host.path(paths::KUBELET_ENV);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(format!("read {}", path.display()), e)),
    };
    let name = content.find(HOSTNAME_OVERRIDE).and_then(|start| {
        content[start + HOSTNAME_OVERRIDE.len()..]
            .split(|c: char| c.is_whitespace() || c == '"')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    });
    Ok(name)
}

fn render_environment(config: &NodeConfig, node_name: &str) -> String {
    let cluster = &config.spec.cluster;
    let mut env = format!(
        "NODEADM_KUBELET_ARGS=\"{}{} --node-labels=eks.amazonaws.com/compute-type=hybrid \
         --provider-id=eks-hybrid:///{}/{}/{}\"\n",
        HOSTNAME_OVERRIDE, node_name, cluster.region, cluster.name, node_name
    );
    if config.credential_provider() == CredentialProvider::IamRolesAnywhere {
        env.push_str(&format!("AWS_CONFIG_FILE={}\n", paths::AWS_CONFIG_FILE));
        env.push_str(&format!(
            "AWS_SHARED_CREDENTIALS_FILE={}\n",
            paths::AWS_CREDENTIALS_FILE
        ));
    }
    env
}

fn render_kubelet_config() -> serde_json::Value {
    json!({
        "apiVersion": "kubelet.config.k8s.io/v1beta1",
        "kind": "KubeletConfiguration",
        "address": "0.0.0.0",
        "authentication": {
            "anonymous": { "enabled": false },
            "webhook": { "enabled": true, "cacheTTL": "2m0s" },
            "x509": { "clientCAFile": paths::CLUSTER_CA }
        },
        "authorization": {
            "mode": "Webhook",
            "webhook": { "cacheAuthorizedTTL": "5m0s", "cacheUnauthorizedTTL": "30s" }
        },
        "cgroupDriver": "systemd",
        "clusterDomain": "cluster.local",
        "containerRuntimeEndpoint": "unix:///run/containerd/containerd.sock",
        "featureGates": { "RotateKubeletServerCertificate": true },
        "hairpinMode": "hairpin-veth",
        "protectKernelDefaults": true,
        "readOnlyPort": 0,
        "serializeImagePulls": false,
        "serverTLSBootstrap": true
    })
}

fn render_kubeconfig(config: &NodeConfig, endpoint: &str) -> Result<String> {
    let cluster = &config.spec.cluster;
    let mut exec = json!({
        "apiVersion": "client.authentication.k8s.io/v1beta1",
        "command": paths::IAM_AUTHENTICATOR_BIN,
        "args": ["token", "-i", cluster.name, "--region", cluster.region]
    });
    if config.credential_provider() == CredentialProvider::IamRolesAnywhere {
        exec["env"] = json!([
            { "name": "AWS_SHARED_CREDENTIALS_FILE", "value": paths::AWS_CREDENTIALS_FILE },
            { "name": "AWS_CONFIG_FILE", "value": paths::AWS_CONFIG_FILE }
        ]);
    }

    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "kubernetes",
            "cluster": { "certificate-authority": paths::CLUSTER_CA, "server": endpoint }
        }],
        "contexts": [{
            "name": "kubelet",
            "context": { "cluster": "kubernetes", "user": "kubelet" }
        }],
        "current-context": "kubelet",
        "users": [{ "name": "kubelet", "user": { "exec": exec } }]
    });
    Ok(serde_yaml::to_string(&kubeconfig)?)
}

fn render_image_credential_provider_config() -> serde_json::Value {
    json!({
        "apiVersion": "kubelet.config.k8s.io/v1",
        "kind": "CredentialProviderConfig",
        "providers": [{
            "name": "ecr-credential-provider",
            "matchImages": [
                "*.dkr.ecr.*.amazonaws.com",
                "*.dkr.ecr.*.amazonaws.com.cn",
                "*.dkr.ecr-fips.*.amazonaws.com"
            ],
            "defaultCacheDuration": "12h",
            "apiVersion": "credentialprovider.kubelet.k8s.io/v1"
        }]
    })
}

pub struct KubeletDaemon;

#[async_trait]
impl Daemon for KubeletDaemon {
    fn name(&self) -> &'static str {
        DAEMON_NAME
    }

    async fn configure(&self, host: &Host, config: &NodeConfig, _deadline: Instant) -> Result<()> {
        let cluster = &config.spec.cluster;
        let endpoint = cluster
            .api_server_endpoint
            .as_deref()
            .ok_or_else(|| Error::config("spec.cluster.apiServerEndpoint is required"))?;
        let ca = cluster
            .certificate_authority
            .as_deref()
            .ok_or_else(|| Error::config("spec.cluster.certificateAuthority is required"))?;
        let ca = base64::engine::general_purpose::STANDARD
            .decode(ca.trim())
            .map_err(|e| Error::config(format!("spec.cluster.certificateAuthority: {}", e)))?;

        let node_name = resolve_node_name(host, Some(config))?;
        info!(parent: &host.log, node_name = %node_name, "Configuring kubelet");

        artifact::write_file(&host.path(paths::CLUSTER_CA), &ca, CONFIG_MODE)?;
        artifact::write_file(
            &host.path(paths::KUBELET_CONFIG),
            &serde_json::to_vec_pretty(&render_kubelet_config())?,
            CONFIG_MODE,
        )?;
        artifact::write_file(
            &host.path(paths::KUBELET_KUBECONFIG),
            render_kubeconfig(config, endpoint)?.as_bytes(),
            CONFIG_MODE,
        )?;
        artifact::write_file(
            &host.path(paths::IMAGE_CREDENTIAL_PROVIDER_CONFIG),
            &serde_json::to_vec_pretty(&render_image_credential_provider_config())?,
            CONFIG_MODE,
        )?;
        artifact::write_file(
            &host.path(paths::KUBELET_ENV),
            render_environment(config, &node_name).as_bytes(),
            CONFIG_MODE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
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

    #[tokio::test]
    async fn test_configure_writes_node_files_and_remembers_name() {
        let tmp = TempDir::new().unwrap();
        let host = Host::fake(tmp.path());
        let config = NodeConfig::parse(CONFIG).unwrap();
        artifact::write_file(
            &host.path(paths::SSM_REGISTRATION_FILE),
            br#"{"ManagedInstanceID":"mi-0123456789abcdef0","Region":"us-west-2"}"#,
            CONFIG_MODE,
        )
        .unwrap();

        KubeletDaemon
            .configure(&host, &config, Instant::now())
            .await
            .unwrap();

        let ca = fs::read(host.path(paths::CLUSTER_CA)).unwrap();
        assert_eq!(ca, b"-----BEGIN CERTIFICATE-----");

        let kubeconfig = fs::read_to_string(host.path(paths::KUBELET_KUBECONFIG)).unwrap();
        assert!(kubeconfig.contains("https://api.example.com"));
        assert!(!kubeconfig.contains("AWS_SHARED_CREDENTIALS_FILE"));

        let kubelet_config: serde_json::Value =
            serde_json::from_slice(&fs::read(host.path(paths::KUBELET_CONFIG)).unwrap()).unwrap();
        assert_eq!(kubelet_config["cgroupDriver"], "systemd");

        // SSM registration gone: the name written at init still wins over hostname
        fs::remove_file(host.path(paths::SSM_REGISTRATION_FILE)).unwrap();
        assert_eq!(
            resolve_node_name(&host, None).unwrap(),
            "mi-0123456789abcdef0"
        );
    }

    #[tokio::test]
    async fn test_configure_requires_endpoint() {
        let tmp = TempDir::new().unwrap();
        let host = Host::fake(tmp.path());
        let config = NodeConfig::parse(&CONFIG.replace(
            "    apiServerEndpoint: https://api.example.com\n",
            "",
        ))
        .unwrap();

        let err = KubeletDaemon
            .configure(&host, &config, Instant::now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("apiServerEndpoint"));
    }

    #[test]
    fn test_hostname_is_last_resort() {
        let tmp = TempDir::new().unwrap();
        let host = Host::fake(tmp.path());
        artifact::write_file(&host.path(paths::HOSTNAME_FILE), b"edge-42\n", CONFIG_MODE).unwrap();
        assert_eq!(resolve_node_name(&host, None).unwrap(), "edge-42");
    }

    #[test]
    fn test_unit_references_config_paths() {
        let unit = unit_file();
        assert!(unit.contains("--config /etc/kubernetes/kubelet/config.json"));
        assert!(unit.contains("EnvironmentFile=-/etc/eks/kubelet/environment"));
    }
}
