use crate::error::Result;
use crate::host::Host;
use tokio::time::Instant;

pub async fn install(host: &Host, deadline: Instant) -> Result<()> {
    host.packages
        .install(&host.packages.iptables_package(), deadline)
        .await
}

pub async fn upgrade(host: &Host, deadline: Instant) -> Result<()> {
    host.packages
        .upgrade(&host.packages.iptables_package(), deadline)
        .await
}

pub async fn uninstall(host: &Host, deadline: Instant) -> Result<()> {
    host.packages
        .uninstall(&host.packages.iptables_package(), deadline)
        .await
}
