//! Install, uninstall, upgrade and init orchestration.
//!
//! Flows run strictly sequentially and stop at the first failure. All of
//! them are safe to re-run after an interruption.

mod init;
mod install;
mod uninstall;
mod upgrade;

pub use init::Initializer;
pub use install::Installer;
pub use uninstall::Uninstaller;
pub use upgrade::Upgrader;
