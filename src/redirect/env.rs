use std::sync::Arc;

use crate::builddaemon::{BuckProbe, BuildDaemonProbe, NoBuildDaemon};
use crate::checkout::{Checkout, ConfigStore, TomlConfigStore};
use crate::config::Config;
use crate::mtab::{self, MountTable};
use crate::platform::Platform;
use crate::scratch::{self, ScratchAllocator};

use super::bind::{self, BindStrategy};

/// Everything a redirection operation touches outside its own values: the
/// checkout, the platform strategies and the collaborators.
///
/// Built once per invocation; tests assemble one from fakes.
#[derive(Clone)]
pub struct RedirectEnv {
    pub checkout: Checkout,
    pub platform: Platform,
    pub mount_table: Arc<dyn MountTable>,
    pub bind: Arc<dyn BindStrategy>,
    pub scratch: Arc<dyn ScratchAllocator>,
    pub build_daemon: Arc<dyn BuildDaemonProbe>,
    pub store: Arc<dyn ConfigStore>,
}

impl RedirectEnv {
    /// The production wiring for the running platform.
    pub fn from_config(checkout: Checkout, config: &Config) -> Self {
        let platform = Platform::current();
        let mount_table: Arc<dyn MountTable> = Arc::from(mtab::for_platform(platform));
        let bind = bind::for_platform(platform, config, mount_table.clone());
        let build_daemon: Arc<dyn BuildDaemonProbe> = if config.build.stop_daemons {
            Arc::new(BuckProbe::new(config.build.buck.clone()))
        } else {
            Arc::new(NoBuildDaemon)
        };

        Self {
            checkout,
            platform,
            mount_table,
            bind,
            scratch: Arc::from(scratch::from_config(&config.scratch)),
            build_daemon,
            store: Arc::new(TomlConfigStore),
        }
    }
}
