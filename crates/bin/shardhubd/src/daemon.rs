//! Wiring of one running instance.

use std::sync::Arc;

use tokio::task::JoinHandle;

use shardhub_adapter_virtual::{DummyCapture, MemoryBlobStore, VirtualDevices, VirtualGpio};
use shardhub_app::device::DeviceRuntime;
use shardhub_app::hub::Hub;
use shardhub_app::ports::PeerConnector;
use shardhub_app::space::Space;
use shardhub_domain::error::HubError;
use shardhub_domain::id::ShardId;

use crate::config::Config;

/// A hub with its space, shards, behaviors and peer links running.
pub struct Daemon {
    hub: Arc<Hub>,
    space: Space,
    runtime: DeviceRuntime,
    devices: VirtualDevices,
    supervisors: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Build the space from `config`, initialise its shards, attach device
    /// behaviors and start the peer links through `connector`.
    ///
    /// A shard whose seed entries fail to commit is logged and stays
    /// registered, attached and open to later transactions; the others keep
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for an invalid space or a shard that
    /// cannot be registered.
    #[tracing::instrument(skip_all, fields(instance = %config.instance.name))]
    pub async fn start(
        config: &Config,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self, HubError> {
        if !config.instance.dummy {
            tracing::warn!("no GPIO driver is linked, running on virtual pins");
        }
        let hub = Arc::new(Hub::new(&config.instance.name));
        let space = hub.add_space(config.space_descriptor())?;
        let devices = VirtualDevices::default();
        let runtime = DeviceRuntime::new(devices.capabilities());

        let mut supervisors = Vec::new();
        for shard_config in &config.shards {
            let descriptor = shard_config.descriptor(&config.instance.name);
            let shard = match space
                .init_shard(descriptor, shard_config.entries.clone())
                .await
            {
                Ok(shard) => shard,
                Err(err) => match space.shard_by_id(ShardId(shard_config.id)) {
                    Ok(shard) => {
                        tracing::error!(
                            shard = %shard_config.alias,
                            state = %shard.state(),
                            error = %err,
                            "shard seeding failed"
                        );
                        shard
                    }
                    Err(_) => return Err(err),
                },
            };
            supervisors.extend(runtime.attach(&shard));
        }

        space.connect_peers(&connector, &config.link_options());
        tracing::info!(space = %space.name(), shards = config.shards.len(), "instance started");

        Ok(Self {
            hub,
            space,
            runtime,
            devices,
            supervisors,
        })
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    #[must_use]
    pub fn space(&self) -> &Space {
        &self.space
    }

    /// Virtual pins, for emulating wiring.
    #[must_use]
    pub fn gpio(&self) -> &Arc<VirtualGpio> {
        &self.devices.gpio
    }

    #[must_use]
    pub fn blobs(&self) -> &Arc<MemoryBlobStore> {
        &self.devices.blobs
    }

    #[must_use]
    pub fn capture(&self) -> &Arc<DummyCapture> {
        &self.devices.capture
    }

    /// Stop behaviors and links, unload every shard and wait for the
    /// supervisors to exit.
    pub async fn shutdown(self) {
        self.runtime.shutdown();
        self.hub.shutdown();
        for supervisor in self.supervisors {
            if let Err(err) = supervisor.await {
                tracing::warn!(error = %err, "behavior supervisor panicked");
            }
        }
        tracing::info!("instance stopped");
    }
}
