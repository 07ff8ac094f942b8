//! Controller assembly.
//!
//! Wires loaded descriptors into a [`Controller`]: one device-type binding
//! per descriptor, each registering its subscriber object and attempting
//! the handler subscription.

use std::sync::Arc;

use tracing::{info, warn};

use extdev_bus::BusTransport;
use extdev_controller::{Controller, SystemStats};
use extdev_core::DeviceRegistry;

use crate::descriptor::{DescriptorLoader, DescriptorResult};

/// An assembled controller together with its collaborators.
pub struct Runtime {
    controller: Controller,
    registry: Arc<dyn DeviceRegistry>,
    bus: Arc<dyn BusTransport>,
}

impl Runtime {
    /// Builds a controller and registers every descriptor the loader
    /// finds. A descriptor that fails to register is logged and skipped;
    /// the remaining types still come up.
    pub async fn init(
        bus: Arc<dyn BusTransport>,
        registry: Arc<dyn DeviceRegistry>,
        loader: &DescriptorLoader,
    ) -> DescriptorResult<Self> {
        let controller = Controller::new(Arc::clone(&bus), Arc::clone(&registry));
        Self::register_descriptors(&controller, loader).await?;
        Ok(Self {
            controller,
            registry,
            bus,
        })
    }

    /// Like [`init`](Self::init), with a system statistics provider for
    /// `dump_info` output.
    pub async fn init_with_system_stats(
        bus: Arc<dyn BusTransport>,
        registry: Arc<dyn DeviceRegistry>,
        stats: Arc<dyn SystemStats>,
        loader: &DescriptorLoader,
    ) -> DescriptorResult<Self> {
        let controller =
            Controller::with_system_stats(Arc::clone(&bus), Arc::clone(&registry), stats);
        Self::register_descriptors(&controller, loader).await?;
        Ok(Self {
            controller,
            registry,
            bus,
        })
    }

    async fn register_descriptors(
        controller: &Controller,
        loader: &DescriptorLoader,
    ) -> DescriptorResult<()> {
        let descriptors = loader.load()?;
        let total = descriptors.len();
        let mut registered = 0usize;
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            match controller.add_type(descriptor.into_type_descriptor()).await {
                Ok(_) => registered += 1,
                Err(err) => warn!(ty = %name, %err, "skipping device type"),
            }
        }
        info!("registered {registered} of {total} external device type(s)");
        Ok(())
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<dyn BusTransport> {
        &self.bus
    }
}
