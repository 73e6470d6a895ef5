//! Owns the running controllers and swaps them on reload

use crate::config::{FileConfig, NodeEntry};
use crate::error::{ControllerError, Result};
use crate::logger::log;

use super::Controller;

/// Builds a controller (with its collaborators) for one configured node
pub type ControllerFactory = Box<dyn Fn(&NodeEntry) -> Result<Controller> + Send + Sync>;

/// Produces the node factory of one controller generation. Called on every
/// start, so each generation can get its own engine instance.
pub type GenerationFactory = Box<dyn Fn() -> ControllerFactory + Send + Sync>;

/// Supervisor holding one controller per configured node.
///
/// Reload closes every running controller, waiting for in-flight ticks,
/// before any replacement starts, so two instances never share a tag space.
pub struct Supervisor {
    generation: GenerationFactory,
    controllers: Vec<Controller>,
}

impl Supervisor {
    pub fn new(generation: GenerationFactory) -> Self {
        Self {
            generation,
            controllers: Vec::new(),
        }
    }

    /// Start a controller for every node. If any node fails to start, the
    /// ones already started are closed and the error is returned.
    pub async fn start(&mut self, config: &FileConfig) -> Result<usize> {
        if !self.controllers.is_empty() {
            return Err(ControllerError::Lifecycle(
                "supervisor is already running".to_string(),
            ));
        }

        let factory = (self.generation)();
        for (i, node) in config.nodes.iter().enumerate() {
            let started = async {
                let mut controller = factory(node)?;
                controller.start().await?;
                Ok::<_, ControllerError>(controller)
            }
            .await;

            match started {
                Ok(controller) => self.controllers.push(controller),
                Err(e) => {
                    log::error!(
                        node = i,
                        node_id = node.api_config.node_id,
                        error = %e,
                        "Failed to start node"
                    );
                    self.close().await;
                    return Err(e);
                }
            }
        }

        log::info!(nodes = self.controllers.len(), "All nodes started");
        Ok(self.controllers.len())
    }

    /// Close all controllers, then start a fresh generation from `config`
    pub async fn reload(&mut self, config: &FileConfig) -> Result<usize> {
        log::info!("Reloading nodes");
        self.close().await;
        self.start(config).await
    }

    /// Close every running controller
    pub async fn close(&mut self) {
        for mut controller in self.controllers.drain(..) {
            controller.close().await;
        }
    }

    /// Number of running controllers
    pub fn running(&self) -> usize {
        self.controllers.len()
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }
}
