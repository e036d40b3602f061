//! Top-level orchestrator owning both device APIs, the single compute
//! context and the render-target table.

use std::sync::Arc;

use crate::compute::{ComputeApi, ComputeError, ComputeResult, DeviceContext};
use crate::config::{ConfigError, RuntimeConfig};
use crate::graphics::{
    Framebuffer, GlError, GlResult, GraphicsApi, RenderTargetError, RenderTargets,
};

/// Errors surfaced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),
    #[error("Render target error: {0}")]
    RenderTarget(#[from] RenderTargetError),
    #[error("Graphics error: {0}")]
    Graphics(#[from] GlError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Owns the compute context (at most one) and the render targets it may alias.
///
/// Compute state is always torn down before render targets, so interop views
/// are released before the graphics resources behind them.
pub struct Runtime {
    // Declaration order is drop order.
    context: Option<DeviceContext>,
    targets: RenderTargets,
    compute: Arc<dyn ComputeApi>,
    graphics: Arc<dyn GraphicsApi>,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        graphics: Arc<dyn GraphicsApi>,
        config: RuntimeConfig,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        Ok(Self {
            context: None,
            targets: RenderTargets::new(graphics.clone()),
            compute,
            graphics,
            config,
        })
    }

    /// Runtime over a backend implementing both pipelines on one device.
    pub fn with_device<D>(device: Arc<D>, config: RuntimeConfig) -> RuntimeResult<Self>
    where
        D: ComputeApi + GraphicsApi + 'static,
    {
        let compute: Arc<dyn ComputeApi> = device.clone();
        let graphics: Arc<dyn GraphicsApi> = device;
        Self::new(compute, graphics, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn compute_api(&self) -> &Arc<dyn ComputeApi> {
        &self.compute
    }

    pub fn graphics_api(&self) -> &Arc<dyn GraphicsApi> {
        &self.graphics
    }

    /// Creates the compute context bound to the active rendering surface.
    ///
    /// Fails with [`ComputeError::DuplicateContext`] while one exists.
    pub fn create_context(&mut self) -> ComputeResult<&mut DeviceContext> {
        if self.context.is_some() {
            return Err(ComputeError::DuplicateContext);
        }
        let surface = self
            .graphics
            .current_surface()
            .ok_or(ComputeError::NoSurface)?;
        let context = DeviceContext::create(self.compute.clone(), surface, &self.config)?;
        Ok(self.context.insert(context))
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> ComputeResult<&DeviceContext> {
        self.context.as_ref().ok_or(ComputeError::NoContext)
    }

    pub fn context_mut(&mut self) -> ComputeResult<&mut DeviceContext> {
        self.context.as_mut().ok_or(ComputeError::NoContext)
    }

    /// Destroys the compute context and everything it created.
    pub fn destroy_context(&mut self) -> ComputeResult<()> {
        self.context
            .take()
            .ok_or(ComputeError::NoContext)?
            .destroy()
    }

    pub fn targets(&self) -> &RenderTargets {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut RenderTargets {
        &mut self.targets
    }

    /// Both halves at once: compute objects are created against render targets.
    pub fn split_mut(&mut self) -> ComputeResult<(&mut DeviceContext, &mut RenderTargets)> {
        let context = self.context.as_mut().ok_or(ComputeError::NoContext)?;
        Ok((context, &mut self.targets))
    }

    pub fn create_framebuffer(&self, width: u32, height: u32) -> GlResult<Framebuffer> {
        Framebuffer::new(self.graphics.clone(), width, height)
    }

    /// Tears down compute state, then render targets. Both always run.
    pub fn shutdown(mut self) -> RuntimeResult<()> {
        let compute = match self.context.take() {
            Some(context) => context.destroy(),
            None => Ok(()),
        };
        let targets = self.targets.clear();
        compute?;
        targets?;
        log::debug!("Runtime shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("context", &self.context)
            .field("targets", &self.targets)
            .field("config", &self.config)
            .finish()
    }
}
