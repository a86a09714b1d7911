//! Rendering context passed explicitly to every pass and chain operation.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Colour format of every offscreen target this crate allocates.
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Counts GPU objects that live for a single draw call.
#[derive(Clone, Debug, Default)]
pub struct ResourceTracker {
    live: Arc<AtomicUsize>,
}

impl ResourceTracker {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Wrap `value` so its release is counted when the guard drops.
    pub fn track<T>(&self, kind: &'static str, value: T) -> Transient<T> {
        self.live.fetch_add(1, Ordering::AcqRel);
        Transient {
            value,
            kind,
            live: Arc::clone(&self.live),
        }
    }
}

/// A GPU object scoped to one draw call.
///
/// Dropping the guard releases the object and decrements the context's
/// live-transient counter, on success and error paths alike.
pub struct Transient<T> {
    value: T,
    kind: &'static str,
    live: Arc<AtomicUsize>,
}

impl<T> Deref for Transient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Transient<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Transient<T> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        log::trace!("released transient {}", self.kind);
    }
}

/// Device, queue and bookkeeping shared by passes and chains.
pub struct RenderContext {
    adapter: Option<wgpu::Adapter>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    transients: ResourceTracker,
}

impl RenderContext {
    /// Wrap an existing device and queue (e.g. one created for a window surface).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            adapter: None,
            device,
            queue,
            transients: ResourceTracker::default(),
        }
    }

    /// Create a context without a presentation surface.
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        Self::for_surface(&instance, None).await
    }

    /// Create a context on an adapter able to present to `surface`, if any.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::Resource {
                context: "adapter selection".to_string(),
                message: "no suitable GPU adapter found".to_string(),
            })?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Shader Chain Device"),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| Error::Resource {
                context: "device creation".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            adapter: Some(adapter),
            ..Self::new(device, queue)
        })
    }

    /// Adapter the device was requested from, unless the context wraps a
    /// caller-provided device.
    pub fn adapter(&self) -> Option<&wgpu::Adapter> {
        self.adapter.as_ref()
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn transients(&self) -> &ResourceTracker {
        &self.transients
    }

    /// Number of per-draw GPU objects currently alive.
    pub fn live_transients(&self) -> usize {
        self.transients.live()
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// Errors raised by the device while `f` runs (including at submit) are
    /// returned instead of reaching the uncaptured-error handler.
    pub fn scoped<T>(&self, context: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let result = f();

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if let Some(e) = oom {
            return Err(Error::from_wgpu(context, e));
        }
        if let Some(e) = validation {
            return Err(Error::from_wgpu(context, e));
        }
        result
    }
}
