use std::sync::Arc;

use anyhow::Result;
use wgpu::{Adapter, Device, Instance, Queue, Surface};

/// Device, queue and the capabilities the preview renderer cares about.
///
/// Device and queue are reference counted so the shader backend and the
/// render target can hold them without borrowing the context.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    /// Whether `Rgba32Float` textures can be sampled with linear filtering
    pub float_filterable: bool,
}

impl GpuContext {
    /// Context without a window, used for tests and offline rendering.
    pub async fn headless() -> Result<Self> {
        let instance = Self::create_instance();
        let adapter = Self::request_adapter(&instance, None).await?;
        Self::from_adapter(instance, adapter).await
    }

    /// Context able to present to `surface`.
    pub async fn for_surface(instance: Instance, surface: &Surface<'_>) -> Result<Self> {
        let adapter = Self::request_adapter(&instance, Some(surface)).await?;
        Self::from_adapter(instance, adapter).await
    }

    pub fn create_instance() -> Instance {
        Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        })
    }

    async fn request_adapter(instance: &Instance, surface: Option<&Surface<'_>>) -> Result<Adapter> {
        // Hardware first, then the software fallback
        if let Some(adapter) = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
        {
            return Ok(adapter);
        }

        instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: surface,
                force_fallback_adapter: true,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("Failed to find suitable GPU adapter"))
    }

    async fn from_adapter(instance: Instance, adapter: Adapter) -> Result<Self> {
        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let float_filterable = adapter
            .features()
            .contains(wgpu::Features::FLOAT32_FILTERABLE);
        let required_features = if float_filterable {
            wgpu::Features::FLOAT32_FILTERABLE
        } else {
            log::warn!("Float textures are not filterable, statistics will be point sampled");
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Glint Device"),
                    required_features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu error: {}", error);
        }));

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            float_filterable,
        })
    }
}

/// Run `f` inside a validation error scope and return its value together
/// with the captured error message, if any.
pub fn capture_validation<T>(device: &Device, f: impl FnOnce() -> T) -> (T, Option<String>) {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    let error = pollster::block_on(device.pop_error_scope()).map(|e| e.to_string());
    (value, error)
}

#[cfg(test)]
pub(crate) fn test_gpu() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    match pollster::block_on(GpuContext::headless()) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("Skipping GPU test: {}", e);
            None
        }
    }
}
