//! GPU memory for frame attachments.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Wrapper around a `gpu_allocator` allocator bound to one device.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    /// Create an image and bind freshly allocated memory to it.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let image = unsafe {
            self.device
                .create_image(create_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bind = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };

        let mut gpu_image = GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            extent: vk::Extent2D {
                width: create_info.extent.width,
                height: create_info.extent.height,
            },
        };

        if let Err(e) = bind {
            let _ = self.free_image(&mut gpu_image);
            return Err(e.into());
        }

        tracing::debug!(
            "Allocated image '{}' {}x{} {:?}",
            name,
            gpu_image.extent.width,
            gpu_image.extent.height,
            gpu_image.format
        );

        Ok(gpu_image)
    }

    /// Destroy an image and return its memory. Safe to call twice.
    ///
    /// The image must not be referenced by pending GPU work.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if let Some(allocation) = image.allocation.take() {
            self.inner()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        if image.image != vk::Image::null() {
            unsafe {
                self.device.destroy_image(image.image, None);
            }
            image.image = vk::Image::null();
        }

        Ok(())
    }

    /// Release all GPU memory.
    ///
    /// Must run before the device is destroyed. Allocations still alive are
    /// reported as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl GpuImage {
    /// Whether the image still holds device resources.
    pub fn is_live(&self) -> bool {
        self.image != vk::Image::null()
    }
}
