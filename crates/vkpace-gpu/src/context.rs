//! Device and queue ownership.

use crate::backend::QueueKind;
use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Vulkan instance, device, queues and allocator.
pub struct GpuContext {
    // Keeps the loader alive for the lifetime of the instance
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) compute_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
}

impl GpuContext {
    /// Vulkan loader entry.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Vulkan instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the logical device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Queue handle for a queue kind.
    pub fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
            QueueKind::Transfer => self.transfer_queue,
        }
    }

    /// Queue family index for a queue kind.
    ///
    /// Kinds without a dedicated family share the graphics family.
    pub fn queue_family(&self, kind: QueueKind) -> u32 {
        match kind {
            QueueKind::Graphics => self.families.graphics,
            QueueKind::Compute => self.families.compute,
            QueueKind::Transfer => self.families.transfer,
        }
    }

    /// Distinct queue family indices in use.
    pub fn unique_queue_families(&self) -> Vec<u32> {
        self.families.unique().into_iter().collect()
    }

    /// Access the image allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Block until the device is idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Allocator memory must go before the device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for [`GpuContext`].
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "vkpace".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name reported to the driver.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Load Vulkan, pick a device and create the queues.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;
        let physical_device = unsafe { select_physical_device(&instance) }?;
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        if !capabilities.meets_requirements() {
            unsafe { instance.destroy_instance(None) };
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let families = match unsafe { find_queue_families(&instance, physical_device) } {
            Ok(families) => families,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        tracing::debug!(
            "Queue families: graphics={}, compute={}, transfer={}",
            families.graphics,
            families.compute,
            families.transfer
        );

        let (device, graphics_queue, compute_queue, transfer_queue) =
            match unsafe { create_device(&instance, physical_device, &families) } {
                Ok(created) => created,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };
        let device = Arc::new(device);

        let allocator =
            match unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe {
                        device.destroy_device(None);
                        instance.destroy_instance(None);
                    }
                    return Err(e);
                }
            };

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            families,
            graphics_queue,
            compute_queue,
            transfer_queue,
        })
    }
}

/// Queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    fn unique(&self) -> BTreeSet<u32> {
        [self.graphics, self.compute, self.transfer]
            .into_iter()
            .collect()
    }
}

/// Pick queue families from their flags.
///
/// Compute prefers a family without graphics and falls back to graphics.
/// Transfer prefers a family with neither and falls back to compute.
pub(crate) fn pick_queue_families(families: &[vk::QueueFamilyProperties]) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let flags = family.queue_flags;
        if family.queue_count == 0 {
            continue;
        }

        if flags.contains(vk::QueueFlags::GRAPHICS) && graphics.is_none() {
            graphics = Some(i);
        }
        if flags.contains(vk::QueueFlags::COMPUTE)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && compute.is_none()
        {
            compute = Some(i);
        }
        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            && transfer.is_none()
        {
            transfer = Some(i);
        }
    }

    let graphics = graphics?;
    let compute = compute.unwrap_or(graphics);
    let transfer = transfer.unwrap_or(compute);

    Some(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);
    pick_queue_families(&families).ok_or(GpuError::NoSuitableDevice)
}

fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device and fetch one queue per kind.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(families.graphics, 0);
    let compute_queue = device.get_device_queue(families.compute, 0);
    let transfer_queue = device.get_device_queue(families.transfer, 0);

    Ok((device, graphics_queue, compute_queue, transfer_queue))
}
