//! Viewer application: compute clear, graphics blit.

use std::sync::Arc;

use ash::vk;
use glam::Vec3;
use gpu_allocator::MemoryLocation;
use tracing::{debug, info, warn};

use vkpace_app::{FrameContext, FramePayload, PacedApp, QueueGraph, QueueKind, StageInfo};
use vkpace_gpu::{GpuImage, VulkanBackend};

/// Format of the offscreen colour target.
const TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Radians of hue rotation per second.
const HUE_SPEED: f32 = 0.8;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_LAYERS: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

/// Viewer state.
///
/// Keeps one offscreen target per frame slot so the compute stage of one
/// frame never clears an image the graphics stage of another is reading.
pub struct Viewer {
    backend: Arc<VulkanBackend>,
    targets: Vec<Option<GpuImage>>,
    extent: vk::Extent2D,
    time: f32,
}

impl Viewer {
    fn color(&self) -> Vec3 {
        let phase = Vec3::new(0.0, 2.094, 4.189);
        (Vec3::splat(self.time * HUE_SPEED) + phase)
            .to_array()
            .map(f32::cos)
            .into()
    }

    /// Offscreen target of `slot`, created at the current extent on first use.
    fn target(&mut self, slot: usize) -> anyhow::Result<vk::Image> {
        if self.targets.len() <= slot {
            self.targets.resize_with(slot + 1, || None);
        }
        if let Some(target) = &self.targets[slot] {
            return Ok(target.image);
        }

        let gpu = self.backend.gpu();
        let families = gpu.unique_queue_families();
        let mut create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TARGET_FORMAT)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        create_info = if families.len() > 1 {
            create_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let image = gpu.allocator().lock().create_image(
            &create_info,
            MemoryLocation::GpuOnly,
            &format!("viewer target {slot}"),
        )?;
        debug!(
            "Created offscreen target {slot} ({}x{})",
            self.extent.width, self.extent.height
        );
        let handle = image.image;
        self.targets[slot] = Some(image);
        Ok(handle)
    }

    fn free_targets(&mut self) {
        let mut allocator = self.backend.gpu().allocator().lock();
        for mut target in self.targets.drain(..).flatten() {
            if let Err(e) = allocator.free_image(&mut target) {
                warn!("Failed to free offscreen target: {e}");
            }
        }
    }

    fn record_clear(&self, device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image) {
        let color = self.color() * 0.5 + Vec3::splat(0.5);
        let clear = vk::ClearColorValue {
            float32: [color.x, color.y, color.z, 1.0],
        };

        unsafe {
            // Previous contents are irrelevant; the blit of the last use has
            // finished once the slot fence was waited on
            let to_dst = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_dst),
            );

            device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear,
                std::slice::from_ref(&COLOR_RANGE),
            );

            let to_src = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::empty())
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_src),
            );
        }
    }

    fn record_blit(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        source: vk::Image,
        frame: &FrameContext,
    ) {
        unsafe {
            // The edge semaphore already made the clear visible to transfer
            let swapchain_to_dst = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(frame.image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&swapchain_to_dst),
            );

            let far = |extent: vk::Extent2D| vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            };
            let blit = vk::ImageBlit {
                src_subresource: COLOR_LAYERS,
                src_offsets: [vk::Offset3D::default(), far(self.extent)],
                dst_subresource: COLOR_LAYERS,
                dst_offsets: [vk::Offset3D::default(), far(frame.extent)],
            };
            device.cmd_blit_image(
                cmd,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                frame.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            let to_present = vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::empty())
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(frame.image)
                .subresource_range(COLOR_RANGE);
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&to_present),
            );
        }
    }
}

impl FramePayload for Viewer {
    fn record_stage(
        &mut self,
        stage: &StageInfo,
        frame: &FrameContext,
        cmd: vk::CommandBuffer,
    ) -> anyhow::Result<()> {
        let image = self.target(frame.slot)?;
        let backend = Arc::clone(&self.backend);
        let device = backend.gpu().device();

        match stage.queue {
            QueueKind::Compute => self.record_clear(device, cmd, image),
            QueueKind::Graphics => self.record_blit(device, cmd, image, frame),
            QueueKind::Transfer => anyhow::bail!("viewer has no transfer stage"),
        }
        Ok(())
    }

    fn resize_attachments(&mut self, extent: vk::Extent2D) -> anyhow::Result<()> {
        // Every slot has drained; targets are recreated lazily at the new size
        self.free_targets();
        self.extent = extent;
        Ok(())
    }
}

impl PacedApp for Viewer {
    fn init(backend: &Arc<VulkanBackend>, extent: vk::Extent2D) -> anyhow::Result<Self> {
        info!("{}", backend.gpu().capabilities().summary());
        Ok(Self {
            backend: Arc::clone(backend),
            targets: Vec::new(),
            extent,
            time: 0.0,
        })
    }

    fn queue_graph(&self) -> QueueGraph {
        let mut builder = QueueGraph::builder();
        let clear = builder.stage("clear", QueueKind::Compute);
        let blit = builder.stage("blit", QueueKind::Graphics);
        builder
            .uses_swapchain_image(blit)
            .image_wait_mask(vk::PipelineStageFlags::TRANSFER)
            .edge(clear, blit, vk::PipelineStageFlags::TRANSFER);
        builder.build()
    }

    fn update(&mut self, dt: f32) {
        self.time += dt;
    }

    fn cleanup(&mut self, _backend: &VulkanBackend) {
        self.free_targets();
    }
}
