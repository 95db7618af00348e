//! Frame slots: the per-frame synchronization objects and recording targets.
//!
//! The pool holds exactly N slots, independent of how many images the
//! swapchain has. Waiting on a slot's fence before reusing it is the only
//! thing keeping the CPU from queueing unbounded work.

use ash::vk;
use tracing::debug;

use crate::backend::{GpuBackend, QueueKind};
use crate::error::Result;
use crate::submit::{QueueGraph, StageId};

/// Synchronization objects and command buffers of one frame in flight.
#[derive(Debug)]
pub struct FrameSlot {
    /// Position in the pool.
    pub index: usize,
    /// Signaled by the presentation engine once the acquired image is usable.
    pub image_acquired: vk::Semaphore,
    /// Signaled by the final stage; presentation waits on it.
    ///
    /// Presentation has no fence, so nothing proves the present of this
    /// slot's previous frame has consumed the semaphore before it is signaled
    /// again. Recent validation layers warn about this reuse.
    pub render_complete: vk::Semaphore,
    /// One semaphore per graph edge, signaled by the producing stage.
    pub stage_done: Vec<vk::Semaphore>,
    /// Signaled when the final stage finishes. Created signaled.
    pub in_flight: vk::Fence,
    /// One recording target per graph stage.
    pub command_buffers: Vec<vk::CommandBuffer>,
    stage_queues: Vec<QueueKind>,
    last_frame: Option<u64>,
}

impl FrameSlot {
    fn empty(index: usize) -> Self {
        Self {
            index,
            image_acquired: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            stage_done: Vec::new(),
            in_flight: vk::Fence::null(),
            command_buffers: Vec::new(),
            stage_queues: Vec::new(),
            last_frame: None,
        }
    }

    /// Create the objects of one slot. Anything already created is destroyed
    /// again if a later creation fails.
    fn new<B: GpuBackend + ?Sized>(backend: &B, index: usize, graph: &QueueGraph) -> Result<Self> {
        let mut slot = Self::empty(index);
        match slot.create_objects(backend, graph) {
            Ok(()) => Ok(slot),
            Err(e) => {
                slot.destroy(backend);
                Err(e)
            }
        }
    }

    fn create_objects<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        graph: &QueueGraph,
    ) -> Result<()> {
        self.image_acquired = backend.create_semaphore()?;
        self.render_complete = backend.create_semaphore()?;
        for _ in 0..graph.edge_count() {
            self.stage_done.push(backend.create_semaphore()?);
        }
        self.in_flight = backend.create_fence(true)?;
        for stage in graph.stages() {
            let cmd = backend.allocate_command_buffers(stage.queue, 1)?;
            self.command_buffers.extend(cmd);
            self.stage_queues.push(stage.queue);
        }
        Ok(())
    }

    /// Recording target of a stage.
    pub fn command_buffer(&self, stage: StageId) -> vk::CommandBuffer {
        self.command_buffers[stage.index()]
    }

    /// Frame counter of the last frame submitted through this slot.
    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        for (&cmd, &queue) in self.command_buffers.iter().zip(&self.stage_queues) {
            backend.free_command_buffers(queue, &[cmd]);
        }
        self.command_buffers.clear();
        self.stage_queues.clear();

        for semaphore in self
            .stage_done
            .drain(..)
            .chain([self.image_acquired, self.render_complete])
        {
            if semaphore != vk::Semaphore::null() {
                backend.destroy_semaphore(semaphore);
            }
        }
        self.image_acquired = vk::Semaphore::null();
        self.render_complete = vk::Semaphore::null();

        if self.in_flight != vk::Fence::null() {
            backend.destroy_fence(self.in_flight);
            self.in_flight = vk::Fence::null();
        }
    }
}

/// Fixed ring of N frame slots.
pub struct FrameSlotPool {
    slots: Vec<FrameSlot>,
    frame_counter: u64,
    acquired: Option<usize>,
}

impl FrameSlotPool {
    /// Create a pool with `frames_in_flight` slots shaped after `graph`.
    pub fn new<B: GpuBackend + ?Sized>(
        backend: &B,
        frames_in_flight: usize,
        graph: &QueueGraph,
    ) -> Result<Self> {
        assert!(frames_in_flight > 0, "at least one frame slot is required");

        let mut pool = Self {
            slots: Vec::with_capacity(frames_in_flight),
            frame_counter: 0,
            acquired: None,
        };
        for index in 0..frames_in_flight {
            match FrameSlot::new(backend, index, graph) {
                Ok(slot) => pool.slots.push(slot),
                Err(e) => {
                    pool.destroy(backend);
                    return Err(e);
                }
            }
        }

        debug!(
            "Created {} frame slots ({} stages, {} edges)",
            frames_in_flight,
            graph.stage_count(),
            graph.edge_count()
        );
        Ok(pool)
    }

    /// Number of frames that can be in flight.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Logical frames advanced so far.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Slot the next `acquire_slot` will return.
    pub fn current_index(&self) -> usize {
        (self.frame_counter % self.slots.len() as u64) as usize
    }

    /// Slot currently held by the frame being built, if any.
    pub fn acquired(&self) -> Option<usize> {
        self.acquired
    }

    /// Get a slot.
    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    /// All slots.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Take slot `frame_counter mod N`, blocking until the GPU is done with
    /// the work it was last used for.
    ///
    /// # Panics
    /// If a slot is already held; call [`Self::advance`] or
    /// [`Self::release`] first.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_slot<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        timeout_ns: u64,
    ) -> Result<usize> {
        assert!(
            self.acquired.is_none(),
            "frame slot {:?} acquired twice without advancing",
            self.acquired
        );

        let index = self.current_index();
        backend.wait_for_fences(&[self.slots[index].in_flight], timeout_ns)?;
        self.acquired = Some(index);
        Ok(index)
    }

    /// Reset the slot fence so the final stage of this frame can signal it.
    ///
    /// Only call this once an image was acquired; a frame skipped before
    /// submission must leave the fence signaled.
    pub fn arm<B: GpuBackend + ?Sized>(&self, backend: &B, index: usize) -> Result<()> {
        debug_assert_eq!(self.acquired, Some(index), "arming a slot that is not held");
        backend.reset_fences(&[self.slots[index].in_flight])
    }

    /// Reset every recording target of a slot. The slot fence must have been
    /// waited on first.
    pub fn reset_recording_targets<B: GpuBackend + ?Sized>(
        &self,
        backend: &B,
        index: usize,
    ) -> Result<()> {
        debug_assert_eq!(self.acquired, Some(index), "resetting a slot that is not held");
        for &cmd in &self.slots[index].command_buffers {
            backend.reset_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Finish the held slot and move to the next frame.
    pub fn advance(&mut self) {
        let Some(index) = self.acquired.take() else {
            panic!("advance without an acquired frame slot");
        };
        self.slots[index].last_frame = Some(self.frame_counter);
        self.frame_counter += 1;
    }

    /// Give the held slot back without submitting anything.
    pub fn release(&mut self) {
        self.acquired = None;
    }

    /// Block until every slot's fence is signaled.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_all<B: GpuBackend + ?Sized>(&self, backend: &B, timeout_ns: u64) -> Result<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.in_flight).collect();
        if fences.is_empty() {
            return Ok(());
        }
        backend.wait_for_fences(&fences, timeout_ns)
    }

    /// Destroy all slots.
    ///
    /// No slot may be referenced by pending GPU work.
    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        for slot in &mut self.slots {
            slot.destroy(backend);
        }
        self.slots.clear();
        self.acquired = None;
    }
}
