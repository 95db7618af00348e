//! Scripted collaborators for driving a scheduler against [`SimGpu`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ash::vk;
use crossbeam::channel::{self, Receiver, Sender};
use tracing_subscriber::EnvFilter;
use vkpace_app::{
    FrameContext, FramePayload, FrameScheduler, SchedulerConfig, SurfaceSource, UiDrawData,
    UiDrawList, UiOverlay, UiVertex,
};
use vkpace_gpu::{GpuError, QueueGraph, StageInfo};

use crate::sim::SimGpu;

/// Install a test-writer `tracing` subscriber once per test binary.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

/// Tag the recording payload puts on a stage's command buffer.
pub fn stage_tag(frame: u64, stage: &str) -> String {
    format!("f{frame}/{stage}")
}

/// Build a scheduler on `sim` at the simulator's current surface extent.
pub fn scheduler(
    sim: &Arc<SimGpu>,
    graph: QueueGraph,
    config: SchedulerConfig,
) -> Result<FrameScheduler<SimGpu>, GpuError> {
    FrameScheduler::new(Arc::clone(sim), graph, sim.surface_extent(), config)
}

/// Window whose size changes only when told to.
///
/// Every resize updates the simulated surface and is queued on the resize
/// channel. Extents pushed with [`SimWindow::after_wait`] are applied one per
/// [`SurfaceSource::wait_for_events`] call, like a window being restored
/// while the loop sleeps.
pub struct SimWindow {
    sim: Arc<SimGpu>,
    extent: vk::Extent2D,
    after_wait: VecDeque<vk::Extent2D>,
    waits: usize,
    tx: Sender<vk::Extent2D>,
    rx: Receiver<vk::Extent2D>,
}

impl SimWindow {
    pub fn new(sim: &Arc<SimGpu>) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            extent: sim.surface_extent(),
            sim: Arc::clone(sim),
            after_wait: VecDeque::new(),
            waits: 0,
            tx,
            rx,
        }
    }

    /// Resize the window now.
    pub fn resize(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
        self.sim.set_surface_extent(extent);
        let _ = self.tx.send(extent);
    }

    /// Resize on the next wait for events.
    pub fn after_wait(&mut self, extent: vk::Extent2D) {
        self.after_wait.push_back(extent);
    }

    /// Number of times the scheduler waited for events.
    pub fn waits(&self) -> usize {
        self.waits
    }
}

impl SurfaceSource for SimWindow {
    fn current_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn wait_for_events(&mut self) {
        self.waits += 1;
        if let Some(extent) = self.after_wait.pop_front() {
            self.resize(extent);
        }
    }

    fn resize_events(&self) -> Option<&Receiver<vk::Extent2D>> {
        Some(&self.rx)
    }
}

/// What the payload saw for one recorded stage.
#[derive(Debug, Clone)]
pub struct RecordedStage {
    pub frame: u64,
    pub stage: String,
    pub cmd: vk::CommandBuffer,
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub previous_layout: vk::ImageLayout,
}

/// Overlay that records where it was appended.
#[derive(Debug, Default)]
pub struct RecordingOverlay {
    /// Emit no geometry; the scheduler must then skip the append.
    pub empty: bool,
    pub begun: usize,
    /// Frame number and command buffer of every append.
    pub appended: Vec<(u64, vk::CommandBuffer)>,
}

impl UiOverlay for RecordingOverlay {
    fn begin_frame(&mut self, _frame: &FrameContext) {
        self.begun += 1;
    }

    fn build_ui(&mut self) -> UiDrawData {
        if self.empty {
            return UiDrawData::default();
        }
        UiDrawData {
            display_size: [1.0, 1.0],
            lists: vec![UiDrawList {
                vertices: vec![UiVertex::default(); 3],
                indices: vec![0, 1, 2],
                clip_rect: [0.0, 0.0, 1.0, 1.0],
            }],
        }
    }

    fn append_draw_commands(
        &mut self,
        cmd: vk::CommandBuffer,
        frame: &FrameContext,
        draw_data: &UiDrawData,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!draw_data.is_empty(), "empty draw data appended");
        self.appended.push((frame.frame_number, cmd));
        Ok(())
    }
}

type CostFn = Box<dyn FnMut(&StageInfo, u64) -> u64>;

/// Payload that annotates costs on the simulator and records what it saw.
pub struct RecordingPayload {
    sim: Arc<SimGpu>,
    costs: HashMap<String, u64>,
    cost_fn: Option<CostFn>,
    fail_on_frame: Option<u64>,
    pub overlay: Option<RecordingOverlay>,
    pub recorded: Vec<RecordedStage>,
    pub resized: Vec<vk::Extent2D>,
}

impl RecordingPayload {
    pub fn new(sim: &Arc<SimGpu>) -> Self {
        Self {
            sim: Arc::clone(sim),
            costs: HashMap::new(),
            cost_fn: None,
            fail_on_frame: None,
            overlay: None,
            recorded: Vec::new(),
            resized: Vec::new(),
        }
    }

    /// Fixed GPU cost, in ticks, of every recording of `stage`.
    pub fn with_cost(mut self, stage: &str, ticks: u64) -> Self {
        self.costs.insert(stage.to_string(), ticks);
        self
    }

    /// GPU cost computed per stage and frame.
    pub fn with_cost_fn(mut self, f: impl FnMut(&StageInfo, u64) -> u64 + 'static) -> Self {
        self.cost_fn = Some(Box::new(f));
        self
    }

    pub fn with_overlay(mut self, overlay: RecordingOverlay) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Fail while recording frame `frame`.
    pub fn fail_on_frame(mut self, frame: u64) -> Self {
        self.fail_on_frame = Some(frame);
        self
    }

    /// Stages recorded for `frame`.
    pub fn stages_of(&self, frame: u64) -> Vec<&RecordedStage> {
        self.recorded.iter().filter(|r| r.frame == frame).collect()
    }

    pub fn last(&self) -> Option<&RecordedStage> {
        self.recorded.last()
    }
}

impl FramePayload for RecordingPayload {
    fn record_stage(
        &mut self,
        stage: &StageInfo,
        frame: &FrameContext,
        cmd: vk::CommandBuffer,
    ) -> anyhow::Result<()> {
        if self.fail_on_frame == Some(frame.frame_number) {
            anyhow::bail!("scripted failure in stage '{}'", stage.name);
        }

        let cost = match &mut self.cost_fn {
            Some(f) => f(stage, frame.frame_number),
            None => self.costs.get(&stage.name).copied().unwrap_or(1),
        };
        self.sim
            .annotate(cmd, cost, stage_tag(frame.frame_number, &stage.name));

        self.recorded.push(RecordedStage {
            frame: frame.frame_number,
            stage: stage.name.clone(),
            cmd,
            slot: frame.slot,
            image_index: frame.image_index,
            extent: frame.extent,
            viewport: frame.viewport(),
            scissor: frame.scissor(),
            previous_layout: frame.previous_layout,
        });
        Ok(())
    }

    fn overlay(&mut self) -> Option<&mut dyn UiOverlay> {
        self.overlay.as_mut().map(|o| o as &mut dyn UiOverlay)
    }

    fn resize_attachments(&mut self, extent: vk::Extent2D) -> anyhow::Result<()> {
        self.resized.push(extent);
        Ok(())
    }
}
