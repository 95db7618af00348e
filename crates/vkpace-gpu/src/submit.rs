//! Queue submission graph.
//!
//! A frame is a small static DAG of stages, each submitted to one hardware
//! queue. An edge means "the consumer reads what the producer wrote", and is
//! realised as a semaphore the producer signals and the consumer waits on.
//! There is exactly one sink: its completion is what the frame slot fence
//! guards and what presentation waits on.
//!
//! The graph never reorders work. Callers walk [`QueueGraph::order`] and
//! submit stages in that order; [`FrameSubmission`] asserts this in debug
//! builds.

use std::collections::VecDeque;
use std::fmt;

use ash::vk;

use crate::backend::{GpuBackend, QueueKind, QueueSubmit, SemaphoreWait};
use crate::error::Result;
use crate::sync::FrameSlot;

/// Index of a stage in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    /// Position of the stage in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

/// A node of the graph.
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub id: StageId,
    pub name: String,
    pub queue: QueueKind,
    /// Whether the stage writes to or reads from the swapchain image.
    pub uses_swapchain_image: bool,
}

/// Producer → consumer dependency between two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEdge {
    pub producer: StageId,
    pub consumer: StageId,
    /// Pipeline stages of the consumer that wait for the producer.
    pub wait_mask: vk::PipelineStageFlags,
}

/// Wait/signal set for one stage of one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSync {
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

/// Validated, topologically ordered submission graph.
#[derive(Debug, Clone)]
pub struct QueueGraph {
    stages: Vec<StageInfo>,
    edges: Vec<QueueEdge>,
    order: Vec<StageId>,
    sink: StageId,
    image_stage: StageId,
    image_wait_mask: vk::PipelineStageFlags,
}

impl QueueGraph {
    /// Start describing a graph.
    pub fn builder() -> QueueGraphBuilder {
        QueueGraphBuilder::default()
    }

    /// A single graphics stage that renders into the swapchain image.
    pub fn graphics_only() -> Self {
        let mut builder = Self::builder();
        let graphics = builder.stage("graphics", QueueKind::Graphics);
        builder.uses_swapchain_image(graphics);
        builder.build()
    }

    /// A compute stage whose output the graphics stage consumes.
    pub fn compute_then_graphics() -> Self {
        let mut builder = Self::builder();
        let compute = builder.stage("compute", QueueKind::Compute);
        let graphics = builder.stage("graphics", QueueKind::Graphics);
        builder.uses_swapchain_image(graphics);
        builder.edge(
            compute,
            graphics,
            vk::PipelineStageFlags::VERTEX_INPUT | vk::PipelineStageFlags::FRAGMENT_SHADER,
        );
        builder.build()
    }

    /// All stages in declaration order.
    pub fn stages(&self) -> &[StageInfo] {
        &self.stages
    }

    /// A single stage.
    pub fn stage(&self, id: StageId) -> &StageInfo {
        &self.stages[id.0]
    }

    /// All edges in declaration order. Edge `i` uses `stage_done[i]`.
    pub fn edges(&self) -> &[QueueEdge] {
        &self.edges
    }

    /// Stages in submission order.
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    /// The final stage: guarded by the slot fence, waited on by present.
    pub fn sink(&self) -> StageId {
        self.sink
    }

    /// The stage that waits on the image-acquired semaphore.
    pub fn image_stage(&self) -> StageId {
        self.image_stage
    }

    /// Number of stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges consumed by `stage`, with their index.
    pub fn incoming(&self, stage: StageId) -> impl Iterator<Item = (usize, &QueueEdge)> {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.consumer == stage)
    }

    /// Edges produced by `stage`, with their index.
    pub fn outgoing(&self, stage: StageId) -> impl Iterator<Item = (usize, &QueueEdge)> {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.producer == stage)
    }

    /// Compute the waits, signals and fence of `stage` for `slot`.
    pub fn stage_sync(&self, stage: StageId, slot: &FrameSlot) -> StageSync {
        let mut waits: Vec<SemaphoreWait> = self
            .incoming(stage)
            .map(|(i, edge)| SemaphoreWait {
                semaphore: slot.stage_done[i],
                stage_mask: edge.wait_mask,
            })
            .collect();
        if stage == self.image_stage {
            waits.push(SemaphoreWait {
                semaphore: slot.image_acquired,
                stage_mask: self.image_wait_mask,
            });
        }

        let mut signals: Vec<vk::Semaphore> = self
            .outgoing(stage)
            .map(|(i, _)| slot.stage_done[i])
            .collect();
        let fence = if stage == self.sink {
            signals.push(slot.render_complete);
            Some(slot.in_flight)
        } else {
            None
        };

        StageSync {
            waits,
            signals,
            fence,
        }
    }
}

/// Builder for [`QueueGraph`].
#[derive(Debug, Clone)]
pub struct QueueGraphBuilder {
    stages: Vec<StageInfo>,
    edges: Vec<QueueEdge>,
    image_wait_mask: vk::PipelineStageFlags,
}

impl Default for QueueGraphBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            edges: Vec::new(),
            image_wait_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }
}

impl QueueGraphBuilder {
    /// Declare a stage.
    pub fn stage(&mut self, name: impl Into<String>, queue: QueueKind) -> StageId {
        let id = StageId(self.stages.len());
        self.stages.push(StageInfo {
            id,
            name: name.into(),
            queue,
            uses_swapchain_image: false,
        });
        id
    }

    /// Mark a stage as touching the swapchain image.
    pub fn uses_swapchain_image(&mut self, stage: StageId) -> &mut Self {
        self.stages[stage.0].uses_swapchain_image = true;
        self
    }

    /// Declare that `consumer` reads what `producer` wrote.
    pub fn edge(
        &mut self,
        producer: StageId,
        consumer: StageId,
        wait_mask: vk::PipelineStageFlags,
    ) -> &mut Self {
        self.edges.push(QueueEdge {
            producer,
            consumer,
            wait_mask,
        });
        self
    }

    /// Pipeline stages that wait for the swapchain image to be acquired.
    pub fn image_wait_mask(&mut self, mask: vk::PipelineStageFlags) -> &mut Self {
        self.image_wait_mask = mask;
        self
    }

    /// Validate and order the graph.
    ///
    /// # Panics
    /// On an empty graph, unknown stages, self edges, duplicate edges, cycles,
    /// more than one sink, a sink that is not on the graphics queue, or a
    /// swapchain image user that does not depend on the first one. These are
    /// configuration bugs, not runtime conditions.
    pub fn build(&self) -> QueueGraph {
        let count = self.stages.len();
        assert!(count > 0, "queue graph has no stages");

        for (i, edge) in self.edges.iter().enumerate() {
            assert!(
                edge.producer.0 < count && edge.consumer.0 < count,
                "edge {i} references an unknown stage"
            );
            assert!(
                edge.producer != edge.consumer,
                "edge {i} is a self dependency on '{}'",
                self.stages[edge.producer.0].name
            );
            assert!(
                !self.edges[..i]
                    .iter()
                    .any(|e| e.producer == edge.producer && e.consumer == edge.consumer),
                "duplicate edge '{}' -> '{}'",
                self.stages[edge.producer.0].name,
                self.stages[edge.consumer.0].name
            );
        }

        let order = topological_order(count, &self.edges).unwrap_or_else(|| {
            panic!(
                "queue graph has a dependency cycle among stages: {:?}",
                self.stages.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
            )
        });

        let sinks: Vec<StageId> = (0..count)
            .map(StageId)
            .filter(|&s| !self.edges.iter().any(|e| e.producer == s))
            .collect();
        assert!(
            sinks.len() == 1,
            "queue graph must have exactly one final stage, found {}",
            sinks.len()
        );
        let sink = sinks[0];
        assert!(
            self.stages[sink.0].queue == QueueKind::Graphics,
            "final stage '{}' must run on the graphics queue",
            self.stages[sink.0].name
        );

        let image_stage = order
            .iter()
            .copied()
            .find(|s| self.stages[s.0].uses_swapchain_image)
            .unwrap_or(sink);

        // Only the image stage waits on the acquire; every other user of the
        // image has to be ordered after it
        let mut after_acquire = vec![false; count];
        after_acquire[image_stage.0] = true;
        for &stage in &order {
            if after_acquire[stage.0] {
                for edge in self.edges.iter().filter(|e| e.producer == stage) {
                    after_acquire[edge.consumer.0] = true;
                }
            }
        }
        for stage in self.stages.iter().filter(|s| s.uses_swapchain_image) {
            assert!(
                after_acquire[stage.id.0],
                "stage '{}' uses the swapchain image but is not ordered after '{}', \
                 which waits for the image to be acquired",
                stage.name,
                self.stages[image_stage.0].name
            );
        }

        QueueGraph {
            stages: self.stages.clone(),
            edges: self.edges.clone(),
            order,
            sink,
            image_stage,
            image_wait_mask: self.image_wait_mask,
        }
    }
}

/// Kahn's algorithm, ties broken by declaration order. `None` on a cycle.
fn topological_order(count: usize, edges: &[QueueEdge]) -> Option<Vec<StageId>> {
    let mut in_degree = vec![0usize; count];
    for edge in edges {
        in_degree[edge.consumer.0] += 1;
    }

    let mut ready: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(stage) = ready.pop_front() {
        order.push(StageId(stage));
        for edge in edges.iter().filter(|e| e.producer.0 == stage) {
            let consumer = edge.consumer.0;
            in_degree[consumer] -= 1;
            if in_degree[consumer] == 0 {
                ready.push_back(consumer);
            }
        }
    }

    (order.len() == count).then_some(order)
}

/// Submit command buffers to a queue.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn submit<B: GpuBackend + ?Sized>(
    backend: &B,
    queue: QueueKind,
    command_buffers: &[vk::CommandBuffer],
    waits: &[SemaphoreWait],
    signals: &[vk::Semaphore],
    fence: Option<vk::Fence>,
) -> Result<()> {
    backend.queue_submit(
        queue,
        &QueueSubmit {
            command_buffers,
            waits,
            signals,
            fence,
        },
    )
}

/// Tracks the submissions of one frame slot through the graph.
pub struct FrameSubmission<'a> {
    graph: &'a QueueGraph,
    slot: &'a FrameSlot,
    submitted: Vec<bool>,
}

impl<'a> FrameSubmission<'a> {
    /// Start submitting the stages of `slot`.
    pub fn new(graph: &'a QueueGraph, slot: &'a FrameSlot) -> Self {
        Self {
            graph,
            slot,
            submitted: vec![false; graph.stage_count()],
        }
    }

    /// Submit one stage with its wait/signal set.
    ///
    /// Every producer of `stage` must already have been submitted.
    pub fn submit<B: GpuBackend + ?Sized>(&mut self, backend: &B, stage: StageId) -> Result<()> {
        debug_assert!(
            !self.submitted[stage.0],
            "stage '{}' submitted twice in one frame",
            self.graph.stage(stage).name
        );
        debug_assert!(
            self.graph
                .incoming(stage)
                .all(|(_, e)| self.submitted[e.producer.0]),
            "stage '{}' submitted before its producers",
            self.graph.stage(stage).name
        );

        let sync = self.graph.stage_sync(stage, self.slot);
        submit(
            backend,
            self.graph.stage(stage).queue,
            &[self.slot.command_buffers[stage.0]],
            &sync.waits,
            &sync.signals,
            sync.fence,
        )?;
        self.submitted[stage.0] = true;
        Ok(())
    }

    /// Submit every stage in topological order.
    pub fn submit_all<B: GpuBackend + ?Sized>(mut self, backend: &B) -> Result<()> {
        for &stage in self.graph.order() {
            self.submit(backend, stage)?;
        }
        Ok(())
    }

    /// Whether every stage was submitted.
    pub fn is_complete(&self) -> bool {
        self.submitted.iter().all(|&s| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_preset_orders_producer_first() {
        let graph = QueueGraph::compute_then_graphics();
        let names: Vec<_> = graph
            .order()
            .iter()
            .map(|&s| graph.stage(s).name.as_str())
            .collect();
        assert_eq!(names, ["compute", "graphics"]);
        assert_eq!(graph.sink(), graph.image_stage());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let mut builder = QueueGraph::builder();
        let post = builder.stage("post", QueueKind::Graphics);
        let sim = builder.stage("sim", QueueKind::Compute);
        let cull = builder.stage("cull", QueueKind::Compute);
        builder
            .edge(cull, post, vk::PipelineStageFlags::DRAW_INDIRECT)
            .edge(sim, post, vk::PipelineStageFlags::VERTEX_INPUT)
            .edge(sim, cull, vk::PipelineStageFlags::COMPUTE_SHADER);
        let graph = builder.build();
        assert_eq!(graph.order(), &[sim, cull, post]);
        assert_eq!(graph.sink(), post);
    }

    #[test]
    fn image_stage_is_first_user_in_order() {
        let mut builder = QueueGraph::builder();
        let compute = builder.stage("compute", QueueKind::Compute);
        let graphics = builder.stage("graphics", QueueKind::Graphics);
        builder
            .uses_swapchain_image(compute)
            .uses_swapchain_image(graphics)
            .edge(compute, graphics, vk::PipelineStageFlags::FRAGMENT_SHADER);
        let graph = builder.build();
        assert_eq!(graph.image_stage(), compute);
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn cycle_is_rejected() {
        let mut builder = QueueGraph::builder();
        let a = builder.stage("a", QueueKind::Compute);
        let b = builder.stage("b", QueueKind::Compute);
        let c = builder.stage("c", QueueKind::Graphics);
        builder
            .edge(a, b, vk::PipelineStageFlags::COMPUTE_SHADER)
            .edge(b, a, vk::PipelineStageFlags::COMPUTE_SHADER)
            .edge(b, c, vk::PipelineStageFlags::FRAGMENT_SHADER);
        builder.build();
    }

    #[test]
    #[should_panic(expected = "exactly one final stage")]
    fn dangling_stage_is_rejected() {
        let mut builder = QueueGraph::builder();
        builder.stage("compute", QueueKind::Compute);
        builder.stage("graphics", QueueKind::Graphics);
        builder.build();
    }

    #[test]
    #[should_panic(expected = "is not ordered after 'a'")]
    fn sibling_image_users_are_rejected() {
        let mut builder = QueueGraph::builder();
        let a = builder.stage("a", QueueKind::Compute);
        let b = builder.stage("b", QueueKind::Transfer);
        let c = builder.stage("c", QueueKind::Graphics);
        builder
            .uses_swapchain_image(a)
            .uses_swapchain_image(b)
            .edge(a, c, vk::PipelineStageFlags::FRAGMENT_SHADER)
            .edge(b, c, vk::PipelineStageFlags::TRANSFER);
        builder.build();
    }

    #[test]
    fn image_users_downstream_of_the_first_are_accepted() {
        let mut builder = QueueGraph::builder();
        let a = builder.stage("a", QueueKind::Compute);
        let b = builder.stage("b", QueueKind::Transfer);
        let c = builder.stage("c", QueueKind::Graphics);
        builder
            .uses_swapchain_image(a)
            .uses_swapchain_image(c)
            .edge(a, b, vk::PipelineStageFlags::TRANSFER)
            .edge(b, c, vk::PipelineStageFlags::FRAGMENT_SHADER);
        let graph = builder.build();
        assert_eq!(graph.image_stage(), a);
    }

    #[test]
    #[should_panic(expected = "graphics queue")]
    fn compute_sink_is_rejected() {
        let mut builder = QueueGraph::builder();
        builder.stage("compute", QueueKind::Compute);
        builder.build();
    }

    #[test]
    #[should_panic(expected = "self dependency")]
    fn self_edge_is_rejected() {
        let mut builder = QueueGraph::builder();
        let g = builder.stage("graphics", QueueKind::Graphics);
        builder.edge(g, g, vk::PipelineStageFlags::ALL_COMMANDS);
        builder.build();
    }
}
