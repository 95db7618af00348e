//! Cross-queue ordering and UI overlay placement.

use std::sync::Arc;

use ash::vk;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vkpace_app::SchedulerConfig;
use vkpace_gpu::{QueueGraph, QueueKind};
use vkpace_test::{
    init_test_logging, scheduler, stage_tag, RecordingOverlay, RecordingPayload, SimGpu,
    SimSubmission, SimWindow,
};

fn submission(sim: &SimGpu, frame: u64, stage: &str) -> SimSubmission {
    let mut tagged = sim.submissions_tagged(&stage_tag(frame, stage));
    assert_eq!(tagged.len(), 1, "stage '{stage}' of frame {frame}");
    tagged.remove(0)
}

#[test]
fn graphics_never_starts_before_compute_finishes() {
    init_test_logging();
    const FRAMES: u64 = 1000;

    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut costs = StdRng::seed_from_u64(0x5eed);
    let mut payload =
        RecordingPayload::new(&sim).with_cost_fn(move |_, _| costs.gen_range(1..40));
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::compute_then_graphics(),
        SchedulerConfig::default().with_frames_in_flight(3),
    )
    .unwrap();

    let mut cpu = StdRng::seed_from_u64(7);
    for _ in 0..FRAMES {
        sim.advance(cpu.gen_range(0..30));
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }
    drop(scheduler);

    for f in 0..FRAMES {
        let compute = submission(&sim, f, "compute");
        let graphics = submission(&sim, f, "graphics");
        assert_eq!(compute.queue, QueueKind::Compute);
        assert_eq!(graphics.queue, QueueKind::Graphics);
        assert!(
            graphics.start >= compute.end,
            "frame {f}: graphics started at {} before compute ended at {}",
            graphics.start,
            compute.end
        );
        // Only the image consumer waits on the acquire
        assert!(compute.waits.is_empty());
        assert_eq!(graphics.waits.len(), 2);
        assert!(compute.fence.is_none());
        assert!(graphics.fence.is_some());
    }
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn diamond_graph_orders_every_edge() {
    init_test_logging();
    let mut builder = QueueGraph::builder();
    let upload = builder.stage("upload", QueueKind::Transfer);
    let simulate = builder.stage("simulate", QueueKind::Compute);
    let shade = builder.stage("shade", QueueKind::Graphics);
    builder
        .uses_swapchain_image(shade)
        .edge(upload, simulate, vk::PipelineStageFlags::COMPUTE_SHADER)
        .edge(upload, shade, vk::PipelineStageFlags::VERTEX_INPUT)
        .edge(simulate, shade, vk::PipelineStageFlags::VERTEX_INPUT);
    let graph = builder.build();

    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim)
        .with_cost("upload", 7)
        .with_cost("simulate", 13)
        .with_cost("shade", 5);
    let mut scheduler = scheduler(&sim, graph, SchedulerConfig::default()).unwrap();

    for _ in 0..20 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    for f in 0..20 {
        let upload = submission(&sim, f, "upload");
        let simulate = submission(&sim, f, "simulate");
        let shade = submission(&sim, f, "shade");
        assert_eq!(upload.queue, QueueKind::Transfer);
        assert!(simulate.start >= upload.end);
        assert!(shade.start >= upload.end);
        assert!(shade.start >= simulate.end);
        // Two edge semaphores plus the acquired image
        assert_eq!(shade.waits.len(), 3);
        assert_eq!(upload.signals.len(), 2);

        let stages: Vec<&str> = payload
            .stages_of(f)
            .iter()
            .map(|r| r.stage.as_str())
            .collect();
        assert_eq!(stages, ["upload", "simulate", "shade"]);
    }
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn stages_record_into_buffers_of_their_queue() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim);
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::compute_then_graphics(),
        SchedulerConfig::default(),
    )
    .unwrap();

    for _ in 0..4 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    for recorded in &payload.recorded {
        let expected = match recorded.stage.as_str() {
            "compute" => QueueKind::Compute,
            _ => QueueKind::Graphics,
        };
        assert_eq!(sim.command_buffer_queue(recorded.cmd), Some(expected));
    }
    // Each slot owns its own buffers
    let frame0 = payload.stages_of(0);
    let frame1 = payload.stages_of(1);
    let frame2 = payload.stages_of(2);
    assert_ne!(frame0[0].cmd, frame1[0].cmd);
    assert_eq!(frame0[0].cmd, frame2[0].cmd);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn overlay_is_appended_to_the_final_stage_only() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_overlay(RecordingOverlay::default());
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::compute_then_graphics(),
        SchedulerConfig::default(),
    )
    .unwrap();

    for _ in 0..3 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    let overlay = payload.overlay.as_ref().unwrap();
    assert_eq!(overlay.begun, 3);
    assert_eq!(overlay.appended.len(), 3);
    for &(frame, cmd) in &overlay.appended {
        let sink = payload
            .stages_of(frame)
            .into_iter()
            .find(|r| r.stage == "graphics")
            .unwrap();
        assert_eq!(cmd, sink.cmd);
    }
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn empty_overlay_is_not_appended() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_overlay(RecordingOverlay {
        empty: true,
        ..Default::default()
    });
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::graphics_only(),
        SchedulerConfig::default(),
    )
    .unwrap();

    for _ in 0..3 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    let overlay = payload.overlay.as_ref().unwrap();
    assert_eq!(overlay.begun, 3);
    assert!(overlay.appended.is_empty());
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}
