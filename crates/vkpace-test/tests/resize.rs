//! Swapchain invalidation, rebuild and minimization.

use std::sync::Arc;

use ash::vk;
use vkpace_app::{FrameOutcome, SchedulerConfig, SkipReason, StaleReason};
use vkpace_gpu::{QueueGraph, SwapchainState};
use vkpace_test::{
    extent, init_test_logging, scheduler, RecordingPayload, ScriptedStatus, SimGpu, SimWindow,
};

fn setup() -> (Arc<SimGpu>, SimWindow, RecordingPayload) {
    init_test_logging();
    let sim = Arc::new(SimGpu::new(extent(800, 600)));
    let window = SimWindow::new(&sim);
    let payload = RecordingPayload::new(&sim).with_cost("graphics", 5);
    (sim, window, payload)
}

fn assert_presented(outcome: FrameOutcome) {
    assert!(
        matches!(outcome, FrameOutcome::Presented { .. }),
        "expected a presented frame, got {outcome:?}"
    );
}

#[test]
fn resize_rebuilds_before_the_next_frame() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(payload.last().unwrap().extent, extent(800, 600));

    window.resize(extent(1024, 768));
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());

    let last = payload.last().unwrap();
    assert_eq!(last.extent, extent(1024, 768));
    assert_eq!(last.viewport.width, 1024.0);
    assert_eq!(last.viewport.height, 768.0);
    assert_eq!(last.scissor.extent, extent(1024, 768));
    // Fresh images have no prior contents
    assert_eq!(last.previous_layout, vk::ImageLayout::UNDEFINED);
    assert_eq!(payload.resized, vec![extent(1024, 768)]);
    assert_eq!(scheduler.extent(), extent(1024, 768));
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert_eq!(scheduler.stats().rebuilds, 1);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn repeated_resize_to_the_same_size_is_idempotent() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    window.resize(extent(1024, 768));
    scheduler.run_frame(&mut window, &mut payload).unwrap();
    let after_first = sim.live_counts();
    let swapchain = scheduler.swapchain().raw();

    window.resize(extent(1024, 768));
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    assert_eq!(sim.live_counts(), after_first);
    assert_eq!(scheduler.swapchain().raw(), swapchain);
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert_eq!(payload.resized.len(), 1);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn queued_resizes_collapse_into_one_rebuild() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();
    let before = sim.live_counts();

    window.resize(extent(640, 480));
    window.resize(extent(1280, 720));
    window.resize(extent(1920, 1080));
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    assert_eq!(scheduler.extent(), extent(1920, 1080));
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert_eq!(sim.live_counts(), before);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn out_of_date_acquire_skips_without_submitting() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();
    let submissions = sim.submission_count();
    let presents = sim.presents().len();

    sim.script_acquire(ScriptedStatus::OutOfDate);
    let outcome = scheduler.run_frame(&mut window, &mut payload).unwrap();

    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));
    assert_eq!(sim.submission_count(), submissions);
    assert_eq!(sim.presents().len(), presents);
    assert_eq!(scheduler.slots().acquired(), None);
    assert_eq!(scheduler.slots().frame_counter(), 1);
    assert_eq!(
        scheduler.resize_handler().pending_reason(),
        Some(StaleReason::AcquireOutOfDate)
    );
    assert_eq!(scheduler.stats().skipped, 1);

    // The slot fence was never reset, so the next frame reuses the slot
    let outcome = scheduler.run_frame(&mut window, &mut payload).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            frame: 1,
            image_index: 0,
            slot: 1,
        }
    );
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert_eq!(scheduler.swapchain().state(), SwapchainState::Valid);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn surface_size_change_is_detected_on_acquire() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    // The surface changes without a window event reaching the scheduler
    sim.set_surface_extent(extent(300, 200));
    let outcome = scheduler.run_frame(&mut window, &mut payload).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));

    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.extent(), extent(300, 200));
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn suboptimal_present_rebuilds_on_the_next_frame() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    sim.script_present(ScriptedStatus::Suboptimal);
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.swapchain().state(), SwapchainState::Suboptimal);
    assert_eq!(
        scheduler.resize_handler().pending_reason(),
        Some(StaleReason::PresentSuboptimal)
    );

    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert_eq!(scheduler.swapchain().state(), SwapchainState::Valid);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn suboptimal_acquire_still_renders_the_frame() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    sim.script_acquire(ScriptedStatus::Suboptimal);
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(sim.presents().len(), 1);
    assert_eq!(
        scheduler.resize_handler().pending_reason(),
        Some(StaleReason::AcquireSuboptimal)
    );

    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn minimized_window_waits_for_a_real_size() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    window.resize(extent(0, 0));
    window.after_wait(extent(0, 0));
    window.after_wait(extent(1024, 768));
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());

    assert_eq!(window.waits(), 2);
    assert_eq!(scheduler.extent(), extent(1024, 768));
    assert_eq!(payload.last().unwrap().extent, extent(1024, 768));
    assert_eq!(payload.resized, vec![extent(1024, 768)]);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn bounded_minimize_poll_skips_the_frame() {
    let config = SchedulerConfig::default().with_max_minimized_polls(Some(0));
    let (sim, mut window, mut payload) = setup();
    let mut scheduler = scheduler(&sim, QueueGraph::graphics_only(), config).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();
    let submissions = sim.submission_count();

    window.resize(extent(0, 0));
    for _ in 0..3 {
        let outcome = scheduler.run_frame(&mut window, &mut payload).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Minimized));
    }
    assert_eq!(window.waits(), 0);
    assert_eq!(sim.submission_count(), submissions);
    assert!(scheduler.resize_handler().is_pending());
    assert_eq!(scheduler.stats().skipped, 3);

    window.resize(extent(1024, 768));
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.extent(), extent(1024, 768));
    assert!(!scheduler.resize_handler().is_pending());
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn zero_sized_surface_waits_even_when_the_window_lags() {
    let (sim, mut window, mut payload) = setup();
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    // The window has not caught up with the minimize yet
    sim.set_surface_extent(extent(0, 0));
    window.after_wait(extent(800, 600));
    let outcome = scheduler.run_frame(&mut window, &mut payload).unwrap();
    assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));

    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(window.waits(), 1);
    assert_eq!(scheduler.extent(), extent(800, 600));
    assert_eq!(scheduler.resize_handler().rebuild_count(), 1);
    assert!(!scheduler.is_halted());
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn bounded_poll_on_a_zero_sized_surface_skips_the_frame() {
    let config = SchedulerConfig::default().with_max_minimized_polls(Some(0));
    let (sim, mut window, mut payload) = setup();
    let mut scheduler = scheduler(&sim, QueueGraph::graphics_only(), config).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    sim.set_surface_extent(extent(0, 0));
    assert_eq!(
        scheduler.run_frame(&mut window, &mut payload).unwrap(),
        FrameOutcome::Skipped(SkipReason::OutOfDate)
    );
    for _ in 0..2 {
        assert_eq!(
            scheduler.run_frame(&mut window, &mut payload).unwrap(),
            FrameOutcome::Skipped(SkipReason::Minimized)
        );
    }
    assert!(!scheduler.is_halted());
    assert!(scheduler.resize_handler().is_pending());

    sim.set_surface_extent(extent(640, 480));
    assert_presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
    assert_eq!(scheduler.extent(), extent(640, 480));
    assert_eq!(payload.last().unwrap().extent, extent(640, 480));
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}
