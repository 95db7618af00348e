//! Fatal errors and construction failures.

use std::sync::Arc;

use ash::vk;
use vkpace_app::{FrameError, FrameOutcome, FrameState, SchedulerConfig};
use vkpace_gpu::{GpuError, QueueGraph};
use vkpace_test::{
    init_test_logging, scheduler, RecordingPayload, ScriptedStatus, SimGpu, SimWindow,
};

#[test]
fn device_loss_halts_the_scheduler() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 10);
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    scheduler.run_frame(&mut window, &mut payload).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    sim.inject_device_lost();
    let err = scheduler.run_frame(&mut window, &mut payload).unwrap_err();
    assert!(err.is_device_lost(), "unexpected error: {err}");
    assert!(scheduler.is_halted());
    assert_eq!(scheduler.state(), FrameState::Failed);
    assert_eq!(scheduler.slots().acquired(), None);

    let err = scheduler.run_frame(&mut window, &mut payload).unwrap_err();
    assert!(matches!(err, FrameError::Halted));

    // Teardown still releases every object even though the device is gone
    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
}

#[test]
fn payload_failure_is_fatal_and_leaves_the_fence_signaled() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).fail_on_frame(1);
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    assert!(matches!(
        scheduler.run_frame(&mut window, &mut payload).unwrap(),
        FrameOutcome::Presented { frame: 0, .. }
    ));
    let submissions = sim.submission_count();

    let err = scheduler.run_frame(&mut window, &mut payload).unwrap_err();
    assert!(matches!(err, FrameError::Payload(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("scripted failure"));
    assert!(!err.is_device_lost());
    assert_eq!(sim.submission_count(), submissions);
    assert!(sim.is_signaled(scheduler.slots().slot(1).in_flight));

    assert!(matches!(
        scheduler.run_frame(&mut window, &mut payload),
        Err(FrameError::Halted)
    ));

    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn unsupported_surface_fails_construction() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    sim.set_present_supported(false);

    let result = scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default());
    assert!(matches!(result, Err(GpuError::SurfaceUnsupported(_))));
    assert_eq!(sim.live_counts().total(), 0);
}

#[test]
fn fence_timeout_is_reported() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 1_000);
    let config = SchedulerConfig::default()
        .with_frames_in_flight(1)
        .with_fence_timeout_ns(100);
    let mut scheduler = scheduler(&sim, QueueGraph::graphics_only(), config).unwrap();

    scheduler.run_frame(&mut window, &mut payload).unwrap();
    let err = scheduler.run_frame(&mut window, &mut payload).unwrap_err();
    assert!(matches!(err, FrameError::Gpu(GpuError::Timeout)));
    assert!(scheduler.is_halted());
}

#[test]
fn shutdown_is_idempotent() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim);
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();
    scheduler.run_frame(&mut window, &mut payload).unwrap();

    scheduler.shutdown();
    scheduler.shutdown();
    assert!(matches!(
        scheduler.run_frame(&mut window, &mut payload),
        Err(FrameError::Halted)
    ));
    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn partial_slot_creation_releases_everything() {
    init_test_logging();
    // Two slots of compute_then_graphics: three semaphores, a fence and two
    // command buffers each
    const CREATIONS: usize = 12;
    let config = SchedulerConfig::default().with_frames_in_flight(2);

    for budget in 0..CREATIONS {
        let sim = Arc::new(SimGpu::default());
        sim.fail_creations_after(budget);

        let result = scheduler(&sim, QueueGraph::compute_then_graphics(), config.clone());
        assert!(
            matches!(
                result,
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
            ),
            "creation {budget} should fail the scheduler"
        );
        assert_eq!(sim.live_counts().total(), 0, "leak after {budget} creations");
        assert!(sim.violations().is_empty(), "{:?}", sim.violations());
    }

    let sim = Arc::new(SimGpu::default());
    sim.fail_creations_after(CREATIONS);
    let scheduler = scheduler(&sim, QueueGraph::compute_then_graphics(), config).unwrap();
    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
}

#[test]
fn out_of_range_image_index_is_an_error() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim);
    let mut scheduler =
        scheduler(&sim, QueueGraph::graphics_only(), SchedulerConfig::default()).unwrap();

    sim.script_acquire(ScriptedStatus::BadIndex);
    let err = scheduler.run_frame(&mut window, &mut payload).unwrap_err();
    assert!(
        matches!(err, FrameError::Gpu(GpuError::InvalidState(_))),
        "unexpected error: {err}"
    );
    assert!(scheduler.is_halted());
    assert_eq!(sim.submission_count(), 0);

    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}
