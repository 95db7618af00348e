//! Frame-slot pacing against the simulated GPU.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vkpace_app::{FrameOutcome, FrameState, SchedulerConfig};
use vkpace_gpu::QueueGraph;
use vkpace_test::{init_test_logging, scheduler, stage_tag, RecordingPayload, SimGpu, SimWindow};

fn presented(outcome: FrameOutcome) -> (u64, u32, usize) {
    match outcome {
        FrameOutcome::Presented {
            frame,
            image_index,
            slot,
        } => (frame, image_index, slot),
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

#[test]
fn slots_rotate_and_wait_for_their_previous_frame() {
    init_test_logging();
    const FRAMES: u64 = 200;

    for frames_in_flight in 1..=3usize {
        let sim = Arc::new(SimGpu::default());
        let mut window = SimWindow::new(&sim);
        let mut rng = StdRng::seed_from_u64(frames_in_flight as u64);
        let mut costs = StdRng::seed_from_u64(1000 + frames_in_flight as u64);
        let mut payload =
            RecordingPayload::new(&sim).with_cost_fn(move |_, _| costs.gen_range(1..50));

        let config = SchedulerConfig::default().with_frames_in_flight(frames_in_flight);
        let mut scheduler = scheduler(&sim, QueueGraph::graphics_only(), config).unwrap();

        for f in 0..FRAMES {
            sim.advance(rng.gen_range(0..20));
            let (frame, _, slot) = presented(scheduler.run_frame(&mut window, &mut payload).unwrap());
            assert_eq!(frame, f);
            assert_eq!(slot, (f % frames_in_flight as u64) as usize);
        }
        assert_eq!(scheduler.state(), FrameState::Presented);

        let n = frames_in_flight as u64;
        for f in n..FRAMES {
            let current = &sim.submissions_tagged(&stage_tag(f, "graphics"))[0];
            let previous = &sim.submissions_tagged(&stage_tag(f - n, "graphics"))[0];
            assert!(
                current.submitted_at >= previous.end,
                "frame {f} submitted at {} before frame {} finished at {}",
                current.submitted_at,
                f - n,
                previous.end
            );
        }

        drop(scheduler);
        assert!(sim.violations().is_empty(), "{:?}", sim.violations());
    }
}

#[test]
fn third_frame_blocks_until_first_completes() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 30);
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::graphics_only(),
        SchedulerConfig::default().with_frames_in_flight(2),
    )
    .unwrap();

    for _ in 0..3 {
        sim.advance(10);
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    let first = &sim.submissions_tagged(&stage_tag(0, "graphics"))[0];
    assert_eq!((first.start, first.end), (10, 40));

    let waits = sim.fence_waits();
    assert_eq!(waits.len(), 3);
    assert!(!waits[0].blocked());
    assert!(!waits[1].blocked());
    assert!(waits[2].blocked());
    assert_eq!(waits[2].start, 30);
    assert_eq!(waits[2].end, first.end);
    assert_eq!(waits[2].fences, vec![scheduler.slots().slot(0).in_flight]);

    // The third frame starts right after the first one retires
    let third = &sim.submissions_tagged(&stage_tag(2, "graphics"))[0];
    assert_eq!(third.submitted_at, first.end);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn cpu_never_waits_on_the_frame_it_just_submitted() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 100);
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::graphics_only(),
        SchedulerConfig::default().with_frames_in_flight(3),
    )
    .unwrap();

    for _ in 0..3 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }

    // Three slow frames are queued back to back without the CPU blocking
    assert_eq!(sim.now(), 0);
    assert!(sim.fence_waits().iter().all(|w| !w.blocked()));
    let ends: Vec<u64> = sim.submissions().iter().map(|s| s.end).collect();
    assert_eq!(ends, vec![100, 200, 300]);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn image_guard_waits_on_the_owning_slot() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default().with_image_limits(2, 2));
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 50);
    let config = SchedulerConfig::default()
        .with_frames_in_flight(3)
        .with_desired_image_count(2);
    let mut scheduler = scheduler(&sim, QueueGraph::graphics_only(), config).unwrap();
    assert_eq!(scheduler.swapchain().image_count(), 2);

    let outcomes: Vec<_> = (0..3)
        .map(|_| presented(scheduler.run_frame(&mut window, &mut payload).unwrap()))
        .collect();
    assert_eq!(outcomes[2], (2, 0, 2));

    let slot0_fence = scheduler.slots().slot(0).in_flight;
    let guard_wait = sim
        .fence_waits()
        .into_iter()
        .find(|w| w.fences == vec![slot0_fence] && w.blocked())
        .expect("frame 2 should wait on slot 0 before reusing image 0");
    assert_eq!(guard_wait.end, 50);

    let owner = scheduler.swapchain().images_in_flight().owner(0).unwrap();
    assert_eq!(owner.slot, 2);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}

#[test]
fn teardown_releases_every_object() {
    init_test_logging();
    let sim = Arc::new(SimGpu::default());
    let mut window = SimWindow::new(&sim);
    let mut payload = RecordingPayload::new(&sim).with_cost("graphics", 25);
    let mut scheduler = scheduler(
        &sim,
        QueueGraph::compute_then_graphics(),
        SchedulerConfig::default(),
    )
    .unwrap();
    assert!(sim.live_counts().total() > 0);

    for _ in 0..5 {
        scheduler.run_frame(&mut window, &mut payload).unwrap();
    }
    scheduler.shutdown();
    // Shutdown drains the queues before destroying anything
    assert!(sim.now() >= 5 * 25);
    assert_eq!(sim.live_counts().total(), 0);

    drop(scheduler);
    assert_eq!(sim.live_counts().total(), 0);
    assert!(sim.violations().is_empty(), "{:?}", sim.violations());
}
