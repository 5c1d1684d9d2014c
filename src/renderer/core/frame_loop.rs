use ash::vk;
use color_eyre::Result;
use crate::renderer::core::state::RenderState;

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    /// Out of date or suboptimal; no image is held
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The swapchain needs rebuilding; the next tick does it
    SwapchainStale,
    /// A resize is pending but the window has no area, nothing was drawn
    ResizeDeferred,
}

/// The GPU side of a frame tick, driven by [`FrameLoop`] in a fixed order.
///
/// `frame_number` counts successful acquires; the backend maps it onto its frame ring.
pub trait FrameBackend {
    /// Blocks until the frame's previous submission has retired
    fn wait_for_frame(&mut self, frame_number: u64) -> Result<()>;

    /// Runs the frame's deferred deletions and recycles its descriptor pools
    fn reclaim_frame(&mut self, frame_number: u64) -> Result<()>;

    fn acquire_image(&mut self, frame_number: u64) -> Result<AcquireOutcome>;

    /// Resets the frame fence and records the whole frame into its command buffer
    fn record_frame(&mut self, frame_number: u64, image_index: u32) -> Result<()>;

    fn submit_frame(&mut self, frame_number: u64) -> Result<()>;

    fn present_frame(&mut self, frame_number: u64, image_index: u32) -> Result<PresentOutcome>;

    fn wait_idle(&mut self) -> Result<()>;

    fn window_extent(&self) -> vk::Extent2D;

    /// Recreates the swapchain and per-frame sync objects, returns the new swapchain extent
    fn rebuild_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<vk::Extent2D>;
}

/// Drives ticks of a [`FrameBackend`] and owns the resize state machine.
///
/// A resize is only ever requested by a stale acquire or present.
#[derive(Default)]
pub struct FrameLoop {
    state: RenderState,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Resolves a pending resize, then draws one frame
    pub fn tick<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if self.state.resize_requested && self.resize(backend)?.is_none() {
            return Ok(FrameOutcome::ResizeDeferred);
        }
        self.draw_frame(backend)
    }

    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let frame_number = self.state.frame_number;

        backend.wait_for_frame(frame_number)?;
        backend.reclaim_frame(frame_number)?;

        let image_index = match backend.acquire_image(frame_number)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Stale => {
                self.state.resize_requested = true;
                return Ok(FrameOutcome::SwapchainStale);
            }
        };

        backend.record_frame(frame_number, image_index)?;
        backend.submit_frame(frame_number)?;
        let presented = backend.present_frame(frame_number, image_index)?;

        // The submit went out, so this frame slot is in flight either way
        self.state.frame_number += 1;

        match presented {
            PresentOutcome::Presented => Ok(FrameOutcome::Presented),
            PresentOutcome::Stale => {
                self.state.resize_requested = true;
                Ok(FrameOutcome::SwapchainStale)
            }
        }
    }

    /// Rebuilds the swapchain at the current window size.
    ///
    /// Returns `None` and keeps the request pending while the window has zero area.
    pub fn resize<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<Option<vk::Extent2D>> {
        backend.wait_idle()?;

        let window_extent = backend.window_extent();
        if window_extent.width == 0 || window_extent.height == 0 {
            log::debug!("Window has no area, deferring resize");
            return Ok(None);
        }

        let extent = backend.rebuild_swapchain(window_extent)?;
        self.state.resize_requested = false;
        log::info!("Resized swapchain to {}x{}", extent.width, extent.height);
        Ok(Some(extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use crate::renderer::core::frame::FrameRing;

    /// Frame slots are recorded as ring indices
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Reclaim(usize),
        Acquire(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        WaitIdle,
        Rebuild(u32, u32),
    }

    struct MockBackend {
        ring: FrameRing<usize>,
        calls: Vec<Call>,
        stale_acquires: usize,
        stale_presents: usize,
        fail_submit: bool,
        window: vk::Extent2D,
        next_image: u32,
    }

    impl MockBackend {
        fn new(frames_in_flight: usize) -> Self {
            Self {
                ring: FrameRing::new((0..frames_in_flight).collect()).unwrap(),
                calls: Vec::new(),
                stale_acquires: 0,
                stale_presents: 0,
                fail_submit: false,
                window: vk::Extent2D { width: 800, height: 600 },
                next_image: 0,
            }
        }

        fn slot(&self, frame_number: u64) -> usize {
            *self.ring.current(frame_number)
        }

        fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| matches(c)).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_frame(&mut self, frame_number: u64) -> Result<()> {
            self.calls.push(Call::Wait(self.slot(frame_number)));
            Ok(())
        }

        fn reclaim_frame(&mut self, frame_number: u64) -> Result<()> {
            self.calls.push(Call::Reclaim(self.slot(frame_number)));
            Ok(())
        }

        fn acquire_image(&mut self, frame_number: u64) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(self.slot(frame_number)));
            if self.stale_acquires > 0 {
                self.stale_acquires -= 1;
                return Ok(AcquireOutcome::Stale);
            }
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(AcquireOutcome::Ready(image))
        }

        fn record_frame(&mut self, frame_number: u64, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(self.slot(frame_number), image_index));
            Ok(())
        }

        fn submit_frame(&mut self, frame_number: u64) -> Result<()> {
            self.calls.push(Call::Submit(self.slot(frame_number)));
            if self.fail_submit {
                return Err(eyre!("device lost"));
            }
            Ok(())
        }

        fn present_frame(&mut self, frame_number: u64, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(self.slot(frame_number), image_index));
            if self.stale_presents > 0 {
                self.stale_presents -= 1;
                return Ok(PresentOutcome::Stale);
            }
            Ok(PresentOutcome::Presented)
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitIdle);
            Ok(())
        }

        fn window_extent(&self) -> vk::Extent2D {
            self.window
        }

        fn rebuild_swapchain(&mut self, window_extent: vk::Extent2D) -> Result<vk::Extent2D> {
            self.calls.push(Call::Rebuild(window_extent.width, window_extent.height));
            Ok(window_extent)
        }
    }

    #[test]
    fn happy_path_runs_every_step_in_order() {
        let mut backend = MockBackend::new(2);
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::Presented);

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Reclaim(0),
                Call::Acquire(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(frame_loop.state().frame_number, 1);
    }

    #[test]
    fn frames_cycle_through_the_ring() {
        let mut backend = MockBackend::new(3);
        let mut frame_loop = FrameLoop::new();

        for _ in 0..7 {
            frame_loop.tick(&mut backend).unwrap();
        }

        let waited: Vec<usize> = backend
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Wait(frame) => Some(*frame),
                _ => None,
            })
            .collect();
        assert_eq!(waited, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(frame_loop.state().frame_number, 7);
    }

    #[test]
    fn window_size_change_alone_never_rebuilds() {
        let mut backend = MockBackend::new(2);
        let mut frame_loop = FrameLoop::new();

        for tick in 0..6 {
            if tick == 3 {
                backend.window = vk::Extent2D { width: 1024, height: 768 };
            }
            assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        }

        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::WaitIdle)), 0);
        assert!(!frame_loop.state().resize_requested);
    }

    #[test]
    fn stale_acquire_skips_submit_and_resizes_next_tick() {
        let mut backend = MockBackend::new(2);
        backend.stale_acquires = 1;
        backend.window = vk::Extent2D { width: 1280, height: 720 };
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.draw_frame(&mut backend).unwrap(), FrameOutcome::SwapchainStale);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Record(..))), 0);
        assert!(frame_loop.state().resize_requested);
        assert_eq!(frame_loop.state().frame_number, 0);

        let extent = frame_loop.resize(&mut backend).unwrap();
        assert_eq!(extent.map(|e| (e.width, e.height)), Some((1280, 720)));
        assert!(!frame_loop.state().resize_requested);
    }

    #[test]
    fn tick_rebuilds_before_drawing_after_staleness() {
        let mut backend = MockBackend::new(2);
        backend.stale_acquires = 1;
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::SwapchainStale);
        backend.calls.clear();
        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::Presented);

        assert_eq!(backend.calls[0], Call::WaitIdle);
        assert_eq!(backend.calls[1], Call::Rebuild(800, 600));
        // Same slot again since the stale tick did not advance
        assert_eq!(backend.calls[2], Call::Wait(0));
    }

    #[test]
    fn stale_present_still_advances_the_frame() {
        let mut backend = MockBackend::new(3);
        backend.stale_presents = 1;
        let mut frame_loop = FrameLoop::new();

        assert_eq!(frame_loop.draw_frame(&mut backend).unwrap(), FrameOutcome::SwapchainStale);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 1);
        assert!(frame_loop.state().resize_requested);
        assert_eq!(frame_loop.state().frame_number, 1);
    }

    #[test]
    fn minimized_window_defers_the_resize() {
        let mut backend = MockBackend::new(2);
        backend.stale_acquires = 1;
        let mut frame_loop = FrameLoop::new();
        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::SwapchainStale);

        backend.window = vk::Extent2D { width: 0, height: 600 };
        backend.calls.clear();
        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::ResizeDeferred);
        assert!(frame_loop.state().resize_requested);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Acquire(_))), 0);

        backend.window = vk::Extent2D { width: 640, height: 480 };
        assert_eq!(frame_loop.tick(&mut backend).unwrap(), FrameOutcome::Presented);
        assert!(!frame_loop.state().resize_requested);
        assert_eq!(backend.count(|c| matches!(c, Call::Rebuild(640, 480))), 1);
    }

    #[test]
    fn device_errors_propagate() {
        let mut backend = MockBackend::new(2);
        backend.fail_submit = true;
        let mut frame_loop = FrameLoop::new();

        let err = frame_loop.tick(&mut backend).unwrap_err();
        assert!(err.to_string().contains("device lost"));
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
        assert_eq!(frame_loop.state().frame_number, 0);
    }
}
