/// Often-mutated counters and flags of the frame loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenderState {
    /// Frames whose acquire succeeded so far; selects the frame context
    pub frame_number: u64,
    /// Set when acquire or present reports the swapchain stale, cleared by a completed resize
    pub resize_requested: bool,
}
