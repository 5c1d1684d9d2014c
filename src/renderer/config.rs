use std::path::PathBuf;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub window_title: String,
    pub window_extent: vk::Extent2D,
    /// Depth of the frame ring, 2 or 3
    pub frames_in_flight: usize,
    pub vsync: bool,
    /// Fraction of the swapchain size the scene is rendered at, in (0, 1]
    pub render_scale: f32,
    /// Directory holding the compiled `*.spv` shaders
    pub shader_dir: PathBuf,
    /// PNG or JPEG for the ground plane; the error checkerboard is used when unset or unreadable
    pub ground_texture: Option<PathBuf>,
    pub enable_validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            window_title: "vkrender".to_owned(),
            window_extent: vk::Extent2D { width: 1700, height: 900 },
            frames_in_flight: 3,
            vsync: false,
            render_scale: 1.0,
            shader_dir: PathBuf::from("shaders-built"),
            ground_texture: None,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if !(2..=3).contains(&self.frames_in_flight) {
            return Err(eyre!(
                "frames_in_flight must be 2 or 3, got {}",
                self.frames_in_flight
            ));
        }
        if !(self.render_scale > 0.0 && self.render_scale <= 1.0) {
            return Err(eyre!(
                "render_scale must be in (0, 1], got {}",
                self.render_scale
            ));
        }
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Err(eyre!("window_extent must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RenderConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!((config.window_extent.width, config.window_extent.height), (1700, 900));
    }

    #[test]
    fn frames_in_flight_must_be_two_or_three() {
        for (frames, ok) in [(1, false), (2, true), (3, true), (4, false)] {
            let config = RenderConfig { frames_in_flight: frames, ..Default::default() };
            assert_eq!(config.validate().is_ok(), ok, "frames_in_flight = {frames}");
        }
    }

    #[test]
    fn render_scale_range() {
        for (scale, ok) in [(0.0, false), (0.5, true), (1.0, true), (1.01, false), (f32::NAN, false)] {
            let config = RenderConfig { render_scale: scale, ..Default::default() };
            assert_eq!(config.validate().is_ok(), ok, "render_scale = {scale}");
        }
    }
}
