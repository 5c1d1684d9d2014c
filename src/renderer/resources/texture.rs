use std::path::Path;
use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use crate::renderer::core::immediate::ImmediateSubmit;
use crate::renderer::resources::allocator::ResourceAllocator;
use crate::renderer::resources::image::{AllocatedImage, ImageDesc};

pub const WHITE: u32 = 0xFFFF_FFFF;
pub const GREY: u32 = 0xAAAA_AAFF;
pub const BLACK: u32 = 0x0000_00FF;
pub const MAGENTA: u32 = 0xFF00_FFFF;

const CHECKERBOARD_SIZE: u32 = 32;

/// RGBA8 bytes of a color written as `0xRRGGBBAA`
pub fn rgba_bytes(color: u32) -> [u8; 4] {
    color.to_be_bytes()
}

/// Magenta and black squares, one texel each; used where a texture failed to load
pub fn checkerboard(size: u32) -> Vec<u8> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| rgba_bytes(if (x % 2) ^ (y % 2) == 1 { MAGENTA } else { BLACK }))
        .collect()
}

/// An image file decoded to tightly packed RGBA8
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn decode_rgba8(path: &Path) -> Result<DecodedImage> {
    let image = image::open(path)
        .wrap_err_with(|| format!("Failed to decode texture {}", path.display()))?
        .to_rgba8();
    Ok(DecodedImage {
        width: image.width(),
        height: image.height(),
        pixels: image.into_raw(),
    })
}

/// Uploads a texture file as a mipmapped sRGB image
pub fn load_texture(
    path: &Path,
    resources: &ResourceAllocator,
    immediate: &ImmediateSubmit,
) -> Result<AllocatedImage> {
    let decoded = decode_rgba8(path)?;
    let desc = ImageDesc::new_2d(
        path.display().to_string(),
        decoded.width,
        decoded.height,
        vk::Format::R8G8B8A8_SRGB,
        vk::ImageUsageFlags::SAMPLED,
    )
    .mipmapped(true);
    resources.create_image_with_data(&decoded.pixels, &desc, immediate)
}

/// Fallback textures and samplers bound by materials that have nothing better
pub struct DefaultTextures {
    pub white: AllocatedImage,
    pub grey: AllocatedImage,
    pub black: AllocatedImage,
    pub error_checkerboard: AllocatedImage,
    pub sampler_nearest: vk::Sampler,
    pub sampler_linear: vk::Sampler,
}

impl DefaultTextures {
    pub fn new(resources: &ResourceAllocator, immediate: &ImmediateSubmit) -> Result<Self> {
        let solid = |name: &str, color: u32| {
            let desc = ImageDesc::new_2d(
                name,
                1,
                1,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED,
            );
            resources.create_image_with_data(&rgba_bytes(color), &desc, immediate)
        };

        let white = solid("default white", WHITE)?;
        let grey = solid("default grey", GREY)?;
        let black = solid("default black", BLACK)?;

        let checker_desc = ImageDesc::new_2d(
            "error checkerboard",
            CHECKERBOARD_SIZE,
            CHECKERBOARD_SIZE,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        let error_checkerboard = resources.create_image_with_data(
            &checkerboard(CHECKERBOARD_SIZE),
            &checker_desc,
            immediate,
        )?;

        let device = resources.device();
        let sampler_nearest = unsafe {
            device.create_sampler(
                &vk::SamplerCreateInfo::default()
                    .mag_filter(vk::Filter::NEAREST)
                    .min_filter(vk::Filter::NEAREST),
                None,
            )?
        };
        let sampler_linear = unsafe {
            device.create_sampler(
                &vk::SamplerCreateInfo::default()
                    .mag_filter(vk::Filter::LINEAR)
                    .min_filter(vk::Filter::LINEAR),
                None,
            )?
        };

        Ok(Self {
            white,
            grey,
            black,
            error_checkerboard,
            sampler_nearest,
            sampler_linear,
        })
    }

    pub fn destroy(self, resources: &ResourceAllocator) {
        unsafe {
            resources.device().destroy_sampler(self.sampler_nearest, None);
            resources.device().destroy_sampler(self.sampler_linear, None);
        }
        resources.destroy_image(self.white);
        resources.destroy_image(self.grey);
        resources.destroy_image(self.black);
        resources.destroy_image(self.error_checkerboard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colors_pack_as_rgba() {
        assert_eq!(rgba_bytes(MAGENTA), [0xFF, 0x00, 0xFF, 0xFF]);
        assert_eq!(rgba_bytes(GREY), [0xAA, 0xAA, 0xAA, 0xFF]);
        assert_eq!(rgba_bytes(BLACK), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn checkerboard_alternates_per_texel() {
        let texels = checkerboard(4);
        assert_eq!(texels.len(), 4 * 4 * 4);

        let texel = |x: usize, y: usize| &texels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), rgba_bytes(BLACK));
        assert_eq!(texel(1, 0), rgba_bytes(MAGENTA));
        assert_eq!(texel(0, 1), rgba_bytes(MAGENTA));
        assert_eq!(texel(3, 3), rgba_bytes(BLACK));
    }

    #[test]
    fn decodes_png_to_rgba8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.png");
        let mut source = image::RgbImage::new(2, 1);
        source.put_pixel(0, 0, image::Rgb([255, 0, 255]));
        source.put_pixel(1, 0, image::Rgb([10, 20, 30]));
        source.save(&path).unwrap();

        let decoded = decode_rgba8(&path).unwrap();

        assert_eq!((decoded.width, decoded.height), (2, 1));
        assert_eq!(decoded.pixels, vec![255, 0, 255, 255, 10, 20, 30, 255]);
    }

    #[test]
    fn decode_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(decode_rgba8(&dir.path().join("nope.png")).is_err());
    }
}
