//! Pixel-plane helpers shared by device backends.

use super::api::{AttachmentPoint, FramebufferStatus, PixelFormat};
use super::texture::Storage;

/// Completeness of a framebuffer from its attachments' storage.
///
/// `None` storage means the attached object is gone or has no storage.
pub(crate) fn completeness<I>(attachments: I) -> FramebufferStatus
where
    I: IntoIterator<Item = (AttachmentPoint, Option<Storage>)>,
{
    let mut size = None;
    let mut mismatched = false;
    let mut any = false;
    for (point, storage) in attachments {
        any = true;
        let Some(storage) = storage else {
            return FramebufferStatus::IncompleteAttachment;
        };
        if storage.width == 0 || storage.height == 0 || !point.accepts(storage.format) {
            return FramebufferStatus::IncompleteAttachment;
        }
        match size {
            None => size = Some((storage.width, storage.height)),
            Some(s) if s != (storage.width, storage.height) => mismatched = true,
            Some(_) => {}
        }
    }

    if !any {
        FramebufferStatus::MissingAttachment
    } else if mismatched {
        FramebufferStatus::IncompleteDimensions
    } else {
        FramebufferStatus::Complete
    }
}

/// Next mip level of a tightly packed plane.
///
/// 8-bit normalized formats are box filtered; others are point sampled.
pub(crate) fn downsample(
    data: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> (Vec<u8>, u32, u32) {
    let bpp = format.bytes_per_pixel();
    let out_w = (width / 2).max(1);
    let out_h = (height / 2).max(1);
    let box_filter = matches!(
        format,
        PixelFormat::R8 | PixelFormat::Rg8 | PixelFormat::Rgba8
    );
    let at = |x: u32, y: u32| (y as usize * width as usize + x as usize) * bpp;

    let mut out = vec![0u8; out_w as usize * out_h as usize * bpp];
    for y in 0..out_h {
        for x in 0..out_w {
            let sx = (2 * x).min(width - 1);
            let sy = (2 * y).min(height - 1);
            let dst = (y as usize * out_w as usize + x as usize) * bpp;
            if !box_filter {
                let src = at(sx, sy);
                out[dst..dst + bpp].copy_from_slice(&data[src..src + bpp]);
                continue;
            }
            let x1 = (sx + 1).min(width - 1);
            let y1 = (sy + 1).min(height - 1);
            let taps = [at(sx, sy), at(x1, sy), at(sx, y1), at(x1, y1)];
            for c in 0..bpp {
                let sum: u32 = taps.iter().map(|&t| data[t + c] as u32).sum();
                out[dst + c] = ((sum + 2) / 4) as u8;
            }
        }
    }
    (out, out_w, out_h)
}

/// Component of a pixel copied by a blit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plane {
    Color,
    Depth,
    Stencil,
}

impl Plane {
    /// Whether this component can be copied between the two formats.
    pub(crate) fn compatible(self, src: PixelFormat, dst: PixelFormat) -> bool {
        match self {
            Plane::Color => {
                src.is_color() && dst.is_color() && src.bytes_per_pixel() == dst.bytes_per_pixel()
            }
            Plane::Depth => src.has_depth() && dst.has_depth(),
            Plane::Stencil => src.has_stencil() && dst.has_stencil(),
        }
    }
}

/// Texel indices pairing each `dst_region` texel with its nearest
/// `src_region` texel. Regions are clipped to the planes.
fn nearest_pairs(
    src_dims: (u32, u32),
    src_region: (u32, u32),
    dst_dims: (u32, u32),
    dst_region: (u32, u32),
    mut f: impl FnMut(usize, usize),
) {
    let sw = src_region.0.min(src_dims.0);
    let sh = src_region.1.min(src_dims.1);
    let dw = dst_region.0.min(dst_dims.0);
    let dh = dst_region.1.min(dst_dims.1);
    if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
        return;
    }
    for dy in 0..dh {
        let sy = (dy as u64 * sh as u64 / dh as u64) as usize;
        for dx in 0..dw {
            let sx = (dx as u64 * sw as u64 / dw as u64) as usize;
            f(
                sy * src_dims.0 as usize + sx,
                dy as usize * dst_dims.0 as usize + dx as usize,
            );
        }
    }
}

/// Nearest-neighbour copy of one component between planes of possibly
/// different formats. Other components of `dst` are left as they were.
///
/// Callers check [`Plane::compatible`] first.
#[allow(clippy::too_many_arguments)]
pub(crate) fn blit_component(
    plane: Plane,
    src: &[u8],
    src_format: PixelFormat,
    src_dims: (u32, u32),
    src_region: (u32, u32),
    dst: &mut [u8],
    dst_format: PixelFormat,
    dst_dims: (u32, u32),
    dst_region: (u32, u32),
) {
    let src_bpp = src_format.bytes_per_pixel();
    let dst_bpp = dst_format.bytes_per_pixel();
    nearest_pairs(src_dims, src_region, dst_dims, dst_region, |from, to| {
        let texel = &src[from * src_bpp..(from + 1) * src_bpp];
        let out = &mut dst[to * dst_bpp..(to + 1) * dst_bpp];
        match plane {
            Plane::Color => out.copy_from_slice(texel),
            Plane::Depth => write_depth(dst_format, out, read_depth(src_format, texel)),
            // Stencil is the low byte of both stencil formats.
            Plane::Stencil => out[0] = texel[0],
        }
    });
}

/// Depth24Stencil8 packs a 24-bit normalized depth above an 8-bit stencil
/// in a little-endian word.
const DEPTH24_MAX: f32 = 0xFF_FFFF as f32;

fn read_depth(format: PixelFormat, texel: &[u8]) -> f32 {
    let word = [texel[0], texel[1], texel[2], texel[3]];
    match format {
        PixelFormat::Depth32F => f32::from_le_bytes(word),
        _ => (u32::from_le_bytes(word) >> 8) as f32 / DEPTH24_MAX,
    }
}

fn write_depth(format: PixelFormat, texel: &mut [u8], depth: f32) {
    let word = match format {
        PixelFormat::Depth32F => depth.to_le_bytes(),
        _ => {
            let depth = (depth.clamp(0.0, 1.0) * DEPTH24_MAX).round() as u32;
            ((depth << 8) | texel[0] as u32).to_le_bytes()
        }
    };
    texel[..4].copy_from_slice(&word);
}
