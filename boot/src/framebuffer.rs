//! framebuffer.rs — GOP mode → Framebuffer entry
//!
//! Only layouts a consumer can draw into directly get a real format; anything
//! else is recorded as `Unknown` so the image can fall back to text output.

use log::warn;
use uefi::proto::console::gop::{PixelBitmask, PixelFormat as GopFormat};
use uniboot::{Framebuffer, PixelFormat};

/// Highest and lowest set bit of `mask`, `None` when empty.
fn bit_range(mask: u32) -> Option<(u32, u32)> {
    if mask == 0 {
        return None;
    }
    Some((31 - mask.leading_zeros(), mask.trailing_zeros()))
}

/// Classify a `PixelBitMask` mode by the channel bit ranges.
pub fn format_from_bitmask(mask: &PixelBitmask) -> PixelFormat {
    let ranges = (bit_range(mask.red), bit_range(mask.green), bit_range(mask.blue));
    let format = match ranges {
        (Some((23, 16)), Some((15, 8)), Some((7, 0))) => PixelFormat::RgbX888,
        (Some((7, 5)), Some((4, 2)), Some((1, 0))) => PixelFormat::Rgb332,
        (Some((15, 11)), Some((10, 5)), Some((4, 0))) => PixelFormat::Rgb565,
        (Some((7, 6)), Some((5, 4)), Some((3, 2))) => PixelFormat::Rgb2220,
        _ => PixelFormat::Unknown,
    };
    if format == PixelFormat::Unknown {
        warn!(
            target: "gop",
            "unknown pixel format bitmask: r {:08x} / g {:08x} / b {:08x}",
            mask.red, mask.green, mask.blue
        );
    }
    format
}

pub fn pixel_format(format: GopFormat, mask: Option<PixelBitmask>) -> PixelFormat {
    match (format, mask) {
        (GopFormat::Bgr, _) => PixelFormat::RgbX888,
        (GopFormat::Bitmask, Some(mask)) => format_from_bitmask(&mask),
        (other, _) => {
            warn!(target: "gop", "unsupported pixel format {:?}", other);
            PixelFormat::Unknown
        }
    }
}

/// Build the entry payload for the current mode.
pub fn describe(
    base: u64,
    (width, height): (usize, usize),
    stride: usize,
    format: GopFormat,
    mask: Option<PixelBitmask>,
) -> Framebuffer {
    Framebuffer {
        base,
        width: width as u32,
        height: height as u32,
        stride: stride as u32,
        format: pixel_format(format, mask) as u32,
    }
}
