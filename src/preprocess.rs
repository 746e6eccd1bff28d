//! Image preprocessing for the detection engine input.
//!
//! Pure transform from a raw BGR frame to the normalized, channel-first
//! float layout the engine expects. No state and no device access, so the
//! stage can be tested and versioned independently of the executor.

use ndarray::{Array3, ArrayView3};

/// Convert a raw H×W×3 BGR frame of 8-bit samples into a planar 3×H×W f32
/// buffer matching the engine's declared input resolution.
///
/// The frame is bilinearly resized to `(height, width)`, the channel order is
/// reversed from BGR to RGB, the layout is transposed from interleaved HWC to
/// planar CHW, and every sample is scaled by 1/255 into `[0, 1]`.
pub fn preprocess(image: &ArrayView3<u8>, height: usize, width: usize) -> Array3<f32> {
    debug_assert_eq!(image.dim().2, 3, "expected a 3-channel BGR frame");

    let (src_h, src_w, _) = image.dim();
    let scale_y = src_h as f32 / height as f32;
    let scale_x = src_w as f32 / width as f32;

    let mut planar = Array3::<f32>::zeros((3, height, width));
    for y in 0..height {
        // Half-pixel centers, clamped at the borders.
        let sy = ((y as f32 + 0.5) * scale_y - 0.5).max(0.0);
        let y0 = (sy as usize).min(src_h - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = sy - y0 as f32;

        for x in 0..width {
            let sx = ((x as f32 + 0.5) * scale_x - 0.5).max(0.0);
            let x0 = (sx as usize).min(src_w - 1);
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = sx - x0 as f32;

            for c in 0..3 {
                let v00 = image[[y0, x0, c]] as f32;
                let v01 = image[[y0, x1, c]] as f32;
                let v10 = image[[y1, x0, c]] as f32;
                let v11 = image[[y1, x1, c]] as f32;

                let v = v00 * (1.0 - fx) * (1.0 - fy)
                    + v01 * fx * (1.0 - fy)
                    + v10 * (1.0 - fx) * fy
                    + v11 * fx * fy;

                // BGR sample order becomes RGB plane order.
                planar[[2 - c, y, x]] = v / 255.0;
            }
        }
    }
    planar
}
