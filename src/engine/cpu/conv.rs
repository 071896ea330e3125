use super::HostShaped;
use crate::engine::Im2ColLayout;
use crate::numeric::Numeric;
use rayon::prelude::*;

struct Geometry {
    batch: usize,
    channels: usize,
    height: usize,
    width: usize,
    out_height: usize,
    out_width: usize,
}

impl Geometry {
    fn new(image_shape: &[usize], layout: &Im2ColLayout) -> Self {
        let (out_height, out_width) = layout.output_size(image_shape[2], image_shape[3]);
        Geometry {
            batch: image_shape[0],
            channels: image_shape[1],
            height: image_shape[2],
            width: image_shape[3],
            out_height,
            out_width,
        }
    }

    /// Image coordinate read by kernel offset `k` at output position `o`,
    /// `None` when it falls into the padding.
    #[inline]
    fn source(&self, o: usize, k: usize, padding: usize, stride: usize, limit: usize) -> Option<usize> {
        let position = (o * stride + k).checked_sub(padding)?;
        if position < limit {
            Some(position)
        } else {
            None
        }
    }
}

fn check<N: Numeric>(image: &HostShaped<N>, columns: &HostShaped<N>, layout: &Im2ColLayout) {
    let expected = layout.column_shape(&image.shape);
    assert_eq!(
        expected, columns.shape,
        "Image of shape {:?} lowers to columns of shape {:?}, got {:?}.",
        image.shape, expected, columns.shape
    );
}

pub(super) fn img2col<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, layout: &Im2ColLayout) {
    check(values, result, layout);
    let g = Geometry::new(&values.shape, layout);
    let full = g.batch * g.out_height * g.out_width;
    let batch_stride = g.out_height * g.out_width;
    let (kh, kw) = (layout.kernel_height, layout.kernel_width);
    if full == 0 {
        return;
    }

    let src = values.values.read_for(&result.values);
    let src: &[N] = &src;
    let mut dst = result.values.write();
    dst.par_chunks_mut(full).enumerate().for_each(|(k, row)| {
        let kx = k % kw;
        let ky = k / kw % kh;
        let c = k / (kw * kh);
        for b in 0..g.batch {
            for y in 0..g.out_height {
                let iy = g.source(y, ky, layout.padding, layout.stride, g.height);
                for x in 0..g.out_width {
                    let ix = g.source(x, kx, layout.padding, layout.stride, g.width);
                    row[b * batch_stride + y * g.out_width + x] = match (iy, ix) {
                        (Some(iy), Some(ix)) => src[((b * g.channels + c) * g.height + iy) * g.width + ix],
                        _ => N::ZERO,
                    };
                }
            }
        }
    });
}

pub(super) fn col2img<N: Numeric>(matrix: &HostShaped<N>, result: &HostShaped<N>, layout: &Im2ColLayout) {
    check(result, matrix, layout);
    let g = Geometry::new(&result.shape, layout);
    let full = g.batch * g.out_height * g.out_width;
    let batch_stride = g.out_height * g.out_width;
    let plane = g.height * g.width;
    let (kh, kw) = (layout.kernel_height, layout.kernel_width);

    let src = matrix.values.read_for(&result.values);
    let src: &[N] = &src;
    let mut dst = result.values.write();
    dst.iter_mut().for_each(|x| *x = N::ZERO);
    if plane == 0 {
        return;
    }

    dst.par_chunks_mut(plane).enumerate().for_each(|(p, image)| {
        let b = p / g.channels;
        let c = p % g.channels;
        for ky in 0..kh {
            for kx in 0..kw {
                let k = (c * kh + ky) * kw + kx;
                for y in 0..g.out_height {
                    let iy = match g.source(y, ky, layout.padding, layout.stride, g.height) {
                        Some(iy) => iy,
                        None => continue,
                    };
                    for x in 0..g.out_width {
                        if let Some(ix) = g.source(x, kx, layout.padding, layout.stride, g.width) {
                            image[iy * g.width + ix] += src[k * full + b * batch_stride + y * g.out_width + x];
                        }
                    }
                }
            }
        }
    });
}
