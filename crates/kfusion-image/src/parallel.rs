use rayon::prelude::*;

use crate::image::{Image, ImageSize};

/// Create an image by evaluating `f(u, v)` for every pixel, rows in parallel.
///
/// `f` must be a pure function of the pixel coordinates so that the result is
/// independent of the scheduling order.
pub fn par_from_fn<T>(size: ImageSize, f: impl Fn(usize, usize) -> T + Send + Sync) -> Image<T>
where
    T: Send,
{
    let data = (0..size.height)
        .into_par_iter()
        .flat_map_iter(|v| (0..size.width).map(move |u| (u, v)))
        .map(|(u, v)| f(u, v))
        .collect::<Vec<_>>();

    Image::from_raw_parts(size, data)
}

/// Apply `f` to every pixel of `src` in parallel, producing a new image.
pub fn par_map<T, U>(src: &Image<T>, f: impl Fn(&T) -> U + Send + Sync) -> Image<U>
where
    T: Sync,
    U: Send,
{
    par_from_fn(src.size(), |u, v| f(&src[(u, v)]))
}
