use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use kfusion_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Number of pixels.
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// The size of the next (half resolution) pyramid level.
    pub fn half(&self) -> Self {
        Self {
            width: self.width / 2,
            height: self.height / 2,
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// Represents an image with pixel data.
///
/// Pixels are stored row major. Each pixel is a single value of type `T`, which
/// may itself be a vector type (e.g. a 3D point or a normal).
///
/// Pixel coordinates follow the `(u, v)` convention: `u` is the column and `v`
/// the row.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    size: ImageSize,
    data: Vec<T>,
}

impl<T> Image<T> {
    /// Create a new image from pixel data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image.
    ///
    /// # Errors
    ///
    /// If the length of the pixel data does not match the image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use kfusion_image::{Image, ImageSize};
    ///
    /// let image = Image::<u16>::new(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     vec![0u16; 10 * 20],
    /// ).unwrap();
    ///
    /// assert_eq!(image.width(), 10);
    /// assert_eq!(image.height(), 20);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.area() {
            return Err(ImageError::InvalidDataLength(data.len(), size.area()));
        }
        Ok(Self { size, data })
    }

    // PRECONDITION: `data.len() == size.area()`.
    pub(crate) fn from_raw_parts(size: ImageSize, data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), size.area());
        Self { size, data }
    }

    /// Create a new image with every pixel set to `val`.
    pub fn from_size_val(size: ImageSize, val: T) -> Self
    where
        T: Clone,
    {
        Self {
            size,
            data: vec![val; size.area()],
        }
    }

    /// Create a new image by evaluating `f(u, v)` for every pixel.
    pub fn from_fn(size: ImageSize, f: impl Fn(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(size.area());
        for v in 0..size.height {
            for u in 0..size.width {
                data.push(f(u, v));
            }
        }
        Self { size, data }
    }

    /// The size of the image in pixels.
    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The width of the image in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// The height of the image in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// The pixel data as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The pixel data as a mutable slice.
    #[inline]
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the image and return the pixel data.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Get the pixel at `(u, v)`, or `None` if out of bounds.
    #[inline]
    pub fn get(&self, u: usize, v: usize) -> Option<&T> {
        if u < self.size.width && v < self.size.height {
            self.data.get(v * self.size.width + u)
        } else {
            None
        }
    }

    /// Get the pixel at signed coordinates `(u, v)`, or `None` if out of bounds.
    #[inline]
    pub fn get_signed(&self, u: i64, v: i64) -> Option<&T> {
        if u < 0 || v < 0 {
            return None;
        }
        self.get(u as usize, v as usize)
    }

    /// Get a mutable reference to the pixel at `(u, v)`.
    #[inline]
    pub fn get_mut(&mut self, u: usize, v: usize) -> Option<&mut T> {
        if u < self.size.width && v < self.size.height {
            self.data.get_mut(v * self.size.width + u)
        } else {
            None
        }
    }

    /// Iterate over the rows of the image.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.size.width.max(1))
    }

    /// Apply `f` to every pixel, producing a new image.
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> Image<U> {
        Image {
            size: self.size,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T> Index<(usize, usize)> for Image<T> {
    type Output = T;

    #[inline]
    fn index(&self, (u, v): (usize, usize)) -> &Self::Output {
        &self.data[v * self.size.width + u]
    }
}

impl<T> IndexMut<(usize, usize)> for Image<T> {
    #[inline]
    fn index_mut(&mut self, (u, v): (usize, usize)) -> &mut Self::Output {
        &mut self.data[v * self.size.width + u]
    }
}
