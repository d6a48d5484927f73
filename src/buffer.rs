//! Flat RGBA8 pixel storage for a single layer.
//!
//! The buffer is a dense row-major grid; every layer owns exactly one and
//! positions it in document space via the layer's offset. No blending
//! happens here — writes are last-write-wins, compositing is the document's
//! job. All checked accessors fail with [`EngineError::OutOfBounds`] instead
//! of clamping.

use image::{Rgba, RgbaImage};

use crate::error::EngineError;
use crate::geometry::PixelRect;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Where existing content lands when a buffer is resized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeAnchor {
    TopLeft,
    Center,
    BottomRight,
}

#[derive(Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    /// `width * height * 4` bytes, row-major RGBA, non-premultiplied.
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    /// Create a buffer filled with `color`.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut buf = Self::new(width, height);
        if color != TRANSPARENT {
            buf.fill(color);
        }
        buf
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }

    fn check(&self, x: u32, y: u32) -> Result<(), EngineError> {
        if self.contains(x, y) {
            Ok(())
        } else {
            Err(EngineError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            })
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Result<Rgba<u8>, EngineError> {
        self.check(x, y)?;
        Ok(self.pixel_unchecked(x, y))
    }

    pub fn set(&mut self, x: u32, y: u32, color: Rgba<u8>) -> Result<(), EngineError> {
        self.check(x, y)?;
        self.set_pixel_unchecked(x, y, color);
        Ok(())
    }

    /// Read without a bounds check. Callers must have established bounds
    /// (hot compositing and stamping loops iterate clamped ranges).
    #[inline]
    pub fn pixel_unchecked(&self, x: u32, y: u32) -> Rgba<u8> {
        debug_assert!(self.contains(x, y));
        let i = self.offset(x, y);
        Rgba([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    #[inline]
    pub fn set_pixel_unchecked(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        debug_assert!(self.contains(x, y));
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&color.0);
    }

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color.0);
        }
    }

    /// Set a sub-rectangle (clamped to the buffer) to transparent.
    pub fn clear_region(&mut self, region: PixelRect) {
        let r = region.intersect(&self.bounds());
        for y in r.min_y..r.max_y {
            let start = self.offset(r.min_x, y);
            let end = self.offset(r.max_x.saturating_sub(1), y) + 4;
            self.data[start..end].fill(0);
        }
    }

    /// Non-mutating resize: returns a new buffer of the requested size with
    /// the old content positioned per `anchor` and the remainder transparent.
    pub fn resize(&self, new_width: u32, new_height: u32, anchor: ResizeAnchor) -> PixelBuffer {
        let mut out = PixelBuffer::new(new_width, new_height);
        let (dx, dy) = match anchor {
            ResizeAnchor::TopLeft => (0i64, 0i64),
            ResizeAnchor::Center => (
                (new_width as i64 - self.width as i64) / 2,
                (new_height as i64 - self.height as i64) / 2,
            ),
            ResizeAnchor::BottomRight => (
                new_width as i64 - self.width as i64,
                new_height as i64 - self.height as i64,
            ),
        };
        for sy in 0..self.height {
            let ty = sy as i64 + dy;
            if ty < 0 || ty >= new_height as i64 {
                continue;
            }
            for sx in 0..self.width {
                let tx = sx as i64 + dx;
                if tx < 0 || tx >= new_width as i64 {
                    continue;
                }
                out.set_pixel_unchecked(tx as u32, ty as u32, self.pixel_unchecked(sx, sy));
            }
        }
        out
    }

    /// Copy `src_region` of `src` so its top-left lands at `(dst_x, dst_y)`.
    /// The destination is clipped at this buffer's edges; a region that is
    /// not fully inside `src` is an `OutOfBounds` contract violation.
    pub fn blit(
        &mut self,
        src: &PixelBuffer,
        dst_x: i32,
        dst_y: i32,
        src_region: PixelRect,
    ) -> Result<(), EngineError> {
        if src_region.is_empty() {
            return Ok(());
        }
        if src_region.max_x > src.width || src_region.max_y > src.height {
            return Err(EngineError::OutOfBounds {
                x: src_region.max_x.saturating_sub(1),
                y: src_region.max_y.saturating_sub(1),
                width: src.width,
                height: src.height,
            });
        }
        for sy in src_region.min_y..src_region.max_y {
            let ty = dst_y as i64 + (sy - src_region.min_y) as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for sx in src_region.min_x..src_region.max_x {
                let tx = dst_x as i64 + (sx - src_region.min_x) as i64;
                if tx < 0 || tx >= self.width as i64 {
                    continue;
                }
                self.set_pixel_unchecked(tx as u32, ty as u32, src.pixel_unchecked(sx, sy));
            }
        }
        Ok(())
    }

    /// Import from a flat `RgbaImage` (file loaders).
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        Self {
            width: src.width(),
            height: src.height(),
            data: src.as_raw().clone(),
        }
    }

    /// Flatten to an `RgbaImage` for the codec collaborators.
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .expect("buffer length always matches dimensions")
    }

    /// Reconstruct from raw bytes. `None` when the byte count does not match
    /// the dimensions (corrupt project files).
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }
        Some(Self { width, height, data })
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_fully_transparent(&self) -> bool {
        self.data.chunks_exact(4).all(|px| px[3] == 0)
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
