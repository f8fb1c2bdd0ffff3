// SPDX-FileCopyrightText: 2025 loom contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

/// Graphics API a context or handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendApi {
    /// Software backend executing on CPU-visible memory.
    Null,
    Vulkan,
    Metal,
}

impl BackendApi {
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "0" | "null" => Self::Null,
            "1" | "vulkan" => Self::Vulkan,
            "2" | "metal" => Self::Metal,
            _ => Self::Null,
        }
    }
}

/// Pixel layout of a texture or CPU-side buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
    Alpha8,
    Gray8,
    Rgba8888,
    Rgb888x,
    Bgra8888,
}

impl ColorType {
    /// Bytes occupied by one pixel.
    #[inline]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Alpha8 | Self::Gray8 => 1,
            Self::Rgba8888 | Self::Rgb888x | Self::Bgra8888 => 4,
        }
    }

    /// Whether the layout carries no alpha channel (alpha reads as 0xFF).
    #[inline]
    pub const fn is_always_opaque(self) -> bool {
        matches!(self, Self::Gray8 | Self::Rgb888x)
    }
}

/// How color channels relate to alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaType {
    Opaque,
    Premul,
    Unpremul,
}

/// Color type + alpha type of a pixel destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorInfo {
    pub color_type: ColorType,
    pub alpha_type: AlphaType,
}

impl ColorInfo {
    pub const fn new(color_type: ColorType, alpha_type: AlphaType) -> Self {
        Self {
            color_type,
            alpha_type,
        }
    }

    pub const fn bytes_per_pixel(&self) -> usize {
        self.color_type.bytes_per_pixel()
    }

    /// Alpha type after accounting for opaque-only layouts.
    pub const fn effective_alpha_type(&self) -> AlphaType {
        if self.color_type.is_always_opaque() {
            AlphaType::Opaque
        } else {
            self.alpha_type
        }
    }
}

/// Integer width/height pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ISize {
    pub width: i32,
    pub height: i32,
}

impl ISize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Integer point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IPoint {
    pub x: i32,
    pub y: i32,
}

impl IPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Half-open integer rectangle `[left, right) x [top, bottom)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IRect {
    pub const fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::from_ltrb(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    pub const fn from_size(size: ISize) -> Self {
        Self::from_ltrb(0, 0, size.width, size.height)
    }

    /// Saturates for rects wider than `i32::MAX`.
    #[inline]
    pub const fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    #[inline]
    pub const fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    #[inline]
    pub const fn size(&self) -> ISize {
        ISize::new(self.width(), self.height())
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Check that `other` is non-empty and lies fully inside `self`.
    pub const fn contains(&self, other: &IRect) -> bool {
        !other.is_empty()
            && other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

impl fmt::Debug for IRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IRect(ltrb {}, {}, {}, {})",
            self.left, self.top, self.right, self.bottom
        )
    }
}

impl fmt::Display for IRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Dimensions plus color info of an image or surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    pub dimensions: ISize,
    pub color_info: ColorInfo,
}

impl ImageInfo {
    pub const fn new(width: i32, height: i32, color_type: ColorType, alpha_type: AlphaType) -> Self {
        Self {
            dimensions: ISize::new(width, height),
            color_info: ColorInfo::new(color_type, alpha_type),
        }
    }

    pub const fn width(&self) -> i32 {
        self.dimensions.width
    }

    pub const fn height(&self) -> i32 {
        self.dimensions.height
    }

    pub const fn color_type(&self) -> ColorType {
        self.color_info.color_type
    }

    pub const fn bounds(&self) -> IRect {
        IRect::from_size(self.dimensions)
    }

    /// Tightly packed row size in bytes.
    pub const fn min_row_bytes(&self) -> usize {
        self.dimensions.width as usize * self.color_info.bytes_per_pixel()
    }

    /// Tightly packed image size in bytes (0 for empty images).
    pub const fn compute_min_byte_size(&self) -> usize {
        if self.dimensions.is_empty() {
            0
        } else {
            self.min_row_bytes() * self.dimensions.height as usize
        }
    }
}

/// Unpremultiplied 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Self = Self::from_rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::from_rgba(0, 0, 0, 0xFF);
    pub const WHITE: Self = Self::from_rgba(0xFF, 0xFF, 0xFF, 0xFF);

    pub const fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    let mask = alignment - 1;
    (value + mask) & !mask
}
