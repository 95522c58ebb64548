//! Plain data types shared between the device and the render graph.

use bitflags::bitflags;

bitflags! {
    /// Kinds of work a queue family can run, or a node needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WorkTypeFlags: u32 {
        /// Rasterization and draw commands.
        const GRAPHICS = 1 << 0;
        /// Compute dispatches.
        const COMPUTE = 1 << 1;
        /// Buffer and texture copies.
        const TRANSFER = 1 << 2;
        /// Presenting to a surface.
        const PRESENTATION = 1 << 3;
    }
}

/// Index of a device queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueFamily(pub u32);

impl QueueFamily {
    /// The raw family index.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Attachment formats understood by render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// Attachment layout a framebuffer is created from.
///
/// ```
/// use render_core::device::{RenderTarget, TextureFormat};
///
/// let gbuffer = RenderTarget::new("gbuffer")
///     .with_color(TextureFormat::Rgba16Float)
///     .with_color(TextureFormat::Rgba8Unorm)
///     .with_depth(TextureFormat::Depth32Float);
/// assert_eq!(gbuffer.color_formats().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    label: String,
    color: Vec<TextureFormat>,
    depth: Option<TextureFormat>,
}

impl RenderTarget {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            color: Vec::new(),
            depth: None,
        }
    }

    /// Add a color attachment.
    pub fn with_color(mut self, format: TextureFormat) -> Self {
        self.color.push(format);
        self
    }

    /// Set the depth attachment.
    pub fn with_depth(mut self, format: TextureFormat) -> Self {
        debug_assert!(format.is_depth(), "{format:?} is not a depth format");
        self.depth = Some(format);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.color
    }

    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.depth
    }
}

/// Handle to a device framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FramebufferHandle(u64);

impl FramebufferHandle {
    /// Wrap a device-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Clear value for the attachments of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}
