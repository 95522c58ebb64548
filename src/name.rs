//! Typed, hashed identifiers.
//!
//! Every node, render target, framebuffer and flag in the render graph is
//! identified by a [`Name`]: a 64-bit hash of a string plus a [`ResourceType`]
//! tag. Names are `Copy`, compare in constant time and can be built in `const`
//! context, so node and flag identifiers are usually declared as constants:
//!
//! ```
//! use render_core::name::{make_name, Name, ResourceType};
//!
//! const SHADING: Name = make_name("shading.node");
//! const HIDE_UI: Name = Name::flag("hide_ui");
//!
//! assert_eq!(SHADING.resource_type(), ResourceType::RenderNode);
//! assert_eq!(HIDE_UI.resource_type(), ResourceType::Flag);
//! ```

use std::fmt;

/// Raw 64-bit hash part of a [`Name`].
pub type NameId = u64;

/// Kind of object a [`Name`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
    /// A node of the render graph.
    RenderNode,
    /// A render target description (attachment layout).
    RenderTarget,
    /// A framebuffer owned by a node.
    Framebuffer,
    /// A per-frame render flag.
    Flag,
    /// A texture asset.
    Texture,
    /// A mesh asset.
    Mesh,
    /// A shader module.
    Shader,
    /// A font asset.
    Font,
    /// Anything else.
    Unknown,
}

impl ResourceType {
    /// Map a file-style extension (`"node"`, `"fb"`, `"tex"`, ...) to a type.
    pub const fn from_extension(extension: &str) -> Self {
        let ext = extension.as_bytes();
        if bytes_eq(ext, b"node") {
            Self::RenderNode
        } else if bytes_eq(ext, b"rt") {
            Self::RenderTarget
        } else if bytes_eq(ext, b"fb") {
            Self::Framebuffer
        } else if bytes_eq(ext, b"flag") {
            Self::Flag
        } else if bytes_eq(ext, b"tex") || bytes_eq(ext, b"png") {
            Self::Texture
        } else if bytes_eq(ext, b"mesh") || bytes_eq(ext, b"obj") {
            Self::Mesh
        } else if bytes_eq(ext, b"spv") || bytes_eq(ext, b"shader") {
            Self::Shader
        } else if bytes_eq(ext, b"ttf") || bytes_eq(ext, b"font") {
            Self::Font
        } else {
            Self::Unknown
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            Self::RenderNode => "node",
            Self::RenderTarget => "rt",
            Self::Framebuffer => "fb",
            Self::Flag => "flag",
            Self::Texture => "tex",
            Self::Mesh => "mesh",
            Self::Shader => "shader",
            Self::Font => "font",
            Self::Unknown => "unknown",
        }
    }
}

/// A typed identifier.
///
/// Equality and ordering are defined on the hash first and the type tag second,
/// so two names with the same hash but different types are distinct.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    id: NameId,
    resource_type: ResourceType,
}

impl Name {
    /// Build a name from an already computed hash.
    pub const fn new(resource_type: ResourceType, id: NameId) -> Self {
        Self { id, resource_type }
    }

    /// Hash `value` into a name of the given type.
    pub const fn with_type(resource_type: ResourceType, value: &str) -> Self {
        Self::new(resource_type, hash_bytes(value.as_bytes(), 0, value.len()))
    }

    /// Name of a render graph node.
    pub const fn node(value: &str) -> Self {
        Self::with_type(ResourceType::RenderNode, value)
    }

    /// Name of a framebuffer slot inside a node's resources.
    pub const fn framebuffer(value: &str) -> Self {
        Self::with_type(ResourceType::Framebuffer, value)
    }

    /// Name of a render flag.
    pub const fn flag(value: &str) -> Self {
        Self::with_type(ResourceType::Flag, value)
    }

    /// The raw hash.
    pub const fn id(&self) -> NameId {
        self.id
    }

    /// The type tag.
    pub const fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({}:{:016x})", self.resource_type.short_name(), self.id)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:016x}", self.resource_type.short_name(), self.id)
    }
}

/// Build a name from `"<stem>.<extension>"`.
///
/// The stem (everything before the last `.`) is hashed and the extension selects
/// the [`ResourceType`]. A value without a `.` hashes the whole string and gets
/// [`ResourceType::Unknown`].
pub const fn make_name(value: &str) -> Name {
    let bytes = value.as_bytes();
    let mut at = bytes.len();
    while at > 0 {
        if bytes[at - 1] == b'.' {
            break;
        }
        at -= 1;
    }
    if at == 0 {
        return Name::new(ResourceType::Unknown, hash_bytes(bytes, 0, bytes.len()));
    }

    let dot = at - 1;
    let resource_type = resource_type_of_suffix(bytes, dot + 1);
    Name::new(resource_type, hash_bytes(bytes, 0, dot))
}

const fn resource_type_of_suffix(bytes: &[u8], start: usize) -> ResourceType {
    // Copy the suffix into a fixed buffer so it can be compared in const context.
    let mut buffer = [0u8; 8];
    let len = bytes.len() - start;
    if len > buffer.len() {
        return ResourceType::Unknown;
    }
    let mut i = 0;
    while i < len {
        buffer[i] = bytes[start + i];
        i += 1;
    }
    let (suffix, _) = buffer.split_at(len);
    match std::str::from_utf8(suffix) {
        Ok(extension) => ResourceType::from_extension(extension),
        Err(_) => ResourceType::Unknown,
    }
}

const fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// CRC-64/ECMA-182 polynomial (reflected).
const CRC64_POLY: u64 = 0xC96C_5795_D787_0F42;

/// Bitwise CRC-64 over `bytes[start..end]`.
const fn hash_bytes(bytes: &[u8], start: usize, end: usize) -> NameId {
    let mut crc: u64 = !0;
    let mut i = start;
    while i < end {
        crc ^= bytes[i] as u64;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ CRC64_POLY;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        i += 1;
    }
    !crc
}
