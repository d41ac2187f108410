// Vertex layouts
//
// Describes how one interleaved vertex buffer is read by the vertex
// stage. Attributes are packed in declaration order and take shader
// locations 0..n in that same order.

use crate::error::GfxError;
use ash::vk;

/// Upper bound on attributes per layout.
pub const MAX_ATTRIBUTES: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    F32,
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
}

impl AttributeType {
    /// Size of one component in bytes.
    pub const fn size(self) -> u32 {
        match self {
            AttributeType::U8 | AttributeType::I8 => 1,
            AttributeType::U16 | AttributeType::I16 => 2,
            AttributeType::F32 | AttributeType::U32 | AttributeType::I32 => 4,
        }
    }

    fn format(self, count: u32) -> vk::Format {
        use vk::Format as F;
        let table: [F; 4] = match self {
            AttributeType::F32 => [F::R32_SFLOAT, F::R32G32_SFLOAT, F::R32G32B32_SFLOAT, F::R32G32B32A32_SFLOAT],
            AttributeType::U8 => [F::R8_UINT, F::R8G8_UINT, F::R8G8B8_UINT, F::R8G8B8A8_UINT],
            AttributeType::U16 => [F::R16_UINT, F::R16G16_UINT, F::R16G16B16_UINT, F::R16G16B16A16_UINT],
            AttributeType::U32 => [F::R32_UINT, F::R32G32_UINT, F::R32G32B32_UINT, F::R32G32B32A32_UINT],
            AttributeType::I8 => [F::R8_SINT, F::R8G8_SINT, F::R8G8B8_SINT, F::R8G8B8A8_SINT],
            AttributeType::I16 => [F::R16_SINT, F::R16G16_SINT, F::R16G16B16_SINT, F::R16G16B16A16_SINT],
            AttributeType::I32 => [F::R32_SINT, F::R32G32_SINT, F::R32G32B32_SINT, F::R32G32B32A32_SINT],
        };
        table[(count - 1) as usize]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    pub name: String,
    pub count: u32,
    pub ty: AttributeType,
    pub offset: u32,
}

impl VertexAttribute {
    pub fn size(&self) -> u32 {
        self.count * self.ty.size()
    }

    pub fn format(&self) -> vk::Format {
        self.ty.format(self.count)
    }
}

/// Finished, validated layout. Construct through [`VertexLayout::builder`].
#[derive(Debug, Clone, PartialEq)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
}

impl VertexLayout {
    pub fn builder() -> VertexLayoutBuilder {
        VertexLayoutBuilder::default()
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Bytes per vertex.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of whole vertices in `byte_len` bytes, or an error if the
    /// data does not end on a vertex boundary.
    pub fn vertex_count(&self, byte_len: usize) -> Result<u32, GfxError> {
        let stride = self.stride as usize;
        if byte_len == 0 || byte_len % stride != 0 {
            return Err(GfxError::resource(format!(
                "vertex data of {} bytes is not a non-empty multiple of stride {}",
                byte_len, stride
            )));
        }
        u32::try_from(byte_len / stride)
            .map_err(|_| GfxError::resource("vertex count does not fit in u32"))
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(self.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(location, attr)| {
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(location as u32)
                    .format(attr.format())
                    .offset(attr.offset)
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct VertexLayoutBuilder {
    pending: Vec<(String, u32, AttributeType)>,
}

impl VertexLayoutBuilder {
    pub fn add(mut self, name: impl Into<String>, count: u32, ty: AttributeType) -> Self {
        self.pending.push((name.into(), count, ty));
        self
    }

    pub fn build(self) -> Result<VertexLayout, GfxError> {
        if self.pending.is_empty() {
            return Err(GfxError::resource("vertex layout has no attributes"));
        }
        if self.pending.len() > MAX_ATTRIBUTES {
            return Err(GfxError::resource(format!(
                "vertex layout has {} attributes, limit is {}",
                self.pending.len(),
                MAX_ATTRIBUTES
            )));
        }

        let mut attributes = Vec::with_capacity(self.pending.len());
        let mut offset = 0u32;
        for (name, count, ty) in self.pending {
            if !(1..=4).contains(&count) {
                return Err(GfxError::resource(format!(
                    "attribute '{}' has {} components, expected 1..=4",
                    name, count
                )));
            }
            if attributes.iter().any(|a: &VertexAttribute| a.name == name) {
                return Err(GfxError::resource(format!("attribute '{}' declared twice", name)));
            }
            let attr = VertexAttribute { name, count, ty, offset };
            offset += attr.size();
            attributes.push(attr);
        }

        Ok(VertexLayout { attributes, stride: offset })
    }
}

#[cfg(test)]
#[path = "vertex_tests.rs"]
mod tests;
