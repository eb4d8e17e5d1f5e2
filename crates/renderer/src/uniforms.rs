//! CPU staging for a program's std140 uniform block.
//!
//! Values arrive as an ordered list parallel to the declared uniform names.
//! The whole list is checked before a single byte is written, so a rejected
//! call leaves the previous block contents untouched.

use std::collections::HashMap;

use wgpu::naga;

use crate::error::{RenderError, Result};

/// Closed set of uniform shapes the effect programs use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    Mat3,
    Mat4,
}

impl UniformType {
    /// Bytes written into the block for this type under std140.
    pub fn std140_size(self) -> usize {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 => 8,
            UniformType::Vec3 => 12,
            UniformType::Vec4 => 16,
            // Matrix columns are padded out to vec4.
            UniformType::Mat3 => 48,
            UniformType::Mat4 => 64,
        }
    }

    pub(crate) fn from_naga(inner: &naga::TypeInner) -> Option<Self> {
        use naga::{Scalar, TypeInner, VectorSize};

        match *inner {
            TypeInner::Scalar(scalar) if scalar == Scalar::F32 => Some(UniformType::Float),
            TypeInner::Scalar(scalar) if scalar == Scalar::I32 => Some(UniformType::Int),
            TypeInner::Vector { size, scalar } if scalar == Scalar::F32 => match size {
                VectorSize::Bi => Some(UniformType::Vec2),
                VectorSize::Tri => Some(UniformType::Vec3),
                VectorSize::Quad => Some(UniformType::Vec4),
            },
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } if scalar == Scalar::F32 => match (columns, rows) {
                (VectorSize::Tri, VectorSize::Tri) => Some(UniformType::Mat3),
                (VectorSize::Quad, VectorSize::Quad) => Some(UniformType::Mat4),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A value destined for one uniform slot.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    /// Column-major; uploaded without transposition.
    Mat3([[f32; 3]; 3]),
    /// Column-major; uploaded without transposition.
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }
}

/// Member of a reflected uniform block.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockMember {
    pub offset: u32,
    /// `None` when the shader uses a type outside [`UniformType`].
    pub ty: Option<UniformType>,
}

/// Layout of the set 0 / binding 0 uniform block as compiled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockLayout {
    pub members: HashMap<String, BlockMember>,
    pub span: u32,
}

#[derive(Clone, Debug)]
struct UniformSlot {
    name: String,
    ty: UniformType,
    /// Byte offset in the block, `None` when the name did not resolve.
    offset: Option<usize>,
}

/// Declared uniforms resolved against a compiled block, plus the bytes that
/// get copied into the GPU buffer before each pass.
#[derive(Clone, Debug)]
pub struct UniformBlock {
    slots: Vec<UniformSlot>,
    bytes: Vec<u8>,
}

impl UniformBlock {
    /// Resolves each declared `(name, type)` against `layout`.
    ///
    /// Names missing from the block, or whose compiled type disagrees with the
    /// declaration, are logged and left inert.
    pub fn resolve(program: &str, declared: &[(String, UniformType)], layout: &BlockLayout) -> Self {
        let mut slots = Vec::with_capacity(declared.len());
        for (name, ty) in declared {
            let offset = match layout.members.get(name) {
                Some(member) if member.ty == Some(*ty) => Some(member.offset as usize),
                Some(member) => {
                    tracing::warn!(
                        program,
                        uniform = %name,
                        declared = ?ty,
                        compiled = ?member.ty,
                        "uniform type disagrees with shader; uploads will be ignored"
                    );
                    None
                }
                None => {
                    tracing::warn!(
                        program,
                        uniform = %name,
                        "uniform not found in shader block; uploads will be ignored"
                    );
                    None
                }
            };
            slots.push(UniformSlot {
                name: name.clone(),
                ty: *ty,
                offset,
            });
        }

        let span = (layout.span as usize).max(16);
        let size = span.div_ceil(16) * 16;
        Self {
            slots,
            bytes: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names that did not resolve to a usable block member.
    pub fn unresolved(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| slot.offset.is_none())
            .map(|slot| slot.name.as_str())
            .collect()
    }

    /// Writes `values` in declaration order.
    pub fn set(&mut self, values: &[UniformValue]) -> Result<()> {
        if values.len() != self.slots.len() {
            return Err(RenderError::SpecMismatch(format!(
                "expected {} uniform values, got {}",
                self.slots.len(),
                values.len()
            )));
        }
        for (slot, value) in self.slots.iter().zip(values) {
            if value.kind() != slot.ty {
                return Err(RenderError::SpecMismatch(format!(
                    "uniform `{}` is declared {:?} but received {:?}",
                    slot.name,
                    slot.ty,
                    value.kind()
                )));
            }
        }

        for (slot, value) in self.slots.iter().zip(values) {
            let Some(offset) = slot.offset else {
                continue;
            };
            if offset + slot.ty.std140_size() > self.bytes.len() {
                tracing::warn!(uniform = %slot.name, offset, "uniform lies outside the block");
                continue;
            }
            write_value(&mut self.bytes[offset..], value);
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn write_value(target: &mut [u8], value: &UniformValue) {
    match value {
        UniformValue::Float(v) => put(target, 0, bytemuck::bytes_of(v)),
        UniformValue::Vec2(v) => put(target, 0, bytemuck::cast_slice(v)),
        UniformValue::Vec3(v) => put(target, 0, bytemuck::cast_slice(v)),
        UniformValue::Vec4(v) => put(target, 0, bytemuck::cast_slice(v)),
        UniformValue::Int(v) => put(target, 0, bytemuck::bytes_of(v)),
        UniformValue::Mat3(columns) => {
            for (index, column) in columns.iter().enumerate() {
                put(target, index * 16, bytemuck::cast_slice(column));
            }
        }
        UniformValue::Mat4(columns) => {
            for (index, column) in columns.iter().enumerate() {
                put(target, index * 16, bytemuck::cast_slice(column));
            }
        }
    }
}

fn put(target: &mut [u8], offset: usize, bytes: &[u8]) {
    target[offset..offset + bytes.len()].copy_from_slice(bytes);
}
