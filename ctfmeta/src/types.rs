//! The CTF type model.
//!
//! Every record in a CTF stream is laid out according to a tree of type
//! nodes. Leaves are integers, floats, enumerations and strings; composites are
//! structures, arrays (static or length-prefixed through a sibling field) and
//! variants (tagged unions whose tag is a sibling enumeration field).
//!
//! The tree is built once, before decoding starts, and never changes
//! afterwards. Names are stored as `Arc<str>` so that decoded values can share
//! them with the model instead of copying them for every event.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Byte order of a scalar type.
///
/// Little endian scalars are packed least significant bit first, big endian
/// scalars most significant bit first. This matters for fields that are not
/// byte aligned.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Character encoding of a null-terminated string.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Ascii,
    #[default]
    Utf8,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct IntegerType {
    pub size_bits: u32,
    pub align_bits: u32,
    pub signed: bool,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl IntegerType {
    /// An unsigned integer with the default CTF alignment: byte aligned when
    /// the size is a multiple of 8, bit packed otherwise.
    pub fn unsigned(size_bits: u32) -> IntegerType {
        IntegerType {
            size_bits,
            align_bits: default_align(size_bits),
            signed: false,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    pub fn signed(size_bits: u32) -> IntegerType {
        IntegerType {
            signed: true,
            ..IntegerType::unsigned(size_bits)
        }
    }

    pub fn with_align(mut self, align_bits: u32) -> IntegerType {
        self.align_bits = align_bits;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> IntegerType {
        self.byte_order = byte_order;
        self
    }
}

/// Floating point values are laid out as `exp_bits + mant_bits` bits.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct FloatType {
    pub exp_bits: u32,
    pub mant_bits: u32,
    pub align_bits: u32,
    #[serde(default)]
    pub byte_order: ByteOrder,
}

impl FloatType {
    pub fn single() -> FloatType {
        FloatType {
            exp_bits: 8,
            mant_bits: 24,
            align_bits: 32,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    pub fn double() -> FloatType {
        FloatType {
            exp_bits: 11,
            mant_bits: 53,
            align_bits: 64,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    pub fn size_bits(&self) -> u32 {
        self.exp_bits + self.mant_bits
    }
}

/// Maps the inclusive range `start..=end` to `name`.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct EnumMapping {
    pub name: Arc<str>,
    pub start: i64,
    pub end: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct EnumType {
    pub underlying: IntegerType,
    pub mappings: Vec<EnumMapping>,
}

impl EnumType {
    pub fn new(underlying: IntegerType) -> EnumType {
        EnumType {
            underlying,
            mappings: Vec::new(),
        }
    }

    pub fn value(self, name: &str, value: i64) -> EnumType {
        self.range(name, value, value)
    }

    pub fn range(mut self, name: &str, start: i64, end: i64) -> EnumType {
        self.mappings.push(EnumMapping {
            name: Arc::from(name),
            start,
            end,
        });
        self
    }

    /// Returns the label of the first mapping containing `value`. Ranges may
    /// overlap; declaration order wins.
    pub fn label_for(&self, value: i128) -> Option<&Arc<str>> {
        self.mappings
            .iter()
            .find(|m| i128::from(m.start) <= value && value <= i128::from(m.end))
            .map(|m| &m.name)
    }

    /// The first value mapped to `name`.
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.mappings
            .iter()
            .find(|m| &*m.name == name)
            .map(|m| m.start)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct StringType {
    #[serde(default)]
    pub encoding: Encoding,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Field {
    pub name: Arc<str>,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct StructType {
    pub fields: Vec<Field>,
    #[serde(default = "one")]
    pub min_align_bits: u32,
}

fn one() -> u32 {
    1
}

impl StructType {
    pub fn new() -> StructType {
        StructType {
            fields: Vec::new(),
            min_align_bits: 1,
        }
    }

    pub fn field(mut self, name: &str, ty: impl Into<TypeNode>) -> StructType {
        self.fields.push(Field {
            name: Arc::from(name),
            ty: ty.into(),
        });
        self
    }

    pub fn with_min_align(mut self, min_align_bits: u32) -> StructType {
        self.min_align_bits = min_align_bits;
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypeNode> {
        self.fields.iter().find(|f| &*f.name == name).map(|f| &f.ty)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| &*f.name == name)
    }

    pub fn align_bits(&self) -> u32 {
        self.fields
            .iter()
            .map(|f| f.ty.align_bits())
            .fold(self.min_align_bits.max(1), u32::max)
    }

    /// Size in bits when the layout does not depend on decoded data,
    /// measured from a position aligned to `align_bits()`.
    pub fn fixed_size_bits(&self) -> Option<u64> {
        self.layout_end(0)
    }

    fn layout_end(&self, start: u64) -> Option<u64> {
        let mut pos = align_up(start, self.align_bits());
        for field in &self.fields {
            pos = layout_end(&field.ty, pos)?;
        }
        Some(pos)
    }
}

/// How the element count of an array is determined.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayLength {
    /// A static array, `type name[n]`.
    Fixed(u64),
    /// A sequence whose length is an earlier field of the enclosing struct.
    Field(Arc<str>),
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArrayType {
    pub element: Box<TypeNode>,
    pub length: ArrayLength,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct VariantType {
    pub discriminant: Arc<str>,
    pub members: Vec<Field>,
}

impl VariantType {
    pub fn new(discriminant: &str) -> VariantType {
        VariantType {
            discriminant: Arc::from(discriminant),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, name: &str, ty: impl Into<TypeNode>) -> VariantType {
        self.members.push(Field {
            name: Arc::from(name),
            ty: ty.into(),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypeNode> {
        self.members.iter().find(|f| &*f.name == name).map(|f| &f.ty)
    }
}

/// A node of the type tree. The set of tags is closed by the format.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeNode {
    Integer(IntegerType),
    Float(FloatType),
    Enum(EnumType),
    String(StringType),
    Struct(StructType),
    Array(ArrayType),
    Variant(VariantType),
}

impl TypeNode {
    pub fn uint(size_bits: u32) -> TypeNode {
        TypeNode::Integer(IntegerType::unsigned(size_bits))
    }

    pub fn int(size_bits: u32) -> TypeNode {
        TypeNode::Integer(IntegerType::signed(size_bits))
    }

    pub fn string() -> TypeNode {
        TypeNode::String(StringType::default())
    }

    pub fn ascii_string() -> TypeNode {
        TypeNode::String(StringType {
            encoding: Encoding::Ascii,
        })
    }

    pub fn sequence(element: impl Into<TypeNode>, length_field: &str) -> TypeNode {
        TypeNode::Array(ArrayType {
            element: Box::new(element.into()),
            length: ArrayLength::Field(Arc::from(length_field)),
        })
    }

    pub fn array(element: impl Into<TypeNode>, length: u64) -> TypeNode {
        TypeNode::Array(ArrayType {
            element: Box::new(element.into()),
            length: ArrayLength::Fixed(length),
        })
    }

    /// Alignment requirement in bits. Variants align through their selected
    /// member, so they impose none themselves.
    pub fn align_bits(&self) -> u32 {
        match self {
            TypeNode::Integer(int) => int.align_bits,
            TypeNode::Float(float) => float.align_bits,
            TypeNode::Enum(en) => en.underlying.align_bits,
            TypeNode::String(_) => 8,
            TypeNode::Struct(strct) => strct.align_bits(),
            TypeNode::Array(array) => array.element.align_bits(),
            TypeNode::Variant(_) => 1,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            TypeNode::Struct(strct) => Some(strct),
            _ => None,
        }
    }

    /// The width of an integer or enum node.
    pub fn integer_size_bits(&self) -> Option<u32> {
        match self {
            TypeNode::Integer(int) => Some(int.size_bits),
            TypeNode::Enum(en) => Some(en.underlying.size_bits),
            _ => None,
        }
    }
}

impl From<IntegerType> for TypeNode {
    fn from(ty: IntegerType) -> TypeNode {
        TypeNode::Integer(ty)
    }
}

impl From<FloatType> for TypeNode {
    fn from(ty: FloatType) -> TypeNode {
        TypeNode::Float(ty)
    }
}

impl From<EnumType> for TypeNode {
    fn from(ty: EnumType) -> TypeNode {
        TypeNode::Enum(ty)
    }
}

impl From<StructType> for TypeNode {
    fn from(ty: StructType) -> TypeNode {
        TypeNode::Struct(ty)
    }
}

impl From<VariantType> for TypeNode {
    fn from(ty: VariantType) -> TypeNode {
        TypeNode::Variant(ty)
    }
}

fn default_align(size_bits: u32) -> u32 {
    if size_bits % 8 == 0 {
        8
    } else {
        1
    }
}

#[inline]
pub fn align_up(pos: u64, align_bits: u32) -> u64 {
    let align = u64::from(align_bits.max(1));
    (pos + align - 1) / align * align
}

// Where a value of type `ty` starting at `start` ends, or `None` if that
// depends on the data.
fn layout_end(ty: &TypeNode, start: u64) -> Option<u64> {
    match ty {
        TypeNode::Integer(int) => {
            Some(align_up(start, int.align_bits) + u64::from(int.size_bits))
        }
        TypeNode::Float(float) => {
            Some(align_up(start, float.align_bits) + u64::from(float.size_bits()))
        }
        TypeNode::Enum(en) => Some(
            align_up(start, en.underlying.align_bits) + u64::from(en.underlying.size_bits),
        ),
        TypeNode::Struct(strct) => strct.layout_end(start),
        TypeNode::Array(ArrayType {
            element,
            length: ArrayLength::Fixed(n),
        }) => {
            let mut pos = start;
            for _ in 0..*n {
                pos = layout_end(element, pos)?;
            }
            Some(pos)
        }
        TypeNode::String(_) | TypeNode::Variant(_) => None,
        TypeNode::Array(_) => None,
    }
}
