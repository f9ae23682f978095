//! Schema-driven decoding of CTF values.
//!
//! `TypeDecoder` walks a type tree and pulls the bits each node needs from a
//! `BitCursor`. Sequence lengths and variant tags refer to fields decoded
//! earlier in the *same* structure; the structure being filled in is passed
//! down as the lookup scope. There is no scope across structure boundaries.

use crate::bits;
use crate::config::DecoderConfig;
use crate::cursor::BitCursor;
use crate::error::{DecodeError, Result};
use crate::value::{Integer, StructValue, Value};
use ctfmeta::{ArrayLength, ArrayType, Encoding, EnumType, IntegerType, StructType, TypeNode, VariantType};
use smallvec::SmallVec;
use std::io::Read;

pub struct TypeDecoder<'c> {
    config: &'c DecoderConfig,
}

impl<'c> TypeDecoder<'c> {
    pub fn new(config: &'c DecoderConfig) -> TypeDecoder<'c> {
        TypeDecoder { config }
    }

    /// Decodes all fields of `strct` in declaration order.
    pub fn decode_struct<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        strct: &StructType,
    ) -> Result<StructValue> {
        cursor.align(strct.align_bits())?;

        let mut scope = StructValue::with_capacity(strct.fields.len());
        for field in &strct.fields {
            let value = self.decode_field(cursor, Some(&scope), &field.ty)?;
            scope.push(field.name.clone(), value);
        }

        Ok(scope)
    }

    /// Decodes one value of type `ty`. `scope` holds the already decoded
    /// siblings within the enclosing structure, if there is one.
    pub fn decode_field<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        scope: Option<&StructValue>,
        ty: &TypeNode,
    ) -> Result<Value> {
        match ty {
            TypeNode::Integer(int) => Ok(Value::Integer(self.decode_integer(cursor, int)?)),
            TypeNode::Float(float) => {
                cursor.align(float.align_bits)?;
                cursor.read_bits(u64::from(float.size_bits()))?;
                Ok(Value::Float)
            }
            TypeNode::Enum(en) => self.decode_enum(cursor, en),
            TypeNode::String(string) => {
                Ok(Value::String(self.decode_string(cursor, string.encoding)?))
            }
            TypeNode::Struct(strct) => Ok(Value::Struct(self.decode_struct(cursor, strct)?)),
            TypeNode::Array(array) => self.decode_array(cursor, scope, array),
            TypeNode::Variant(variant) => self.decode_variant(cursor, scope, variant),
        }
    }

    pub fn decode_integer<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        int: &IntegerType,
    ) -> Result<Integer> {
        if int.size_bits == 0 || int.size_bits > 64 {
            return Err(DecodeError::unsupported(format!(
                "{} bit integers are not supported",
                int.size_bits
            )));
        }

        cursor.align(int.align_bits)?;
        let raw = cursor.read_uint(int.size_bits, int.byte_order)?;

        Ok(if int.signed {
            Integer::Signed(bits::sign_extend(raw, int.size_bits))
        } else {
            Integer::Unsigned(raw)
        })
    }

    fn decode_enum<R: Read>(&self, cursor: &mut BitCursor<R>, en: &EnumType) -> Result<Value> {
        let value = self.decode_integer(cursor, &en.underlying)?;
        let label = en.label_for(value.as_i128()).cloned();

        Ok(Value::Enum { value, label })
    }

    fn decode_string<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        encoding: Encoding,
    ) -> Result<String> {
        cursor.align(8)?;

        let mut decoder = StringDecoder::new(encoding);
        loop {
            let offset = cursor.packet_offset_bits();
            let byte = cursor.read_byte()?;
            if byte == 0 {
                break;
            }

            if decoder.len() == self.config.max_string_length {
                return Err(DecodeError::corrupt(
                    offset,
                    format!(
                        "string exceeds {} bytes without terminator",
                        self.config.max_string_length
                    ),
                ));
            }
            decoder.push(byte);
        }

        Ok(decoder.finish())
    }

    fn decode_array<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        scope: Option<&StructValue>,
        array: &ArrayType,
    ) -> Result<Value> {
        let offset = cursor.packet_offset_bits();

        let len = match &array.length {
            ArrayLength::Fixed(n) => *n,
            ArrayLength::Field(name) => {
                let length = lookup(scope, name, offset)?
                    .as_integer()
                    .ok_or_else(|| {
                        DecodeError::corrupt(
                            offset,
                            format!("sequence length field `{}` is not an integer", name),
                        )
                    })?;

                match length.as_u64() {
                    Some(len) if len <= self.config.max_array_length => len,
                    _ => {
                        return Err(DecodeError::corrupt(
                            offset,
                            format!("implausible sequence length {} in `{}`", length, name),
                        ))
                    }
                }
            }
        };

        cursor.align(array.element.align_bits())?;

        // Elements do not see the siblings of the array.
        let mut elements = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            elements.push(self.decode_field(cursor, None, &array.element)?);
        }

        Ok(Value::Array(elements))
    }

    fn decode_variant<R: Read>(
        &self,
        cursor: &mut BitCursor<R>,
        scope: Option<&StructValue>,
        variant: &VariantType,
    ) -> Result<Value> {
        let offset = cursor.packet_offset_bits();
        let discriminant = lookup(scope, &variant.discriminant, offset)?;

        let tag = match discriminant {
            Value::Enum {
                label: Some(label), ..
            } => label,
            Value::Enum { value, label: None } => {
                return Err(DecodeError::corrupt(
                    offset,
                    format!(
                        "tag `{}` value {} has no enumeration label",
                        variant.discriminant, value
                    ),
                ))
            }
            _ => {
                return Err(DecodeError::corrupt(
                    offset,
                    format!("tag `{}` is not an enumeration", variant.discriminant),
                ))
            }
        };

        let member = variant.get(tag).ok_or_else(|| {
            DecodeError::corrupt(
                offset,
                format!("variant tagged by `{}` has no member `{}`", variant.discriminant, tag),
            )
        })?;

        // The selected member still resolves names against the enclosing struct.
        let value = self.decode_field(cursor, scope, member)?;

        Ok(Value::Variant {
            tag: tag.clone(),
            value: Box::new(value),
        })
    }
}

fn lookup<'s>(scope: Option<&'s StructValue>, name: &str, offset: u64) -> Result<&'s Value> {
    scope.and_then(|s| s.get(name)).ok_or_else(|| {
        DecodeError::corrupt(
            offset,
            format!("field `{}` is not decoded before it is referenced", name),
        )
    })
}

/// Turns string bytes into text one byte at a time.
enum StringDecoder {
    Ascii(String),
    Utf8(SmallVec<[u8; 64]>),
}

impl StringDecoder {
    fn new(encoding: Encoding) -> StringDecoder {
        match encoding {
            Encoding::Ascii => StringDecoder::Ascii(String::new()),
            Encoding::Utf8 => StringDecoder::Utf8(SmallVec::new()),
        }
    }

    fn push(&mut self, byte: u8) {
        match self {
            StringDecoder::Ascii(s) => s.push(if byte.is_ascii() { byte as char } else { '?' }),
            StringDecoder::Utf8(bytes) => bytes.push(byte),
        }
    }

    fn len(&self) -> usize {
        match self {
            StringDecoder::Ascii(s) => s.len(),
            StringDecoder::Utf8(bytes) => bytes.len(),
        }
    }

    fn finish(self) -> String {
        match self {
            StringDecoder::Ascii(s) => s,
            StringDecoder::Utf8(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}
