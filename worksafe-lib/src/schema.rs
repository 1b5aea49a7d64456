//! Declarative byte layouts for fixed-width payloads.
//!
//! A [`Schema`] lists each field's name, offset, width and byte order; one
//! generic routine encodes a list of [`Value`]s against it and one decodes a
//! buffer into a [`Record`].

use crate::error::WsError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    I8,
    U16(Endian),
    I16(Endian),
    U32(Endian),
    F32(Endian),
    /// Opaque byte run of fixed length
    Bytes(usize),
}

impl FieldKind {
    pub const fn width(&self) -> usize {
        match self {
            FieldKind::U8 | FieldKind::I8 => 1,
            FieldKind::U16(_) | FieldKind::I16(_) => 2,
            FieldKind::U32(_) | FieldKind::F32(_) => 4,
            FieldKind::Bytes(n) => *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self { name, offset, kind }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.kind.width()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    F32(f32),
    Bytes(Bytes),
}

impl Value {
    fn fits(&self, kind: FieldKind) -> bool {
        match (self, kind) {
            (Value::U8(_), FieldKind::U8)
            | (Value::I8(_), FieldKind::I8)
            | (Value::U16(_), FieldKind::U16(_))
            | (Value::I16(_), FieldKind::I16(_))
            | (Value::U32(_), FieldKind::U32(_))
            | (Value::F32(_), FieldKind::F32(_)) => true,
            (Value::Bytes(b), FieldKind::Bytes(n)) => b.len() == n,
            _ => false,
        }
    }
}

/// Fixed-width payload layout.
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [Field],
}

impl Schema {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_error(&self, field: &'static str, message: impl Into<String>) -> WsError {
        WsError::Field {
            schema: self.name,
            field,
            message: message.into(),
        }
    }

    /// Fields must be contiguous, in offset order, and cover the whole size.
    pub fn check_layout(&self) -> Result<(), WsError> {
        let mut cursor = 0;
        for field in self.fields {
            if field.offset != cursor {
                return Err(self.field_error(
                    field.name,
                    format!("starts at {} but previous field ends at {}", field.offset, cursor),
                ));
            }
            cursor = field.end();
        }
        if cursor != self.size {
            return Err(WsError::InvalidLength {
                expected: self.size,
                actual: cursor,
            });
        }
        Ok(())
    }

    pub fn encode(&self, values: &[Value]) -> Result<Bytes, WsError> {
        if values.len() != self.fields.len() {
            return Err(WsError::InvalidPacket(format!(
                "{} schema has {} fields, got {} values",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(self.size);
        for (field, value) in self.fields.iter().zip(values) {
            if buf.len() != field.offset {
                return Err(self.field_error(field.name, "is not contiguous"));
            }
            if !value.fits(field.kind) {
                return Err(self.field_error(
                    field.name,
                    format!("expects {:?}, got {:?}", field.kind, value),
                ));
            }
            match (value, field.kind) {
                (Value::U8(v), _) => buf.put_u8(*v),
                (Value::I8(v), _) => buf.put_i8(*v),
                (Value::U16(v), FieldKind::U16(Endian::Little)) => buf.put_u16_le(*v),
                (Value::U16(v), _) => buf.put_u16(*v),
                (Value::I16(v), FieldKind::I16(Endian::Little)) => buf.put_i16_le(*v),
                (Value::I16(v), _) => buf.put_i16(*v),
                (Value::U32(v), FieldKind::U32(Endian::Little)) => buf.put_u32_le(*v),
                (Value::U32(v), _) => buf.put_u32(*v),
                (Value::F32(v), FieldKind::F32(Endian::Little)) => buf.put_f32_le(*v),
                (Value::F32(v), _) => buf.put_f32(*v),
                (Value::Bytes(b), _) => buf.put_slice(b),
            }
        }

        if buf.len() != self.size {
            return Err(WsError::InvalidLength {
                expected: self.size,
                actual: buf.len(),
            });
        }
        Ok(buf.freeze())
    }

    pub fn decode(&'static self, data: &[u8]) -> Result<Record, WsError> {
        if data.len() != self.size {
            return Err(WsError::InvalidLength {
                expected: self.size,
                actual: data.len(),
            });
        }

        let values = self
            .fields
            .iter()
            .map(|field| {
                let mut raw = &data[field.offset..field.end()];
                match field.kind {
                    FieldKind::U8 => Value::U8(raw.get_u8()),
                    FieldKind::I8 => Value::I8(raw.get_i8()),
                    FieldKind::U16(Endian::Little) => Value::U16(raw.get_u16_le()),
                    FieldKind::U16(Endian::Big) => Value::U16(raw.get_u16()),
                    FieldKind::I16(Endian::Little) => Value::I16(raw.get_i16_le()),
                    FieldKind::I16(Endian::Big) => Value::I16(raw.get_i16()),
                    FieldKind::U32(Endian::Little) => Value::U32(raw.get_u32_le()),
                    FieldKind::U32(Endian::Big) => Value::U32(raw.get_u32()),
                    FieldKind::F32(Endian::Little) => Value::F32(raw.get_f32_le()),
                    FieldKind::F32(Endian::Big) => Value::F32(raw.get_f32()),
                    FieldKind::Bytes(_) => Value::Bytes(Bytes::copy_from_slice(raw)),
                }
            })
            .collect();

        Ok(Record {
            schema: self,
            values,
        })
    }
}

/// Decoded field values, addressed by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static Schema,
    values: Vec<Value>,
}

macro_rules! typed_getter {
    ($method:ident, $variant:ident, $ty:ty) => {
        pub fn $method(&self, name: &'static str) -> Result<$ty, WsError> {
            match self.get(name)? {
                Value::$variant(v) => Ok(*v),
                other => Err(self.schema.field_error(
                    name,
                    format!("is {:?}, not {}", other, stringify!($ty)),
                )),
            }
        }
    };
}

impl Record {
    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &'static str) -> Result<&Value, WsError> {
        self.schema
            .fields
            .iter()
            .position(|f| f.name == name)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| self.schema.field_error(name, "does not exist"))
    }

    typed_getter!(u8, U8, u8);
    typed_getter!(i8, I8, i8);
    typed_getter!(u16, U16, u16);
    typed_getter!(i16, I16, i16);
    typed_getter!(u32, U32, u32);
    typed_getter!(f32, F32, f32);

    pub fn bytes(&self, name: &'static str) -> Result<Bytes, WsError> {
        match self.get(name)? {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(self
                .schema
                .field_error(name, format!("is {:?}, not bytes", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MIXED: Schema = Schema {
        name: "mixed",
        size: 9,
        fields: &[
            Field::new("tag", 0, FieldKind::U8),
            Field::new("le", 1, FieldKind::U16(Endian::Little)),
            Field::new("be", 3, FieldKind::I16(Endian::Big)),
            Field::new("tail", 5, FieldKind::Bytes(4)),
        ],
    };

    #[test]
    fn test_byte_order_per_field() {
        MIXED.check_layout().unwrap();
        let bytes = MIXED
            .encode(&[
                Value::U8(0x7E),
                Value::U16(0x1234),
                Value::I16(-2),
                Value::Bytes(Bytes::from_static(b"abcd")),
            ])
            .unwrap();
        assert_eq!(hex::encode(&bytes), "7e3412fffe61626364");

        let record = MIXED.decode(&bytes).unwrap();
        assert_eq!(record.u16("le").unwrap(), 0x1234);
        assert_eq!(record.i16("be").unwrap(), -2);
        assert_eq!(record.bytes("tail").unwrap().as_ref(), b"abcd");
    }

    #[test]
    fn test_wrong_value_kind_is_rejected() {
        let err = MIXED
            .encode(&[
                Value::U8(1),
                Value::I16(1),
                Value::I16(1),
                Value::Bytes(Bytes::from_static(b"abcd")),
            ])
            .unwrap_err();
        assert!(matches!(err, WsError::Field { field: "le", .. }), "got {err:?}");
    }

    #[test]
    fn test_decode_requires_exact_length() {
        let err = MIXED.decode(&[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            WsError::InvalidLength {
                expected: 9,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_layout_gap_detected() {
        static GAPPY: Schema = Schema {
            name: "gappy",
            size: 4,
            fields: &[
                Field::new("a", 0, FieldKind::U8),
                Field::new("b", 2, FieldKind::U16(Endian::Little)),
            ],
        };
        assert!(GAPPY.check_layout().is_err());
    }

    #[test]
    fn test_typed_getter_mismatch() {
        let record = MIXED.decode(&[0u8; 9]).unwrap();
        assert!(record.u32("tag").is_err());
        assert!(record.get("missing").is_err());
    }
}
