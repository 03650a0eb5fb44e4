use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
pub use ordered_float::OrderedFloat;

use crate::error::Error;

pub type Float<T> = OrderedFloat<T>;

/// A key type that can be written to and recovered from a byte slice.
///
/// Encodings are little-endian and fixed-width except for strings, which are
/// stored as raw UTF-8 (their length is carried by the index entry framing).
pub trait ByteSerializable: Send + Sync {
    fn to_bytes(&self) -> Vec<u8>;

    fn from_bytes(bytes: &[u8]) -> Self;

    /// Type tag written into the serialized index section header.
    fn serialized_type() -> ByteSerializableType;
}

/// A dynamically typed key value, used to pass query boundaries across the
/// type-erased index boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteSerializableValue {
    I64(i64),
    I32(i32),
    I16(i16),
    I8(i8),
    U64(u64),
    U32(u32),
    U16(u16),
    U8(u8),
    F64(Float<f64>),
    F32(Float<f32>),
    Bool(bool),
    String(String),
    NaiveDateTime(NaiveDateTime),
    NaiveDate(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl ByteSerializableValue {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ByteSerializableValue::I64(i) => i.to_bytes(),
            ByteSerializableValue::I32(i) => i.to_bytes(),
            ByteSerializableValue::I16(i) => i.to_bytes(),
            ByteSerializableValue::I8(i) => i.to_bytes(),
            ByteSerializableValue::U64(i) => i.to_bytes(),
            ByteSerializableValue::U32(i) => i.to_bytes(),
            ByteSerializableValue::U16(i) => i.to_bytes(),
            ByteSerializableValue::U8(i) => i.to_bytes(),
            ByteSerializableValue::F64(f) => f.to_bytes(),
            ByteSerializableValue::F32(f) => f.to_bytes(),
            ByteSerializableValue::Bool(b) => b.to_bytes(),
            ByteSerializableValue::String(s) => s.to_bytes(),
            ByteSerializableValue::NaiveDateTime(dt) => dt.to_bytes(),
            ByteSerializableValue::NaiveDate(d) => d.to_bytes(),
            ByteSerializableValue::DateTime(dt) => dt.to_bytes(),
        }
    }

    pub fn value_type(&self) -> ByteSerializableType {
        match self {
            ByteSerializableValue::I64(_) => ByteSerializableType::I64,
            ByteSerializableValue::I32(_) => ByteSerializableType::I32,
            ByteSerializableValue::I16(_) => ByteSerializableType::I16,
            ByteSerializableValue::I8(_) => ByteSerializableType::I8,
            ByteSerializableValue::U64(_) => ByteSerializableType::U64,
            ByteSerializableValue::U32(_) => ByteSerializableType::U32,
            ByteSerializableValue::U16(_) => ByteSerializableType::U16,
            ByteSerializableValue::U8(_) => ByteSerializableType::U8,
            ByteSerializableValue::F64(_) => ByteSerializableType::F64,
            ByteSerializableValue::F32(_) => ByteSerializableType::F32,
            ByteSerializableValue::Bool(_) => ByteSerializableType::Bool,
            ByteSerializableValue::String(_) => ByteSerializableType::String,
            ByteSerializableValue::NaiveDateTime(_) => ByteSerializableType::NaiveDateTime,
            ByteSerializableValue::NaiveDate(_) => ByteSerializableType::NaiveDate,
            ByteSerializableValue::DateTime(_) => ByteSerializableType::DateTime,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSerializableType {
    I64,
    I32,
    I16,
    I8,
    U64,
    U32,
    U16,
    U8,
    F64,
    F32,
    Bool,
    String,
    NaiveDateTime,
    NaiveDate,
    DateTime,
}

impl ByteSerializableType {
    pub fn type_id(&self) -> u32 {
        match self {
            ByteSerializableType::I64 => 0,
            ByteSerializableType::I32 => 1,
            ByteSerializableType::I16 => 2,
            ByteSerializableType::I8 => 3,
            ByteSerializableType::U64 => 4,
            ByteSerializableType::U32 => 5,
            ByteSerializableType::U16 => 6,
            ByteSerializableType::U8 => 7,
            ByteSerializableType::F64 => 8,
            ByteSerializableType::F32 => 9,
            ByteSerializableType::Bool => 10,
            ByteSerializableType::String => 11,
            ByteSerializableType::NaiveDateTime => 12,
            ByteSerializableType::NaiveDate => 13,
            ByteSerializableType::DateTime => 14,
        }
    }

    pub fn from_type_id(type_id: u32) -> Result<Self, Error> {
        match type_id {
            0 => Ok(ByteSerializableType::I64),
            1 => Ok(ByteSerializableType::I32),
            2 => Ok(ByteSerializableType::I16),
            3 => Ok(ByteSerializableType::I8),
            4 => Ok(ByteSerializableType::U64),
            5 => Ok(ByteSerializableType::U32),
            6 => Ok(ByteSerializableType::U16),
            7 => Ok(ByteSerializableType::U8),
            8 => Ok(ByteSerializableType::F64),
            9 => Ok(ByteSerializableType::F32),
            10 => Ok(ByteSerializableType::Bool),
            11 => Ok(ByteSerializableType::String),
            12 => Ok(ByteSerializableType::NaiveDateTime),
            13 => Ok(ByteSerializableType::NaiveDate),
            14 => Ok(ByteSerializableType::DateTime),
            other => Err(Error::InvalidType(format!("invalid type id: {other}"))),
        }
    }
}

macro_rules! int_byte_serializable {
    ($t:ty, $len:expr, $variant:ident) => {
        impl ByteSerializable for $t {
            fn to_bytes(&self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }
            fn from_bytes(bytes: &[u8]) -> Self {
                let mut array = [0u8; $len];
                array.copy_from_slice(&bytes[0..$len]);
                <$t>::from_le_bytes(array)
            }
            fn serialized_type() -> ByteSerializableType {
                ByteSerializableType::$variant
            }
        }
    };
}

int_byte_serializable!(i64, 8, I64);
int_byte_serializable!(i32, 4, I32);
int_byte_serializable!(i16, 2, I16);
int_byte_serializable!(u64, 8, U64);
int_byte_serializable!(u32, 4, U32);
int_byte_serializable!(u16, 2, U16);

impl ByteSerializable for i8 {
    fn to_bytes(&self) -> Vec<u8> {
        vec![*self as u8]
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::I8
    }
}

impl ByteSerializable for u8 {
    fn to_bytes(&self) -> Vec<u8> {
        vec![*self]
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::U8
    }
}

impl ByteSerializable for String {
    fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        String::from_utf8_lossy(bytes).into_owned()
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::String
    }
}

// f32/f64 keys are wrapped in OrderedFloat because raw floats are not Ord.
impl ByteSerializable for Float<f64> {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut array = [0u8; 8];
        array.copy_from_slice(&bytes[0..8]);
        OrderedFloat(f64::from_le_bytes(array))
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::F64
    }
}

impl ByteSerializable for Float<f32> {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        let mut array = [0u8; 4];
        array.copy_from_slice(&bytes[0..4]);
        OrderedFloat(f32::from_le_bytes(array))
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::F32
    }
}

impl ByteSerializable for bool {
    fn to_bytes(&self) -> Vec<u8> {
        vec![u8::from(*self)]
    }
    fn from_bytes(bytes: &[u8]) -> Self {
        bytes.first().is_some_and(|&b| b != 0)
    }
    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::Bool
    }
}

/// A NaiveDateTime is 12 bytes: seconds since epoch (i64) plus subsecond
/// nanoseconds (u32).
impl ByteSerializable for NaiveDateTime {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.and_utc().timestamp().to_le_bytes().to_vec();
        bytes.extend(&self.and_utc().timestamp_subsec_nanos().to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&bytes[0..8]);
        let timestamp = i64::from_le_bytes(ts_bytes);

        let mut nano_bytes = [0u8; 4];
        nano_bytes.copy_from_slice(&bytes[8..12]);
        let nanosecond = u32::from_le_bytes(nano_bytes);

        DateTime::<Utc>::from_timestamp(timestamp, nanosecond)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }

    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::NaiveDateTime
    }
}

/// A NaiveDate is 12 bytes: year (i32), month (u32), day (u32).
impl ByteSerializable for NaiveDate {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.year().to_le_bytes().to_vec();
        bytes.extend(&self.month().to_le_bytes());
        bytes.extend(&self.day().to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut y = [0u8; 4];
        let mut m = [0u8; 4];
        let mut d = [0u8; 4];
        y.copy_from_slice(&bytes[0..4]);
        m.copy_from_slice(&bytes[4..8]);
        d.copy_from_slice(&bytes[8..12]);

        NaiveDate::from_ymd_opt(
            i32::from_le_bytes(y),
            u32::from_le_bytes(m),
            u32::from_le_bytes(d),
        )
        .unwrap_or_default()
    }

    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::NaiveDate
    }
}

/// DateTime<Utc> delegates to the NaiveDateTime encoding.
impl ByteSerializable for DateTime<Utc> {
    fn to_bytes(&self) -> Vec<u8> {
        self.naive_utc().to_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let naive = <NaiveDateTime as ByteSerializable>::from_bytes(bytes);
        naive.and_utc()
    }

    fn serialized_type() -> ByteSerializableType {
        ByteSerializableType::DateTime
    }
}
