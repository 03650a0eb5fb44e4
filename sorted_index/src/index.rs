use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::byte_serializable::{ByteSerializable, ByteSerializableType};
use crate::error::{Error, Result};

/// The offset type pointing at feature record data.
pub type ValueOffset = u64;

/// A key with all feature offsets sharing it. Non-unique keys keep every
/// offset, so equality matches return all of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyValue<T: Ord + ByteSerializable> {
    pub key: T,
    pub offsets: Vec<ValueOffset>,
}

/// A serialized-friendly sorted index: an array of key-offsets pairs ordered
/// by the key's natural order, queried by binary search.
#[derive(Debug, Default)]
pub struct SortedIndex<T: Ord + ByteSerializable> {
    pub entries: Vec<KeyValue<T>>,
}

impl<T: Ord + ByteSerializable> SortedIndex<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build the index from unsorted data.
    pub fn build_index(&mut self, mut data: Vec<KeyValue<T>>) {
        data.sort_by(|a, b| a.key.cmp(&b.key));
        self.entries = data;
    }

    /// Offsets for an exact key match.
    pub fn query_exact(&self, key: &T) -> Option<&[ValueOffset]> {
        self.entries
            .binary_search_by_key(&key, |kv| &kv.key)
            .ok()
            .map(|i| self.entries[i].offsets.as_slice())
    }

    /// Offsets for keys in the half-open interval `[lower, upper)`.
    /// `None` for either bound means unbounded.
    pub fn query_range(&self, lower: Option<&T>, upper: Option<&T>) -> Vec<&[ValueOffset]> {
        let start_index = match lower {
            Some(lower_bound) => self
                .entries
                .binary_search_by_key(&lower_bound, |kv| &kv.key)
                .unwrap_or_else(|i| i),
            None => 0,
        };

        let mut results = Vec::new();
        for kv in self.entries.iter().skip(start_index) {
            if let Some(upper_bound) = upper {
                if &kv.key >= upper_bound {
                    break;
                }
            }
            results.push(kv.offsets.as_slice());
        }
        results
    }
}

/// Serialization of an index section.
///
/// Layout: `type_id u32`, `entry count u64`, then per entry `key_len u64`,
/// key bytes, `offset count u64`, offsets as `u64`. All little-endian.
pub trait IndexSerializable {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()>;

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self>
    where
        Self: Sized;
}

impl<T: Ord + ByteSerializable> IndexSerializable for SortedIndex<T> {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(T::serialized_type().type_id())?;
        writer.write_u64::<LittleEndian>(self.entries.len() as u64)?;
        for kv in &self.entries {
            let key_bytes = kv.key.to_bytes();
            writer.write_u64::<LittleEndian>(key_bytes.len() as u64)?;
            writer.write_all(&key_bytes)?;
            writer.write_u64::<LittleEndian>(kv.offsets.len() as u64)?;
            for offset in &kv.offsets {
                writer.write_u64::<LittleEndian>(*offset)?;
            }
        }
        Ok(())
    }

    fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let type_id = reader.read_u32::<LittleEndian>()?;
        let section_type = ByteSerializableType::from_type_id(type_id)?;
        if section_type != T::serialized_type() {
            return Err(Error::InvalidType(format!(
                "index section holds {section_type:?} keys, expected {:?}",
                T::serialized_type()
            )));
        }
        let num_entries = reader.read_u64::<LittleEndian>()?;

        let mut entries = Vec::with_capacity(num_entries as usize);
        for _ in 0..num_entries {
            let key_len = reader.read_u64::<LittleEndian>()? as usize;
            let mut key_buf = vec![0u8; key_len];
            reader.read_exact(&mut key_buf)?;
            let key = T::from_bytes(&key_buf);

            let offsets_len = reader.read_u64::<LittleEndian>()? as usize;
            let mut offsets = Vec::with_capacity(offsets_len);
            for _ in 0..offsets_len {
                offsets.push(reader.read_u64::<LittleEndian>()?);
            }
            entries.push(KeyValue { key, offsets });
        }
        Ok(SortedIndex { entries })
    }
}

/// Type-erased query surface so one `MultiIndex` can hold indexes over
/// heterogeneous key types. Boundaries cross as serialized key bytes.
pub trait AnyIndex: Send + Sync {
    fn query_exact_bytes(&self, key: &[u8]) -> Vec<ValueOffset>;

    fn query_range_bytes(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Vec<ValueOffset>;
}

impl<T> AnyIndex for SortedIndex<T>
where
    T: ByteSerializable + Ord + 'static,
{
    fn query_exact_bytes(&self, key: &[u8]) -> Vec<ValueOffset> {
        let key = T::from_bytes(key);
        self.query_exact(&key).unwrap_or(&[]).to_vec()
    }

    fn query_range_bytes(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Vec<ValueOffset> {
        let lower = lower.map(|b| T::from_bytes(b));
        let upper = upper.map(|b| T::from_bytes(b));
        self.query_range(lower.as_ref(), upper.as_ref())
            .into_iter()
            .flatten()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_serializable::OrderedFloat;
    use std::io::Cursor;

    fn height_index() -> SortedIndex<OrderedFloat<f64>> {
        let mut index = SortedIndex::new();
        index.build_index(vec![
            KeyValue {
                key: OrderedFloat(20.0),
                offsets: vec![2, 3],
            },
            KeyValue {
                key: OrderedFloat(10.5),
                offsets: vec![0],
            },
            KeyValue {
                key: OrderedFloat(15.2),
                offsets: vec![1],
            },
        ]);
        index
    }

    #[test]
    fn build_sorts_entries() {
        let index = height_index();
        let keys: Vec<f64> = index.entries.iter().map(|kv| kv.key.0).collect();
        assert_eq!(keys, vec![10.5, 15.2, 20.0]);
    }

    #[test]
    fn exact_match_returns_all_duplicates() {
        let index = height_index();
        assert_eq!(index.query_exact(&OrderedFloat(20.0)), Some(&[2, 3][..]));
        assert_eq!(index.query_exact(&OrderedFloat(11.0)), None);
    }

    #[test]
    fn range_is_half_open() {
        let index = height_index();
        let hits: Vec<ValueOffset> = index
            .query_range(Some(&OrderedFloat(10.5)), Some(&OrderedFloat(20.0)))
            .into_iter()
            .flatten()
            .copied()
            .collect();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn serialize_roundtrip() -> Result<()> {
        let index = height_index();
        let mut buf = Vec::new();
        index.serialize(&mut buf)?;

        let restored = SortedIndex::<OrderedFloat<f64>>::deserialize(&mut Cursor::new(&buf))?;
        assert_eq!(restored.entries, index.entries);
        Ok(())
    }

    #[test]
    fn deserialize_rejects_wrong_key_type() {
        let index = height_index();
        let mut buf = Vec::new();
        index.serialize(&mut buf).unwrap();

        let result = SortedIndex::<i64>::deserialize(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(Error::InvalidType(_))));
    }

    #[test]
    fn string_index_roundtrip() -> Result<()> {
        let mut index = SortedIndex::new();
        index.build_index(vec![
            KeyValue {
                key: "NL.IMBAG.Pand.0503100000012869".to_string(),
                offsets: vec![100],
            },
            KeyValue {
                key: "NL.IMBAG.Pand.0503100000000001".to_string(),
                offsets: vec![0],
            },
        ]);
        let mut buf = Vec::new();
        index.serialize(&mut buf)?;
        let restored = SortedIndex::<String>::deserialize(&mut Cursor::new(&buf))?;
        assert_eq!(
            restored.query_exact(&"NL.IMBAG.Pand.0503100000012869".to_string()),
            Some(&[100][..])
        );
        Ok(())
    }
}
