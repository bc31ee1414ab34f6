use std::cmp::Ordering;

use anyhow::Result;

use super::schema::Schema;
use super::{ByteReader, Row};

/// Serializes rows into fixed-size index keys and compares them. The B+
/// tree stores opaque key bytes; this is the external comparator the tree
/// is parameterized with.
#[derive(Debug, Clone)]
pub struct KeyManager {
    key_schema: Schema,
    key_size: usize,
}

impl KeyManager {
    pub fn new(key_schema: Schema) -> Self {
        // row header (magic, field count, null bitmap) + widest payload
        let key_size = 12 + key_schema
            .get_columns()
            .iter()
            .map(|c| c.max_field_size())
            .sum::<usize>();
        Self {
            key_schema,
            key_size,
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    /// Serialize a key row into a zero-padded fixed-size buffer.
    pub fn key_from_row(&self, row: &Row) -> Result<Vec<u8>> {
        let mut key = Vec::with_capacity(self.key_size);
        row.serialize_to(&mut key, &self.key_schema)?;
        key.resize(self.key_size, 0);
        Ok(key)
    }

    pub fn row_from_key(&self, key: &[u8]) -> Result<Row> {
        let mut reader = ByteReader::new(key);
        Row::deserialize_from(&mut reader, &self.key_schema)
    }

    /// Field-wise comparison of two serialized keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let left = self.row_from_key(a).expect("corrupted index key");
        let right = self.row_from_key(b).expect("corrupted index key");

        for i in 0..self.key_schema.column_count() {
            let ordering = left.get_field(i).compare(right.get_field(i));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::schema::Column;
    use crate::record::types::TypeId;
    use crate::record::Field;

    fn int_key_manager() -> KeyManager {
        KeyManager::new(Schema::new(vec![Column::new(
            "id",
            TypeId::Int,
            0,
            false,
            true,
        )]))
    }

    #[test]
    fn test_fixed_key_size() {
        let km = int_key_manager();
        assert_eq!(16, km.key_size());

        let key = km.key_from_row(&Row::new(vec![Field::Int(5)])).unwrap();
        assert_eq!(km.key_size(), key.len());
    }

    #[test]
    fn test_compare_ints() {
        let km = int_key_manager();
        let k1 = km.key_from_row(&Row::new(vec![Field::Int(-3)])).unwrap();
        let k2 = km.key_from_row(&Row::new(vec![Field::Int(10)])).unwrap();

        assert_eq!(Ordering::Less, km.compare(&k1, &k2));
        assert_eq!(Ordering::Greater, km.compare(&k2, &k1));
        assert_eq!(Ordering::Equal, km.compare(&k1, &k1));
    }

    #[test]
    fn test_compare_composite() {
        let km = KeyManager::new(Schema::new(vec![
            Column::new_char("name", 8, 0, false, false),
            Column::new("id", TypeId::Int, 1, false, false),
        ]));

        let make = |name: &str, id: i32| {
            km.key_from_row(&Row::new(vec![
                Field::Char(name.to_string()),
                Field::Int(id),
            ]))
            .unwrap()
        };

        assert_eq!(Ordering::Less, km.compare(&make("a", 9), &make("b", 1)));
        assert_eq!(Ordering::Less, km.compare(&make("a", 1), &make("a", 2)));
        assert_eq!(Ordering::Equal, km.compare(&make("a", 1), &make("a", 1)));
    }
}
