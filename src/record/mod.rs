pub mod key;
pub mod schema;
pub mod types;

use std::cmp::Ordering;

use anyhow::{bail, ensure, Result};

use crate::errors::Error;
use crate::pages::{PageId, INVALID_PAGE_ID};
use schema::Schema;
use types::TypeId;

pub const ROW_MAGIC: u32 = 0x5253_4F57;

/// Address of a row: the table page holding it and its slot there. Stable
/// for the life of the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    page_id: PageId,
    slot: u32,
}

pub const INVALID_ROW_ID: RowId = RowId {
    page_id: INVALID_PAGE_ID,
    slot: 0,
};

impl RowId {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn get_page_id(&self) -> PageId {
        self.page_id
    }

    pub fn get_slot(&self) -> u32 {
        self.slot
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.page_id.to_ne_bytes());
        bytes[4..8].copy_from_slice(&self.slot.to_ne_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: PageId::from_ne_bytes(bytes[0..4].try_into().unwrap()),
            slot: u32::from_ne_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

/// A single typed value inside a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null(TypeId),
    Int(i32),
    Float(f32),
    Char(String),
}

impl Field {
    pub fn get_type(&self) -> TypeId {
        match self {
            Field::Null(type_id) => *type_id,
            Field::Int(_) => TypeId::Int,
            Field::Float(_) => TypeId::Float,
            Field::Char(_) => TypeId::Char,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null(_))
    }

    /// Null fields occupy no payload bytes; the row's null bitmap carries
    /// them.
    pub fn serialized_size(&self) -> usize {
        match self {
            Field::Null(_) => 0,
            Field::Int(_) | Field::Float(_) => 4,
            Field::Char(s) => 4 + s.len(),
        }
    }

    fn serialize_to(&self, buf: &mut Vec<u8>) {
        match self {
            Field::Null(_) => {}
            Field::Int(v) => write_bytes(buf, &v.to_ne_bytes()),
            Field::Float(v) => write_bytes(buf, &v.to_ne_bytes()),
            Field::Char(s) => {
                write_u32(buf, s.len() as u32);
                write_bytes(buf, s.as_bytes());
            }
        }
    }

    fn deserialize_from(reader: &mut ByteReader, type_id: TypeId, is_null: bool) -> Result<Self> {
        if is_null {
            return Ok(Field::Null(type_id));
        }
        Ok(match type_id {
            TypeId::Int => Field::Int(i32::from_ne_bytes(reader.read_bytes(4).try_into()?)),
            TypeId::Float => Field::Float(f32::from_ne_bytes(reader.read_bytes(4).try_into()?)),
            TypeId::Char => {
                let len = reader.read_u32() as usize;
                Field::Char(String::from_utf8(reader.read_bytes(len).to_vec())?)
            }
        })
    }

    /// Total order for index keys; nulls sort before every value.
    pub fn compare(&self, other: &Field) -> Ordering {
        match (self, other) {
            (Field::Null(_), Field::Null(_)) => Ordering::Equal,
            (Field::Null(_), _) => Ordering::Less,
            (_, Field::Null(_)) => Ordering::Greater,
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Float(a), Field::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Field::Char(a), Field::Char(b)) => a.cmp(b),
            _ => unreachable!("comparing fields of different types"),
        }
    }
}

/// An ordered sequence of typed fields matching a schema, addressed by a
/// [`RowId`] once it lives in a table heap.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    rid: RowId,
    fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            rid: INVALID_ROW_ID,
            fields,
        }
    }

    pub fn with_rid(rid: RowId) -> Self {
        Self { rid, fields: vec![] }
    }

    pub fn get_rid(&self) -> RowId {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RowId) {
        self.rid = rid;
    }

    pub fn get_field(&self, index: u32) -> &Field {
        &self.fields[index as usize]
    }

    pub fn get_fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    fn null_bitmap(&self) -> u32 {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_null())
            .fold(0u32, |bitmap, (i, _)| bitmap | (1 << i))
    }

    pub fn serialized_size(&self, schema: &Schema) -> usize {
        debug_assert_eq!(schema.column_count(), self.field_count());
        12 + self
            .fields
            .iter()
            .map(|f| f.serialized_size())
            .sum::<usize>()
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>, schema: &Schema) -> Result<()> {
        ensure!(
            schema.column_count() == self.field_count(),
            Error::Internal("field count does not match schema".into())
        );

        write_u32(buf, ROW_MAGIC);
        write_u32(buf, self.fields.len() as u32);
        write_u32(buf, self.null_bitmap());
        for field in &self.fields {
            field.serialize_to(buf);
        }
        Ok(())
    }

    pub fn deserialize_from(reader: &mut ByteReader, schema: &Schema) -> Result<Self> {
        if reader.read_u32() != ROW_MAGIC {
            bail!(Error::MagicMismatch("row"));
        }
        let field_count = reader.read_u32();
        ensure!(
            field_count == schema.column_count(),
            Error::Internal("field count does not match schema".into())
        );
        let null_bitmap = reader.read_u32();

        let mut fields = Vec::with_capacity(field_count as usize);
        for i in 0..field_count {
            let is_null = (null_bitmap >> i) & 1 == 1;
            fields.push(Field::deserialize_from(
                reader,
                schema.get_column(i).get_type(),
                is_null,
            )?);
        }

        Ok(Self {
            rid: INVALID_ROW_ID,
            fields,
        })
    }

    /// Project this row onto a key schema by column name.
    pub fn get_key_from_row(&self, schema: &Schema, key_schema: &Schema) -> Result<Row> {
        let mut fields = Vec::with_capacity(key_schema.column_count() as usize);
        for column in key_schema.get_columns() {
            let index = schema.column_index(column.get_name())?;
            fields.push(self.fields[index as usize].clone());
        }
        let mut key_row = Row::new(fields);
        key_row.set_rid(self.rid);
        Ok(key_row)
    }
}

pub(crate) fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_ne_bytes());
}

pub(crate) fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
}

/// Cursor over a byte slice for the deserialize paths.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read_u32(&mut self) -> u32 {
        let value = u32::from_ne_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        value
    }

    pub fn read_i32(&mut self) -> i32 {
        let value = i32::from_ne_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        value
    }

    pub fn read_bytes(&mut self, len: usize) -> &'a [u8] {
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        bytes
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::schema::{Column, Schema};
    use super::*;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 64, 1, true, false),
            Column::new("account", TypeId::Float, 2, true, false),
        ])
    }

    #[test]
    fn test_row_round_trip() {
        let schema = test_schema();
        let row = Row::new(vec![
            Field::Int(42),
            Field::Char("minirel".to_string()),
            Field::Float(27.5),
        ]);

        let mut buf = vec![];
        row.serialize_to(&mut buf, &schema).unwrap();
        assert_eq!(row.serialized_size(&schema), buf.len());

        let mut reader = ByteReader::new(&buf);
        let read = Row::deserialize_from(&mut reader, &schema).unwrap();
        assert_eq!(row.get_fields(), read.get_fields());
    }

    #[test]
    fn test_null_fields_round_trip() {
        let schema = test_schema();
        let row = Row::new(vec![
            Field::Int(1),
            Field::Null(TypeId::Char),
            Field::Null(TypeId::Float),
        ]);

        let mut buf = vec![];
        row.serialize_to(&mut buf, &schema).unwrap();
        // nulls carry no payload
        assert_eq!(12 + 4, buf.len());

        let mut reader = ByteReader::new(&buf);
        let read = Row::deserialize_from(&mut reader, &schema).unwrap();
        assert!(read.get_field(1).is_null());
        assert!(read.get_field(2).is_null());
        assert_eq!(&Field::Int(1), read.get_field(0));
    }

    #[test]
    fn test_row_magic_mismatch() {
        let schema = test_schema();
        let row = Row::new(vec![
            Field::Int(1),
            Field::Char("x".to_string()),
            Field::Float(0.0),
        ]);

        let mut buf = vec![];
        row.serialize_to(&mut buf, &schema).unwrap();
        buf[1] ^= 0xFF;

        let mut reader = ByteReader::new(&buf);
        assert!(Row::deserialize_from(&mut reader, &schema).is_err());
    }

    #[test]
    fn test_key_projection() {
        let schema = test_schema();
        let row = Row::new(vec![
            Field::Int(9),
            Field::Char("k".to_string()),
            Field::Float(1.5),
        ]);

        let key_schema = schema.project(&[0]);
        let key = row.get_key_from_row(&schema, &key_schema).unwrap();
        assert_eq!(1, key.field_count());
        assert_eq!(&Field::Int(9), key.get_field(0));
    }

    #[test]
    fn test_rowid_bytes() {
        let rid = RowId::new(12, 7);
        assert_eq!(rid, RowId::from_bytes(&rid.to_bytes()));
    }
}
