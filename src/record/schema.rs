use anyhow::{bail, Result};

use super::types::TypeId;
use super::{ByteReader, write_bytes, write_u32};
use crate::errors::Error;

pub const COLUMN_MAGIC: u32 = 0x434F_4C4D;
pub const SCHEMA_MAGIC: u32 = 0x5343_484D;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    /// Payload length in bytes; fixed at 4 for int and float, the declared
    /// capacity for char columns.
    len: u32,
    /// Position of the column inside its table schema.
    table_ind: u32,
    nullable: bool,
    unique: bool,
}

impl Column {
    pub fn new(name: &str, type_id: TypeId, table_ind: u32, nullable: bool, unique: bool) -> Self {
        assert!(
            type_id != TypeId::Char,
            "char columns take an explicit length"
        );
        Self {
            name: name.to_string(),
            type_id,
            len: 4,
            table_ind,
            nullable,
            unique,
        }
    }

    pub fn new_char(name: &str, len: u32, table_ind: u32, nullable: bool, unique: bool) -> Self {
        Self {
            name: name.to_string(),
            type_id: TypeId::Char,
            len,
            table_ind,
            nullable,
            unique,
        }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_type(&self) -> TypeId {
        self.type_id
    }

    pub fn get_len(&self) -> u32 {
        self.len
    }

    pub fn get_table_ind(&self) -> u32 {
        self.table_ind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Upper bound on the serialized size of one field of this column.
    pub fn max_field_size(&self) -> usize {
        match self.type_id {
            TypeId::Int | TypeId::Float => 4,
            TypeId::Char => 4 + self.len as usize,
        }
    }

    pub fn serialized_size(&self) -> usize {
        4 * 7 + self.name.len()
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        write_u32(buf, COLUMN_MAGIC);
        write_u32(buf, self.name.len() as u32);
        write_bytes(buf, self.name.as_bytes());
        write_u32(buf, self.type_id.to_u32());
        write_u32(buf, self.len);
        write_u32(buf, self.table_ind);
        write_u32(buf, self.nullable as u32);
        write_u32(buf, self.unique as u32);
    }

    pub fn deserialize_from(reader: &mut ByteReader) -> Result<Self> {
        if reader.read_u32() != COLUMN_MAGIC {
            bail!(Error::MagicMismatch("column"));
        }
        let name_len = reader.read_u32() as usize;
        let name = String::from_utf8(reader.read_bytes(name_len).to_vec())?;
        let type_id =
            TypeId::from_u32(reader.read_u32()).ok_or(Error::MagicMismatch("column type"))?;
        let len = reader.read_u32();
        let table_ind = reader.read_u32();
        let nullable = reader.read_u32() != 0;
        let unique = reader.read_u32() != 0;

        Ok(Self {
            name,
            type_id,
            len,
            table_ind,
            nullable,
            unique,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> u32 {
        self.columns.len() as u32
    }

    pub fn get_column(&self, index: u32) -> &Column {
        &self.columns[index as usize]
    }

    pub fn get_columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Result<u32> {
        match self.columns.iter().position(|c| c.get_name() == name) {
            Some(index) => Ok(index as u32),
            None => bail!(Error::ColumnNotFound(name.to_string())),
        }
    }

    /// Project the named columns into a key schema, re-indexed from zero.
    pub fn project(&self, column_indexes: &[u32]) -> Schema {
        let columns = column_indexes
            .iter()
            .enumerate()
            .map(|(new_ind, &old_ind)| {
                let mut column = self.columns[old_ind as usize].clone();
                column.table_ind = new_ind as u32;
                column
            })
            .collect();
        Schema::new(columns)
    }

    pub fn serialized_size(&self) -> usize {
        8 + self
            .columns
            .iter()
            .map(|c| c.serialized_size())
            .sum::<usize>()
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        write_u32(buf, SCHEMA_MAGIC);
        write_u32(buf, self.columns.len() as u32);
        for column in &self.columns {
            column.serialize_to(buf);
        }
    }

    pub fn deserialize_from(reader: &mut ByteReader) -> Result<Self> {
        if reader.read_u32() != SCHEMA_MAGIC {
            bail!(Error::MagicMismatch("schema"));
        }
        let count = reader.read_u32();
        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            columns.push(Column::deserialize_from(reader)?);
        }
        Ok(Self { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 64, 1, true, false),
            Column::new("account", TypeId::Float, 2, true, false),
        ])
    }

    #[test]
    fn test_column_round_trip() {
        let column = Column::new_char("city", 32, 3, true, false);

        let mut buf = vec![];
        column.serialize_to(&mut buf);
        assert_eq!(column.serialized_size(), buf.len());

        let mut reader = ByteReader::new(&buf);
        let read = Column::deserialize_from(&mut reader).unwrap();
        assert_eq!(column, read);
    }

    #[test]
    fn test_schema_round_trip() {
        let schema = test_schema();

        let mut buf = vec![];
        schema.serialize_to(&mut buf);
        assert_eq!(schema.serialized_size(), buf.len());

        let mut reader = ByteReader::new(&buf);
        let read = Schema::deserialize_from(&mut reader).unwrap();
        assert_eq!(schema, read);
    }

    #[test]
    fn test_schema_magic_mismatch() {
        let schema = test_schema();
        let mut buf = vec![];
        schema.serialize_to(&mut buf);
        buf[0] ^= 0xFF;

        let mut reader = ByteReader::new(&buf);
        assert!(Schema::deserialize_from(&mut reader).is_err());
    }

    #[test]
    fn test_column_lookup() {
        let schema = test_schema();
        assert_eq!(1, schema.column_index("name").unwrap());
        assert!(schema.column_index("missing").is_err());

        let key_schema = schema.project(&[2, 0]);
        assert_eq!(2, key_schema.column_count());
        assert_eq!("account", key_schema.get_column(0).get_name());
        assert_eq!(0, key_schema.get_column(0).get_table_ind());
        assert_eq!("id", key_schema.get_column(1).get_name());
    }
}
