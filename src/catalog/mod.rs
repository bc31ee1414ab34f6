use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::buffer_pool::ArcBufferPool;
use crate::errors::Error;
use crate::indexes::b_plus_tree::btree::BPlusTree;
use crate::pages::index_roots_page::IndexRootsPage;
use crate::pages::{PageId, CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID, PAGE_SIZE};
use crate::record::key::KeyManager;
use crate::record::schema::Schema;
use crate::record::{write_bytes, write_u32, ByteReader};
use crate::table::TableHeap;

pub const CATALOG_MAGIC: u32 = 0x4D50_4C43;
pub const TABLE_META_MAGIC: u32 = 0x4D54_4142;
pub const INDEX_META_MAGIC: u32 = 0x4D49_4458;

const BPTREE_INDEX_TYPE: &str = "bptree";

/// A live table: its heap plus the identity the catalog tracks.
pub struct TableInfo {
    table_id: u32,
    name: String,
    heap: TableHeap,
}

impl TableInfo {
    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_schema(&self) -> &Schema {
        self.heap.get_schema()
    }

    pub fn get_heap(&self) -> &TableHeap {
        &self.heap
    }

    pub fn get_heap_mut(&mut self) -> &mut TableHeap {
        &mut self.heap
    }
}

/// A live index: the B+ tree plus the key projection it maintains.
pub struct IndexInfo {
    index_id: u32,
    name: String,
    table_id: u32,
    key_column_indexes: Vec<u32>,
    tree: BPlusTree,
}

impl IndexInfo {
    pub fn get_index_id(&self) -> u32 {
        self.index_id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_table_id(&self) -> u32 {
        self.table_id
    }

    pub fn get_key_column_indexes(&self) -> &[u32] {
        &self.key_column_indexes
    }

    pub fn get_tree(&self) -> &BPlusTree {
        &self.tree
    }

    pub fn get_tree_mut(&mut self) -> &mut BPlusTree {
        &mut self.tree
    }
}

/// Persists table and index descriptors so a database can be reopened.
/// Logical page 0 maps ids to metadata pages; each descriptor lives on its
/// own page.
pub struct CatalogManager {
    bpm: ArcBufferPool,

    tables: HashMap<u32, TableInfo>,
    table_names: HashMap<String, u32>,
    table_meta_pages: HashMap<u32, PageId>,

    indexes: HashMap<u32, IndexInfo>,
    /// table name -> index name -> index id
    index_names: HashMap<String, HashMap<String, u32>>,
    index_meta_pages: HashMap<u32, PageId>,

    next_table_id: u32,
    next_index_id: u32,
}

impl CatalogManager {
    /// Open an existing catalog from page 0, or bootstrap a fresh database
    /// (claiming logical pages 0 and 1) when the file is empty.
    pub fn new(bpm: ArcBufferPool) -> Result<Self> {
        let mut manager = Self {
            bpm,
            tables: HashMap::new(),
            table_names: HashMap::new(),
            table_meta_pages: HashMap::new(),
            indexes: HashMap::new(),
            index_names: HashMap::new(),
            index_meta_pages: HashMap::new(),
            next_table_id: 0,
            next_index_id: 0,
        };

        // a file with no allocations has never been bootstrapped; probing
        // page 0 through the pool would cache a frame for a page that the
        // bootstrap is about to allocate
        let fresh = manager.bpm.lock().allocated_page_count() == 0;
        if fresh {
            manager.bootstrap()?;
        } else {
            manager.load()?;
        }

        Ok(manager)
    }

    /// First open of a database file: reserve the two well-known pages.
    fn bootstrap(&mut self) -> Result<()> {
        {
            let mut guard = self.bpm.lock();
            for expected in [CATALOG_META_PAGE_ID, INDEX_ROOTS_PAGE_ID] {
                let page_id = guard.new_page()?.reader().get_page_id();
                assert_eq!(expected, page_id, "bootstrap on a non-empty file");
                guard.unpin_page(page_id, true);
            }

            let mut roots: IndexRootsPage =
                guard.fetch_page(INDEX_ROOTS_PAGE_ID)?.writer().into();
            roots.init(INDEX_ROOTS_PAGE_ID);
            guard.unpin_page(INDEX_ROOTS_PAGE_ID, true);
        }
        self.flush_meta()
    }

    fn load(&mut self) -> Result<()> {
        let data = {
            let mut guard = self.bpm.lock();
            let page = guard.fetch_page(CATALOG_META_PAGE_ID)?.reader();
            let data = page.read_bytes(0, PAGE_SIZE).to_vec();
            guard.unpin_page(CATALOG_META_PAGE_ID, false);
            data
        };

        let mut reader = ByteReader::new(&data);
        if reader.read_u32() != CATALOG_MAGIC {
            bail!(Error::MagicMismatch("catalog meta"));
        }
        let table_count = reader.read_u32();
        let index_count = reader.read_u32();

        let table_pages: Vec<(u32, PageId)> = (0..table_count)
            .map(|_| (reader.read_u32(), reader.read_i32()))
            .collect();
        let index_pages: Vec<(u32, PageId)> = (0..index_count)
            .map(|_| (reader.read_u32(), reader.read_i32()))
            .collect();

        for (table_id, meta_page_id) in table_pages {
            self.load_table(table_id, meta_page_id)?;
            self.next_table_id = self.next_table_id.max(table_id + 1);
        }
        for (index_id, meta_page_id) in index_pages {
            self.load_index(index_id, meta_page_id)?;
            self.next_index_id = self.next_index_id.max(index_id + 1);
        }
        Ok(())
    }

    fn load_table(&mut self, table_id: u32, meta_page_id: PageId) -> Result<()> {
        let data = {
            let mut guard = self.bpm.lock();
            let page = guard.fetch_page(meta_page_id)?.reader();
            let data = page.read_bytes(0, PAGE_SIZE).to_vec();
            guard.unpin_page(meta_page_id, false);
            data
        };

        let mut reader = ByteReader::new(&data);
        if reader.read_u32() != TABLE_META_MAGIC {
            bail!(Error::MagicMismatch("table metadata"));
        }
        let stored_id = reader.read_u32();
        debug_assert_eq!(table_id, stored_id);
        let name_len = reader.read_u32() as usize;
        let name = String::from_utf8(reader.read_bytes(name_len).to_vec())?;
        let first_page_id = reader.read_i32();
        let schema = Schema::deserialize_from(&mut reader)?;

        let heap = TableHeap::open(self.bpm.clone(), first_page_id, schema)?;
        self.table_names.insert(name.clone(), table_id);
        self.table_meta_pages.insert(table_id, meta_page_id);
        self.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name,
                heap,
            },
        );
        Ok(())
    }

    fn load_index(&mut self, index_id: u32, meta_page_id: PageId) -> Result<()> {
        let data = {
            let mut guard = self.bpm.lock();
            let page = guard.fetch_page(meta_page_id)?.reader();
            let data = page.read_bytes(0, PAGE_SIZE).to_vec();
            guard.unpin_page(meta_page_id, false);
            data
        };

        let mut reader = ByteReader::new(&data);
        if reader.read_u32() != INDEX_META_MAGIC {
            bail!(Error::MagicMismatch("index metadata"));
        }
        let stored_id = reader.read_u32();
        debug_assert_eq!(index_id, stored_id);
        let name_len = reader.read_u32() as usize;
        let name = String::from_utf8(reader.read_bytes(name_len).to_vec())?;
        let table_id = reader.read_u32();
        let key_count = reader.read_u32();
        let key_column_indexes: Vec<u32> = (0..key_count).map(|_| reader.read_u32()).collect();

        let table = self
            .tables
            .get(&table_id)
            .ok_or_else(|| Error::Internal("index references a missing table".into()))?;
        let key_schema = table.get_schema().project(&key_column_indexes);
        let tree = BPlusTree::new(index_id, self.bpm.clone(), KeyManager::new(key_schema))?;

        self.index_names
            .entry(table.name.clone())
            .or_default()
            .insert(name.clone(), index_id);
        self.index_meta_pages.insert(index_id, meta_page_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                index_id,
                name,
                table_id,
                key_column_indexes,
                tree,
            },
        );
        Ok(())
    }

    pub fn create_table(&mut self, table_name: &str, schema: Schema) -> Result<u32> {
        if self.table_names.contains_key(table_name) {
            bail!(Error::TableExists(table_name.to_string()));
        }

        let table_id = self.next_table_id;
        self.next_table_id += 1;

        let heap = TableHeap::new(self.bpm.clone(), schema)?;

        // descriptor page: magic | id | name | first heap page | schema
        let meta_page_id = {
            let mut buf = vec![];
            write_u32(&mut buf, TABLE_META_MAGIC);
            write_u32(&mut buf, table_id);
            write_u32(&mut buf, table_name.len() as u32);
            write_bytes(&mut buf, table_name.as_bytes());
            write_bytes(&mut buf, &heap.get_first_page_id().to_ne_bytes());
            heap.get_schema().serialize_to(&mut buf);

            let mut guard = self.bpm.lock();
            let frame = guard.new_page()?;
            let meta_page_id = frame.reader().get_page_id();
            frame.writer().write_bytes(0, &buf);
            guard.unpin_page(meta_page_id, true);
            meta_page_id
        };

        self.table_names.insert(table_name.to_string(), table_id);
        self.table_meta_pages.insert(table_id, meta_page_id);
        self.tables.insert(
            table_id,
            TableInfo {
                table_id,
                name: table_name.to_string(),
                heap,
            },
        );

        self.flush_meta()?;
        Ok(table_id)
    }

    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_column_names: &[&str],
        index_type: &str,
    ) -> Result<u32> {
        if index_type != BPTREE_INDEX_TYPE {
            bail!(Error::UnsupportedIndexType(index_type.to_string()));
        }
        let Some(&table_id) = self.table_names.get(table_name) else {
            bail!(Error::TableNotFound(table_name.to_string()));
        };
        if self
            .index_names
            .get(table_name)
            .is_some_and(|m| m.contains_key(index_name))
        {
            bail!(Error::IndexExists(index_name.to_string()));
        }

        let schema = self.tables[&table_id].get_schema().clone();
        let key_column_indexes = key_column_names
            .iter()
            .map(|name| schema.column_index(name))
            .collect::<Result<Vec<u32>>>()?;

        let index_id = self.next_index_id;
        self.next_index_id += 1;

        let key_schema = schema.project(&key_column_indexes);
        let tree = BPlusTree::new(index_id, self.bpm.clone(), KeyManager::new(key_schema))?;

        let meta_page_id = {
            let mut buf = vec![];
            write_u32(&mut buf, INDEX_META_MAGIC);
            write_u32(&mut buf, index_id);
            write_u32(&mut buf, index_name.len() as u32);
            write_bytes(&mut buf, index_name.as_bytes());
            write_u32(&mut buf, table_id);
            write_u32(&mut buf, key_column_indexes.len() as u32);
            for &index in &key_column_indexes {
                write_u32(&mut buf, index);
            }

            let mut guard = self.bpm.lock();
            let frame = guard.new_page()?;
            let meta_page_id = frame.reader().get_page_id();
            frame.writer().write_bytes(0, &buf);
            guard.unpin_page(meta_page_id, true);
            meta_page_id
        };

        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), index_id);
        self.index_meta_pages.insert(index_id, meta_page_id);
        self.indexes.insert(
            index_id,
            IndexInfo {
                index_id,
                name: index_name.to_string(),
                table_id,
                key_column_indexes,
                tree,
            },
        );

        self.flush_meta()?;
        Ok(index_id)
    }

    pub fn get_table(&self, table_name: &str) -> Result<&TableInfo> {
        match self.table_names.get(table_name) {
            Some(table_id) => Ok(&self.tables[table_id]),
            None => bail!(Error::TableNotFound(table_name.to_string())),
        }
    }

    pub fn get_table_mut(&mut self, table_name: &str) -> Result<&mut TableInfo> {
        match self.table_names.get(table_name) {
            Some(table_id) => Ok(self.tables.get_mut(table_id).unwrap()),
            None => bail!(Error::TableNotFound(table_name.to_string())),
        }
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> Result<&IndexInfo> {
        match self
            .index_names
            .get(table_name)
            .and_then(|m| m.get(index_name))
        {
            Some(index_id) => Ok(&self.indexes[index_id]),
            None => bail!(Error::IndexNotFound(index_name.to_string())),
        }
    }

    pub fn get_index_mut(&mut self, table_name: &str, index_name: &str) -> Result<&mut IndexInfo> {
        match self
            .index_names
            .get(table_name)
            .and_then(|m| m.get(index_name))
        {
            Some(index_id) => {
                let index_id = *index_id;
                Ok(self.indexes.get_mut(&index_id).unwrap())
            }
            None => bail!(Error::IndexNotFound(index_name.to_string())),
        }
    }

    /// Indexes defined over a table, for executor-side maintenance.
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<&IndexInfo> {
        self.index_names
            .get(table_name)
            .map(|m| m.values().map(|id| &self.indexes[id]).collect())
            .unwrap_or_default()
    }

    /// Drop a table, its heap pages, and every index built over it.
    pub fn drop_table(&mut self, table_name: &str) -> Result<()> {
        let Some(&table_id) = self.table_names.get(table_name) else {
            bail!(Error::TableNotFound(table_name.to_string()));
        };

        let index_ids: Vec<u32> = self
            .index_names
            .remove(table_name)
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        for index_id in index_ids {
            let mut info = self.indexes.remove(&index_id).unwrap();
            info.tree.destroy()?;
            let meta_page_id = self.index_meta_pages.remove(&index_id).unwrap();
            self.bpm.lock().delete_page(meta_page_id)?;
        }

        let info = self.tables.remove(&table_id).unwrap();
        self.table_names.remove(table_name);
        info.heap.free_heap()?;

        let meta_page_id = self.table_meta_pages.remove(&table_id).unwrap();
        self.bpm.lock().delete_page(meta_page_id)?;

        self.flush_meta()
    }

    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<()> {
        let Some(index_id) = self
            .index_names
            .get_mut(table_name)
            .and_then(|m| m.remove(index_name))
        else {
            bail!(Error::IndexNotFound(index_name.to_string()));
        };

        let mut info = self.indexes.remove(&index_id).unwrap();
        info.tree.destroy()?;

        let meta_page_id = self.index_meta_pages.remove(&index_id).unwrap();
        self.bpm.lock().delete_page(meta_page_id)?;

        self.flush_meta()
    }

    /// Serialize the id -> metadata-page maps onto page 0 and force them to
    /// disk. No table write is durable without its entry here.
    pub fn flush_meta(&mut self) -> Result<()> {
        let mut buf = vec![];
        write_u32(&mut buf, CATALOG_MAGIC);
        write_u32(&mut buf, self.table_meta_pages.len() as u32);
        write_u32(&mut buf, self.index_meta_pages.len() as u32);

        let mut table_pages: Vec<_> = self.table_meta_pages.iter().collect();
        table_pages.sort();
        for (&table_id, &page_id) in table_pages {
            write_u32(&mut buf, table_id);
            write_bytes(&mut buf, &page_id.to_ne_bytes());
        }
        let mut index_pages: Vec<_> = self.index_meta_pages.iter().collect();
        index_pages.sort();
        for (&index_id, &page_id) in index_pages {
            write_u32(&mut buf, index_id);
            write_bytes(&mut buf, &page_id.to_ne_bytes());
        }

        let mut guard = self.bpm.lock();
        let page = guard.fetch_page(CATALOG_META_PAGE_ID)?.writer();
        page.write_bytes(0, &buf);
        guard.unpin_page(CATALOG_META_PAGE_ID, true);
        guard.flush_page(CATALOG_META_PAGE_ID)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::tests::test_arc_bpm;
    use crate::buffer_pool::BufferPoolManager;
    use crate::disk_manager::test_path;
    use crate::record::schema::Column;
    use crate::record::types::TypeId;
    use crate::record::{Field, Row};
    use parking_lot::FairMutex;
    use std::sync::Arc;

    fn test_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 64, 1, true, false),
            Column::new("account", TypeId::Float, 2, true, false),
        ])
    }

    #[test]
    fn test_create_and_get_table() -> Result<()> {
        let bpm = test_arc_bpm(32);
        let mut catalog = CatalogManager::new(bpm.clone())?;

        catalog.create_table("accounts", test_schema())?;
        assert!(catalog.get_table("accounts").is_ok());
        assert!(catalog.get_table("missing").is_err());

        // duplicate names are refused
        assert!(catalog.create_table("accounts", test_schema()).is_err());

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_create_index_validation() -> Result<()> {
        let bpm = test_arc_bpm(32);
        let mut catalog = CatalogManager::new(bpm)?;
        catalog.create_table("accounts", test_schema())?;

        assert!(catalog
            .create_index("accounts", "idx_id", &["id"], "hash")
            .is_err());
        assert!(catalog
            .create_index("accounts", "idx_id", &["balance"], "bptree")
            .is_err());
        assert!(catalog
            .create_index("missing", "idx_id", &["id"], "bptree")
            .is_err());

        catalog.create_index("accounts", "idx_id", &["id"], "bptree")?;
        assert!(catalog
            .create_index("accounts", "idx_id", &["id"], "bptree")
            .is_err());

        assert_eq!(1, catalog.get_table_indexes("accounts").len());
        Ok(())
    }

    #[test]
    fn test_index_tracks_rows() -> Result<()> {
        let bpm = test_arc_bpm(32);
        let mut catalog = CatalogManager::new(bpm.clone())?;
        catalog.create_table("accounts", test_schema())?;
        catalog.create_index("accounts", "idx_id", &["id"], "bptree")?;

        let schema = catalog.get_table("accounts")?.get_schema().clone();
        let mut rids = vec![];
        for id in 0..100 {
            let row = Row::new(vec![
                Field::Int(id),
                Field::Char(format!("user{id}")),
                Field::Float(id as f32),
            ]);
            let rid = catalog
                .get_table_mut("accounts")?
                .get_heap_mut()
                .insert(&row)?;

            let index = catalog.get_index_mut("accounts", "idx_id")?;
            let key_schema = index.get_tree().key_manager().key_schema().clone();
            let key_row = row.get_key_from_row(&schema, &key_schema)?;
            let key = index.get_tree().key_manager().key_from_row(&key_row)?;
            assert!(index.get_tree_mut().insert(&key, rid)?);
            rids.push((key, rid));
        }

        let index = catalog.get_index("accounts", "idx_id")?;
        for (key, rid) in &rids {
            assert_eq!(Some(*rid), index.get_tree().get_value(key)?);
        }

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }

    #[test]
    fn test_reopen_database() -> Result<()> {
        let path = test_path();

        {
            let bpm: ArcBufferPool = Arc::new(FairMutex::new(BufferPoolManager::new(
                32, &path,
            )?));
            let mut catalog = CatalogManager::new(bpm.clone())?;
            catalog.create_table("accounts", test_schema())?;
            catalog.create_index("accounts", "idx_id", &["id"], "bptree")?;

            let row = Row::new(vec![
                Field::Int(42),
                Field::Char("persisted".to_string()),
                Field::Float(1.0),
            ]);
            catalog
                .get_table_mut("accounts")?
                .get_heap_mut()
                .insert(&row)?;

            bpm.lock().close()?;
        }

        let bpm: ArcBufferPool = Arc::new(FairMutex::new(BufferPoolManager::new(32, &path)?));
        let catalog = CatalogManager::new(bpm)?;

        let table = catalog.get_table("accounts")?;
        assert_eq!(3, table.get_schema().column_count());
        let rows: Vec<_> = table.get_heap().iter().collect();
        assert_eq!(1, rows.len());
        assert_eq!(&Field::Int(42), rows[0].1.get_field(0));

        assert!(catalog.get_index("accounts", "idx_id").is_ok());
        Ok(())
    }

    #[test]
    fn test_drop_table_and_index() -> Result<()> {
        let bpm = test_arc_bpm(32);
        let mut catalog = CatalogManager::new(bpm.clone())?;

        catalog.create_table("accounts", test_schema())?;
        catalog.create_index("accounts", "idx_id", &["id"], "bptree")?;

        catalog.drop_index("accounts", "idx_id")?;
        assert!(catalog.get_index("accounts", "idx_id").is_err());
        assert!(catalog.drop_index("accounts", "idx_id").is_err());

        catalog.drop_table("accounts")?;
        assert!(catalog.get_table("accounts").is_err());

        // the names are free for reuse
        catalog.create_table("accounts", test_schema())?;

        assert!(bpm.lock().check_all_unpinned());
        Ok(())
    }
}
