use serde::{Deserialize, Serialize};

/// Declared shape of the clustering tables, shipped alongside the migrations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaManifest {
    pub manifest_version: String,
    pub migrations: Vec<String>,
    pub tables: Vec<TableManifest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    pub name: String,
    pub columns: Vec<ColumnManifest>,
    pub indexes: Vec<IndexManifest>,
}

impl TableManifest {
    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexManifest> {
        self.indexes.iter().filter(|index| index.unique)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnManifest {
    pub name: String,
    pub logical_type: String,
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}
