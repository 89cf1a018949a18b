use herald_core::{ClusterError, ClusterResult, SchemaManifest};

pub fn schema_manifest_json() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/schema_manifest.json"))
}

pub fn load_schema_manifest() -> ClusterResult<SchemaManifest> {
    serde_json::from_str(schema_manifest_json())
        .map_err(|err| ClusterError::storage(format!("schema manifest parse: {err}")))
}
