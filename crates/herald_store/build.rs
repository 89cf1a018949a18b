use std::env;
use std::fs;
use std::path::Path;

const MANIFEST: &str = "schema_manifest.json";

// A malformed manifest fails the build.
fn main() {
    println!("cargo:rerun-if-changed={MANIFEST}");
    let payload = fs::read_to_string(MANIFEST).expect("read schema_manifest.json");
    let parsed: serde_json::Value =
        serde_json::from_str(&payload).expect("schema_manifest.json is not valid JSON");
    for key in ["migrations", "tables"] {
        let listed = parsed
            .get(key)
            .and_then(|value| value.as_array())
            .is_some_and(|items| !items.is_empty());
        assert!(listed, "schema_manifest.json must list {key}");
    }
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR");
    fs::write(Path::new(&out_dir).join(MANIFEST), payload).expect("write schema manifest");
}
