use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;

pub struct GoldenTest {
    root: PathBuf,
}

impl GoldenTest {
    pub fn new(suite: &str) -> Self {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
        let root = PathBuf::from(manifest_dir)
            .join("tests")
            .join("golden")
            .join("data")
            .join(suite);
        Self { root }
    }

    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> T {
        let path = self.root.join(format!("{name}.json"));
        let content = fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("failed to read golden file: {path:?}"));
        serde_json::from_str(&content)
            .unwrap_or_else(|e| panic!("failed to parse golden file {path:?}: {e}"))
    }

    /// Compare `actual` against the fixture `name.json`, parsed as generic
    /// JSON values so formatting differences don't fail the comparison.
    pub fn assert_json<T: serde::Serialize>(&self, name: &str, actual: &T) {
        let expected_path = self.root.join(format!("{name}.json"));
        let actual_json = serde_json::to_value(actual).expect("failed to serialize actual value");

        let expected_content = fs::read_to_string(&expected_path).unwrap_or_else(|_| {
            panic!(
                "golden file missing: {expected_path:?}\nactual content:\n{}",
                serde_json::to_string_pretty(&actual_json).unwrap()
            )
        });
        let expected_json: serde_json::Value =
            serde_json::from_str(&expected_content).expect("failed to parse expected golden file");

        assert_eq!(expected_json, actual_json, "golden mismatch for {name}");
    }
}
