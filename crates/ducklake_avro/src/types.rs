/// Identifies the virtual manifest triple a snapshot's files fan out into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManifestKey {
    pub table_id: i64,
    pub snapshot_id: i64,
}

/// The computed bytes for one snapshot: the manifest list plus every
/// manifest it references, keyed by the filename the virtual path serves
/// (`snap-<id>.avro`, `<snap>-m0.avro`, `<snap>-m1.avro`).
#[derive(Debug, Clone)]
pub struct ManifestSet {
    pub manifest_list: Vec<u8>,
    pub manifests: Vec<(String, Vec<u8>)>,
}

impl ManifestSet {
    pub fn get(&self, filename: &str) -> Option<&[u8]> {
        self.manifests.iter().find(|(name, _)| name == filename).map(|(_, bytes)| bytes.as_slice())
    }
}
