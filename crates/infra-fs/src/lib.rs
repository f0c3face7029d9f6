// Kiln Infrastructure - File Snapshot Adapter
// Implements: SnapshotStore (one JSON document per job kind)

mod json_snapshot_store;

pub use json_snapshot_store::JsonFileSnapshotStore;
