pub mod memory;
pub mod persistence;
pub mod seed;

pub use memory::{DEFAULT_LOCK_TIMEOUT, MemoryDatabase, MemoryTransaction, Sequences, Tables};
pub use persistence::{DatabaseSnapshot, SNAPSHOT_FILE_NAME, SnapshotManager, SnapshotMetadata};
pub use seed::{Seed, SeedTask};
