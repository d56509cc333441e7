//! Data providers consulted by the fallback chain.

pub mod csv_dir;
pub mod health;
pub mod probe;
pub mod provider;
pub mod remote;
pub mod sqlite;

pub use csv_dir::CsvDirectory;
pub use health::{ProviderHealth, ProviderStatus};
pub use probe::TcpProbe;
pub use provider::{ConnectivityCheck, LocalDatabase, LocalFileSource, ProviderError, SnapshotProvider};
pub use remote::HttpSnapshotProvider;
pub use sqlite::SqliteStore;
