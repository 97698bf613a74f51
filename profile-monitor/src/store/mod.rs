//! Persisted baselines.
//!
//! Baselines are read once at startup and fully rewritten whenever the
//! detector accepts a change. The poll loop is the only writer.

pub mod file;
pub mod memory;

use async_trait::async_trait;

pub use file::FileBaselineStore;
pub use memory::MemoryBaselineStore;

use crate::Result;
use crate::monitor::{EntityKind, PictureBaseline, SetBaseline};

#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Baseline for a collection kind, `None` if never recorded.
    async fn load_set(&self, kind: EntityKind) -> Result<Option<SetBaseline>>;

    async fn save_set(&self, kind: EntityKind, baseline: &SetBaseline) -> Result<()>;

    /// Picture baseline, `None` if never recorded. A recorded absence is
    /// `Some(PictureBaseline { image: None })`.
    async fn load_picture(&self) -> Result<Option<PictureBaseline>>;

    async fn save_picture(&self, baseline: &PictureBaseline) -> Result<()>;
}
