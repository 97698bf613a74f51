//! In-memory store for embedding and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::BaselineStore;
use crate::Result;
use crate::monitor::{EntityKind, PictureBaseline, SetBaseline};

#[derive(Default)]
struct Inner {
    sets: HashMap<EntityKind, SetBaseline>,
    picture: Option<PictureBaseline>,
}

#[derive(Default, Clone)]
pub struct MemoryBaselineStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: EntityKind) -> Option<SetBaseline> {
        self.inner.lock().sets.get(&kind).cloned()
    }

    pub fn picture(&self) -> Option<PictureBaseline> {
        self.inner.lock().picture.clone()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn load_set(&self, kind: EntityKind) -> Result<Option<SetBaseline>> {
        Ok(self.set(kind))
    }

    async fn save_set(&self, kind: EntityKind, baseline: &SetBaseline) -> Result<()> {
        self.inner.lock().sets.insert(kind, baseline.clone());
        Ok(())
    }

    async fn load_picture(&self) -> Result<Option<PictureBaseline>> {
        Ok(self.picture())
    }

    async fn save_picture(&self, baseline: &PictureBaseline) -> Result<()> {
        self.inner.lock().picture = Some(baseline.clone());
        Ok(())
    }
}
