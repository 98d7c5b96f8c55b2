use std::sync::Arc;

use tempfile::TempDir;

use stitchline_core::ManualClock;
use stitchline_engine::{Engine, EngineConfig, EngineError};

use crate::RecordingNotifier;

/// Several engines over one database file, each with its own connection,
/// as separate request handlers would be.
pub struct SharedFloor {
    dir: TempDir,
    config: EngineConfig,
    clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
}

impl SharedFloor {
    pub fn new(clock: ManualClock) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = EngineConfig {
            database_path: dir.path().join("floor.db").to_string_lossy().into_owned(),
            ..EngineConfig::default()
        };
        Ok(Self {
            dir,
            config,
            clock,
            notifier: Arc::new(RecordingNotifier::new()),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Opens another engine on the shared file.
    pub fn engine(&self) -> Result<Engine, EngineError> {
        Ok(Engine::open(self.config.clone())?
            .with_clock(Arc::new(self.clock.clone()))
            .with_notifier(self.notifier.clone()))
    }

    /// Opens `n` engines at once.
    pub fn engines(&self, n: usize) -> Result<Vec<Engine>, EngineError> {
        (0..n).map(|_| self.engine()).collect()
    }
}
