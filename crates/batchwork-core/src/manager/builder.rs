//! ManagerBuilder - manager construction and wiring
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 不正な options は build() で BatchError になる
//! - reporter / id 生成器 / registry の注入

use std::sync::Arc;

use super::options::{ManagerOptions, Mode};
use super::registry::ManagerRegistry;
use super::{BatchManager, Executor};
use crate::error::BatchError;
use crate::ports::{IdGenerator, Reporter, ReporterRef, SystemClock, UlidGenerator};

/// ManagerBuilder は BatchManager を構築
///
/// # 使用例
/// ```ignore
/// let manager = ManagerBuilder::new()
///     .mode(Mode::Parallel)
///     .max_in_flight(8)
///     .registry(&registry)
///     .reporter(|failure: &Failure| eprintln!("{failure:?}"))
///     .build::<Value>()?;
/// ```
pub struct ManagerBuilder {
    options: ManagerOptions,
    registry: Option<ManagerRegistry>,
    reporters: Vec<ReporterRef>,
    ids: Option<Box<dyn IdGenerator>>,
}

impl ManagerBuilder {
    pub fn new() -> Self {
        Self {
            options: ManagerOptions::default(),
            registry: None,
            reporters: Vec::new(),
            ids: None,
        }
    }

    /// Replace every option at once (e.g. options decoded from JSON).
    pub fn options(mut self, options: ManagerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn unresolved_batch_limit(mut self, limit: usize) -> Self {
        self.options.unresolved_batch_limit = limit;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.options.max_in_flight = max_in_flight;
        self
    }

    /// Register the manager in `registry`. Without it the manager gets a
    /// private registry of its own.
    pub fn registry(mut self, registry: &ManagerRegistry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    pub fn reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    pub fn reporters(mut self, reporters: Vec<ReporterRef>) -> Self {
        self.reporters.extend(reporters);
        self
    }

    pub fn id_generator<G: IdGenerator + 'static>(mut self, ids: G) -> Self {
        self.ids = Some(Box::new(ids));
        self
    }

    /// Validate the options and start the manager.
    ///
    /// # 検証
    /// - `ManagerOptions::validate` に失敗すると BatchError::InvalidOptions
    pub fn build<T: Send + 'static>(self) -> Result<BatchManager<T>, BatchError> {
        let registry = self.registry.unwrap_or_default();
        let ids = self
            .ids
            .unwrap_or_else(|| Box::new(UlidGenerator::new(SystemClock)));
        let manager = BatchManager::with_id_generator(self.options, &registry, ids)?;
        if !self.reporters.is_empty() {
            manager.register_reporters(self.reporters);
        }
        Ok(manager)
    }
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
