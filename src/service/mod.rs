//! Analytics table update service
//!
//! Entry point for updating analytics tables: runs the registered table
//! managers for one set of update parameters and collects their results.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info};

pub mod builder;
pub mod report;

pub use builder::{NATURAL_KEY_COLUMN, TableBuilder, production_partitions};
pub use report::{
    BuildResult, PartitionOutcome, PartitionSummary, TableStatus, TableSummary, UpdateReport,
};

use crate::config::EngineConfig;
use crate::database::{
    AnalyticsStore, DatabaseError, DatabaseResult, StateRepository, TableState,
};
use crate::manager::TableManager;
use crate::postprocess::PostProcessScheduler;
use crate::table::{AnalyticsTableType, AnalyticsTableUpdateParams, ConfigurationError};

/// Error that ends the build of one table type
#[derive(Debug, Clone, thiserror::Error, Serialize)]
pub enum BuildError {
    /// The dimension configuration cannot produce a valid table
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The store failed outside of partition population
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Another build of the same table type is in progress
    #[error("An update of {0} is already running")]
    AlreadyRunning(AnalyticsTableType),

    /// Worker threads could not be started
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Marks a table type as being built until dropped
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<AnalyticsTableType>>,
    table_type: AnalyticsTableType,
}

impl<'a> RunningGuard<'a> {
    fn acquire(
        running: &'a Mutex<HashSet<AnalyticsTableType>>,
        table_type: AnalyticsTableType,
    ) -> Result<Self, BuildError> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(table_type) {
            return Err(BuildError::AlreadyRunning(table_type));
        }
        Ok(Self {
            running,
            table_type,
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.table_type);
    }
}

/// Updates analytics tables of all registered table types
pub struct AnalyticsTableService {
    store: Arc<dyn AnalyticsStore>,
    config: EngineConfig,
    scheduler: PostProcessScheduler,
    managers: Vec<Arc<dyn TableManager>>,
    running: Mutex<HashSet<AnalyticsTableType>>,
}

impl AnalyticsTableService {
    /// Create the service and start its post-processing worker
    pub fn new(store: Arc<dyn AnalyticsStore>, config: EngineConfig) -> Result<Self, BuildError> {
        let scheduler = PostProcessScheduler::start(store.clone())
            .map_err(|e| BuildError::Worker(e.to_string()))?;

        Ok(Self {
            store,
            config,
            scheduler,
            managers: Vec::new(),
            running: Mutex::new(HashSet::new()),
        })
    }

    /// Register the manager of one table type
    pub fn with_manager(mut self, manager: Arc<dyn TableManager>) -> Self {
        self.managers.push(manager);
        self
    }

    pub fn store(&self) -> &Arc<dyn AnalyticsStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered table types in registration order
    pub fn table_types(&self) -> Vec<AnalyticsTableType> {
        self.managers.iter().map(|m| m.table_type()).collect()
    }

    /// Build one table type
    ///
    /// Fails with [`BuildError::AlreadyRunning`] while another build of the
    /// same table type is in progress on this service.
    pub fn build_table(
        &self,
        manager: &dyn TableManager,
        params: &AnalyticsTableUpdateParams,
    ) -> Result<BuildResult, BuildError> {
        let _guard = RunningGuard::acquire(&self.running, manager.table_type())?;
        TableBuilder::new(self.store.as_ref(), &self.scheduler, &self.config).build(manager, params)
    }

    /// Build every registered table type not excluded by `params`
    pub fn update(&self, params: &AnalyticsTableUpdateParams) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut selected = Vec::new();

        for manager in &self.managers {
            let table_type = manager.table_type();
            if params.is_skip_table_type(table_type) {
                info!("Skipping table type {}", table_type);
                report.skipped_types.push(table_type);
            } else {
                selected.push(manager.clone());
            }
        }

        let run = |manager: &Arc<dyn TableManager>| {
            let result = self.build_table(manager.as_ref(), params);
            if let Err(e) = &result {
                error!("Update of {} failed: {}", manager.table_type(), e);
            }
            (manager.table_type(), result)
        };
        let run = &run;

        report.results = if self.config.build.parallel_table_types && selected.len() > 1 {
            std::thread::scope(|scope| {
                let handles: Vec<_> = selected
                    .iter()
                    .map(|manager| (manager.table_type(), scope.spawn(move || run(manager))))
                    .collect();

                handles
                    .into_iter()
                    .map(|(table_type, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            (
                                table_type,
                                Err(BuildError::Worker(format!(
                                    "Update of {} panicked",
                                    table_type
                                ))),
                            )
                        })
                    })
                    .collect::<Vec<_>>()
            })
        } else {
            selected.iter().map(run).collect()
        };

        report
    }

    /// Watermarks and production partitions of every registered table type
    pub fn status(&self) -> DatabaseResult<Vec<TableStatus>> {
        let mut states: BTreeMap<AnalyticsTableType, TableState> =
            StateRepository::new(self.store.as_ref())
                .list()?
                .into_iter()
                .map(|state| (state.table_type, state))
                .collect();

        self.table_types()
            .into_iter()
            .map(|table_type| {
                let state = states
                    .remove(&table_type)
                    .unwrap_or_else(|| TableState::empty(table_type));
                let partitions = production_partitions(self.store.as_ref(), table_type.table_name())?
                    .into_iter()
                    .map(|(_, name)| {
                        let rows = self.store.count_rows(&name)?;
                        Ok((name, rows))
                    })
                    .collect::<DatabaseResult<Vec<_>>>()?;
                Ok(TableStatus { state, partitions })
            })
            .collect()
    }
}
