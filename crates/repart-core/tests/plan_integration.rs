//! Integration tests driving full migrations against a fake engine.

use repart_core::{
    classify, CheckpointStore, ColumnDesc, ConstraintDesc, ConstraintKind, DdlEngine, EngineError,
    ExchangeLocation, ExchangeSaga, ExecutorError, GrantDesc, IndexDesc, IntervalUnit,
    MigrationAction, MigrationPlan, PartitionDesc, PartitionType, PlanExecutor,
    PlanValidationError, QualifiedName, SagaError, SagaStep, StepId, StepOutcome, StepParams,
    SubpartitionType, TableInspector, TableSnapshot, TargetConfiguration,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct FakeTable {
    rows: u64,
    columns: Vec<ColumnDesc>,
    indexes: Vec<IndexDesc>,
    constraints: Vec<ConstraintDesc>,
    grants: Vec<GrantDesc>,
    partitions: Vec<PartitionDesc>,
    partitioning: Option<(PartitionType, SubpartitionType)>,
    locked: bool,
}

/// In-memory stand-in for the external database. Every mutating call
/// bumps `mutations` so tests can assert "nothing happened".
#[derive(Debug, Clone, Default)]
struct FakeDatabase {
    tables: HashMap<String, FakeTable>,
    mutations: u32,
    fail_copy_once: bool,
    fail_exchange_once_on: Option<String>,
    fail_add_partition_once: bool,
    last_delta_cutoff: Option<u64>,
}

impl FakeDatabase {
    fn table(&self, name: &QualifiedName) -> Option<&FakeTable> {
        self.tables.get(&name.to_string())
    }

    fn insert(&mut self, name: &str, table: FakeTable) {
        self.tables.insert(name.to_string(), table);
    }

    fn recompute_partitioned_rows(&mut self, name: &QualifiedName) {
        if let Some(t) = self.tables.get_mut(&name.to_string()) {
            if !t.partitions.is_empty() || t.partitioning.is_some() {
                t.rows = t.partitions.iter().map(|p| p.row_count).sum();
            }
        }
    }
}

impl TableInspector for FakeDatabase {
    fn table_exists(&self, table: &QualifiedName) -> bool {
        self.tables.contains_key(&table.to_string())
    }

    fn row_count(&self, table: &QualifiedName) -> Option<u64> {
        self.table(table).map(|t| t.rows)
    }

    fn columns(&self, table: &QualifiedName) -> Vec<ColumnDesc> {
        self.table(table).map(|t| t.columns.clone()).unwrap_or_default()
    }

    fn indexes(&self, table: &QualifiedName) -> Vec<IndexDesc> {
        self.table(table).map(|t| t.indexes.clone()).unwrap_or_default()
    }

    fn constraints(&self, table: &QualifiedName) -> Vec<ConstraintDesc> {
        self.table(table)
            .map(|t| t.constraints.clone())
            .unwrap_or_default()
    }

    fn grants(&self, table: &QualifiedName) -> Vec<GrantDesc> {
        self.table(table).map(|t| t.grants.clone()).unwrap_or_default()
    }

    fn partitions(&self, table: &QualifiedName) -> Vec<PartitionDesc> {
        self.table(table)
            .map(|t| t.partitions.clone())
            .unwrap_or_default()
    }

    fn partitioning(&self, table: &QualifiedName) -> Option<(PartitionType, SubpartitionType)> {
        self.table(table).and_then(|t| t.partitioning)
    }

    fn has_active_sessions(&self, table: &QualifiedName) -> bool {
        self.table(table).map(|t| t.locked).unwrap_or(false)
    }
}

impl DdlEngine for FakeDatabase {
    fn create_table(
        &mut self,
        table: &QualifiedName,
        params: &StepParams,
        like: &TableSnapshot,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        if self.tables.contains_key(&table.to_string()) {
            return Err(EngineError::statement("create table", table, "name in use"));
        }
        let subpartitioning = if params.subpartition_count > 0 {
            SubpartitionType::Hash
        } else {
            SubpartitionType::None
        };
        // Constraint definitions carry over disabled; data loads first.
        let constraints = like
            .constraints
            .iter()
            .map(|c| ConstraintDesc::new(&c.name, c.kind).disabled())
            .collect();
        self.insert(
            &table.to_string(),
            FakeTable {
                rows: 0,
                columns: like.columns.clone(),
                constraints,
                partitioning: Some((PartitionType::Interval, subpartitioning)),
                ..FakeTable::default()
            },
        );
        Ok(())
    }

    fn copy_rows(
        &mut self,
        from: &QualifiedName,
        to: &QualifiedName,
        _parallel_degree: u32,
    ) -> Result<u64, EngineError> {
        self.mutations += 1;
        if self.fail_copy_once {
            self.fail_copy_once = false;
            return Err(EngineError::statement("insert", to, "simulated failure"));
        }
        let rows = self
            .row_count(from)
            .ok_or_else(|| EngineError::statement("select", from, "table not found"))?;
        let target = self
            .tables
            .get_mut(&to.to_string())
            .ok_or_else(|| EngineError::statement("insert", to, "table not found"))?;
        target.rows = rows;
        Ok(rows)
    }

    fn merge_delta(
        &mut self,
        _from: &QualifiedName,
        _to: &QualifiedName,
        _key_column: &str,
        _update_columns: &[String],
        cutoff: u64,
    ) -> Result<u64, EngineError> {
        self.mutations += 1;
        self.last_delta_cutoff = Some(cutoff);
        Ok(0)
    }

    fn create_index(
        &mut self,
        table: &QualifiedName,
        index: &IndexDesc,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        let t = self
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| EngineError::statement("create index", table, "table not found"))?;
        t.indexes.push(index.clone());
        Ok(())
    }

    fn rename_table(
        &mut self,
        from: &QualifiedName,
        to: &QualifiedName,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        if self.tables.contains_key(&to.to_string()) {
            return Err(EngineError::statement("rename", to, "name in use"));
        }
        let table = self
            .tables
            .remove(&from.to_string())
            .ok_or_else(|| EngineError::statement("rename", from, "table not found"))?;
        self.insert(&to.to_string(), table);
        Ok(())
    }

    fn exchange_partition(
        &mut self,
        partitioned: &QualifiedName,
        partition: &str,
        standalone: &QualifiedName,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        if self.fail_exchange_once_on.as_deref() == Some(partitioned.to_string().as_str()) {
            self.fail_exchange_once_on = None;
            return Err(EngineError::statement(
                "exchange partition",
                partitioned,
                "simulated failure",
            ));
        }
        let standalone_rows = self
            .row_count(standalone)
            .ok_or_else(|| EngineError::statement("exchange partition", standalone, "table not found"))?;
        let part_rows = {
            let t = self.tables.get_mut(&partitioned.to_string()).ok_or_else(|| {
                EngineError::statement("exchange partition", partitioned, "table not found")
            })?;
            let p = t
                .partitions
                .iter_mut()
                .find(|p| p.name.eq_ignore_ascii_case(partition))
                .ok_or_else(|| {
                    EngineError::statement("exchange partition", partitioned, "partition not found")
                })?;
            let rows = p.row_count;
            p.row_count = standalone_rows;
            rows
        };
        if let Some(s) = self.tables.get_mut(&standalone.to_string()) {
            s.rows = part_rows;
        }
        self.recompute_partitioned_rows(partitioned);
        Ok(())
    }

    fn add_partition(
        &mut self,
        table: &QualifiedName,
        partition: &str,
        high_bound: &str,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        if self.fail_add_partition_once {
            self.fail_add_partition_once = false;
            return Err(EngineError::statement(
                "add partition",
                table,
                "simulated failure",
            ));
        }
        let t = self
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| EngineError::statement("add partition", table, "table not found"))?;
        let position = t.partitions.iter().map(|p| p.position).max().unwrap_or(0) + 1;
        t.partitions
            .push(PartitionDesc::new(partition, position, high_bound, 0));
        Ok(())
    }

    fn drop_partition(
        &mut self,
        table: &QualifiedName,
        partition: &str,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        let t = self
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| EngineError::statement("drop partition", table, "table not found"))?;
        let Some(index) = t
            .partitions
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(partition))
        else {
            return Err(EngineError::statement(
                "drop partition",
                table,
                "partition not found",
            ));
        };
        if t.partitions[index].row_count != 0 {
            return Err(EngineError::statement(
                "drop partition",
                table,
                "partition not empty",
            ));
        }
        t.partitions.remove(index);
        let name = table.clone();
        self.recompute_partitioned_rows(&name);
        Ok(())
    }

    fn set_constraint_enabled(
        &mut self,
        table: &QualifiedName,
        constraint: &str,
        enabled: bool,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        let t = self
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| EngineError::statement("alter constraint", table, "table not found"))?;
        if let Some(c) = t
            .constraints
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(constraint))
        {
            c.enabled = enabled;
        }
        Ok(())
    }

    fn apply_grant(
        &mut self,
        table: &QualifiedName,
        grant: &GrantDesc,
    ) -> Result<(), EngineError> {
        self.mutations += 1;
        let t = self
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| EngineError::statement("grant", table, "table not found"))?;
        if !t.grants.contains(grant) {
            t.grants.push(grant.clone());
        }
        Ok(())
    }

    fn gather_statistics(&mut self, table: &QualifiedName) -> Result<(), EngineError> {
        self.mutations += 1;
        if !self.tables.contains_key(&table.to_string()) {
            return Err(EngineError::statement("gather stats", table, "table not found"));
        }
        Ok(())
    }

    fn drop_table(&mut self, table: &QualifiedName) -> Result<(), EngineError> {
        self.mutations += 1;
        self.tables
            .remove(&table.to_string())
            .ok_or_else(|| EngineError::statement("drop table", table, "table not found"))?;
        Ok(())
    }
}

struct TestContext {
    db: FakeDatabase,
    store: CheckpointStore,
    _state_dir: tempfile::TempDir,
    _state_db: sled::Db,
}

impl TestContext {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let state_dir = tempfile::tempdir().unwrap();
        let state_db = sled::open(state_dir.path().join("state")).unwrap();
        let store = CheckpointStore::open(&state_db).unwrap();

        Self {
            db: FakeDatabase::default(),
            store,
            _state_dir: state_dir,
            _state_db: state_db,
        }
    }
}

fn orders() -> QualifiedName {
    QualifiedName::new("APP", "ORDERS").unwrap()
}

fn orders_snapshot() -> TableSnapshot {
    TableSnapshot::unpartitioned(orders())
        .with_column(ColumnDesc::new("ID", "NUMBER", false))
        .with_column(ColumnDesc::new("CREATED_AT", "TIMESTAMP(6)", false))
        .with_column(ColumnDesc::new("CUSTOMER_ID", "NUMBER", false))
        .with_index(IndexDesc::new("IDX_ORDERS_ID", vec!["ID".into()], true))
        .with_index(IndexDesc::new(
            "IDX_ORDERS_CUST_DATE",
            vec!["CUSTOMER_ID".into(), "CREATED_AT".into()],
            false,
        ))
        .with_constraint(ConstraintDesc::new("PK_ORDERS", ConstraintKind::Primary))
        .with_grant(GrantDesc::new("REPORTING", "SELECT"))
        .with_row_count(1000)
}

/// Seed the fake database to match a snapshot.
fn seed(db: &mut FakeDatabase, snapshot: &TableSnapshot) {
    db.insert(
        &snapshot.name.to_string(),
        FakeTable {
            rows: snapshot.row_count,
            columns: snapshot.columns.clone(),
            indexes: snapshot.indexes.clone(),
            constraints: snapshot.constraints.clone(),
            grants: snapshot.grants.clone(),
            ..FakeTable::default()
        },
    );
}

fn plan_for(snapshot: &TableSnapshot, target: &TargetConfiguration) -> MigrationPlan {
    let action = classify(snapshot, target).unwrap();
    MigrationPlan::build(action, snapshot, target).unwrap()
}

#[test]
fn test_full_migration_unpartitioned_to_interval() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    assert_eq!(plan.action, MigrationAction::AddIntervalPartitioning);

    let executor = PlanExecutor::new(&plan, &snapshot);

    // Phase 1: replacement built and loaded alongside the original.
    let report = executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    assert_eq!(report.exit_code(), 0, "phase one failed: {:?}", report.failure());

    let new_name = QualifiedName::new("APP", "ORDERS_NEW").unwrap();
    assert_eq!(ctx.db.row_count(&new_name), Some(1000));
    assert_eq!(ctx.db.indexes(&new_name).len(), 2);
    assert_eq!(ctx.db.row_count(&orders()), Some(1000));

    // Phase 2: cutover.
    let report = executor.run_phase_two(&mut ctx.db, &ctx.store, true).unwrap();
    assert_eq!(report.exit_code(), 0, "phase two failed: {:?}", report.failure());

    let old_name = QualifiedName::new("APP", "ORDERS_OLD").unwrap();
    assert!(ctx.db.table_exists(&orders()));
    assert!(ctx.db.table_exists(&old_name));
    assert!(!ctx.db.table_exists(&new_name));
    assert_eq!(
        ctx.db.partitioning(&orders()),
        Some((PartitionType::Interval, SubpartitionType::None))
    );
    assert_eq!(ctx.db.grants(&orders()), snapshot.grants);
    assert!(ctx.db.constraints(&orders()).iter().all(|c| c.enabled));

    // The drop is never part of the automatic path.
    let drop_report = report
        .reports
        .iter()
        .find(|r| r.id == StepId::DROP_OLD_TABLE)
        .unwrap();
    assert_eq!(drop_report.outcome, StepOutcome::ManualOnly);
    assert!(ctx.db.table_exists(&old_name));
}

#[test]
fn test_manual_drop_after_cutover() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot);

    executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    executor.run_phase_two(&mut ctx.db, &ctx.store, true).unwrap();

    let old_name = QualifiedName::new("APP", "ORDERS_OLD").unwrap();
    executor.drop_old_table(&mut ctx.db).unwrap();
    assert!(!ctx.db.table_exists(&old_name));

    // A second invocation fails its own precondition.
    let err = executor.drop_old_table(&mut ctx.db).unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Validation(PlanValidationError::PreconditionFailed { .. })
    ));
}

#[test]
fn test_phase_one_resumes_after_failure() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);
    ctx.db.fail_copy_once = true;

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot);

    let report = executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.failure().unwrap().id, StepId::INITIAL_LOAD);

    // Resume: completed steps are skipped, the failed one re-runs.
    let resumed = executor
        .resume_phase_one(&report.run_id, &mut ctx.db, &ctx.store)
        .unwrap();
    assert_eq!(resumed.exit_code(), 0);
    let create = resumed
        .reports
        .iter()
        .find(|r| r.id == StepId::CREATE_TABLE)
        .unwrap();
    assert_eq!(create.outcome, StepOutcome::AlreadySatisfied);

    let new_name = QualifiedName::new("APP", "ORDERS_NEW").unwrap();
    assert_eq!(ctx.db.row_count(&new_name), Some(1000));
}

#[test]
fn test_unconfirmed_phase_two_touches_nothing() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot);

    let err = executor
        .run_phase_two(&mut ctx.db, &ctx.store, false)
        .unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Validation(PlanValidationError::ConfirmationRequired)
    ));
    assert_eq!(ctx.db.mutations, 0);
}

#[test]
fn test_cutover_refuses_on_row_count_drift() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot);

    executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();

    // Writes landed after the load and there is no delta capture.
    ctx.db.tables.get_mut("APP.ORDERS").unwrap().rows += 5;

    let report = executor.run_phase_two(&mut ctx.db, &ctx.store, true).unwrap();
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.failure().unwrap().id, StepId::ATOMIC_SWAP);

    // Nothing was renamed.
    assert!(ctx.db.table_exists(&orders()));
    assert!(ctx.db.table_exists(&QualifiedName::new("APP", "ORDERS_NEW").unwrap()));
    assert_eq!(ctx.db.partitioning(&orders()), None);
}

#[test]
fn test_continue_on_failure_never_overrides_swap_gates() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target =
        TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month).continue_on_failure();
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot).continue_on_failure();

    executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    ctx.db.tables.get_mut("APP.ORDERS").unwrap().rows += 5;

    // The executor's gate is downgraded to a warning, but the swap
    // protocol re-checks and still refuses to enter the rename window.
    let report = executor.run_phase_two(&mut ctx.db, &ctx.store, true).unwrap();
    assert_eq!(report.exit_code(), 1);
    let failure = report.failure().unwrap();
    assert_eq!(failure.id, StepId::ATOMIC_SWAP);
    assert!(!failure.warnings.is_empty());
    assert!(ctx.db.table_exists(&QualifiedName::new("APP", "ORDERS_NEW").unwrap()));
}

#[test]
fn test_delta_merge_uses_initial_load_cutoff() {
    let mut ctx = TestContext::new();
    let snapshot = orders_snapshot();
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month)
        .with_delta_capture(Vec::new());
    let plan = plan_for(&snapshot, &target);
    let executor = PlanExecutor::new(&plan, &snapshot);

    let report = executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    assert_eq!(report.exit_code(), 0, "phase one failed: {:?}", report.failure());

    // The merge window opens at the recorded completion of the bulk
    // load, not at some engine-side guess.
    let run = ctx.store.load_run(&report.run_id).unwrap();
    let load_finished = run
        .steps
        .iter()
        .find(|s| s.id == StepId::INITIAL_LOAD.0)
        .unwrap()
        .updated_at;
    assert!(load_finished > 0);
    assert_eq!(ctx.db.last_delta_cutoff, Some(load_finished));
}

fn event_columns() -> Vec<ColumnDesc> {
    vec![
        ColumnDesc::new("ID", "NUMBER", false),
        ColumnDesc::new("OCCURRED_AT", "TIMESTAMP(6)", false),
    ]
}

fn seed_lifecycle_tables(db: &mut FakeDatabase) {
    db.insert(
        "APP.EVENTS",
        FakeTable {
            rows: 30,
            columns: event_columns(),
            partitions: vec![
                PartitionDesc::new("P_2026_01", 1, "2026-02-01", 10),
                PartitionDesc::new("P_2026_02", 2, "2026-03-01", 20),
            ],
            partitioning: Some((PartitionType::Interval, SubpartitionType::None)),
            ..FakeTable::default()
        },
    );
    db.insert(
        "APP.EVENTS_STAGE",
        FakeTable {
            columns: event_columns(),
            ..FakeTable::default()
        },
    );
    db.insert(
        "APP.EVENTS_HIST",
        FakeTable {
            columns: event_columns(),
            partitioning: Some((PartitionType::Interval, SubpartitionType::None)),
            ..FakeTable::default()
        },
    );
}

fn lifecycle_saga() -> ExchangeSaga {
    ExchangeSaga::new(
        QualifiedName::new("APP", "EVENTS").unwrap(),
        QualifiedName::new("APP", "EVENTS_STAGE").unwrap(),
        QualifiedName::new("APP", "EVENTS_HIST").unwrap(),
    )
}

#[test]
fn test_exchange_saga_ages_oldest_partition() {
    let mut ctx = TestContext::new();
    seed_lifecycle_tables(&mut ctx.db);

    let checkpoint = lifecycle_saga().run(&mut ctx.db, &ctx.store).unwrap();
    assert!(checkpoint.is_terminal());
    assert_eq!(checkpoint.location, ExchangeLocation::Dropped);
    assert_eq!(checkpoint.partition_name.as_deref(), Some("P_2026_01"));

    let active = QualifiedName::new("APP", "EVENTS").unwrap();
    let staging = QualifiedName::new("APP", "EVENTS_STAGE").unwrap();
    let history = QualifiedName::new("APP", "EVENTS_HIST").unwrap();

    // Only the newer partition remains active; the data segment now
    // lives under history and staging is empty again.
    let active_partitions = ctx.db.partitions(&active);
    assert_eq!(active_partitions.len(), 1);
    assert_eq!(active_partitions[0].name, "P_2026_02");
    assert_eq!(ctx.db.row_count(&active), Some(20));
    assert_eq!(ctx.db.row_count(&staging), Some(0));
    assert_eq!(ctx.db.row_count(&history), Some(10));
    let history_partitions = ctx.db.partitions(&history);
    assert_eq!(history_partitions.len(), 1);
    assert_eq!(history_partitions[0].name, "P_2026_01");
}

#[test]
fn test_exchange_saga_fails_fast_on_dirty_staging() {
    let mut ctx = TestContext::new();
    seed_lifecycle_tables(&mut ctx.db);
    ctx.db.tables.get_mut("APP.EVENTS_STAGE").unwrap().rows = 5;

    let err = lifecycle_saga().run(&mut ctx.db, &ctx.store).unwrap_err();
    assert!(matches!(
        err,
        SagaError::Validation(PlanValidationError::StagingNotEmpty { rows: 5, .. })
    ));

    // No exchange happened; the active table still holds everything.
    let active = QualifiedName::new("APP", "EVENTS").unwrap();
    assert_eq!(ctx.db.row_count(&active), Some(30));
    assert_eq!(ctx.db.partitions(&active).len(), 2);
}

#[test]
fn test_exchange_saga_rejects_incompatible_staging() {
    let mut ctx = TestContext::new();
    seed_lifecycle_tables(&mut ctx.db);
    // Same width, different column type: not exchangeable.
    ctx.db.tables.get_mut("APP.EVENTS_STAGE").unwrap().columns[1] =
        ColumnDesc::new("OCCURRED_AT", "DATE", false);

    let err = lifecycle_saga().run(&mut ctx.db, &ctx.store).unwrap_err();
    let SagaError::Recoverable { step, reason, .. } = err else {
        panic!("expected a recoverable failure, got {err}");
    };
    assert_eq!(step, SagaStep::ExchangeActiveToStaging);
    assert!(reason.contains("column"), "unexpected reason: {reason}");

    // No exchange happened; the active table still holds everything.
    let active = QualifiedName::new("APP", "EVENTS").unwrap();
    assert_eq!(ctx.db.row_count(&active), Some(30));
    assert_eq!(ctx.db.partitions(&active).len(), 2);
}

#[test]
fn test_exchange_saga_resumes_from_checkpoint() {
    let mut ctx = TestContext::new();
    seed_lifecycle_tables(&mut ctx.db);
    ctx.db.fail_exchange_once_on = Some("APP.EVENTS_HIST".to_string());

    let err = lifecycle_saga().run(&mut ctx.db, &ctx.store).unwrap_err();
    let SagaError::Recoverable { checkpoint, .. } = err else {
        panic!("expected a recoverable failure, got {err}");
    };
    assert_eq!(checkpoint.location, ExchangeLocation::InStaging);

    // The persisted checkpoint matches the one carried by the error.
    let stored = ctx.store.load_saga(&checkpoint.saga_id).unwrap();
    assert_eq!(stored.completed, checkpoint.completed);

    let resumed = lifecycle_saga()
        .resume(stored, &mut ctx.db, &ctx.store)
        .unwrap();
    assert!(resumed.is_terminal());

    // Earlier steps did not re-run: exactly one history partition.
    let history = QualifiedName::new("APP", "EVENTS_HIST").unwrap();
    assert_eq!(ctx.db.partitions(&history).len(), 1);
    assert_eq!(ctx.db.row_count(&history), Some(10));
}

#[test]
fn test_exchange_saga_resumes_after_history_partition_failure() {
    let mut ctx = TestContext::new();
    seed_lifecycle_tables(&mut ctx.db);
    ctx.db.fail_add_partition_once = true;

    // Crash in step 3: the data segment already sits in staging.
    let err = lifecycle_saga().run(&mut ctx.db, &ctx.store).unwrap_err();
    let SagaError::Recoverable { step, checkpoint, .. } = err else {
        panic!("expected a recoverable failure, got {err}");
    };
    assert_eq!(step, SagaStep::CreateMatchingHistoryPartition);
    assert_eq!(checkpoint.completed, Some(SagaStep::ExchangeActiveToStaging));
    assert_eq!(checkpoint.location, ExchangeLocation::InStaging);

    let stored = ctx.store.load_saga(&checkpoint.saga_id).unwrap();
    let resumed = lifecycle_saga()
        .resume(stored, &mut ctx.db, &ctx.store)
        .unwrap();
    assert!(resumed.is_terminal());

    // The staging exchange did not re-run: the aged segment arrives in
    // history intact instead of being swapped back into the active
    // partition shell.
    let history = QualifiedName::new("APP", "EVENTS_HIST").unwrap();
    assert_eq!(ctx.db.partitions(&history).len(), 1);
    assert_eq!(ctx.db.row_count(&history), Some(10));
    let active = QualifiedName::new("APP", "EVENTS").unwrap();
    assert_eq!(ctx.db.row_count(&active), Some(20));
    assert_eq!(ctx.db.partitions(&active).len(), 1);
}

#[test]
fn test_noop_plan_reports_clean_exit() {
    let mut ctx = TestContext::new();
    let snapshot = TableSnapshot::interval(
        orders(),
        IntervalUnit::Month,
        "CREATED_AT",
    )
    .with_column(ColumnDesc::new("ID", "NUMBER", false))
    .with_column(ColumnDesc::new("CREATED_AT", "TIMESTAMP(6)", false))
    .with_row_count(1000);
    seed(&mut ctx.db, &snapshot);

    let target = TargetConfiguration::interval("CREATED_AT", IntervalUnit::Month);
    let plan = plan_for(&snapshot, &target);
    assert!(plan.is_noop());

    let executor = PlanExecutor::new(&plan, &snapshot);
    let report = executor.run_phase_one(&mut ctx.db, &ctx.store).unwrap();
    assert_eq!(report.exit_code(), 0);
    assert!(report
        .reports
        .iter()
        .all(|r| r.outcome == StepOutcome::SkippedMarker));
    assert_eq!(ctx.db.mutations, 0);
}
