use crate::model::{
    now_rfc3339, EvaluationOutput, EvaluationRun, EvaluatorResult, HumanAnnotation, ModelConfig,
    RunStatus, TestCase,
};
use anyhow::Context;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// SQLite-backed persistence. The connection mutex is the only shared
/// resource between dispatch units; every write here is a single statement
/// so concurrent unit completions cannot interleave partial updates.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Join row used by pass-rate aggregation: one evaluator result together
/// with the model that produced the underlying output.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub output_id: i64,
    pub model: String,
    pub evaluator_name: String,
    pub passed: Option<bool>,
    pub score: Option<f64>,
}

/// Join row used by annotation accuracy: a human label next to the
/// automated verdict for the same output and evaluator.
#[derive(Debug, Clone)]
pub struct AnnotationPair {
    pub evaluator_name: String,
    pub auto_passed: Option<bool>,
    pub label: String,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    // test cases

    pub fn insert_test_case(&self, tc: &TestCase) -> anyhow::Result<i64> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO test_cases(title, prompt, input, context, expected_structure, category,
                                    instruction_spec, stability_params, should_refuse, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                tc.title,
                tc.prompt,
                tc.input,
                tc.context,
                tc.expected_structure
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.category,
                tc.instruction_spec
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.stability_params
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.should_refuse,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Explicit edit; past outputs keep referencing the row and are not
    /// retroactively altered.
    pub fn update_test_case(&self, tc: &TestCase) -> anyhow::Result<()> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE test_cases SET title=?1, prompt=?2, input=?3, context=?4, expected_structure=?5,
                    category=?6, instruction_spec=?7, stability_params=?8, should_refuse=?9, updated_at=?10
             WHERE id=?11",
            params![
                tc.title,
                tc.prompt,
                tc.input,
                tc.context,
                tc.expected_structure
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.category,
                tc.instruction_spec
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.stability_params
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                tc.should_refuse,
                now,
                tc.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_test_case(&self, id: i64) -> anyhow::Result<Option<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, prompt, input, context, expected_structure, category,
                    instruction_spec, stability_params, should_refuse
             FROM test_cases WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(test_case_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_test_cases(&self) -> anyhow::Result<Vec<TestCase>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, prompt, input, context, expected_structure, category,
                    instruction_spec, stability_params, should_refuse
             FROM test_cases ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            test_case_from_row(row)
        })?;
        collect(rows)
    }

    // runs

    pub fn create_run(
        &self,
        prompt_version: &str,
        models: &[ModelConfig],
        test_case_count: i64,
    ) -> anyhow::Result<i64> {
        let started_at = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs(prompt_version, models_json, status, started_at, test_case_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                prompt_version,
                serde_json::to_string(models)?,
                RunStatus::Pending.as_str(),
                started_at,
                test_case_count
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Status transitions are guarded so they are monotonic: a run never
    /// moves back to an earlier state even under concurrent updates.
    pub fn mark_run_running(&self, run_id: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status='running' WHERE id=?1 AND status='pending'",
            params![run_id],
        )?;
        Ok(())
    }

    pub fn mark_run_completed(&self, run_id: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status='completed' WHERE id=?1 AND status='running'",
            params![run_id],
        )?;
        Ok(())
    }

    pub fn mark_run_failed(&self, run_id: i64, message: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status='failed', error_message=?2
             WHERE id=?1 AND status IN ('pending','running')",
            params![run_id, message],
        )?;
        Ok(())
    }

    /// One increment per finished dispatch unit. A single UPDATE with
    /// relative arithmetic cannot lose counts across concurrent completions.
    pub fn bump_run_progress(
        &self,
        run_id: i64,
        cost_usd: f64,
        duration_ms: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET completed_count = completed_count + 1,
                             total_cost_usd = total_cost_usd + ?2,
                             total_duration_ms = total_duration_ms + ?3
             WHERE id=?1",
            params![run_id, cost_usd, duration_ms],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: i64) -> anyhow::Result<Option<EvaluationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{RUN_SELECT} WHERE id=?1"))?;
        let mut rows = stmt.query(params![run_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(run_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_runs(
        &self,
        prompt_version: Option<&str>,
        status: Option<RunStatus>,
        limit: u32,
    ) -> anyhow::Result<Vec<EvaluationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT}
             WHERE (?1 IS NULL OR prompt_version = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY started_at DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![prompt_version, status.map(|s| s.as_str()), limit],
            |row| run_from_row(row),
        )?;
        collect(rows)
    }

    /// Most recent completed run for a version. Ties on `started_at` break
    /// toward the most recently created row.
    pub fn latest_completed_run(&self, prompt_version: &str) -> anyhow::Result<Option<EvaluationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT}
             WHERE prompt_version=?1 AND status='completed'
             ORDER BY started_at DESC, id DESC
             LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![prompt_version])?;
        match rows.next()? {
            Some(row) => Ok(Some(run_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// The completed run immediately preceding `run` within the same
    /// prompt version.
    pub fn previous_completed_run(
        &self,
        run: &EvaluationRun,
    ) -> anyhow::Result<Option<EvaluationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT}
             WHERE prompt_version=?1 AND status='completed' AND id != ?2
               AND (started_at < ?3 OR (started_at = ?3 AND id < ?2))
             ORDER BY started_at DESC, id DESC
             LIMIT 1"
        ))?;
        let mut rows = stmt.query(params![run.prompt_version, run.id, run.started_at])?;
        match rows.next()? {
            Some(row) => Ok(Some(run_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Latest completed run per prompt version, newest first.
    pub fn latest_completed_runs_by_version(&self) -> anyhow::Result<Vec<EvaluationRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{RUN_SELECT}
             WHERE status='completed'
               AND id IN (
                 SELECT id FROM runs r2
                 WHERE r2.prompt_version = runs.prompt_version AND r2.status='completed'
                 ORDER BY r2.started_at DESC, r2.id DESC LIMIT 1
               )
             ORDER BY started_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], |row| run_from_row(row))?;
        collect(rows)
    }

    // outputs

    /// Idempotent per (run, test_case, model): re-dispatch overwrites the
    /// prior row instead of duplicating it.
    #[allow(clippy::too_many_arguments)]
    pub fn record_output(
        &self,
        run_id: i64,
        test_case_id: i64,
        model: &str,
        response: Option<&str>,
        input_tokens: Option<i64>,
        output_tokens: Option<i64>,
        latency_ms: Option<i64>,
        cost_usd: Option<f64>,
        error: Option<&str>,
    ) -> anyhow::Result<i64> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        let id = conn.query_row(
            "INSERT INTO outputs(run_id, test_case_id, model, response, input_tokens,
                                 output_tokens, latency_ms, cost_usd, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(run_id, test_case_id, model) DO UPDATE SET
                 response=excluded.response, input_tokens=excluded.input_tokens,
                 output_tokens=excluded.output_tokens, latency_ms=excluded.latency_ms,
                 cost_usd=excluded.cost_usd, error=excluded.error
             RETURNING id",
            params![
                run_id,
                test_case_id,
                model,
                response,
                input_tokens,
                output_tokens,
                latency_ms,
                cost_usd,
                error,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn outputs_for_run(&self, run_id: i64) -> anyhow::Result<Vec<EvaluationOutput>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{OUTPUT_SELECT} WHERE run_id=?1 ORDER BY id"))?;
        let rows = stmt.query_map(params![run_id], |row| {
            output_from_row(row)
        })?;
        collect(rows)
    }

    pub fn successful_outputs(&self, run_id: i64) -> anyhow::Result<Vec<EvaluationOutput>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{OUTPUT_SELECT} WHERE run_id=?1 AND response IS NOT NULL AND error IS NULL ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![run_id], |row| {
            output_from_row(row)
        })?;
        collect(rows)
    }

    pub fn get_output(&self, output_id: i64) -> anyhow::Result<Option<EvaluationOutput>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{OUTPUT_SELECT} WHERE id=?1"))?;
        let mut rows = stmt.query(params![output_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(output_from_row(row)?)),
            None => Ok(None),
        }
    }

    // evaluator results

    /// Overwrite-on-rerun: one row per (output, evaluator_name).
    pub fn upsert_evaluator_result(
        &self,
        output_id: i64,
        evaluator_name: &str,
        passed: Option<bool>,
        score: Option<f64>,
        details: &serde_json::Value,
        reasoning: &str,
    ) -> anyhow::Result<i64> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        let id = conn.query_row(
            "INSERT INTO evaluator_results(output_id, evaluator_name, passed, score,
                                           details_json, reasoning, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(output_id, evaluator_name) DO UPDATE SET
                 passed=excluded.passed, score=excluded.score,
                 details_json=excluded.details_json, reasoning=excluded.reasoning,
                 created_at=excluded.created_at
             RETURNING id",
            params![
                output_id,
                evaluator_name,
                passed,
                score,
                serde_json::to_string(details)?,
                reasoning,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn results_for_output(&self, output_id: i64) -> anyhow::Result<Vec<EvaluatorResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, output_id, evaluator_name, passed, score, details_json, reasoning, created_at
             FROM evaluator_results WHERE output_id=?1 ORDER BY evaluator_name",
        )?;
        let rows = stmt.query_map(params![output_id], |row| {
            result_from_row(row)
        })?;
        collect(rows)
    }

    pub fn scored_results_for_run(&self, run_id: i64) -> anyhow::Result<Vec<ScoredResult>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.output_id, o.model, r.evaluator_name, r.passed, r.score
             FROM evaluator_results r
             JOIN outputs o ON r.output_id = o.id
             WHERE o.run_id = ?1
             ORDER BY r.output_id, r.evaluator_name",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(ScoredResult {
                output_id: row.get(0)?,
                model: row.get(1)?,
                evaluator_name: row.get(2)?,
                passed: row.get::<_, Option<bool>>(3)?,
                score: row.get(4)?,
            })
        })?;
        collect(rows)
    }

    // annotations

    pub fn insert_annotation(
        &self,
        output_id: i64,
        annotation_type: &str,
        label: &str,
        notes: Option<&str>,
        created_by: Option<&str>,
    ) -> anyhow::Result<i64> {
        let now = now_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO annotations(output_id, annotation_type, label, notes, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![output_id, annotation_type, label, notes, created_by, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn annotations_for_output(&self, output_id: i64) -> anyhow::Result<Vec<HumanAnnotation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, output_id, annotation_type, label, notes, created_by, created_at
             FROM annotations WHERE output_id=?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![output_id], |row| {
            Ok(HumanAnnotation {
                id: row.get(0)?,
                output_id: row.get(1)?,
                annotation_type: row.get(2)?,
                label: row.get(3)?,
                notes: row.get(4)?,
                created_by: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        collect(rows)
    }

    /// Human labels joined to the automated verdict of the evaluator whose
    /// name matches the annotation type, on the same output.
    pub fn annotation_pairs(&self) -> anyhow::Result<Vec<AnnotationPair>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT r.evaluator_name, r.passed, a.label
             FROM annotations a
             JOIN evaluator_results r
               ON r.output_id = a.output_id AND r.evaluator_name = a.annotation_type
             ORDER BY r.evaluator_name, a.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AnnotationPair {
                evaluator_name: row.get(0)?,
                auto_passed: row.get::<_, Option<bool>>(1)?,
                label: row.get(2)?,
            })
        })?;
        collect(rows)
    }
}

const RUN_SELECT: &str = "SELECT id, prompt_version, models_json, status, started_at,
        total_cost_usd, total_duration_ms, test_case_count, completed_count, error_message
 FROM runs";

const OUTPUT_SELECT: &str = "SELECT id, run_id, test_case_id, model, response, input_tokens,
        output_tokens, latency_ms, cost_usd, error, created_at
 FROM outputs";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluationRun> {
    let models_json: String = row.get(2)?;
    let models: Vec<ModelConfig> =
        serde_json::from_str(&models_json).map_err(|e| to_sql_err(e.into()))?;
    Ok(EvaluationRun {
        id: row.get(0)?,
        prompt_version: row.get(1)?,
        models,
        status: RunStatus::parse(&row.get::<_, String>(3)?),
        started_at: row.get(4)?,
        total_cost_usd: row.get(5)?,
        total_duration_ms: row.get(6)?,
        test_case_count: row.get(7)?,
        completed_count: row.get(8)?,
        error_message: row.get(9)?,
    })
}

fn output_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluationOutput> {
    Ok(EvaluationOutput {
        id: row.get(0)?,
        run_id: row.get(1)?,
        test_case_id: row.get(2)?,
        model: row.get(3)?,
        response: row.get(4)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
        latency_ms: row.get(7)?,
        cost_usd: row.get(8)?,
        error: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn result_from_row(row: &Row<'_>) -> rusqlite::Result<EvaluatorResult> {
    let details_json: String = row.get(5)?;
    Ok(EvaluatorResult {
        id: row.get(0)?,
        output_id: row.get(1)?,
        evaluator_name: row.get(2)?,
        passed: row.get::<_, Option<bool>>(3)?,
        score: row.get(4)?,
        details: serde_json::from_str(&details_json).unwrap_or(serde_json::Value::Null),
        reasoning: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn test_case_from_row(row: &Row<'_>) -> rusqlite::Result<TestCase> {
    let expected: Option<String> = row.get(5)?;
    let instruction: Option<String> = row.get(7)?;
    let stability: Option<String> = row.get(8)?;
    Ok(TestCase {
        id: row.get(0)?,
        title: row.get(1)?,
        prompt: row.get(2)?,
        input: row.get(3)?,
        context: row.get(4)?,
        expected_structure: expected.and_then(|s| serde_json::from_str(&s).ok()),
        category: row.get(6)?,
        instruction_spec: instruction.and_then(|s| serde_json::from_str(&s).ok()),
        stability_params: stability.and_then(|s| serde_json::from_str(&s).ok()),
        should_refuse: row.get(9)?,
    })
}

fn to_sql_err(e: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(e.into())
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> anyhow::Result<Vec<T>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
