pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS test_cases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT,
  prompt TEXT NOT NULL,
  input TEXT NOT NULL,
  context TEXT,
  expected_structure TEXT,
  category TEXT,
  instruction_spec TEXT,
  stability_params TEXT,
  should_refuse INTEGER,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  prompt_version TEXT NOT NULL,
  models_json TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT NOT NULL,
  total_cost_usd REAL NOT NULL DEFAULT 0,
  total_duration_ms INTEGER NOT NULL DEFAULT 0,
  test_case_count INTEGER NOT NULL DEFAULT 0,
  completed_count INTEGER NOT NULL DEFAULT 0,
  error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_version_status ON runs(prompt_version, status);

CREATE TABLE IF NOT EXISTS outputs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  test_case_id INTEGER NOT NULL REFERENCES test_cases(id),
  model TEXT NOT NULL,
  response TEXT,
  input_tokens INTEGER,
  output_tokens INTEGER,
  latency_ms INTEGER,
  cost_usd REAL,
  error TEXT,
  created_at TEXT NOT NULL,
  UNIQUE (run_id, test_case_id, model)
);

CREATE TABLE IF NOT EXISTS evaluator_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  output_id INTEGER NOT NULL REFERENCES outputs(id) ON DELETE CASCADE,
  evaluator_name TEXT NOT NULL,
  passed INTEGER,
  score REAL,
  details_json TEXT NOT NULL,
  reasoning TEXT NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE (output_id, evaluator_name)
);

CREATE INDEX IF NOT EXISTS idx_results_evaluator ON evaluator_results(evaluator_name);

CREATE TABLE IF NOT EXISTS annotations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  output_id INTEGER NOT NULL REFERENCES outputs(id) ON DELETE CASCADE,
  annotation_type TEXT NOT NULL,
  label TEXT NOT NULL,
  notes TEXT,
  created_by TEXT,
  created_at TEXT NOT NULL
);
"#;
