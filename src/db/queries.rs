pub const CREATE_REMINDER_MARKS: &str = r#"
CREATE TABLE IF NOT EXISTS reminder_marks (
  mark_key   TEXT PRIMARY KEY,
  date       TEXT NOT NULL,
  kind       TEXT NOT NULL,
  item_id    TEXT NOT NULL,
  marked_at  INTEGER NOT NULL
);
"#;

pub const CREATE_TENANTS: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
  id          TEXT PRIMARY KEY,
  created_at  INTEGER NOT NULL
);
"#;

pub const CREATE_PUSH_TOKENS: &str = r#"
CREATE TABLE IF NOT EXISTS push_tokens (
  id         INTEGER PRIMARY KEY AUTOINCREMENT,
  tenant_id  TEXT NOT NULL,
  token      TEXT NOT NULL,
  UNIQUE(tenant_id, token)
);
"#;

pub const CREATE_TENANT_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_items (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  tenant_id    TEXT NOT NULL,
  list         TEXT NOT NULL,
  position     INTEGER NOT NULL DEFAULT 0,
  name         TEXT NOT NULL,
  time         TEXT NOT NULL DEFAULT '',
  day          TEXT,
  date         TEXT,
  reminder     INTEGER NOT NULL DEFAULT 1,
  completed    INTEGER NOT NULL DEFAULT 0,
  description  TEXT
);
"#;

pub const CREATE_SWEEP_CLAIMS: &str = r#"
CREATE TABLE IF NOT EXISTS sweep_claims (
  tenant_id   TEXT NOT NULL,
  minute      TEXT NOT NULL,
  claimed_at  INTEGER NOT NULL,
  PRIMARY KEY (tenant_id, minute)
);
"#;

pub const INDEX_REMINDER_MARKS_ITEM: &str =
    "CREATE INDEX IF NOT EXISTS idx_reminder_marks_item ON reminder_marks(kind, item_id);";

pub const INDEX_REMINDER_MARKS_DATE: &str =
    "CREATE INDEX IF NOT EXISTS idx_reminder_marks_date ON reminder_marks(date);";

pub const INDEX_TENANT_ITEMS_TENANT: &str =
    "CREATE INDEX IF NOT EXISTS idx_tenant_items_tenant ON tenant_items(tenant_id, list);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_REMINDER_MARKS,
        CREATE_TENANTS,
        CREATE_PUSH_TOKENS,
        CREATE_TENANT_ITEMS,
        CREATE_SWEEP_CLAIMS,
        INDEX_REMINDER_MARKS_ITEM,
        INDEX_REMINDER_MARKS_DATE,
        INDEX_TENANT_ITEMS_TENANT,
    ]
}
