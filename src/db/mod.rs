pub mod queries;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Which list of a tenant record an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantList {
    Daily,
    Weekly,
    Master,
}

impl TenantList {
    pub const ALL: [TenantList; 3] = [TenantList::Daily, TenantList::Weekly, TenantList::Master];

    pub fn as_str(self) -> &'static str {
        match self {
            TenantList::Daily => "daily",
            TenantList::Weekly => "weekly",
            TenantList::Master => "master",
        }
    }
}

impl FromStr for TenantList {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "daily" => Ok(TenantList::Daily),
            "weekly" => Ok(TenantList::Weekly),
            "master" | "task" | "tasks" => Ok(TenantList::Master),
            other => bail!("Unknown tenant list: {other}. Expected daily, weekly or master"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantItem {
    pub name: String,
    #[serde(default)]
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    /// `YYYY-MM-DD` for one-off tasks; dateless items recur.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub reminder: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub id: String,
    pub fcm_tokens: Vec<String>,
    pub daily: Vec<TenantItem>,
    pub weekly: Vec<TenantItem>,
    pub master: Vec<TenantItem>,
}

impl TenantRecord {
    pub fn items(&self, list: TenantList) -> &[TenantItem] {
        match list {
            TenantList::Daily => &self.daily,
            TenantList::Weekly => &self.weekly,
            TenantList::Master => &self.master,
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite DB")?;
        let database = Self { conn };
        database.init_schema()?;
        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })?;
        self.ensure_tenant_item_date_column()
    }

    fn ensure_tenant_item_date_column(&self) -> Result<()> {
        let mut statement = self.conn.prepare("PRAGMA table_info(tenant_items)")?;
        let columns = statement
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to inspect tenant_items columns")?;

        if !columns.iter().any(|column| column == "date") {
            self.conn
                .execute("ALTER TABLE tenant_items ADD COLUMN date TEXT", [])
                .context("Failed to add tenant_items.date")?;
        }
        Ok(())
    }

    pub fn has_reminder_mark(&self, mark_key: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM reminder_marks WHERE mark_key = ?1",
                params![mark_key],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to query reminder mark")?;

        Ok(found.is_some())
    }

    pub fn insert_reminder_mark(
        &self,
        mark_key: &str,
        date: NaiveDate,
        kind: &str,
        item_id: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO reminder_marks (mark_key, date, kind, item_id, marked_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    mark_key,
                    date.format("%Y-%m-%d").to_string(),
                    kind,
                    item_id,
                    Utc::now().timestamp()
                ],
            )
            .context("Failed to insert reminder mark")?;

        Ok(())
    }

    pub fn delete_reminder_marks_for_item(&self, kind: &str, item_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM reminder_marks WHERE kind = ?1 AND item_id = ?2",
                params![kind, item_id],
            )
            .context("Failed to delete reminder marks for item")
    }

    pub fn delete_reminder_marks_before(&self, date: NaiveDate) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM reminder_marks WHERE date < ?1",
                params![date.format("%Y-%m-%d").to_string()],
            )
            .context("Failed to prune reminder marks")
    }

    pub fn count_reminder_marks(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM reminder_marks", [], |row| row.get(0))
            .context("Failed to count reminder marks")
    }

    pub fn upsert_tenant(&self, tenant_id: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO tenants (id, created_at) VALUES (?1, ?2)",
                params![tenant_id, Utc::now().timestamp()],
            )
            .context("Failed to register tenant")?;

        Ok(())
    }

    pub fn tenant_exists(&self, tenant_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM tenants WHERE id = ?1",
                params![tenant_id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to query tenant")?;

        Ok(found.is_some())
    }

    pub fn list_tenant_ids(&self) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare("SELECT id FROM tenants ORDER BY id ASC")?;

        let rows = statement
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to list tenants")?;

        Ok(rows)
    }

    pub fn add_push_token(&self, tenant_id: &str, token: &str) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO push_tokens (tenant_id, token) VALUES (?1, ?2)",
                params![tenant_id, token],
            )
            .context("Failed to add push token")?;

        Ok(inserted > 0)
    }

    pub fn remove_push_token(&self, tenant_id: &str, token: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM push_tokens WHERE tenant_id = ?1 AND token = ?2",
                params![tenant_id, token],
            )
            .context("Failed to remove push token")?;

        Ok(deleted > 0)
    }

    pub fn push_tokens(&self, tenant_id: &str) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare("SELECT token FROM push_tokens WHERE tenant_id = ?1 ORDER BY id ASC")?;

        let rows = statement
            .query_map(params![tenant_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to query push tokens")?;

        Ok(rows)
    }

    pub fn replace_tenant_items(
        &mut self,
        tenant_id: &str,
        list: TenantList,
        items: &[TenantItem],
    ) -> Result<()> {
        let transaction = self
            .conn
            .transaction()
            .context("Failed to start transaction")?;

        transaction
            .execute(
                "DELETE FROM tenant_items WHERE tenant_id = ?1 AND list = ?2",
                params![tenant_id, list.as_str()],
            )
            .context("Failed to delete existing tenant items")?;

        items.iter().enumerate().try_for_each(|(position, item)| {
            transaction
                .execute(
                    "INSERT INTO tenant_items (tenant_id, list, position, name, time, day, date, reminder, completed, description)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        tenant_id,
                        list.as_str(),
                        position as i64,
                        &item.name,
                        &item.time,
                        &item.day,
                        &item.date,
                        item.reminder,
                        item.completed,
                        &item.description
                    ],
                )
                .context("Failed to insert tenant item")
                .map(|_| ())
        })?;

        transaction
            .commit()
            .context("Failed to commit tenant items")?;
        Ok(())
    }

    pub fn tenant_items(&self, tenant_id: &str, list: TenantList) -> Result<Vec<TenantItem>> {
        let mut statement = self.conn.prepare(
            "SELECT name, time, day, date, reminder, completed, description
             FROM tenant_items
             WHERE tenant_id = ?1 AND list = ?2
             ORDER BY position ASC, id ASC",
        )?;

        let rows = statement
            .query_map(params![tenant_id, list.as_str()], |row| {
                Ok(TenantItem {
                    name: row.get(0)?,
                    time: row.get(1)?,
                    day: row.get(2)?,
                    date: row.get(3)?,
                    reminder: row.get(4)?,
                    completed: row.get(5)?,
                    description: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to query tenant items")?;

        Ok(rows)
    }

    pub fn set_tenant_item_completed(
        &self,
        tenant_id: &str,
        list: TenantList,
        name: &str,
        completed: bool,
    ) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE tenant_items SET completed = ?1 WHERE tenant_id = ?2 AND list = ?3 AND name = ?4",
                params![completed, tenant_id, list.as_str(), name],
            )
            .context("Failed to update tenant item")
    }

    pub fn tenant_record(&self, tenant_id: &str) -> Result<TenantRecord> {
        Ok(TenantRecord {
            id: tenant_id.to_string(),
            fcm_tokens: self.push_tokens(tenant_id)?,
            daily: self.tenant_items(tenant_id, TenantList::Daily)?,
            weekly: self.tenant_items(tenant_id, TenantList::Weekly)?,
            master: self.tenant_items(tenant_id, TenantList::Master)?,
        })
    }

    /// Returns `false` when another sweep already claimed this tenant for `minute`.
    pub fn claim_sweep_minute(&self, tenant_id: &str, minute: &str) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sweep_claims (tenant_id, minute, claimed_at) VALUES (?1, ?2, ?3)",
                params![tenant_id, minute, Utc::now().timestamp()],
            )
            .context("Failed to claim sweep minute")?;

        Ok(inserted > 0)
    }

    pub fn cleanup_old_sweep_claims(&self, older_than_secs: i64) -> Result<usize> {
        let threshold = Utc::now().timestamp() - older_than_secs;

        self.conn
            .execute(
                "DELETE FROM sweep_claims WHERE claimed_at < ?1",
                params![threshold],
            )
            .context("Failed to clean up sweep claims")
    }
}

#[cfg(test)]
mod tests {
    use super::{Database, TenantItem, TenantList};

    fn item(name: &str, time: &str) -> TenantItem {
        TenantItem {
            name: name.to_string(),
            time: time.to_string(),
            day: None,
            date: None,
            reminder: true,
            completed: false,
            description: None,
        }
    }

    #[test]
    fn tenant_items_keep_order_and_replace_per_list() {
        let mut database = Database::open_in_memory().expect("db");
        database.upsert_tenant("owl").expect("tenant");

        database
            .replace_tenant_items("owl", TenantList::Daily, &[item("b", "08:00"), item("a", "07:00")])
            .expect("insert");
        database
            .replace_tenant_items("owl", TenantList::Master, &[item("task", "12:00")])
            .expect("insert");
        database
            .replace_tenant_items("owl", TenantList::Daily, &[item("c", "09:00")])
            .expect("replace");

        let record = database.tenant_record("owl").expect("record");
        assert_eq!(record.daily, vec![item("c", "09:00")]);
        assert_eq!(record.master, vec![item("task", "12:00")]);
        assert!(record.weekly.is_empty());
    }

    #[test]
    fn older_tenant_items_table_gains_date_column() {
        let conn = rusqlite::Connection::open_in_memory().expect("conn");
        conn.execute_batch(
            "CREATE TABLE tenant_items (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               tenant_id TEXT NOT NULL,
               list TEXT NOT NULL,
               position INTEGER NOT NULL DEFAULT 0,
               name TEXT NOT NULL,
               time TEXT NOT NULL DEFAULT '',
               day TEXT,
               reminder INTEGER NOT NULL DEFAULT 1,
               completed INTEGER NOT NULL DEFAULT 0,
               description TEXT
             );",
        )
        .expect("older schema");
        let mut database = Database { conn };
        database.init_schema().expect("migrate");
        database.init_schema().expect("migrate again");

        let mut task = item("call", "14:30");
        task.date = Some("2024-06-05".to_string());
        database
            .replace_tenant_items("owl", TenantList::Master, &[task.clone()])
            .expect("insert");
        assert_eq!(database.tenant_items("owl", TenantList::Master).expect("items"), vec![task]);
    }

    #[test]
    fn push_tokens_are_unique_per_tenant() {
        let database = Database::open_in_memory().expect("db");
        database.upsert_tenant("owl").expect("tenant");

        assert!(database.add_push_token("owl", "tok-1").expect("add"));
        assert!(!database.add_push_token("owl", "tok-1").expect("dup"));
        assert!(database.remove_push_token("owl", "tok-1").expect("remove"));
        assert!(database.push_tokens("owl").expect("tokens").is_empty());
    }

    #[test]
    fn sweep_minute_is_claimed_once() {
        let database = Database::open_in_memory().expect("db");
        assert!(database.claim_sweep_minute("owl", "2024-06-05T10:00").expect("claim"));
        assert!(!database.claim_sweep_minute("owl", "2024-06-05T10:00").expect("claim"));
        assert!(database.claim_sweep_minute("owl", "2024-06-05T10:01").expect("claim"));
        assert!(database.claim_sweep_minute("cat", "2024-06-05T10:00").expect("claim"));
    }
}
