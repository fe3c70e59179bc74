// SQLite-backed moderation store for persistent trust-and-safety records.
//
// Tables:
// - moderation_actions: Every action decision, with its outcome note
// - scam_events: Scored messages and the response taken
// - team_members: Accounts exempt from moderation
// - blacklist: Globally banned users
// - managed_groups: Chats the bot moderates, with feature flags
// - risk_escalations: Escalations handed to the risk policy

use crate::core::moderation::{
    ActionKind, GroupSettings, ModerationStore, RiskEscalation, ScamScore, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::StorageError(e.to_string())
}

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and run migrations.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", path))
            .await
            .map_err(storage)?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS moderation_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_moderation_actions_user
                ON moderation_actions(user_id, chat_id);
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scam_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                score INTEGER NOT NULL,
                severity TEXT NOT NULL,
                reasons TEXT NOT NULL,
                action TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS team_members (
                user_id INTEGER PRIMARY KEY,
                added_by INTEGER NOT NULL,
                added_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                user_id INTEGER PRIMARY KEY,
                actor_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                added_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS managed_groups (
                chat_id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                scam_detection BOOLEAN NOT NULL DEFAULT 1,
                flood_protection BOOLEAN NOT NULL DEFAULT 1
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS risk_escalations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        Ok(())
    }

    /// Flip a group's feature flags. No-op for unmanaged chats.
    pub async fn set_group_flags(
        &self,
        chat_id: u64,
        scam_detection: bool,
        flood_protection: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE managed_groups SET scam_detection = ?, flood_protection = ? WHERE chat_id = ?",
        )
        .bind(scam_detection)
        .bind(flood_protection)
        .bind(chat_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    /// Number of recorded actions against a user (all chats).
    pub async fn count_actions(&self, user_id: u64) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM moderation_actions WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> GroupSettings {
    GroupSettings {
        chat_id: row.get::<i64, _>("chat_id") as u64,
        title: row.get("title"),
        scam_detection: row.get("scam_detection"),
        flood_protection: row.get("flood_protection"),
    }
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn log_action(
        &self,
        user_id: u64,
        chat_id: u64,
        action: ActionKind,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_actions (user_id, chat_id, action, reason, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id as i64)
        .bind(chat_id as i64)
        .bind(action.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn log_scam_event(
        &self,
        chat_id: u64,
        user_id: u64,
        message_id: u64,
        score: &ScamScore,
        action: &str,
    ) -> Result<(), StoreError> {
        let reasons = serde_json::to_string(&score.reasons).map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO scam_events
                (chat_id, user_id, message_id, score, severity, reasons, action, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat_id as i64)
        .bind(user_id as i64)
        .bind(message_id as i64)
        .bind(score.value as i64)
        .bind(score.severity.to_string())
        .bind(reasons)
        .bind(action)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn is_team_member(&self, user_id: u64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM team_members WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn add_team_member(&self, user_id: u64, added_by: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO team_members (user_id, added_by, added_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id as i64)
        .bind(added_by as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn remove_team_member(&self, user_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM team_members WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn is_blacklisted(&self, user_id: u64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM blacklist WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.is_some())
    }

    async fn add_to_blacklist(
        &self,
        user_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO blacklist (user_id, actor_id, reason, added_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                actor_id = excluded.actor_id,
                reason = excluded.reason,
                added_at = excluded.added_at
            "#,
        )
        .bind(user_id as i64)
        .bind(actor_id as i64)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn remove_from_blacklist(&self, user_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM blacklist WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn get_group_settings(&self, chat_id: u64) -> Result<Option<GroupSettings>, StoreError> {
        let row = sqlx::query("SELECT * FROM managed_groups WHERE chat_id = ?")
            .bind(chat_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.as_ref().map(group_from_row))
    }

    async fn register_group(&self, chat_id: u64, title: &str) -> Result<(), StoreError> {
        // Keep existing flags; only refresh the title.
        sqlx::query(
            r#"
            INSERT INTO managed_groups (chat_id, title)
            VALUES (?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET title = excluded.title
            "#,
        )
        .bind(chat_id as i64)
        .bind(title)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_managed_groups(&self) -> Result<Vec<GroupSettings>, StoreError> {
        let rows = sqlx::query("SELECT * FROM managed_groups ORDER BY chat_id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.iter().map(group_from_row).collect())
    }
}

#[async_trait]
impl RiskEscalation for SqliteModerationStore {
    async fn escalate(&self, user_id: u64, reason: &str) {
        let result = sqlx::query(
            "INSERT INTO risk_escalations (user_id, reason, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id as i64)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => tracing::info!(user_id, reason, "Risk escalation recorded"),
            Err(e) => tracing::warn!(user_id, error = %e, "Failed to record risk escalation"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::Severity;
    use tempfile::NamedTempFile;

    async fn store() -> (SqliteModerationStore, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_string_lossy().to_string();
        let store = SqliteModerationStore::open(&path).await.unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn unregistered_chat_is_unmanaged() {
        let (store, _tmp) = store().await;
        assert!(store.get_group_settings(1).await.unwrap().is_none());

        store.register_group(1, "Rustaceans").await.unwrap();
        let settings = store.get_group_settings(1).await.unwrap().unwrap();
        assert_eq!(settings, GroupSettings::new(1, "Rustaceans"));
    }

    #[tokio::test]
    async fn re_registering_keeps_feature_flags() {
        let (store, _tmp) = store().await;
        store.register_group(1, "old").await.unwrap();
        store.set_group_flags(1, false, true).await.unwrap();
        store.register_group(1, "new").await.unwrap();
        store.register_group(2, "other").await.unwrap();

        let groups = store.get_managed_groups().await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].title, "new");
        assert!(!groups[0].scam_detection);
        assert!(groups[0].flood_protection);
    }

    #[tokio::test]
    async fn blacklist_and_team_membership() {
        let (store, _tmp) = store().await;
        store.add_to_blacklist(9, 1, "scam").await.unwrap();
        store.add_to_blacklist(9, 2, "scam again").await.unwrap();
        assert!(store.is_blacklisted(9).await.unwrap());
        store.remove_from_blacklist(9).await.unwrap();
        assert!(!store.is_blacklisted(9).await.unwrap());

        store.add_team_member(5, 1).await.unwrap();
        store.add_team_member(5, 1).await.unwrap();
        assert!(store.is_team_member(5).await.unwrap());
        store.remove_team_member(5).await.unwrap();
        assert!(!store.is_team_member(5).await.unwrap());
    }

    #[tokio::test]
    async fn actions_and_scam_events_are_recorded() {
        let (store, _tmp) = store().await;
        store
            .log_action(5, 1, ActionKind::Ban, "scam pattern [ok]")
            .await
            .unwrap();
        store
            .log_action(5, 2, ActionKind::Delete, "link [failed (boom)]")
            .await
            .unwrap();
        assert_eq!(store.count_actions(5).await.unwrap(), 2);

        let score = ScamScore {
            value: 4,
            severity: Severity::High,
            reasons: vec!["scam pattern: \"free nitro\"".to_string()],
        };
        store.log_scam_event(1, 5, 77, &score, "ban").await.unwrap();

        let row = sqlx::query("SELECT severity, reasons FROM scam_events WHERE message_id = 77")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let severity: String = row.get("severity");
        let reasons: String = row.get("reasons");
        assert_eq!(severity, "HIGH");
        let decoded: Vec<String> = serde_json::from_str(&reasons).unwrap();
        assert_eq!(decoded, score.reasons);
    }

    #[tokio::test]
    async fn escalations_are_recorded() {
        let (store, _tmp) = store().await;
        store.escalate(5, "high severity scam").await;

        let row = sqlx::query("SELECT COUNT(*) AS n FROM risk_escalations WHERE user_id = 5")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }
}
