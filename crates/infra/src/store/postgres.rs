//! Postgres-backed barcode store.
//!
//! Expected tables (schema management lives outside this crate):
//!
//! | table | key | columns |
//! |-------|-----|---------|
//! | `barcodes` | `id` | `code` (unique), `barcode_type`, `owner_id`, `shareable`, `created_at` |
//! | `barcode_profiles` | `barcode_id` | `gender` |
//! | `barcode_usage` | `barcode_id` | `total_usage`, `last_used` |
//! | `barcode_assignments` | `id` (serial) | `user_id`, `barcode_id`, `assigned_at` |
//! | `user_pull_settings` | `user_id` | `pull_enabled`, `gender` |
//! | `user_barcode_settings` | `user_id` | `barcode_id` (nullable) |
//!
//! Child tables reference `barcodes(id)` with `ON DELETE CASCADE`, and
//! `user_barcode_settings.barcode_id` with `ON DELETE SET NULL`.
//!
//! ## Atomicity
//!
//! `commit_assignment` runs in one transaction. The pin is updated with a
//! conditional `UPDATE`/`INSERT` that only matches the expected previous
//! value (compare-and-swap at row level); a fallback to the existing pin
//! locks the pin row and checks it still holds. The usage counter is
//! incremented in place by the database, never read-modify-written here.
//! For a guarded commit the increment only applies while the barcode is cold
//! or sticky for the user; otherwise nothing is returned and the transaction
//! is abandoned with `Conflict`.
//!
//! ## Runtime
//!
//! The store traits are synchronous. Calls are bridged onto the current tokio
//! runtime with `block_in_place`, so callers must run on a multi-threaded
//! runtime; on a current-thread runtime every call fails with `Unavailable`.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::instrument;
use uuid::Uuid;

use campus_barcodes::{
    AssignmentRecord, Barcode, BarcodeProfile, BarcodeType, Gender, PinUpdate, PoolEntry,
    PullPolicy, UsageRecord, UserPin,
};
use campus_core::{BarcodeId, UserId};

use super::{
    AssignmentCommit, AssignmentHistory, AssignmentStore, BarcodeCatalog, StoreError,
    UsageLedger, UserPolicyStore,
};

const BARCODE_COLUMNS: &str = "b.id, b.code, b.barcode_type, b.owner_id, b.shareable, b.created_at";

/// Postgres-backed barcode store.
///
/// Uses an SQLx connection pool, which is `Send + Sync`.
pub struct PostgresBarcodeStore {
    pool: Arc<PgPool>,
}

impl PostgresBarcodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let handle = Handle::try_current().map_err(|_| {
            StoreError::Unavailable(
                "PostgresBarcodeStore requires a tokio runtime".to_string(),
            )
        })?;
        if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) {
            return Err(StoreError::Unavailable(
                "PostgresBarcodeStore requires a multi-threaded tokio runtime".to_string(),
            ));
        }
        tokio::task::block_in_place(|| handle.block_on(fut))
    }

    async fn fetch_barcode(&self, barcode_id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BARCODE_COLUMNS} FROM barcodes b WHERE b.id = $1"))
            .bind(barcode_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_barcode", e))?;

        row.as_ref().map(barcode_from_row).transpose()
    }

    async fn fetch_owned(&self, owner: UserId) -> Result<Vec<Barcode>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BARCODE_COLUMNS} FROM barcodes b WHERE b.owner_id = $1 ORDER BY b.created_at, b.id"
        ))
        .bind(owner.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("barcodes_owned_by", e))?;

        rows.iter().map(barcode_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user, filter = filter.as_str()), err)]
    async fn fetch_pool(&self, user: UserId, filter: Gender) -> Result<Vec<PoolEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {BARCODE_COLUMNS}, p.gender
            FROM barcodes b
            LEFT JOIN barcode_profiles p ON p.barcode_id = b.id
            WHERE b.owner_id = $1
               OR (b.barcode_type = 'dynamic' AND b.shareable AND p.gender = $2)
            ORDER BY b.created_at, b.id
            "#
        ))
        .bind(user.as_uuid())
        .bind(filter.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pool_for", e))?;

        rows.iter()
            .map(|row| {
                let gender = row
                    .try_get::<Option<String>, _>("gender")
                    .map_err(|e| decode_error("gender", e))?
                    .map(|g| Gender::from_str(&g))
                    .transpose()
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                Ok(PoolEntry {
                    barcode: barcode_from_row(row)?,
                    gender,
                })
            })
            .collect()
    }

    async fn insert(&self, barcode: Barcode, gender: Option<Gender>) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO barcodes (id, code, barcode_type, owner_id, shareable, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(barcode.id.as_uuid())
        .bind(&barcode.code)
        .bind(barcode.barcode_type.as_str())
        .bind(barcode.owner.as_uuid())
        .bind(barcode.shareable)
        .bind(barcode.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_barcode", e))?;

        if let Some(gender) = gender {
            sqlx::query("INSERT INTO barcode_profiles (barcode_id, gender) VALUES ($1, $2)")
                .bind(barcode.id.as_uuid())
                .bind(gender.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_profile", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("insert_barcode", e))
    }

    async fn upsert_profile(&self, profile: BarcodeProfile) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO barcode_profiles (barcode_id, gender)
            SELECT id, $2 FROM barcodes WHERE id = $1
            ON CONFLICT (barcode_id) DO UPDATE SET gender = EXCLUDED.gender
            "#,
        )
        .bind(profile.barcode_id.as_uuid())
        .bind(profile.gender.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_profile", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("barcode {}", profile.barcode_id)));
        }
        Ok(())
    }

    async fn fetch_profile(&self, barcode_id: BarcodeId) -> Result<Option<BarcodeProfile>, StoreError> {
        let row = sqlx::query("SELECT gender FROM barcode_profiles WHERE barcode_id = $1")
            .bind(barcode_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("profile", e))?;

        match row {
            Some(row) => {
                let gender: String = row.try_get("gender").map_err(|e| decode_error("gender", e))?;
                let gender = Gender::from_str(&gender).map_err(|e| StoreError::Database(e.to_string()))?;
                Ok(Some(BarcodeProfile { barcode_id, gender }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, barcode_id: BarcodeId) -> Result<Barcode, StoreError> {
        let row = sqlx::query(
            "DELETE FROM barcodes b WHERE b.id = $1 RETURNING b.id, b.code, b.barcode_type, b.owner_id, b.shareable, b.created_at",
        )
        .bind(barcode_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("remove_barcode", e))?;

        match row {
            Some(row) => barcode_from_row(&row),
            None => Err(StoreError::NotFound(format!("barcode {barcode_id}"))),
        }
    }

    async fn fetch_usage(&self, barcode_id: BarcodeId) -> Result<Option<UsageRecord>, StoreError> {
        let row = sqlx::query("SELECT total_usage, last_used FROM barcode_usage WHERE barcode_id = $1")
            .bind(barcode_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("usage", e))?;

        row.map(|row| usage_from_row(barcode_id, &row)).transpose()
    }

    async fn fetch_last_assignment(
        &self,
        user: UserId,
        barcode_id: BarcodeId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT MAX(assigned_at) AS last_assigned
            FROM barcode_assignments
            WHERE user_id = $1 AND barcode_id = $2
            "#,
        )
        .bind(user.as_uuid())
        .bind(barcode_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("last_assignment", e))?;

        row.try_get("last_assigned").map_err(|e| decode_error("last_assigned", e))
    }

    async fn fetch_assignments(&self, user: UserId) -> Result<Vec<AssignmentRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT barcode_id, assigned_at
            FROM barcode_assignments
            WHERE user_id = $1
            ORDER BY assigned_at, id
            "#,
        )
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assignments_for", e))?;

        rows.iter()
            .map(|row| {
                let barcode_id: Uuid = row.try_get("barcode_id").map_err(|e| decode_error("barcode_id", e))?;
                let assigned_at = row.try_get("assigned_at").map_err(|e| decode_error("assigned_at", e))?;
                Ok(AssignmentRecord {
                    user_id: user,
                    barcode_id: BarcodeId::from_uuid(barcode_id),
                    assigned_at,
                })
            })
            .collect()
    }

    async fn fetch_policy(&self, user: UserId) -> Result<Option<PullPolicy>, StoreError> {
        let row = sqlx::query("SELECT pull_enabled, gender FROM user_pull_settings WHERE user_id = $1")
            .bind(user.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("pull_policy", e))?;

        match row {
            Some(row) => {
                let pull_enabled = row.try_get("pull_enabled").map_err(|e| decode_error("pull_enabled", e))?;
                let gender: String = row.try_get("gender").map_err(|e| decode_error("gender", e))?;
                Ok(Some(PullPolicy {
                    pull_enabled,
                    gender_filter: Gender::from_str(&gender)
                        .map_err(|e| StoreError::Database(e.to_string()))?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_policy(&self, user: UserId, policy: PullPolicy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_pull_settings (user_id, pull_enabled, gender)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET pull_enabled = EXCLUDED.pull_enabled, gender = EXCLUDED.gender
            "#,
        )
        .bind(user.as_uuid())
        .bind(policy.pull_enabled)
        .bind(policy.gender_filter.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_pull_policy", e))?;
        Ok(())
    }

    async fn fetch_pin(&self, user: UserId) -> Result<UserPin, StoreError> {
        let barcode_id: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT barcode_id FROM user_barcode_settings WHERE user_id = $1")
                .bind(user.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("pin", e))?;

        Ok(UserPin {
            user_id: user,
            barcode_id: barcode_id.flatten().map(BarcodeId::from_uuid),
        })
    }

    async fn upsert_pin(&self, user: UserId, barcode_id: Option<BarcodeId>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_barcode_settings (user_id, barcode_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET barcode_id = EXCLUDED.barcode_id
            "#,
        )
        .bind(user.as_uuid())
        .bind(barcode_id.map(Uuid::from))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_pin", e))?;
        Ok(())
    }

    /// Apply one assignment in a single transaction.
    ///
    /// Dropping the future before `commit` rolls the transaction back, so a
    /// cancelled request leaves no partial writes.
    #[instrument(
        skip(self, commit),
        fields(user_id = %commit.user_id, barcode_id = %commit.barcode_id),
        err
    )]
    pub async fn commit_assignment_async(
        &self,
        commit: &AssignmentCommit,
    ) -> Result<UsageRecord, StoreError> {
        let mut tx = self.begin().await?;

        match commit.pin {
            PinUpdate::Keep => {}
            PinUpdate::Expect(pinned) => verify_pin(&mut tx, commit.user_id, pinned).await?,
            PinUpdate::Replace { expected, new } => {
                swap_pin(&mut tx, commit.user_id, expected, new).await?
            }
        }

        let row = match &commit.recency_guard {
            None => sqlx::query(RECORD_USAGE)
                .bind(commit.barcode_id.as_uuid())
                .bind(commit.at)
                .fetch_optional(&mut *tx)
                .await,
            Some(windows) => sqlx::query(RECORD_USAGE_GUARDED)
                .bind(commit.barcode_id.as_uuid())
                .bind(commit.at)
                .bind(commit.at - windows.global_exclusion)
                .bind(commit.at - windows.stickiness)
                .bind(commit.user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await,
        }
        .map_err(|e| map_sqlx_error("record_usage", e))?
        .ok_or_else(|| {
            StoreError::Conflict(format!(
                "barcode {} was handed out concurrently",
                commit.barcode_id
            ))
        })?;
        let usage = usage_from_row(commit.barcode_id, &row)?;

        sqlx::query(
            "INSERT INTO barcode_assignments (user_id, barcode_id, assigned_at) VALUES ($1, $2, $3)",
        )
        .bind(commit.user_id.as_uuid())
        .bind(commit.barcode_id.as_uuid())
        .bind(commit.at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("append_assignment", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_assignment", e))?;
        Ok(usage)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))
    }
}

const RECORD_USAGE: &str = r#"
    INSERT INTO barcode_usage (barcode_id, total_usage, last_used)
    VALUES ($1, 1, $2)
    ON CONFLICT (barcode_id) DO UPDATE
    SET total_usage = barcode_usage.total_usage + 1,
        last_used = EXCLUDED.last_used
    RETURNING total_usage, last_used
"#;

/// `$3`: global exclusion cutoff, `$4`: stickiness cutoff, `$5`: the user.
/// Both windows are inclusive, so a row exactly at a cutoff is still inside.
const RECORD_USAGE_GUARDED: &str = r#"
    INSERT INTO barcode_usage (barcode_id, total_usage, last_used)
    VALUES ($1, 1, $2)
    ON CONFLICT (barcode_id) DO UPDATE
    SET total_usage = barcode_usage.total_usage + 1,
        last_used = EXCLUDED.last_used
    WHERE barcode_usage.last_used < $3
       OR EXISTS (
            SELECT 1 FROM barcode_assignments a
            WHERE a.user_id = $5 AND a.barcode_id = $1 AND a.assigned_at >= $4
       )
    RETURNING total_usage, last_used
"#;

/// Lock the pin row and check it still points at `pinned`.
async fn verify_pin(
    tx: &mut Transaction<'static, Postgres>,
    user: UserId,
    pinned: BarcodeId,
) -> Result<(), StoreError> {
    let held: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT barcode_id FROM user_barcode_settings
        WHERE user_id = $1 AND barcode_id = $2
        FOR UPDATE
        "#,
    )
    .bind(user.as_uuid())
    .bind(pinned.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("verify_pin", e))?;

    if held.is_none() {
        return Err(StoreError::Conflict(format!(
            "pin for user {user} changed concurrently"
        )));
    }
    Ok(())
}

/// Conditional pin write; zero affected rows means someone else moved the pin.
async fn swap_pin(
    tx: &mut Transaction<'static, Postgres>,
    user: UserId,
    expected: Option<BarcodeId>,
    new: BarcodeId,
) -> Result<(), StoreError> {
    let result = match expected {
        Some(expected) => sqlx::query(
            r#"
            UPDATE user_barcode_settings
            SET barcode_id = $3
            WHERE user_id = $1 AND barcode_id = $2
            "#,
        )
        .bind(user.as_uuid())
        .bind(expected.as_uuid())
        .bind(new.as_uuid())
        .execute(&mut **tx)
        .await,
        None => sqlx::query(
            r#"
            INSERT INTO user_barcode_settings (user_id, barcode_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET barcode_id = EXCLUDED.barcode_id
            WHERE user_barcode_settings.barcode_id IS NULL
            "#,
        )
        .bind(user.as_uuid())
        .bind(new.as_uuid())
        .execute(&mut **tx)
        .await,
    }
    .map_err(|e| map_sqlx_error("swap_pin", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "pin for user {user} changed concurrently"
        )));
    }
    Ok(())
}

fn barcode_from_row(row: &PgRow) -> Result<Barcode, StoreError> {
    let id: Uuid = row.try_get("id").map_err(|e| decode_error("id", e))?;
    let code: String = row.try_get("code").map_err(|e| decode_error("code", e))?;
    let barcode_type: String = row.try_get("barcode_type").map_err(|e| decode_error("barcode_type", e))?;
    let owner: Uuid = row.try_get("owner_id").map_err(|e| decode_error("owner_id", e))?;
    let shareable: bool = row.try_get("shareable").map_err(|e| decode_error("shareable", e))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| decode_error("created_at", e))?;

    Ok(Barcode {
        id: BarcodeId::from_uuid(id),
        code,
        barcode_type: BarcodeType::from_str(&barcode_type)
            .map_err(|e| StoreError::Database(e.to_string()))?,
        owner: UserId::from_uuid(owner),
        shareable,
        created_at,
    })
}

fn usage_from_row(barcode_id: BarcodeId, row: &PgRow) -> Result<UsageRecord, StoreError> {
    let total: i64 = row.try_get("total_usage").map_err(|e| decode_error("total_usage", e))?;
    let last_used_at = row.try_get("last_used").map_err(|e| decode_error("last_used", e))?;
    Ok(UsageRecord {
        barcode_id,
        total_uses: total_uses_from(total),
        last_used_at,
    })
}

/// `total_usage` is a `BIGINT`; a negative value can only come from manual
/// edits and reads as zero.
fn total_uses_from(total: i64) -> u64 {
    u64::try_from(total).unwrap_or_default()
}

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::Database(format!("failed to decode column {column}: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation (duplicate code / id).
                Some("23505") => StoreError::Conflict(msg),
                // Foreign key violation: the referenced barcode is gone.
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

impl BarcodeCatalog for PostgresBarcodeStore {
    fn insert_barcode(&self, barcode: Barcode, gender: Option<Gender>) -> Result<(), StoreError> {
        self.block_on(self.insert(barcode, gender))
    }

    fn get_barcode(&self, barcode_id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        self.block_on(self.fetch_barcode(barcode_id))
    }

    fn barcodes_owned_by(&self, owner: UserId) -> Result<Vec<Barcode>, StoreError> {
        self.block_on(self.fetch_owned(owner))
    }

    fn set_profile(&self, profile: BarcodeProfile) -> Result<(), StoreError> {
        self.block_on(self.upsert_profile(profile))
    }

    fn profile(&self, barcode_id: BarcodeId) -> Result<Option<BarcodeProfile>, StoreError> {
        self.block_on(self.fetch_profile(barcode_id))
    }

    fn pool_for(&self, user: UserId, filter: Gender) -> Result<Vec<PoolEntry>, StoreError> {
        self.block_on(self.fetch_pool(user, filter))
    }

    fn remove_barcode(&self, barcode_id: BarcodeId) -> Result<Barcode, StoreError> {
        self.block_on(self.delete(barcode_id))
    }
}

impl UsageLedger for PostgresBarcodeStore {
    fn usage(&self, barcode_id: BarcodeId) -> Result<Option<UsageRecord>, StoreError> {
        self.block_on(self.fetch_usage(barcode_id))
    }
}

impl AssignmentHistory for PostgresBarcodeStore {
    fn last_assignment(
        &self,
        user: UserId,
        barcode_id: BarcodeId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.block_on(self.fetch_last_assignment(user, barcode_id))
    }

    fn assignments_for(&self, user: UserId) -> Result<Vec<AssignmentRecord>, StoreError> {
        self.block_on(self.fetch_assignments(user))
    }
}

impl UserPolicyStore for PostgresBarcodeStore {
    fn pull_policy(&self, user: UserId) -> Result<Option<PullPolicy>, StoreError> {
        self.block_on(self.fetch_policy(user))
    }

    fn set_pull_policy(&self, user: UserId, policy: PullPolicy) -> Result<(), StoreError> {
        self.block_on(self.upsert_policy(user, policy))
    }

    fn pin(&self, user: UserId) -> Result<UserPin, StoreError> {
        self.block_on(self.fetch_pin(user))
    }

    fn set_pin(&self, user: UserId, barcode_id: Option<BarcodeId>) -> Result<(), StoreError> {
        self.block_on(self.upsert_pin(user, barcode_id))
    }
}

impl AssignmentStore for PostgresBarcodeStore {
    fn commit_assignment(&self, commit: &AssignmentCommit) -> Result<UsageRecord, StoreError> {
        self.block_on(self.commit_assignment_async(commit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::sync::Mutex;

    use campus_barcodes::Windows;
    use chrono::Duration;
    use sqlx::error::{DatabaseError, ErrorKind};
    use sqlx::postgres::PgPoolOptions;
    use tokio::runtime::{Builder, Runtime};

    const LAZY_URL: &str = "postgres://campus@localhost:5432/campus";

    #[derive(Debug, thiserror::Error)]
    #[error("{message}")]
    struct FakeDbError {
        code: &'static str,
        message: &'static str,
    }

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            match self.code {
                "23505" => ErrorKind::UniqueViolation,
                "23503" => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::Other,
            }
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError {
            code,
            message: "boom",
        }))
    }

    #[test]
    fn sqlstate_maps_to_store_errors() {
        assert!(matches!(map_sqlx_error("insert", db_error("23505")), StoreError::Conflict(_)));
        assert!(matches!(map_sqlx_error("insert", db_error("23503")), StoreError::NotFound(_)));
        assert!(matches!(map_sqlx_error("insert", db_error("40001")), StoreError::Database(_)));
    }

    #[test]
    fn connection_trouble_is_unavailable() {
        assert!(matches!(map_sqlx_error("q", sqlx::Error::PoolClosed), StoreError::Unavailable(_)));
        assert!(matches!(map_sqlx_error("q", sqlx::Error::PoolTimedOut), StoreError::Unavailable(_)));
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(map_sqlx_error("q", sqlx::Error::Io(io)), StoreError::Unavailable(_)));
        assert!(matches!(map_sqlx_error("q", sqlx::Error::RowNotFound), StoreError::Database(_)));
    }

    #[test]
    fn negative_usage_counter_reads_as_zero() {
        assert_eq!(total_uses_from(7), 7);
        assert_eq!(total_uses_from(0), 0);
        assert_eq!(total_uses_from(-3), 0);
    }

    #[test]
    fn current_thread_runtime_is_unavailable_not_a_panic() {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();

        let result = rt.block_on(async {
            let pool = PgPoolOptions::new().connect_lazy(LAZY_URL).unwrap();
            PostgresBarcodeStore::new(pool).get_barcode(BarcodeId::new())
        });

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn calls_outside_a_runtime_are_unavailable() {
        let rt = Builder::new_multi_thread().enable_all().build().unwrap();
        let store = rt.block_on(async {
            PostgresBarcodeStore::new(PgPoolOptions::new().connect_lazy(LAZY_URL).unwrap())
        });

        let err = store.usage(BarcodeId::new()).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    // ------------------------------------------------------------------
    // Live database tests. Run with:
    //   DATABASE_URL=postgres://... cargo test -p campus-infra -- --ignored
    // ------------------------------------------------------------------

    const SCHEMA: [&str; 6] = [
        r#"CREATE TABLE IF NOT EXISTS barcodes (
            id UUID PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            barcode_type TEXT NOT NULL,
            owner_id UUID NOT NULL,
            shareable BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS barcode_profiles (
            barcode_id UUID PRIMARY KEY REFERENCES barcodes(id) ON DELETE CASCADE,
            gender TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS barcode_usage (
            barcode_id UUID PRIMARY KEY REFERENCES barcodes(id) ON DELETE CASCADE,
            total_usage BIGINT NOT NULL,
            last_used TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS barcode_assignments (
            id BIGSERIAL PRIMARY KEY,
            user_id UUID NOT NULL,
            barcode_id UUID NOT NULL REFERENCES barcodes(id) ON DELETE CASCADE,
            assigned_at TIMESTAMPTZ NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS user_pull_settings (
            user_id UUID PRIMARY KEY,
            pull_enabled BOOLEAN NOT NULL,
            gender TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS user_barcode_settings (
            user_id UUID PRIMARY KEY,
            barcode_id UUID REFERENCES barcodes(id) ON DELETE SET NULL
        )"#,
    ];

    static SCHEMA_LOCK: Mutex<()> = Mutex::new(());

    /// A store on a multi-threaded runtime, or `None` without `DATABASE_URL`.
    fn live_store() -> Option<(Runtime, PostgresBarcodeStore)> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let rt = Builder::new_multi_thread().worker_threads(2).enable_all().build().unwrap();

        let _schema = SCHEMA_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let pool = rt.block_on(async {
            let pool = PgPoolOptions::new().max_connections(4).connect(&url).await.unwrap();
            for statement in SCHEMA {
                sqlx::query(statement).execute(&pool).await.unwrap();
            }
            pool
        });
        Some((rt, PostgresBarcodeStore::new(pool)))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// Codes are globally unique, and the database is shared between tests.
    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }

    fn insert(
        store: &PostgresBarcodeStore,
        owner: UserId,
        ty: BarcodeType,
        shareable: bool,
        gender: Option<Gender>,
    ) -> Barcode {
        let barcode = Barcode::new(owner, unique("PG"), ty, shareable, t0()).unwrap();
        store.insert_barcode(barcode.clone(), gender).unwrap();
        barcode
    }

    fn commit(
        user: UserId,
        barcode: &Barcode,
        at: DateTime<Utc>,
        pin: PinUpdate,
        recency_guard: Option<Windows>,
    ) -> AssignmentCommit {
        AssignmentCommit {
            user_id: user,
            barcode_id: barcode.id,
            at,
            pin,
            recency_guard,
        }
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn commit_increments_in_place_and_appends_history() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let user = UserId::new();
        let b = insert(&store, UserId::new(), BarcodeType::Dynamic, true, Some(Gender::Male));

        for i in 1..=3 {
            let at = t0() + Duration::seconds(i);
            let usage = store.commit_assignment(&commit(user, &b, at, PinUpdate::Keep, None)).unwrap();
            assert_eq!(usage.total_uses, i as u64);
            assert_eq!(usage.last_used_at, at);
        }

        assert_eq!(store.assignments_for(user).unwrap().len(), 3);
        assert_eq!(store.last_assignment(user, b.id).unwrap(), Some(t0() + Duration::seconds(3)));
        assert_eq!(store.usage(b.id).unwrap().unwrap().total_uses, 3);
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn pin_swap_requires_expected_value() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let user = UserId::new();
        let b = insert(&store, user, BarcodeType::Other, false, None);
        let c = insert(&store, user, BarcodeType::Other, false, None);
        store.set_pin(user, Some(c.id)).unwrap();

        let stale = PinUpdate::Replace { expected: None, new: b.id };
        let err = store.commit_assignment(&commit(user, &b, t0(), stale, None)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.usage(b.id).unwrap().is_none());
        assert_eq!(store.pin(user).unwrap().barcode_id, Some(c.id));

        let fresh = PinUpdate::Replace { expected: Some(c.id), new: b.id };
        store.commit_assignment(&commit(user, &b, t0(), fresh, None)).unwrap();
        assert_eq!(store.pin(user).unwrap().barcode_id, Some(b.id));
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn fallback_commit_checks_pin_still_holds() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let user = UserId::new();
        let x = insert(&store, user, BarcodeType::Identification, false, None);

        let fallback = commit(user, &x, t0(), PinUpdate::Expect(x.id), None);
        assert!(matches!(store.commit_assignment(&fallback), Err(StoreError::Conflict(_))));
        assert!(store.assignments_for(user).unwrap().is_empty());

        store.set_pin(user, Some(x.id)).unwrap();
        assert_eq!(store.commit_assignment(&fallback).unwrap().total_uses, 1);
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn guarded_commit_refuses_hot_barcode() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let first = UserId::new();
        let second = UserId::new();
        let b = insert(&store, UserId::new(), BarcodeType::Dynamic, true, Some(Gender::Male));
        let guard = Some(Windows::default());
        let take = |user, at| {
            commit(user, &b, at, PinUpdate::Replace { expected: None, new: b.id }, guard)
        };

        store.commit_assignment(&take(first, t0())).unwrap();

        let err = store.commit_assignment(&take(second, t0() + Duration::seconds(1))).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.pin(second).unwrap().barcode_id, None);
        assert_eq!(store.usage(b.id).unwrap().unwrap().total_uses, 1);

        // Sticky for the holder; free for anyone once cold.
        let keep = PinUpdate::Replace { expected: Some(b.id), new: b.id };
        store
            .commit_assignment(&commit(first, &b, t0() + Duration::minutes(1), keep, guard))
            .unwrap();
        store.commit_assignment(&take(second, t0() + Duration::minutes(7))).unwrap();
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn pool_query_matches_shared_dynamic_by_gender() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let user = UserId::new();
        let other = UserId::new();
        let a = insert(&store, user, BarcodeType::Other, false, Some(Gender::Male));
        let b = insert(&store, other, BarcodeType::Dynamic, true, Some(Gender::Male));
        let c = insert(&store, other, BarcodeType::Dynamic, true, Some(Gender::Female));
        let private = insert(&store, other, BarcodeType::Dynamic, false, Some(Gender::Male));
        let unprofiled = insert(&store, other, BarcodeType::Dynamic, true, None);

        let pool = store.pool_for(user, Gender::Male).unwrap();
        let ids: Vec<BarcodeId> = pool.iter().map(|e| e.barcode.id).collect();

        assert!(ids.contains(&a.id));
        assert!(ids.contains(&b.id));
        for excluded in [c.id, private.id, unprofiled.id] {
            assert!(!ids.contains(&excluded));
        }
        let b_entry = pool.iter().find(|e| e.barcode.id == b.id).unwrap();
        assert_eq!(b_entry.gender, Some(Gender::Male));
        assert_eq!(b_entry.barcode.barcode_type, BarcodeType::Dynamic);
    }

    #[test]
    #[ignore = "needs DATABASE_URL"]
    fn duplicate_code_conflicts_and_remove_clears_pin() {
        let Some((rt, store)) = live_store() else { return };
        let _enter = rt.enter();
        let user = UserId::new();
        let b = insert(&store, user, BarcodeType::Other, false, Some(Gender::Unknown));

        let twin = Barcode::new(user, b.code.clone(), BarcodeType::Other, false, t0()).unwrap();
        assert!(matches!(store.insert_barcode(twin, None), Err(StoreError::Conflict(_))));

        store.set_pin(user, Some(b.id)).unwrap();
        store.commit_assignment(&commit(user, &b, t0(), PinUpdate::Expect(b.id), None)).unwrap();
        store.remove_barcode(b.id).unwrap();

        assert_eq!(store.pin(user).unwrap().barcode_id, None);
        assert!(store.usage(b.id).unwrap().is_none());
        assert!(store.profile(b.id).unwrap().is_none());
        assert!(matches!(store.remove_barcode(b.id), Err(StoreError::NotFound(_))));
    }
}
