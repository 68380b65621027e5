//! SQLite progress store
//!
//! Every multi-row change runs in one transaction. Queries inside a
//! transaction use only the transaction's connection: the in-memory test
//! database has a single pooled connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use certtrack_common::{time, uuid_utils};

use super::{AppendOutcome, DuplicateReason, LessonCompletion, ProgressFilter, ProgressStore};
use crate::error::{is_unique_violation, Error, Result};
use crate::gate;
use crate::idempotency::IdempotencyKey;
use crate::model::{
    CertificationProgress, CompletedLesson, Enrollment, EnrollmentStatus, LessonPointer,
    ModuleProgress, ProgressStatus, UdemyProgress,
};

/// Default lifetime of idempotency ledger entries
pub const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(600);

/// Ledger entries never outlive a year regardless of configuration
const MAX_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(365 * 24 * 3600);

pub struct SqliteProgressStore {
    pool: SqlitePool,
    idempotency_window: chrono::Duration,
}

/// What the append transaction decided before commit/rollback
enum AppendStep {
    Applied,
    Duplicate(DuplicateReason),
}

impl SqliteProgressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            idempotency_window: to_chrono(DEFAULT_IDEMPOTENCY_WINDOW),
        }
    }

    pub fn with_idempotency_window(mut self, window: Duration) -> Self {
        self.idempotency_window = to_chrono(window.min(MAX_IDEMPOTENCY_WINDOW));
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_by_ids(&self, ids: Vec<Uuid>) -> Result<Vec<CertificationProgress>> {
        let mut conn = self.pool.acquire().await?;
        let mut trees = Vec::with_capacity(ids.len());
        for id in ids {
            trees.push(load_progress(&mut conn, id).await?);
        }
        Ok(trees)
    }

    async fn append_in_tx(
        &self,
        conn: &mut SqliteConnection,
        completion: &LessonCompletion,
        key: &IdempotencyKey,
    ) -> Result<AppendStep> {
        let now = Utc::now();
        let cutoff = now - self.idempotency_window;

        let pruned = sqlx::query("DELETE FROM completion_writes WHERE created_at < ?")
            .bind(time::to_db(&cutoff))
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if pruned > 0 {
            debug!(pruned, "Pruned expired idempotency keys");
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO completion_writes (idempotency_key, progress_id, lesson_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key.as_str())
        .bind(completion.progress_id.to_string())
        .bind(&completion.lesson.lesson_id)
        .bind(time::to_db(&now))
        .execute(&mut *conn)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Ok(AppendStep::Duplicate(DuplicateReason::IdempotencyKey))
            }
            Err(e) => return Err(e.into()),
        }

        let mut module =
            load_module_row(&mut *conn, completion.progress_id, &completion.module_key).await?;

        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM completed_lessons WHERE module_progress_id = ? AND lesson_id = ?",
        )
        .bind(module.id.to_string())
        .bind(&completion.lesson.lesson_id)
        .fetch_optional(&mut *conn)
        .await?;
        if exists.is_some() {
            return Ok(AppendStep::Duplicate(DuplicateReason::ExistingLesson));
        }

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM completed_lessons WHERE module_progress_id = ?")
                .bind(module.id.to_string())
                .fetch_one(&mut *conn)
                .await?;
        let count = u32::try_from(count)
            .map_err(|_| Error::Internal(format!("Invalid lesson count {}", count)))?;
        if count >= module.lesson_count {
            return Err(Error::InvalidState(format!(
                "module {} already has all {} lessons recorded",
                module.module_key, module.lesson_count
            )));
        }

        let lesson = &completion.lesson;
        let inserted = sqlx::query(
            r#"
            INSERT INTO completed_lessons (module_progress_id, lesson_id, dashed_name, completed_date)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(module.id.to_string())
        .bind(&lesson.lesson_id)
        .bind(&lesson.dashed_name)
        .bind(time::to_db(&lesson.completed_date))
        .execute(&mut *conn)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Ok(AppendStep::Duplicate(DuplicateReason::ExistingLesson))
            }
            Err(e) => return Err(e.into()),
        }

        gate::advance_after_completion(&mut module, count + 1, lesson.completed_date);
        update_module_row(&mut *conn, &module).await?;

        sqlx::query(
            r#"
            UPDATE certification_progress
            SET status = 'in-progress', start_date = COALESCE(start_date, ?)
            WHERE id = ? AND status = 'not-started'
            "#,
        )
        .bind(time::to_db(&lesson.completed_date))
        .bind(completion.progress_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(AppendStep::Applied)
    }

    async fn remove_last_in_tx(
        conn: &mut SqliteConnection,
        progress_id: Uuid,
        module_key: &str,
    ) -> Result<CompletedLesson> {
        let module = load_module_row(&mut *conn, progress_id, module_key).await?;

        let row = sqlx::query(
            r#"
            SELECT seq, lesson_id, dashed_name, completed_date
            FROM completed_lessons
            WHERE module_progress_id = ?
            ORDER BY completed_date DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(module.id.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            Error::InvalidState(format!("module {} has no completed lessons", module_key))
        })?;

        let seq: i64 = row.get("seq");
        let lesson = lesson_from_row(&row)?;

        sqlx::query("DELETE FROM completed_lessons WHERE seq = ?")
            .bind(seq)
            .execute(&mut *conn)
            .await?;

        // Allow the same lesson to be recorded again right away
        sqlx::query("DELETE FROM completion_writes WHERE idempotency_key = ?")
            .bind(IdempotencyKey::for_completion(progress_id, &lesson.lesson_id).as_str())
            .execute(&mut *conn)
            .await?;

        Ok(lesson)
    }

    /// Pointer first, so the transaction holds the write lock before any read
    async fn set_current_lesson_in_tx(
        conn: &mut SqliteConnection,
        progress_id: Uuid,
        pointer: &LessonPointer,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let moved = sqlx::query(
            r#"
            UPDATE certification_progress
            SET current_module = ?, current_lesson = ?
            WHERE id = ? AND status != 'completed'
            "#,
        )
        .bind(&pointer.module_key)
        .bind(&pointer.lesson_id)
        .bind(progress_id.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if moved == 0 {
            let found: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM certification_progress WHERE id = ?")
                    .bind(progress_id.to_string())
                    .fetch_optional(&mut *conn)
                    .await?;
            return Err(match found {
                Some(_) => Error::InvalidState(format!(
                    "progress {} is completed and cannot be changed",
                    progress_id
                )),
                None => Error::NotFound(format!("progress {}", progress_id)),
            });
        }

        let module = load_module_row(&mut *conn, progress_id, &pointer.module_key).await?;
        sqlx::query(
            r#"
            UPDATE module_progress
            SET status = 'in-progress', start_date = COALESCE(start_date, ?)
            WHERE id = ? AND status = 'not-started'
            "#,
        )
        .bind(time::to_db(&at))
        .bind(module.id.to_string())
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE certification_progress
            SET status = 'in-progress', start_date = COALESCE(start_date, ?)
            WHERE id = ? AND status = 'not-started'
            "#,
        )
        .bind(time::to_db(&at))
        .bind(progress_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn progress_exists(&self, progress_id: Uuid) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM certification_progress WHERE id = ?")
            .bind(progress_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn enrollment_exists(&self, enrollment_id: Uuid) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM enrollments WHERE id = ?")
            .bind(enrollment_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

/// Roll back, logging (not returning) a rollback failure
async fn rollback(tx: sqlx::Transaction<'_, sqlx::Sqlite>, operation: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(operation, error = %e, "Transaction rollback failed");
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn create_enrollment(
        &self,
        enrollment: &Enrollment,
        trees: &[CertificationProgress],
        replacing: Option<Uuid>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match insert_enrollment_tree(&mut tx, enrollment, trees, replacing).await {
            Ok(()) => {
                tx.commit().await?;
                debug!(
                    enrollment_id = %enrollment.id,
                    trees = trees.len(),
                    "Enrollment persisted"
                );
                Ok(())
            }
            Err(e) => {
                rollback(tx, "create_enrollment").await;
                Err(e)
            }
        }
    }

    async fn find_enrollment(&self, user_id: &str, certification_id: &str) -> Result<Option<Enrollment>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, certification_id, status, completion_marker, completed_at, created_at
            FROM enrollments
            WHERE user_id = ? AND certification_id = ?
            "#,
        )
        .bind(user_id)
        .bind(certification_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn get_enrollment(&self, enrollment_id: Uuid) -> Result<Enrollment> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, certification_id, status, completion_marker, completed_at, created_at
            FROM enrollments
            WHERE id = ?
            "#,
        )
        .bind(enrollment_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("enrollment {}", enrollment_id)))?;

        enrollment_from_row(&row)
    }

    async fn set_enrollment_status(&self, enrollment_id: Uuid, status: EnrollmentStatus) -> Result<()> {
        let result = sqlx::query("UPDATE enrollments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(enrollment_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("enrollment {}", enrollment_id)));
        }
        Ok(())
    }

    async fn mark_enrollment_completed(
        &self,
        enrollment_id: Uuid,
        marker: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET completion_marker = ?, completed_at = ?, status = 'completed'
            WHERE id = ? AND completion_marker IS NULL
            "#,
        )
        .bind(marker.to_string())
        .bind(time::to_db(&at))
        .bind(enrollment_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.enrollment_exists(enrollment_id).await? {
            return Err(Error::NotFound(format!("enrollment {}", enrollment_id)));
        }
        Ok(false)
    }

    async fn get_progress(&self, progress_id: Uuid) -> Result<CertificationProgress> {
        let mut conn = self.pool.acquire().await?;
        load_progress(&mut conn, progress_id).await
    }

    async fn list_enrollment_progress(&self, enrollment_id: Uuid) -> Result<Vec<CertificationProgress>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM certification_progress WHERE enrollment_id = ? ORDER BY certification_key, course_key",
        )
        .bind(enrollment_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let ids = ids
            .iter()
            .map(|id| uuid_utils::parse_column("certification_progress.id", id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.load_by_ids(ids).await
    }

    async fn scan_in_progress(&self, filter: &ProgressFilter) -> Result<Vec<CertificationProgress>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM certification_progress
            WHERE status = 'in-progress'
              AND (? IS NULL OR user_id = ?)
              AND (? IS NULL OR certification_key = ?)
            ORDER BY user_id, certification_key, course_key
            "#,
        )
        .bind(filter.user_id.as_deref())
        .bind(filter.user_id.as_deref())
        .bind(filter.certification_key.as_deref())
        .bind(filter.certification_key.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let ids = ids
            .iter()
            .map(|id| uuid_utils::parse_column("certification_progress.id", id))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.load_by_ids(ids).await
    }

    async fn append_completed_lesson(
        &self,
        completion: &LessonCompletion,
        key: &IdempotencyKey,
    ) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;
        let step = match self.append_in_tx(&mut tx, completion, key).await {
            Ok(step) => step,
            Err(e) => {
                rollback(tx, "append_completed_lesson").await;
                return Err(e);
            }
        };

        match step {
            AppendStep::Applied => {
                tx.commit().await?;
                debug!(
                    progress_id = %completion.progress_id,
                    module = %completion.module_key,
                    lesson_id = %completion.lesson.lesson_id,
                    "Lesson completion appended"
                );
                Ok(AppendOutcome::Applied(self.get_progress(completion.progress_id).await?))
            }
            AppendStep::Duplicate(reason) => {
                rollback(tx, "append_completed_lesson").await;
                Ok(AppendOutcome::Duplicate {
                    reason,
                    progress: self.get_progress(completion.progress_id).await?,
                })
            }
        }
    }

    async fn remove_last_completed_lesson(
        &self,
        progress_id: Uuid,
        module_key: &str,
    ) -> Result<CompletedLesson> {
        let mut tx = self.pool.begin().await?;
        match Self::remove_last_in_tx(&mut tx, progress_id, module_key).await {
            Ok(lesson) => {
                tx.commit().await?;
                Ok(lesson)
            }
            Err(e) => {
                rollback(tx, "remove_last_completed_lesson").await;
                Err(e)
            }
        }
    }

    async fn set_current_lesson(
        &self,
        progress_id: Uuid,
        pointer: &LessonPointer,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match Self::set_current_lesson_in_tx(&mut tx, progress_id, pointer, at).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                rollback(tx, "set_current_lesson").await;
                Err(e)
            }
        }
    }

    async fn accept_academic_honesty(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE certification_progress
            SET academic_honesty_accepted_at = ?
            WHERE id = ? AND academic_honesty_accepted_at IS NULL
            "#,
        )
        .bind(time::to_db(&at))
        .bind(progress_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.progress_exists(progress_id).await? {
            return Err(Error::NotFound(format!("progress {}", progress_id)));
        }
        Ok(false)
    }

    async fn finalize_progress(&self, progress_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE certification_progress
            SET status = 'completed', completed_date = ?
            WHERE id = ? AND status != 'completed'
            "#,
        )
        .bind(time::to_db(&at))
        .bind(progress_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if !self.progress_exists(progress_id).await? {
            return Err(Error::NotFound(format!("progress {}", progress_id)));
        }
        Ok(false)
    }

    async fn get_udemy_progress(&self, id: Uuid) -> Result<UdemyProgress> {
        let row = sqlx::query(
            "SELECT id, user_id, course_key, percent_complete, completed_at FROM udemy_progress WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("udemy progress {}", id)))?;

        let percent: i64 = row.get("percent_complete");
        Ok(UdemyProgress {
            id: uuid_utils::parse_column("udemy_progress.id", row.get("id"))?,
            user_id: row.get("user_id"),
            course_key: row.get("course_key"),
            percent_complete: percent.clamp(0, 100) as u8,
            completed_at: time::from_db_opt("completed_at", row.get("completed_at"))?,
        })
    }

    async fn save_udemy_progress(&self, progress: &UdemyProgress) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO udemy_progress (id, user_id, course_key, percent_complete, completed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                percent_complete = excluded.percent_complete,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(progress.id.to_string())
        .bind(&progress.user_id)
        .bind(&progress.course_key)
        .bind(i64::from(progress.percent_complete.min(100)))
        .bind(progress.completed_at.as_ref().map(time::to_db))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(365))
}

async fn insert_enrollment_tree(
    conn: &mut SqliteConnection,
    enrollment: &Enrollment,
    trees: &[CertificationProgress],
    replacing: Option<Uuid>,
) -> Result<()> {
    if let Some(old) = replacing {
        sqlx::query(
            r#"
            DELETE FROM completion_writes
            WHERE progress_id IN (SELECT id FROM certification_progress WHERE enrollment_id = ?)
            "#,
        )
        .bind(old.to_string())
        .execute(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM enrollments WHERE id = ?")
            .bind(old.to_string())
            .execute(&mut *conn)
            .await?;
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO enrollments (id, user_id, certification_id, status, completion_marker, completed_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(enrollment.id.to_string())
    .bind(&enrollment.user_id)
    .bind(&enrollment.certification_id)
    .bind(enrollment.status.as_str())
    .bind(enrollment.completion_marker.map(|m| m.to_string()))
    .bind(enrollment.completed_at.as_ref().map(time::to_db))
    .bind(time::to_db(&enrollment.created_at))
    .execute(&mut *conn)
    .await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(Error::Conflict(format!(
                "user {} is already enrolled in {}",
                enrollment.user_id, enrollment.certification_id
            )));
        }
        return Err(e.into());
    }

    for tree in trees {
        insert_progress_tree(&mut *conn, tree).await?;
    }
    Ok(())
}

async fn insert_progress_tree(conn: &mut SqliteConnection, progress: &CertificationProgress) -> Result<()> {
    let (current_module, current_lesson) = split_pointer(progress.current_lesson.as_ref());
    let inserted = sqlx::query(
        r#"
        INSERT INTO certification_progress (
            id, enrollment_id, user_id, certification_key, course_key, status,
            start_date, completed_date, current_module, current_lesson, academic_honesty_accepted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(progress.id.to_string())
    .bind(progress.enrollment_id.to_string())
    .bind(&progress.user_id)
    .bind(&progress.certification_key)
    .bind(&progress.course_key)
    .bind(progress.status.as_str())
    .bind(progress.start_date.as_ref().map(time::to_db))
    .bind(progress.completed_date.as_ref().map(time::to_db))
    .bind(current_module)
    .bind(current_lesson)
    .bind(progress.academic_honesty_accepted_at.as_ref().map(time::to_db))
    .execute(&mut *conn)
    .await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(Error::Conflict(format!(
                "progress for {} in {}/{} already exists",
                progress.user_id, progress.certification_key, progress.course_key
            )));
        }
        return Err(e.into());
    }

    for (position, module) in progress.modules.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO module_progress (
                id, progress_id, module_key, position, status, lesson_count,
                is_assessment, start_date, completed_date
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(module.id.to_string())
        .bind(progress.id.to_string())
        .bind(&module.module_key)
        .bind(position as i64)
        .bind(module.status.as_str())
        .bind(i64::from(module.lesson_count))
        .bind(module.is_assessment)
        .bind(module.start_date.as_ref().map(time::to_db))
        .bind(module.completed_date.as_ref().map(time::to_db))
        .execute(&mut *conn)
        .await?;

        for lesson in &module.completed_lessons {
            sqlx::query(
                r#"
                INSERT INTO completed_lessons (module_progress_id, lesson_id, dashed_name, completed_date)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(module.id.to_string())
            .bind(&lesson.lesson_id)
            .bind(&lesson.dashed_name)
            .bind(time::to_db(&lesson.completed_date))
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

async fn update_module_row(conn: &mut SqliteConnection, module: &ModuleProgress) -> Result<()> {
    sqlx::query(
        "UPDATE module_progress SET status = ?, start_date = ?, completed_date = ? WHERE id = ?",
    )
    .bind(module.status.as_str())
    .bind(module.start_date.as_ref().map(time::to_db))
    .bind(module.completed_date.as_ref().map(time::to_db))
    .bind(module.id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Module row without its lessons
async fn load_module_row(
    conn: &mut SqliteConnection,
    progress_id: Uuid,
    module_key: &str,
) -> Result<ModuleProgress> {
    let row = sqlx::query(
        r#"
        SELECT id, module_key, status, lesson_count, is_assessment, start_date, completed_date
        FROM module_progress
        WHERE progress_id = ? AND module_key = ?
        "#,
    )
    .bind(progress_id.to_string())
    .bind(module_key)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("module {} in progress {}", module_key, progress_id)))?;

    module_from_row(&row)
}

async fn load_progress(conn: &mut SqliteConnection, progress_id: Uuid) -> Result<CertificationProgress> {
    let row = sqlx::query(
        r#"
        SELECT id, enrollment_id, user_id, certification_key, course_key, status,
               start_date, completed_date, current_module, current_lesson, academic_honesty_accepted_at
        FROM certification_progress
        WHERE id = ?
        "#,
    )
    .bind(progress_id.to_string())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("progress {}", progress_id)))?;

    let current_module: Option<String> = row.get("current_module");
    let current_lesson: Option<String> = row.get("current_lesson");
    let current_lesson = match (current_module, current_lesson) {
        (Some(module_key), Some(lesson_id)) => Some(LessonPointer {
            module_key,
            lesson_id,
        }),
        _ => None,
    };

    let mut progress = CertificationProgress {
        id: uuid_utils::parse_column("certification_progress.id", row.get("id"))?,
        enrollment_id: uuid_utils::parse_column("enrollment_id", row.get("enrollment_id"))?,
        user_id: row.get("user_id"),
        certification_key: row.get("certification_key"),
        course_key: row.get("course_key"),
        status: ProgressStatus::from_db_str(row.get("status"))?,
        start_date: time::from_db_opt("start_date", row.get("start_date"))?,
        completed_date: time::from_db_opt("completed_date", row.get("completed_date"))?,
        current_lesson,
        academic_honesty_accepted_at: time::from_db_opt(
            "academic_honesty_accepted_at",
            row.get("academic_honesty_accepted_at"),
        )?,
        modules: Vec::new(),
    };

    let module_rows = sqlx::query(
        r#"
        SELECT id, module_key, status, lesson_count, is_assessment, start_date, completed_date
        FROM module_progress
        WHERE progress_id = ?
        ORDER BY position
        "#,
    )
    .bind(progress_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut index = HashMap::with_capacity(module_rows.len());
    for row in &module_rows {
        let module = module_from_row(row)?;
        index.insert(module.id, progress.modules.len());
        progress.modules.push(module);
    }

    let lesson_rows = sqlx::query(
        r#"
        SELECT l.module_progress_id, l.lesson_id, l.dashed_name, l.completed_date
        FROM completed_lessons l
        JOIN module_progress m ON m.id = l.module_progress_id
        WHERE m.progress_id = ?
        ORDER BY l.completed_date, l.seq
        "#,
    )
    .bind(progress_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    for row in &lesson_rows {
        let module_id = uuid_utils::parse_column("module_progress_id", row.get("module_progress_id"))?;
        let lesson = lesson_from_row(row)?;
        match index.get(&module_id) {
            Some(&idx) => progress.modules[idx].completed_lessons.push(lesson),
            None => warn!(module_id = %module_id, "Completed lesson for unknown module"),
        }
    }

    Ok(progress)
}

fn module_from_row(row: &SqliteRow) -> Result<ModuleProgress> {
    let lesson_count: i64 = row.get("lesson_count");
    Ok(ModuleProgress {
        id: uuid_utils::parse_column("module_progress.id", row.get("id"))?,
        module_key: row.get("module_key"),
        status: ProgressStatus::from_db_str(row.get("status"))?,
        lesson_count: u32::try_from(lesson_count)
            .map_err(|_| Error::Internal(format!("Invalid lesson_count {}", lesson_count)))?,
        is_assessment: row.get("is_assessment"),
        start_date: time::from_db_opt("start_date", row.get("start_date"))?,
        completed_date: time::from_db_opt("completed_date", row.get("completed_date"))?,
        completed_lessons: Vec::new(),
    })
}

fn lesson_from_row(row: &SqliteRow) -> Result<CompletedLesson> {
    Ok(CompletedLesson {
        lesson_id: row.get("lesson_id"),
        dashed_name: row.get("dashed_name"),
        completed_date: time::from_db("completed_date", row.get("completed_date"))?,
    })
}

fn enrollment_from_row(row: &SqliteRow) -> Result<Enrollment> {
    let marker: Option<String> = row.get("completion_marker");
    Ok(Enrollment {
        id: uuid_utils::parse_column("enrollments.id", row.get("id"))?,
        user_id: row.get("user_id"),
        certification_id: row.get("certification_id"),
        status: EnrollmentStatus::from_db_str(row.get("status"))?,
        completion_marker: marker
            .as_deref()
            .map(|m| uuid_utils::parse_column("completion_marker", m))
            .transpose()?,
        completed_at: time::from_db_opt("completed_at", row.get("completed_at"))?,
        created_at: time::from_db("created_at", row.get("created_at"))?,
    })
}

fn split_pointer(pointer: Option<&LessonPointer>) -> (Option<&str>, Option<&str>) {
    match pointer {
        Some(p) => (Some(p.module_key.as_str()), Some(p.lesson_id.as_str())),
        None => (None, None),
    }
}
