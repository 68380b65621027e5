//! Progress schema
//!
//! Ownership follows the progress hierarchy: an enrollment owns its
//! certification progress records, which own their module progress rows,
//! which own their completed lessons. Deletes cascade downward.

use crate::Result;
use sqlx::SqlitePool;

/// Tables created by [`create_schema`], parents first
pub const PROGRESS_TABLES: &[&str] = &[
    "enrollments",
    "certification_progress",
    "module_progress",
    "completed_lessons",
    "completion_writes",
    "udemy_progress",
];

/// Create every progress table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_enrollments_table(pool).await?;
    create_certification_progress_table(pool).await?;
    create_module_progress_table(pool).await?;
    create_completed_lessons_table(pool).await?;
    create_completion_writes_table(pool).await?;
    create_udemy_progress_table(pool).await?;
    Ok(())
}

async fn create_enrollments_table(pool: &SqlitePool) -> Result<()> {
    // completion_marker is set once and must be globally unique
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrollments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            certification_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('enrolled', 'disenrolled', 'completed')),
            completion_marker TEXT UNIQUE,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (user_id, certification_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_certification_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS certification_progress (
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL REFERENCES enrollments(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            certification_key TEXT NOT NULL,
            course_key TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('not-started', 'in-progress', 'completed')),
            start_date TEXT,
            completed_date TEXT,
            current_module TEXT,
            current_lesson TEXT,
            academic_honesty_accepted_at TEXT,
            UNIQUE (user_id, certification_key, course_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_certification_progress_status ON certification_progress(status, user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_module_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS module_progress (
            id TEXT PRIMARY KEY,
            progress_id TEXT NOT NULL REFERENCES certification_progress(id) ON DELETE CASCADE,
            module_key TEXT NOT NULL,
            position INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('not-started', 'in-progress', 'completed')),
            lesson_count INTEGER NOT NULL CHECK (lesson_count >= 0),
            is_assessment INTEGER NOT NULL DEFAULT 0,
            start_date TEXT,
            completed_date TEXT,
            UNIQUE (progress_id, module_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_completed_lessons_table(pool: &SqlitePool) -> Result<()> {
    // The UNIQUE constraint is the hard duplicate guard; the idempotency
    // ledger below only covers a bounded window.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completed_lessons (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            module_progress_id TEXT NOT NULL REFERENCES module_progress(id) ON DELETE CASCADE,
            lesson_id TEXT NOT NULL,
            dashed_name TEXT NOT NULL,
            completed_date TEXT NOT NULL,
            UNIQUE (module_progress_id, lesson_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_completion_writes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completion_writes (
            idempotency_key TEXT PRIMARY KEY CHECK (length(idempotency_key) <= 36),
            progress_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_udemy_progress_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS udemy_progress (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_key TEXT NOT NULL,
            percent_complete INTEGER NOT NULL CHECK (percent_complete BETWEEN 0 AND 100),
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
