use async_trait::async_trait;
use sqlx::{PgPool, Row};
use upsync_core::models::{
    DownloadToken, FileAssociation, StorageQuota, UploadProgress, UploadSession,
};
use upsync_core::{AppError, UploadStore};
use uuid::Uuid;

/// Byte counts are unsigned in memory and BIGINT in Postgres.
fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_db_u32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Postgres-backed `UploadStore`. Every write is an upsert keyed by the row id, so
/// re-persisting the same row after each mutation is safe.
#[derive(Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    async fn save_session(&self, session: &UploadSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_session (
                id, owner_user_id, company_id, name, total_files, completed_files,
                failed_files, total_bytes, uploaded_bytes, status, created_at, updated_at,
                completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                total_files = EXCLUDED.total_files,
                completed_files = EXCLUDED.completed_files,
                failed_files = EXCLUDED.failed_files,
                total_bytes = EXCLUDED.total_bytes,
                uploaded_bytes = EXCLUDED.uploaded_bytes,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(session.id)
        .bind(session.owner_user_id)
        .bind(session.company_id)
        .bind(session.name.as_deref())
        .bind(to_db_u32(session.total_files))
        .bind(to_db_u32(session.completed_files))
        .bind(to_db_u32(session.failed_files))
        .bind(to_db(session.total_bytes))
        .bind(to_db(session.uploaded_bytes))
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_progress(&self, progress: &UploadProgress) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_progress (
                id, session_id, file_index, file_name, content_type, file_id, owner_user_id,
                status, progress_percentage, bytes_uploaded, total_bytes,
                upload_speed_bytes_per_sec, estimated_seconds_remaining, current_chunk,
                total_chunks, error_message, started_at, completed_at, last_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO UPDATE SET
                file_id = EXCLUDED.file_id,
                status = EXCLUDED.status,
                progress_percentage = EXCLUDED.progress_percentage,
                bytes_uploaded = EXCLUDED.bytes_uploaded,
                upload_speed_bytes_per_sec = EXCLUDED.upload_speed_bytes_per_sec,
                estimated_seconds_remaining = EXCLUDED.estimated_seconds_remaining,
                current_chunk = EXCLUDED.current_chunk,
                total_chunks = EXCLUDED.total_chunks,
                error_message = EXCLUDED.error_message,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                last_updated_at = EXCLUDED.last_updated_at
            "#,
        )
        .bind(progress.id)
        .bind(progress.session_id)
        .bind(to_db_u32(progress.file_index))
        .bind(&progress.file_name)
        .bind(progress.content_type.as_deref())
        .bind(progress.file_id)
        .bind(progress.owner_user_id)
        .bind(progress.status)
        .bind(i16::from(progress.progress_percentage))
        .bind(to_db(progress.bytes_uploaded))
        .bind(to_db(progress.total_bytes))
        .bind(to_db(progress.upload_speed_bytes_per_sec))
        .bind(progress.estimated_seconds_remaining)
        .bind(to_db_u32(progress.current_chunk))
        .bind(to_db_u32(progress.total_chunks))
        .bind(progress.error_message.as_deref())
        .bind(progress.started_at)
        .bind(progress.completed_at)
        .bind(progress.last_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_quota(&self, company_id: Uuid) -> Result<Option<StorageQuota>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT company_id, storage_limit_bytes, storage_used_bytes, file_count,
                   last_calculated_at
            FROM storage_quota
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StorageQuota {
            company_id: row.get("company_id"),
            storage_limit_bytes: from_db(row.get("storage_limit_bytes")),
            storage_used_bytes: from_db(row.get("storage_used_bytes")),
            file_count: from_db(row.get("file_count")),
            last_calculated_at: row.get("last_calculated_at"),
        }))
    }

    async fn save_quota(&self, quota: &StorageQuota) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO storage_quota (
                company_id, storage_limit_bytes, storage_used_bytes, file_count,
                last_calculated_at
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (company_id) DO UPDATE SET
                storage_limit_bytes = EXCLUDED.storage_limit_bytes,
                storage_used_bytes = EXCLUDED.storage_used_bytes,
                file_count = EXCLUDED.file_count,
                last_calculated_at = EXCLUDED.last_calculated_at
            "#,
        )
        .bind(quota.company_id)
        .bind(to_db(quota.storage_limit_bytes))
        .bind(to_db(quota.storage_used_bytes))
        .bind(to_db(quota.file_count))
        .bind(quota.last_calculated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_token(&self, token: &DownloadToken) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO download_token (
                id, file_id, user_id, token, expires_at, download_count, max_downloads,
                ip_address, user_agent, created_at, last_used_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                download_count = EXCLUDED.download_count,
                last_used_at = EXCLUDED.last_used_at
            "#,
        )
        .bind(token.id)
        .bind(token.file_id)
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .bind(to_db_u32(token.download_count))
        .bind(to_db_u32(token.max_downloads))
        .bind(token.ip_address.as_deref())
        .bind(token.user_agent.as_deref())
        .bind(token.created_at)
        .bind(token.last_used_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_tokens(&self, ids: &[Uuid]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let result = sqlx::query("DELETE FROM download_token WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        tracing::debug!(deleted = result.rows_affected(), "Deleted download tokens");
        Ok(())
    }

    async fn save_association(&self, association: &FileAssociation) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO file_association (
                id, file_id, chatroom_id, thread_id, access_type, shared_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET access_type = EXCLUDED.access_type
            "#,
        )
        .bind(association.id)
        .bind(association.file_id)
        .bind(association.target.chatroom_id())
        .bind(association.target.thread_id())
        .bind(association.access_type)
        .bind(association.shared_by)
        .bind(association.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_counts_saturate_at_bigint() {
        assert_eq!(to_db(42), 42);
        assert_eq!(to_db(u64::MAX), i64::MAX);
        assert_eq!(to_db_u32(u32::MAX), i32::MAX);
    }

    #[test]
    fn test_negative_columns_read_as_zero() {
        assert_eq!(from_db(-5), 0);
        assert_eq!(from_db(1_000_000), 1_000_000);
    }
}
