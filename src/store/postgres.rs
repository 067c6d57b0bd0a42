//! Postgres-backed store
//!
//! Lists live in `kv_lists` as one JSONB array per key; sorted sets live in
//! `kv_zsets`, one row per member. Read-modify-write operations run in a
//! transaction holding the row lock. Expired rows are treated as absent and
//! deleted when touched.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tokio::time::Instant;

use super::{normalize_index, normalize_range, KvStore, Result};

/// Interval between checks while a blocking pop waits
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut items) = lock_list(&mut tx, source).await? else {
            return Ok(None);
        };
        let Some(value) = items.pop() else {
            return Ok(None);
        };

        if destination == source {
            // Rotate in place so the row keeps its expiry
            items.insert(0, value.clone());
            save_list(&mut tx, source, &items).await?;
        } else {
            match lock_list(&mut tx, destination).await? {
                Some(mut target) => {
                    target.insert(0, value.clone());
                    save_list(&mut tx, destination, &target).await?;
                }
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO kv_lists (key, items, expires_at)
                        SELECT $1, $2, expires_at FROM kv_lists WHERE key = $3
                        "#,
                    )
                    .bind(destination)
                    .bind(Json(vec![value.clone()]))
                    .bind(source)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            save_list(&mut tx, source, &items).await?;
        }

        tx.commit().await?;
        Ok(Some(value))
    }
}

/* ===================== Row helpers ===================== */

/// Lock and read a live list, dropping it first if it has expired
async fn lock_list(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<Option<Vec<String>>> {
    sqlx::query("DELETE FROM kv_lists WHERE key = $1 AND expires_at <= now()")
        .bind(key)
        .execute(&mut **tx)
        .await?;

    let row = sqlx::query("SELECT items FROM kv_lists WHERE key = $1 FOR UPDATE")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

    Ok(match row {
        Some(row) => {
            let Json(items): Json<Vec<String>> = row.try_get("items")?;
            Some(items)
        }
        None => None,
    })
}

/// Write a list back, deleting the key when it became empty
async fn save_list(tx: &mut Transaction<'_, Postgres>, key: &str, items: &[String]) -> Result<()> {
    if items.is_empty() {
        sqlx::query("DELETE FROM kv_lists WHERE key = $1")
            .bind(key)
            .execute(&mut **tx)
            .await?;
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO kv_lists (key, items)
        VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET items = EXCLUDED.items
        "#,
    )
    .bind(key)
    .bind(Json(items))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn purge_expired_zset(tx: &mut Transaction<'_, Postgres>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM kv_zsets WHERE key = $1 AND expires_at <= now()")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/* ===================== Store ===================== */

#[async_trait]
impl KvStore for PgStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut items = lock_list(&mut tx, key).await?.unwrap_or_default();
        items.push(value.to_string());
        save_list(&mut tx, key, &items).await?;
        tx.commit().await?;
        Ok(items.len())
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        let items = self.lrange(key, 0, -1).await?;
        Ok(normalize_index(items.len(), index).and_then(|i| items.get(i).cloned()))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let row = sqlx::query(
            r#"
            SELECT items FROM kv_lists
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(vec![]);
        };
        let Json(items): Json<Vec<String>> = row.try_get("items")?;
        Ok(match normalize_range(items.len(), start, stop) {
            Some((start, stop)) => items[start..=stop].to_vec(),
            None => vec![],
        })
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(items) = lock_list(&mut tx, key).await? {
            let kept = match normalize_range(items.len(), start, stop) {
                Some((start, stop)) => items[start..=stop].to_vec(),
                None => vec![],
            };
            save_list(&mut tx, key, &kept).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn lset_if_exists(&self, key: &str, index: i64, value: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(mut items) = lock_list(&mut tx, key).await? else {
            return Ok(false);
        };
        let Some(i) = normalize_index(items.len(), index) else {
            return Ok(false);
        };
        items[i] = value.to_string();
        save_list(&mut tx, key, &items).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let seconds = seconds as f64;
        let lists = sqlx::query(
            r#"
            UPDATE kv_lists SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .bind(seconds)
        .execute(&self.pool)
        .await?;

        let zsets = sqlx::query(
            r#"
            UPDATE kv_zsets SET expires_at = now() + make_interval(secs => $2)
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .bind(seconds)
        .execute(&self.pool)
        .await?;

        Ok(lists.rows_affected() + zsets.rows_affected() > 0)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        purge_expired_zset(&mut tx, key).await?;
        sqlx::query(
            r#"
            INSERT INTO kv_zsets (key, member, score, expires_at)
            VALUES ($1, $2, $3, (SELECT max(expires_at) FROM kv_zsets WHERE key = $1))
            ON CONFLICT (key, member) DO UPDATE SET score = EXCLUDED.score
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64> {
        let mut tx = self.pool.begin().await?;
        purge_expired_zset(&mut tx, key).await?;
        let row = sqlx::query(
            r#"
            INSERT INTO kv_zsets (key, member, score, expires_at)
            VALUES ($1, $2, $3, (SELECT max(expires_at) FROM kv_zsets WHERE key = $1))
            ON CONFLICT (key, member) DO UPDATE SET score = kv_zsets.score + EXCLUDED.score
            RETURNING score
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(increment)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.try_get("score")?)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT member, score FROM kv_zsets
            WHERE key = $1 AND score >= $2 AND score <= $3
              AND (expires_at IS NULL OR expires_at > now())
            ORDER BY score, member
            "#,
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, f64)> {
                Ok((row.try_get("member")?, row.try_get("score")?))
            })
            .collect()
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM kv_zsets
            WHERE key = $1 AND member = $2 AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .bind(member)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM kv_zsets
            WHERE key = $1 AND score >= $2 AND score <= $3
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .bind(min)
        .bind(max)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM kv_lists WHERE key = $1
                        AND (expires_at IS NULL OR expires_at > now()))
                OR EXISTS (SELECT 1 FROM kv_zsets WHERE key = $1
                        AND (expires_at IS NULL OR expires_at > now()))
                AS found
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("found")?)
    }

    async fn del(&self, keys: &[&str]) -> Result<usize> {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT count(DISTINCT key) AS found FROM (
                SELECT key FROM kv_lists WHERE key = ANY($1)
                    AND (expires_at IS NULL OR expires_at > now())
                UNION
                SELECT key FROM kv_zsets WHERE key = ANY($1)
                    AND (expires_at IS NULL OR expires_at > now())
            ) live
            "#,
        )
        .bind(&keys)
        .fetch_one(&mut *tx)
        .await?;
        let found: i64 = row.try_get("found")?;

        sqlx::query("DELETE FROM kv_lists WHERE key = ANY($1)")
            .bind(&keys)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kv_zsets WHERE key = ANY($1)")
            .bind(&keys)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(found as usize)
    }

    async fn rpush_consume(&self, key: &str, value: &str, guard: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if lock_list(&mut tx, guard).await?.is_none() {
            return Ok(false);
        }
        sqlx::query("DELETE FROM kv_lists WHERE key = $1")
            .bind(guard)
            .execute(&mut *tx)
            .await?;

        let mut items = lock_list(&mut tx, key).await?.unwrap_or_default();
        items.push(value.to_string());
        save_list(&mut tx, key, &items).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_rpoplpush(source, destination).await? {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
