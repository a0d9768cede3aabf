//! Preference queries in Redis.

use pipeline_core::preferences::Preferences;
use redis::AsyncCommands;

use super::PREFIX;
use crate::client::{RedisPool, RedisResult};

fn prefs_key(user_id: &str) -> String {
    format!("{}:prefs:{}", PREFIX, user_id)
}

pub async fn get_preferences(pool: &RedisPool, user_id: &str) -> RedisResult<Option<Preferences>> {
    let mut conn = pool.clone();
    let json: Option<String> = conn.hget(prefs_key(user_id), "data").await?;
    match json {
        Some(j) => Ok(Some(serde_json::from_str(&j)?)),
        None => Ok(None),
    }
}

pub async fn save_preferences(pool: &RedisPool, user_id: &str, prefs: &Preferences) -> RedisResult<()> {
    let mut conn = pool.clone();
    let json = serde_json::to_string(prefs)?;
    conn.hset::<_, _, _, ()>(prefs_key(user_id), "data", &json).await?;
    conn.hset::<_, _, _, ()>(prefs_key(user_id), "updated_at", chrono::Utc::now().to_rfc3339())
        .await?;
    Ok(())
}

pub async fn delete_preferences(pool: &RedisPool, user_id: &str) -> RedisResult<()> {
    let mut conn = pool.clone();
    conn.del::<_, ()>(prefs_key(user_id)).await?;
    Ok(())
}
