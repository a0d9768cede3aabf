//! Auth session queries in Redis.
//!
//! Sessions are issued elsewhere; this layer only stores and looks them up
//! by opaque token.

use pipeline_core::service::AuthSession;
use redis::AsyncCommands;

use super::PREFIX;
use crate::client::{RedisPool, RedisResult};

fn session_key(token: &str) -> String {
    format!("{}:auth:{}", PREFIX, token)
}

/// Store a session and return its new token.
pub async fn create_session(pool: &RedisPool, user_id: &str, email: Option<&str>) -> RedisResult<String> {
    let token = uuid::Uuid::new_v4().to_string();
    let session = AuthSession {
        user_id: user_id.to_string(),
        email: email.map(str::to_string),
        issued_at: chrono::Utc::now(),
    };
    let mut conn = pool.clone();
    conn.hset::<_, _, _, ()>(session_key(&token), "data", serde_json::to_string(&session)?)
        .await?;
    Ok(token)
}

pub async fn get_session(pool: &RedisPool, token: &str) -> RedisResult<Option<AuthSession>> {
    let mut conn = pool.clone();
    let json: Option<String> = conn.hget(session_key(token), "data").await?;
    match json {
        Some(j) => Ok(Some(serde_json::from_str(&j)?)),
        None => Ok(None),
    }
}

pub async fn delete_session(pool: &RedisPool, token: &str) -> RedisResult<()> {
    let mut conn = pool.clone();
    conn.del::<_, ()>(session_key(token)).await?;
    Ok(())
}
