//! Scalar storage per browsing context in Redis.

use redis::AsyncCommands;

use super::PREFIX;
use crate::client::{RedisPool, RedisResult};

fn context_key(context: &str) -> String {
    format!("{}:local:{}", PREFIX, context)
}

pub async fn get_value(pool: &RedisPool, context: &str, key: &str) -> RedisResult<Option<String>> {
    let mut conn = pool.clone();
    Ok(conn.hget(context_key(context), key).await?)
}

pub async fn set_value(pool: &RedisPool, context: &str, key: &str, value: &str) -> RedisResult<()> {
    let mut conn = pool.clone();
    conn.hset::<_, _, _, ()>(context_key(context), key, value).await?;
    Ok(())
}

pub async fn remove_value(pool: &RedisPool, context: &str, key: &str) -> RedisResult<()> {
    let mut conn = pool.clone();
    conn.hdel::<_, _, ()>(context_key(context), key).await?;
    Ok(())
}
