//! Card queries in Redis.
//!
//! Layout:
//! - `crm:card:{id}` hash, field `data` holds the card JSON
//! - `crm:cards:all` set of card ids
//! - `crm:stage:{stage}:cards` list of card ids in on-screen order

use pipeline_core::board::Card;
use redis::AsyncCommands;
use tracing::debug;

use super::PREFIX;
use crate::client::{RedisError, RedisPool, RedisResult};

fn card_key(card_id: &str) -> String {
    format!("{}:card:{}", PREFIX, card_id)
}

fn all_key() -> String {
    format!("{}:cards:all", PREFIX)
}

fn stage_key(stage_id: &str) -> String {
    format!("{}:stage:{}:cards", PREFIX, stage_id)
}

/// Insert or replace a card, appending it to its stage list if new there.
pub async fn save_card(pool: &RedisPool, card: &Card) -> RedisResult<()> {
    let mut conn = pool.clone();
    let previous = get_card(pool, &card.id).await.ok();

    let skey = stage_key(&card.stage);
    let order: Vec<String> = conn.lrange(&skey, 0, -1).await?;

    let mut pipe = redis::pipe();
    pipe.atomic();
    if let Some(prev) = previous.filter(|p| p.stage != card.stage) {
        pipe.lrem(stage_key(&prev.stage), 0, &card.id).ignore();
    }
    if !order.contains(&card.id) {
        pipe.rpush(&skey, &card.id).ignore();
    }
    pipe.hset(card_key(&card.id), "data", serde_json::to_string(card)?)
        .ignore()
        .sadd(all_key(), &card.id)
        .ignore();
    let _: () = pipe.query_async(&mut conn).await?;
    Ok(())
}

pub async fn get_card(pool: &RedisPool, card_id: &str) -> RedisResult<Card> {
    let mut conn = pool.clone();
    let json: Option<String> = conn.hget(card_key(card_id), "data").await?;
    match json {
        Some(j) => Ok(serde_json::from_str(&j)?),
        None => Err(RedisError::NotFound(format!("Card not found: {}", card_id))),
    }
}

/// Every card, with `position` taken from its stage list.
pub async fn list_cards(pool: &RedisPool) -> RedisResult<Vec<Card>> {
    let mut conn = pool.clone();
    let ids: Vec<String> = conn.smembers(all_key()).await?;

    let mut cards = Vec::with_capacity(ids.len());
    let mut orders: std::collections::HashMap<String, Vec<String>> = Default::default();
    for id in ids {
        let Ok(mut card) = get_card(pool, &id).await else {
            debug!(card_id = %id, "Skipping card without data");
            continue;
        };
        if !orders.contains_key(&card.stage) {
            let order: Vec<String> = conn.lrange(stage_key(&card.stage), 0, -1).await?;
            orders.insert(card.stage.clone(), order);
        }
        if let Some(pos) = orders[&card.stage].iter().position(|c| *c == card.id) {
            card.position = pos as u32;
        }
        cards.push(card);
    }
    Ok(cards)
}

/// Splice a card into its new stage list and rewrite its record in one step.
///
/// KEYS: card hash, target stage list. ARGV: card id, target stage, index,
/// key prefix. Returns the position taken, or -1 when the card is missing.
const MOVE_SCRIPT: &str = r#"
local data = redis.call('HGET', KEYS[1], 'data')
if not data then
  return -1
end
local card = cjson.decode(data)
local card_id = ARGV[1]
local to_stage = ARGV[2]
local index = tonumber(ARGV[3])
local from_list = ARGV[4] .. ':stage:' .. card.stage .. ':cards'

redis.call('LREM', from_list, 0, card_id)
redis.call('LREM', KEYS[2], 0, card_id)
local len = redis.call('LLEN', KEYS[2])
if index >= len then
  redis.call('RPUSH', KEYS[2], card_id)
  index = len
else
  local pivot = redis.call('LINDEX', KEYS[2], index)
  redis.call('LINSERT', KEYS[2], 'BEFORE', pivot, card_id)
end

if card.stage ~= to_stage then
  card.days_in_stage = 0
end
card.stage = to_stage
card.position = index
redis.call('HSET', KEYS[1], 'data', cjson.encode(card))
return index
"#;

/// Move a card to `stage_id` at `index`, clamped to the end of the list.
///
/// Runs server-side, so concurrent moves into the same stage never drop
/// each other's cards.
pub async fn move_card(
    pool: &RedisPool,
    card_id: &str,
    stage_id: &str,
    index: usize,
) -> RedisResult<()> {
    let mut conn = pool.clone();
    let position: i64 = redis::Script::new(MOVE_SCRIPT)
        .key(card_key(card_id))
        .key(stage_key(stage_id))
        .arg(card_id)
        .arg(stage_id)
        .arg(index)
        .arg(PREFIX)
        .invoke_async(&mut conn)
        .await?;
    if position < 0 {
        return Err(RedisError::NotFound(format!("Card not found: {}", card_id)));
    }

    debug!(card_id = %card_id, to = %stage_id, index, position, "Card moved in Redis");
    Ok(())
}

pub async fn delete_card(pool: &RedisPool, card_id: &str) -> RedisResult<()> {
    let card = get_card(pool, card_id).await?;
    let mut conn = pool.clone();
    let mut pipe = redis::pipe();
    pipe.atomic()
        .lrem(stage_key(&card.stage), 0, card_id)
        .ignore()
        .srem(all_key(), card_id)
        .ignore()
        .del(card_key(card_id))
        .ignore();
    let _: () = pipe.query_async(&mut conn).await?;
    Ok(())
}
