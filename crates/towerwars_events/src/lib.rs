//! Domain events published by the zone server and consumed by the durable
//! services (persistence, progression).
//!
//! Every event is a concrete record with a fixed field set; no loose bags.
//! On the stream each record becomes a field-value map carrying
//! `event_type`, `match_id`, `timestamp` and the event's own fields
//! flattened alongside.

pub mod consumer;
pub mod publisher;
pub mod stream;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

pub use consumer::{run_consumer, ConsumerConfig, EventHandler, EventRecord};
pub use publisher::{spawn_publisher, EventPublisher};
pub use stream::{EventSink, EventSource, MemoryStream, RedisStream};

/// The logical stream every zone event lands on.
pub const STREAM_KEY: &str = "stream:game-events";

/// Reference consumer-group names.
pub const GROUP_PERSISTENCE: &str = "persistence";
pub const GROUP_TOWER_XP: &str = "auth-tower-xp";

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchStarted {
    pub mode: String,
    pub player_ids: Vec<Uuid>,
    pub map_id: String,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchEnded {
    pub result: String,
    pub waves_completed: u32,
    pub duration_seconds: u64,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GamePaused {
    pub reason: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameResumed {}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaveCompleted {
    pub wave_number: u32,
    pub units_killed: u32,
    pub units_leaked: u32,
    pub is_perfect: bool,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TowerBuilt {
    pub player_id: u32,
    pub tower_id: Uuid,
    pub tower_type: String,
    pub grid_x: u8,
    pub grid_y: u8,
    pub gold_spent: u32,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TowerSold {
    pub player_id: u32,
    pub tower_id: Uuid,
    pub gold_received: u32,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UnitKilled {
    pub player_id: u32,
    pub unit_id: u32,
    pub unit_type: String,
    pub unit_rarity: String,
    pub killer_tower_id: Uuid,
    pub gold_awarded: u32,
    pub is_critical: bool,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerDamaged {
    pub player_id: u32,
    pub damage: u32,
    pub remaining_lives: u32,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AbilityUsed {
    pub player_id: u32,
    pub ability_type: String,
    pub target_x: f32,
    pub target_y: f32,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemDropped {
    pub player_id: u32,
    pub rarity: String,
    pub item_type: String,
    pub source: String,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemCollected {
    pub player_id: u32,
    pub item_id: Uuid,
    pub drop_id: u32,
    pub item_type: String,
    pub rarity: String,
    pub item_level: u32,
    pub name: String,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TowerXpGained {
    pub player_id: u32,
    pub tower_id: Uuid,
    pub xp_amount: u64,
    pub source: String,
}

/// Every event the zone server emits.
#[derive(Clone, PartialEq, Debug)]
pub enum GameEvent {
    MatchStarted(MatchStarted),
    MatchEnded(MatchEnded),
    GamePaused(GamePaused),
    GameResumed(GameResumed),
    WaveCompleted(WaveCompleted),
    TowerBuilt(TowerBuilt),
    TowerSold(TowerSold),
    UnitKilled(UnitKilled),
    PlayerDamaged(PlayerDamaged),
    AbilityUsed(AbilityUsed),
    ItemDropped(ItemDropped),
    ItemCollected(ItemCollected),
    TowerXpGained(TowerXpGained),
}

impl GameEvent {
    /// The dotted lowercase name consumers dispatch on.
    pub fn event_type(&self) -> &'static str {
        match self {
            GameEvent::MatchStarted(_) => "match.started",
            GameEvent::MatchEnded(_) => "match.ended",
            GameEvent::GamePaused(_) => "game.paused",
            GameEvent::GameResumed(_) => "game.resumed",
            GameEvent::WaveCompleted(_) => "wave.completed",
            GameEvent::TowerBuilt(_) => "tower.built",
            GameEvent::TowerSold(_) => "tower.sold",
            GameEvent::UnitKilled(_) => "unit.killed",
            GameEvent::PlayerDamaged(_) => "player.damaged",
            GameEvent::AbilityUsed(_) => "ability.used",
            GameEvent::ItemDropped(_) => "item.dropped",
            GameEvent::ItemCollected(_) => "item.collected",
            GameEvent::TowerXpGained(_) => "tower.xp_gained",
        }
    }

    fn to_json(&self) -> anyhow::Result<serde_json::Value> {
        let value = match self {
            GameEvent::MatchStarted(e) => serde_json::to_value(e)?,
            GameEvent::MatchEnded(e) => serde_json::to_value(e)?,
            GameEvent::GamePaused(e) => serde_json::to_value(e)?,
            GameEvent::GameResumed(e) => serde_json::to_value(e)?,
            GameEvent::WaveCompleted(e) => serde_json::to_value(e)?,
            GameEvent::TowerBuilt(e) => serde_json::to_value(e)?,
            GameEvent::TowerSold(e) => serde_json::to_value(e)?,
            GameEvent::UnitKilled(e) => serde_json::to_value(e)?,
            GameEvent::PlayerDamaged(e) => serde_json::to_value(e)?,
            GameEvent::AbilityUsed(e) => serde_json::to_value(e)?,
            GameEvent::ItemDropped(e) => serde_json::to_value(e)?,
            GameEvent::ItemCollected(e) => serde_json::to_value(e)?,
            GameEvent::TowerXpGained(e) => serde_json::to_value(e)?,
        };
        Ok(value)
    }
}

/// One record bound for the stream: the event plus the match it came from
/// and the emission wall-clock time.
#[derive(Clone, PartialEq, Debug)]
pub struct EventEnvelope {
    pub match_id: Uuid,
    pub timestamp_ms: u64,
    pub event: GameEvent,
}

impl EventEnvelope {
    pub fn new(match_id: Uuid, event: GameEvent) -> Self {
        Self {
            match_id,
            timestamp_ms: unix_millis(),
            event,
        }
    }

    /// Flattens the envelope into the field-value pairs stored on the
    /// stream. The event's own fields sit alongside the envelope columns;
    /// non-string JSON values are kept as their JSON rendering.
    pub fn fields(&self) -> anyhow::Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("event_type".to_owned(), self.event.event_type().to_owned()),
            ("match_id".to_owned(), self.match_id.to_string()),
            ("timestamp".to_owned(), self.timestamp_ms.to_string()),
        ];

        match self.event.to_json()? {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    let rendered = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => continue,
                        other => other.to_string(),
                    };
                    fields.push((key, rendered));
                }
            }
            other => anyhow::bail!("event did not serialize to an object: {other}"),
        }

        Ok(fields)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_event_fields() {
        let match_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(
            match_id,
            GameEvent::TowerBuilt(TowerBuilt {
                player_id: 0,
                tower_id: Uuid::nil(),
                tower_type: "Arrow".to_owned(),
                grid_x: 2,
                grid_y: 1,
                gold_spent: 1,
            }),
        );

        let fields = envelope.fields().unwrap();
        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("event_type"), Some("tower.built"));
        assert_eq!(get("match_id"), Some(match_id.to_string().as_str()));
        assert_eq!(get("TowerType"), Some("Arrow"));
        assert_eq!(get("GridX"), Some("2"));
        assert_eq!(get("GoldSpent"), Some("1"));
        assert!(get("timestamp").is_some());
    }

    #[test]
    fn null_fields_are_omitted() {
        let envelope = EventEnvelope::new(
            Uuid::new_v4(),
            GameEvent::GamePaused(GamePaused { reason: None }),
        );

        let fields = envelope.fields().unwrap();
        assert!(!fields.iter().any(|(k, _)| k == "Reason"));
    }

    #[test]
    fn every_event_type_is_dotted_lowercase() {
        let events = [
            GameEvent::GameResumed(GameResumed {}),
            GameEvent::PlayerDamaged(PlayerDamaged {
                player_id: 0,
                damage: 1,
                remaining_lives: 19,
            }),
        ];
        for event in events {
            let ty = event.event_type();
            assert!(ty.contains('.'));
            assert_eq!(ty, ty.to_lowercase());
        }
    }
}
