//! Item drops: generation, ownership, collection.

use glam::Vec2;
use rand::Rng;
use towerwars_events::GameEvent;
use towerwars_protocol::packets::game_c2s::ItemCollectC2s;
use towerwars_protocol::packets::game_s2c::{EntityDestroyS2c, ItemCollectAckS2c, ItemDropS2c};
use towerwars_protocol::types::{DestroyReason, ErrorCode, ItemType, Rarity};
use towerwars_protocol::Message;
use uuid::Uuid;

use super::entities::ItemDrop;
use super::game::GameSession;

const NAME_PREFIXES: &[&str] = &[
    "Swift", "Heavy", "Gleaming", "Vicious", "Ancient", "Runed", "Grim", "Keen",
];

const NAME_SUFFIXES: &[&str] = &[
    "of Embers",
    "of the Gale",
    "of Frost",
    "of Ruin",
    "of the Fox",
    "of Dawn",
    "of Echoes",
];

impl GameSession {
    /// Rolls drop rarity: 10% Rare, 30% Magic, floored at `min_rarity`.
    pub(crate) fn roll_item_rarity(&mut self, min_rarity: Rarity) -> Rarity {
        let roll: f64 = self.rng.gen();
        let rolled = if roll < 0.10 {
            Rarity::Rare
        } else if roll < 0.40 {
            Rarity::Magic
        } else {
            Rarity::Normal
        };
        rolled.max(min_rarity)
    }

    pub(crate) fn roll_item_name(&mut self, item_type: ItemType, rarity: Rarity) -> String {
        match rarity {
            Rarity::Normal => item_type.name().to_owned(),
            Rarity::Magic => {
                let prefix = NAME_PREFIXES[self.rng.gen_range(0..NAME_PREFIXES.len())];
                format!("{prefix} {}", item_type.name())
            }
            Rarity::Rare => {
                let prefix = NAME_PREFIXES[self.rng.gen_range(0..NAME_PREFIXES.len())];
                let suffix = NAME_SUFFIXES[self.rng.gen_range(0..NAME_SUFFIXES.len())];
                format!("{prefix} {} {suffix}", item_type.name())
            }
        }
    }

    /// Creates a drop owned by `player_id`, announces it and publishes
    /// `item.dropped`.
    pub(crate) fn spawn_drop(
        &mut self,
        position: Vec2,
        player_id: u32,
        min_rarity: Rarity,
        source: &str,
    ) {
        let Some(player) = self.players.get(&player_id) else {
            return;
        };
        let owner_user_id = player.user_id;

        let rarity = self.roll_item_rarity(min_rarity);
        let item_type = ItemType::ALL[self.rng.gen_range(0..ItemType::ALL.len())];
        let name = self.roll_item_name(item_type, rarity);
        let item_level = self.current_wave.max(1);

        let entity_id = self.alloc_entity();
        let drop_id = self.next_drop_id;
        self.next_drop_id += 1;

        let drop = ItemDrop {
            entity_id,
            drop_id,
            position,
            item_type,
            rarity,
            item_level,
            name,
            owner_player_id: player_id,
            owner_user_id,
            is_collected: false,
            age: 0.0,
        };

        self.broadcast(Message::ItemDrop(ItemDropS2c {
            tick: self.current_tick,
            drop_id,
            entity_id,
            position,
            owner_player_id: player_id,
            item_type,
            rarity,
            item_level,
        }));

        self.drops.insert(entity_id, drop);

        self.publisher.publish(
            self.match_id,
            GameEvent::ItemDropped(towerwars_events::ItemDropped {
                player_id,
                rarity: rarity.name().to_owned(),
                item_type: item_type.name().to_owned(),
                source: source.to_owned(),
            }),
        );
    }

    pub(crate) fn handle_item_collect(&mut self, player_id: u32, pkt: &ItemCollectC2s) {
        let fail = |session: &Self, code: ErrorCode| {
            session.send_to_player(
                player_id,
                Message::ItemCollectAck(ItemCollectAckS2c {
                    request_id: pkt.request_id,
                    success: false,
                    item_id: None,
                    error: Some(code),
                }),
            );
        };

        if self.collected_drops.contains(&pkt.drop_id) {
            fail(self, ErrorCode::ItemAlreadyCollected);
            return;
        }

        let Some(entity_id) = self
            .drops
            .values()
            .find(|d| d.drop_id == pkt.drop_id)
            .map(|d| d.entity_id)
        else {
            fail(self, ErrorCode::ItemNotFound);
            return;
        };

        let Some(drop) = self.drops.get(&entity_id) else {
            fail(self, ErrorCode::ItemNotFound);
            return;
        };
        if drop.owner_player_id != player_id {
            fail(self, ErrorCode::NotItemOwner);
            return;
        }

        let Some(mut drop) = self.drops.remove(&entity_id) else {
            return;
        };
        drop.is_collected = true;
        self.collected_drops.insert(drop.drop_id);

        // The durable identity for the inventory consumer is minted here,
        // not by the client.
        let item_id = Uuid::new_v4();

        self.broadcast(Message::EntityDestroy(EntityDestroyS2c {
            tick: self.current_tick,
            entity_id,
            reason: DestroyReason::Collected,
        }));

        self.send_to_player(
            player_id,
            Message::ItemCollectAck(ItemCollectAckS2c {
                request_id: pkt.request_id,
                success: true,
                item_id: Some(item_id),
                error: None,
            }),
        );

        self.publisher.publish(
            self.match_id,
            GameEvent::ItemCollected(towerwars_events::ItemCollected {
                player_id,
                item_id,
                drop_id: drop.drop_id,
                item_type: drop.item_type.name().to_owned(),
                rarity: drop.rarity.name().to_owned(),
                item_level: drop.item_level,
                name: drop.name.clone(),
            }),
        );
    }
}
