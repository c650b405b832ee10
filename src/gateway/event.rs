//! Gateway payloads consumed by the fleet
//!
//! Only `READY` (the shard's guild manifest) and `GUILD_CREATE` (one guild
//! arriving) are decoded; every other dispatch is dropped.

use serde::Deserialize;

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// GUILDS intent (1 << 0)
pub const INTENTS_GUILDS: u64 = 1;

/// Events a shard tracker reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Ready(Ready),
    GuildCreate(GuildCreate),
}

/// `READY` dispatch: the guilds this shard is responsible for
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ready {
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

impl Ready {
    pub fn expected_guilds(&self) -> u64 {
        self.guilds.len() as u64
    }

    /// The manifest: ids the shard will deliver a `GUILD_CREATE` for
    pub fn into_guild_ids(self) -> Vec<String> {
        self.guilds.into_iter().map(|guild| guild.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}

/// `GUILD_CREATE` dispatch, reduced to the fields the aggregate needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GuildCreate {
    pub id: String,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub features: Vec<String>,
}

impl GuildCreate {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Raw gateway frame
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// Map a dispatch to a fleet event, if it is one we track
pub fn decode_dispatch(
    event_name: Option<&str>,
    data: serde_json::Value,
) -> Result<Option<GatewayEvent>, serde_json::Error> {
    match event_name {
        Some("READY") => Ok(Some(GatewayEvent::Ready(serde_json::from_value(data)?))),
        Some("GUILD_CREATE") => Ok(Some(GatewayEvent::GuildCreate(serde_json::from_value(data)?))),
        _ => Ok(None),
    }
}

pub fn identify_payload(token: &str, shard_id: u32, shard_count: u32) -> serde_json::Value {
    serde_json::json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS_GUILDS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "dstat",
                "device": "dstat",
            },
            "shard": [shard_id, shard_count],
        }
    })
}

pub fn heartbeat_payload(last_sequence: Option<u64>) -> serde_json::Value {
    serde_json::json!({ "op": OP_HEARTBEAT, "d": last_sequence })
}
