//! Wire messages exchanged between clients and the authority server.
//!
//! Every message travels as a JSON envelope `{"type": <kind>, "data": <payload>}`.
//! The set of kinds is closed on both directions; anything else fails to decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fleet::command::{ShipAction, ShipCommand};
use crate::fleet::ship::{Cargo, Ship, ShipId, ShipStatus};
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One sequenced player input
    ShipInput(InputPayload),
    /// Latency probe
    Ping(PingProbe),
    /// Debounced batch of compact delta entries
    BatchUpdate(BatchUpdate),
    /// Full state of every ship owned by the sender
    ShipFullSync(ShipFullSync),
    /// Thresholded per-ship position deltas
    DeltaUpdate(DeltaUpdate),
}

/// Messages from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authoritative state of a single ship
    ShipPositionUpdate(ShipPositionUpdate),
    /// Authoritative state of several ships from one server tick
    ShipPositionBatch(Vec<ShipPositionUpdate>),
    /// Echo of a latency probe
    PingResponse(PingProbe),
}

/// Discriminant of a `ServerMessage`, used as the dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerMessageKind {
    ShipPositionUpdate,
    ShipPositionBatch,
    PingResponse,
}

impl ServerMessage {
    pub fn kind(&self) -> ServerMessageKind {
        match self {
            ServerMessage::ShipPositionUpdate(_) => ServerMessageKind::ShipPositionUpdate,
            ServerMessage::ShipPositionBatch(_) => ServerMessageKind::ShipPositionBatch,
            ServerMessage::PingResponse(_) => ServerMessageKind::PingResponse,
        }
    }
}

impl ClientMessage {
    /// Wire name, for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClientMessage::ShipInput(_) => "ship_input",
            ClientMessage::Ping(_) => "ping",
            ClientMessage::BatchUpdate(_) => "batch_update",
            ClientMessage::ShipFullSync(_) => "ship_full_sync",
            ClientMessage::DeltaUpdate(_) => "delta_update",
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A sequenced local action
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInput {
    pub ship_id: ShipId,
    pub command: ShipCommand,
    /// Client time the input was captured (ms)
    pub timestamp: u64,
    /// Strictly increasing per session, starting at 1
    pub sequence: u64,
}

/// Input with short keys (compression enabled)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactInput {
    pub s: ShipId,
    pub a: ShipAction,
    #[serde(default)]
    pub d: Value,
    pub t: u64,
    pub n: u64,
}

/// Input with descriptive keys (compression disabled)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerboseInput {
    pub entity_id: ShipId,
    pub action: ShipAction,
    #[serde(default)]
    pub data: Value,
    pub timestamp: u64,
    pub sequence_number: u64,
}

/// Either encoding of `ship_input`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputPayload {
    Compact(CompactInput),
    Verbose(VerboseInput),
}

impl PlayerInput {
    pub fn to_payload(&self, compact: bool) -> InputPayload {
        if compact {
            InputPayload::Compact(CompactInput {
                s: self.ship_id,
                a: self.command.action(),
                d: self.command.data(),
                t: self.timestamp,
                n: self.sequence,
            })
        } else {
            InputPayload::Verbose(VerboseInput {
                entity_id: self.ship_id,
                action: self.command.action(),
                data: self.command.data(),
                timestamp: self.timestamp,
                sequence_number: self.sequence,
            })
        }
    }
}

impl InputPayload {
    /// Decode into a typed input; fails if `data` does not fit `action`.
    pub fn into_input(self) -> Result<PlayerInput, DecodeError> {
        let (ship_id, action, data, timestamp, sequence) = match self {
            InputPayload::Compact(c) => (c.s, c.a, c.d, c.t, c.n),
            InputPayload::Verbose(v) => (
                v.entity_id,
                v.action,
                v.data,
                v.timestamp,
                v.sequence_number,
            ),
        };
        let command =
            ShipCommand::from_parts(action, data).map_err(|e| DecodeError(e.to_string()))?;
        Ok(PlayerInput {
            ship_id,
            command,
            timestamp,
            sequence,
        })
    }
}

// ============================================================================
// Latency probes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingProbe {
    pub client_time: u64,
}

// ============================================================================
// Authoritative updates
// ============================================================================

/// Authoritative ship state produced by the server
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipPositionUpdate {
    pub ship_id: ShipId,
    pub position: Vec2,
    /// Units per second
    pub velocity: Vec2,
    /// Server time (ms)
    pub timestamp: u64,
    /// Last input from the owning client the server had applied
    pub sequence_number: u64,
}

// ============================================================================
// Outbound state sync
// ============================================================================

/// Full state of one owned ship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipState {
    pub id: ShipId,
    pub position: Vec2,
    pub status: ShipStatus,
    pub destination: Option<Vec2>,
    pub cargo: Option<Cargo>,
    pub timestamp: u64,
}

impl ShipState {
    pub fn from_ship(ship: &Ship, timestamp: u64) -> Self {
        Self {
            id: ship.id,
            position: ship.position,
            status: ship.status,
            destination: ship.destination,
            cargo: ship.cargo.clone(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipFullSync {
    pub ships: Vec<ShipState>,
    /// Last input sequence assigned by the sender at sync time
    pub sequence_number: u64,
}

/// Compact lat/lng pair (`la` = y, `lo` = x)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompactPoint {
    pub la: f64,
    pub lo: f64,
}

impl From<Vec2> for CompactPoint {
    fn from(v: Vec2) -> Self {
        Self { la: v.y, lo: v.x }
    }
}

impl From<CompactPoint> for Vec2 {
    fn from(p: CompactPoint) -> Self {
        Vec2::new(p.lo, p.la)
    }
}

/// One ship's entry in a delta or batch update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaShip {
    pub id: ShipId,
    pub p: CompactPoint,
    /// `ShipStatus::code`
    pub s: u8,
    pub t: u64,
}

impl DeltaShip {
    pub fn from_ship(ship: &Ship, timestamp: u64) -> Self {
        Self {
            id: ship.id,
            p: ship.position.into(),
            s: ship.status.code(),
            t: timestamp,
        }
    }

    pub fn position(&self) -> Vec2 {
        self.p.into()
    }

    pub fn status(&self) -> Option<ShipStatus> {
        ShipStatus::from_code(self.s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeltaKind {
    #[default]
    #[serde(rename = "delta")]
    Delta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaUpdate {
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    pub ships: Vec<DeltaShip>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub updates: Vec<DeltaShip>,
    pub timestamp: u64,
}

// ============================================================================
// Codec
// ============================================================================

/// Encode a message as JSON text
pub fn encode<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message from JSON text
pub fn decode<T: for<'de> Deserialize<'de>>(data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_input() -> PlayerInput {
        PlayerInput {
            ship_id: Uuid::new_v4(),
            command: ShipCommand::SetCourse {
                destination: Vec2::new(10.0, 0.0),
                speed: 1.0,
            },
            timestamp: 1_000,
            sequence: 42,
        }
    }

    #[test]
    fn test_compact_input_uses_short_keys() {
        let input = sample_input();
        let msg = ClientMessage::ShipInput(input.to_payload(true));
        let json: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();

        assert_eq!(json["type"], "ship_input");
        let data = &json["data"];
        assert_eq!(data["s"], input.ship_id.to_string());
        assert_eq!(data["a"], "set_course");
        assert_eq!(data["t"], 1_000);
        assert_eq!(data["n"], 42);
        assert!(data.get("sequenceNumber").is_none());
    }

    #[test]
    fn test_verbose_input_uses_long_keys() {
        let input = sample_input();
        let msg = ClientMessage::ShipInput(input.to_payload(false));
        let json: Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();

        let data = &json["data"];
        assert_eq!(data["entityId"], input.ship_id.to_string());
        assert_eq!(data["sequenceNumber"], 42);
        assert_eq!(data["action"], "set_course");
    }

    #[test]
    fn test_both_input_encodings_decode_to_same_input() {
        let input = sample_input();
        for compact in [true, false] {
            let text = encode(&ClientMessage::ShipInput(input.to_payload(compact))).unwrap();
            match decode::<ClientMessage>(&text).unwrap() {
                ClientMessage::ShipInput(payload) => {
                    assert_eq!(payload.into_input().unwrap(), input);
                }
                other => panic!("Wrong message type: {:?}", other),
            }
        }
    }

    #[test]
    fn test_input_with_mismatched_data_rejected() {
        let payload = InputPayload::Compact(CompactInput {
            s: Uuid::new_v4(),
            a: ShipAction::Maneuver,
            d: serde_json::json!({ "speed": 3.0 }),
            t: 0,
            n: 1,
        });
        assert!(payload.into_input().is_err());
    }

    #[test]
    fn test_position_update_camel_case() {
        let update = ShipPositionUpdate {
            ship_id: Uuid::nil(),
            position: Vec2::new(1.0, 2.0),
            velocity: Vec2::new(0.5, 0.0),
            timestamp: 77,
            sequence_number: 3,
        };
        let text = encode(&ServerMessage::ShipPositionUpdate(update)).unwrap();
        assert!(text.contains("\"type\":\"ship_position_update\""));
        assert!(text.contains("\"shipId\""));
        assert!(text.contains("\"sequenceNumber\":3"));

        let decoded: ServerMessage = decode(&text).unwrap();
        assert_eq!(decoded.kind(), ServerMessageKind::ShipPositionUpdate);
    }

    #[test]
    fn test_ping_response_shape() {
        let text = encode(&ServerMessage::PingResponse(PingProbe { client_time: 123 })).unwrap();
        assert_eq!(
            text,
            r#"{"type":"ping_response","data":{"clientTime":123}}"#
        );
    }

    #[test]
    fn test_delta_update_shape() {
        let id = Uuid::nil();
        let delta = DeltaUpdate {
            kind: DeltaKind::Delta,
            ships: vec![DeltaShip {
                id,
                p: Vec2::new(4.0, 51.5).into(),
                s: ShipStatus::Traveling.code(),
                t: 9,
            }],
        };
        let json: Value =
            serde_json::from_str(&encode(&ClientMessage::DeltaUpdate(delta)).unwrap()).unwrap();

        assert_eq!(json["type"], "delta_update");
        assert_eq!(json["data"]["type"], "delta");
        let entry = &json["data"]["ships"][0];
        assert_eq!(entry["p"]["la"], 51.5);
        assert_eq!(entry["p"]["lo"], 4.0);
        assert_eq!(entry["s"], 1);
    }

    #[test]
    fn test_compact_point_maps_lat_lng() {
        let p = CompactPoint::from(Vec2::new(-0.12, 51.5));
        assert_eq!(p.la, 51.5);
        assert_eq!(p.lo, -0.12);
        assert_eq!(Vec2::from(p), Vec2::new(-0.12, 51.5));
    }

    #[test]
    fn test_full_sync_shape() {
        let ship = Ship::new(Uuid::nil(), Vec2::new(1.0, 1.0)).with_cargo(Cargo {
            commodity: "grain".to_string(),
            quantity: 40,
        });
        let sync = ShipFullSync {
            ships: vec![ShipState::from_ship(&ship, 500)],
            sequence_number: 12,
        };
        let json: Value =
            serde_json::from_str(&encode(&ClientMessage::ShipFullSync(sync)).unwrap()).unwrap();
        assert_eq!(json["data"]["sequenceNumber"], 12);
        assert_eq!(json["data"]["ships"][0]["status"], "idle");
        assert_eq!(json["data"]["ships"][0]["cargo"]["commodity"], "grain");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<ServerMessage, _> =
            decode(r#"{"type":"teleport","data":{"shipId":"x"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_decode() {
        let result: Result<ClientMessage, _> = decode("not json");
        assert!(result.is_err());
    }
}
