use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::sync::RwLock;
use thiserror::Error;

/// Movement direction carried by a `Command`. The bit values match the
/// wire protocol's flag encoding and feed into [`DirectionMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    None,
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn bit(self) -> u8 {
        match self {
            Direction::None => 0,
            Direction::Up => 1,
            Direction::Down => 2,
            Direction::Left => 4,
            Direction::Right => 8,
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Direction::None),
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!("unknown direction \"{}\"", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::None => "none",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        };
        write!(f, "{}", name)
    }
}

/// Bit-flag set of allowed directions, used to restrict the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionMask(u8);

impl DirectionMask {
    pub const NONE: DirectionMask = DirectionMask(0);
    pub const UP: DirectionMask = DirectionMask(1);
    pub const DOWN: DirectionMask = DirectionMask(2);
    pub const LEFT: DirectionMask = DirectionMask(4);
    pub const RIGHT: DirectionMask = DirectionMask(8);
    pub const ALL: DirectionMask = DirectionMask(0b1111);

    /// `Direction::None` always passes; it is the absence of a move.
    pub fn allows(self, direction: Direction) -> bool {
        direction == Direction::None || self.0 & direction.bit() != 0
    }
}

impl BitOr for DirectionMask {
    type Output = DirectionMask;

    fn bitor(self, rhs: DirectionMask) -> DirectionMask {
        DirectionMask(self.0 | rhs.0)
    }
}

impl From<Direction> for DirectionMask {
    fn from(direction: Direction) -> Self {
        DirectionMask(direction.bit())
    }
}

/// Current holder of one leaderboard bucket. The bucket date is derived
/// from the achievement timestamp and never travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighScoreRecord {
    pub owner_id: Option<String>,
    pub value: i64,
    pub achieved_at: DateTime<Utc>,
}

impl HighScoreRecord {
    pub fn bucket_date(&self) -> NaiveDate {
        self.achieved_at.date_naive()
    }
}

/// A directional instruction, with the originating chat-message id and
/// the raw text it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub text: String,
    pub direction: Direction,
}

/// A client-reported game-state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmission {
    #[serde(default)]
    pub last_command: Option<String>,
    #[serde(rename = "score")]
    pub score_value: i64,
    pub combo: i64,
}

/// Aggregated leaderboard payload pushed to clients. Write-only on the
/// wire; absent records serialize as explicit nulls.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreStats {
    pub today_high_score: Option<HighScoreRecord>,
    pub alltime_high_score: Option<HighScoreRecord>,
    pub today_high_combo: Option<HighScoreRecord>,
    pub alltime_high_combo: Option<HighScoreRecord>,
    pub current_score: i64,
    pub current_combo: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    ScoreSubmission(ScoreSubmission),
    ScoreStats(ScoreStats),
    HighScoreQuery,
    NoOp,
}

impl Event {
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Command(_) => "command",
            Event::ScoreSubmission(_) => "scoresubmission",
            Event::ScoreStats(_) => "scorestats",
            Event::HighScoreQuery => "highscorequery",
            Event::NoOp => "noop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Tag not present in the decoder registry. Dropped without a log.
    #[error("unknown event type \"{0}\"")]
    UnknownVariant(String),
    /// Tag known but the payload is not valid JSON or is missing
    /// required fields. Dropped with a warning; never fatal.
    #[error("malformed \"{tag}\" payload: {reason}")]
    MalformedPayload { tag: String, reason: String },
}

type DecodeFn = fn(Value) -> Result<Event, DecodeError>;

/// Encodes an event as one wire frame: a JSON object tagged with the
/// variant's type string.
pub fn encode(event: &Event) -> String {
    let frame = match event {
        Event::Command(cmd) => json!({
            "type": "command",
            "id": cmd.id,
            "text": cmd.text,
            "direction": cmd.direction,
        }),
        Event::ScoreSubmission(sub) => json!({
            "type": "scoresubmission",
            "lastCommand": sub.last_command,
            "score": sub.score_value,
            "combo": sub.combo,
        }),
        Event::ScoreStats(stats) => json!({
            "type": "scorestats",
            "todayHighScore": stats.today_high_score,
            "alltimeHighScore": stats.alltime_high_score,
            "todayHighCombo": stats.today_high_combo,
            "alltimeHighCombo": stats.alltime_high_combo,
            "currentScore": stats.current_score,
            "currentCombo": stats.current_combo,
        }),
        Event::HighScoreQuery => json!({ "type": "highscorequery" }),
        Event::NoOp => json!({ "type": "noop" }),
    };
    frame.to_string()
}

/// Tag-to-decoder mapping for inbound frames. Built once at startup;
/// `reload` swaps the whole mapping atomically, so sessions already
/// blocked on a read pick up the new set on their next frame.
///
/// `scorestats` is deliberately not registered: it is a broadcast-only
/// payload, and an inbound frame carrying it is an unknown variant.
pub struct EventRegistry {
    decoders: RwLock<HashMap<&'static str, DecodeFn>>,
}

impl EventRegistry {
    pub fn with_defaults() -> Self {
        EventRegistry {
            decoders: RwLock::new(Self::default_decoders()),
        }
    }

    fn default_decoders() -> HashMap<&'static str, DecodeFn> {
        let mut map: HashMap<&'static str, DecodeFn> = HashMap::new();
        map.insert("command", decode_command);
        map.insert("scoresubmission", decode_score_submission);
        map.insert("highscorequery", decode_high_score_query);
        map.insert("noop", decode_noop);
        map
    }

    pub fn reload(&self) {
        let mut decoders = self.decoders.write().unwrap_or_else(|e| e.into_inner());
        *decoders = Self::default_decoders();
    }

    pub fn decode(&self, raw: &str) -> Result<Event, DecodeError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DecodeError::MalformedPayload {
                tag: "frame".to_string(),
                reason: e.to_string(),
            })?;
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::MalformedPayload {
                tag: "frame".to_string(),
                reason: "missing \"type\" field".to_string(),
            })?
            .to_ascii_lowercase();

        let decoder = {
            let decoders = self.decoders.read().unwrap_or_else(|e| e.into_inner());
            decoders.get(tag.as_str()).copied()
        };

        match decoder {
            Some(decode) => decode(value),
            None => Err(DecodeError::UnknownVariant(tag)),
        }
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn decode_command(value: Value) -> Result<Event, DecodeError> {
    serde_json::from_value::<Command>(value)
        .map(Event::Command)
        .map_err(|e| malformed("command", e))
}

fn decode_score_submission(value: Value) -> Result<Event, DecodeError> {
    serde_json::from_value::<ScoreSubmission>(value)
        .map(Event::ScoreSubmission)
        .map_err(|e| malformed("scoresubmission", e))
}

fn decode_high_score_query(_value: Value) -> Result<Event, DecodeError> {
    Ok(Event::HighScoreQuery)
}

fn decode_noop(_value: Value) -> Result<Event, DecodeError> {
    Ok(Event::NoOp)
}

fn malformed(tag: &str, err: serde_json::Error) -> DecodeError {
    DecodeError::MalformedPayload {
        tag: tag.to_string(),
        reason: err.to_string(),
    }
}
