//! Shared data structures for the photo catalog
//!
//! These structs represent the data model that flows between
//! the store layer and the feeds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::ValidationError;

/// Attribute map as stored in the key-value store
pub type Record = Map<String, Value>;

/// Attributes owned by `Photo`'s typed fields. Free-form metadata never overrides them.
const PHOTO_ATTRIBUTES: &[&str] = &[
    "image_id",
    "mission_instrument",
    "captured_at",
    "received_at",
    "votes",
    "url",
    "thumbnail",
];

/// Attributes a vote record adds on top of the photo's
const VOTE_ATTRIBUTES: &[&str] = &["user_id", "voted_at"];

/// Represents a single photo in the catalog
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Photo {
    /// Globally unique image ID
    pub image_id: String,
    /// Partition key, "<mission>+<instrument>"
    pub mission_instrument: String,
    /// Capture time in milliseconds since the Unix epoch
    pub captured_at: i64,
    /// Time the image reached Earth, milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    /// Vote counter (0 when the attribute is absent)
    #[serde(default)]
    pub votes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 thumbnail payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Anything else the ingestion process attached
    #[serde(flatten)]
    pub metadata: Record,
}

impl Photo {
    pub fn new(image_id: &str, mission_instrument: &MissionInstrument, captured_at: i64) -> Self {
        Self {
            image_id: image_id.to_string(),
            mission_instrument: mission_instrument.to_string(),
            captured_at,
            received_at: None,
            votes: 0,
            url: None,
            thumbnail: None,
            metadata: Record::new(),
        }
    }

    pub fn to_record(&self) -> Result<Record, serde_json::Error> {
        let photo = Self {
            metadata: free_form(&self.metadata, &[PHOTO_ATTRIBUTES]),
            ..self.clone()
        };
        into_record(serde_json::to_value(photo)?)
    }

    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }

    pub fn captured_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.captured_at)
    }

    /// How long the image took to reach Earth after it was taken
    pub fn transmission_delay(&self) -> Option<Duration> {
        let received = self.received_at?;
        Some(Duration::milliseconds(received - self.captured_at))
    }
}

/// A user's vote on one photo. Unique per (user_id, image_id).
///
/// Mirrors the voted photo's metadata so a favorites listing can be
/// rendered without reading the photos table. The thumbnail is not copied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserVote {
    pub user_id: String,
    pub image_id: String,
    pub mission_instrument: String,
    pub captured_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    /// Vote count of the photo when the vote was cast
    #[serde(default)]
    pub votes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Milliseconds since the Unix epoch
    pub voted_at: i64,
    #[serde(flatten)]
    pub metadata: Record,
}

impl UserVote {
    pub fn from_photo(user: &UserContext, photo: &Photo, voted_at: i64) -> Self {
        Self {
            user_id: user.user_id().to_string(),
            image_id: photo.image_id.clone(),
            mission_instrument: photo.mission_instrument.clone(),
            captured_at: photo.captured_at,
            received_at: photo.received_at,
            votes: photo.votes,
            url: photo.url.clone(),
            voted_at,
            metadata: free_form(&photo.metadata, &[PHOTO_ATTRIBUTES, VOTE_ATTRIBUTES]),
        }
    }

    pub fn to_record(&self) -> Result<Record, serde_json::Error> {
        into_record(serde_json::to_value(self)?)
    }

    pub fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }
}

fn free_form(metadata: &Record, reserved: &[&[&str]]) -> Record {
    metadata
        .iter()
        .filter(|(key, _)| !reserved.iter().any(|names| names.contains(&key.as_str())))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn into_record(value: Value) -> Result<Record, serde_json::Error> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "expected a record, found {other}"
        ))),
    }
}

/// The user on whose behalf votes are cast and favorites are listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user_id: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Result<Self, ValidationError> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        Ok(Self { user_id })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Composite partition key of the photos table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MissionInstrument {
    pub mission: String,
    pub instrument: String,
}

impl MissionInstrument {
    pub fn new(mission: &str, instrument: &str) -> Self {
        Self {
            mission: mission.to_string(),
            instrument: instrument.to_string(),
        }
    }
}

impl fmt::Display for MissionInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.mission, self.instrument)
    }
}

/// A rover camera that can be browsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instrument {
    pub id: &'static str,
    pub name: &'static str,
}

pub const INSTRUMENTS: &[Instrument] = &[
    Instrument { id: "fcam", name: "Front Hazcam" },
    Instrument { id: "ccam", name: "Chemcam RMI" },
    Instrument { id: "mastcam_right", name: "Right Mastcam" },
    Instrument { id: "mastcam_left", name: "Left Mastcam" },
    Instrument { id: "mahli", name: "MAHLI" },
    Instrument { id: "mardi", name: "MARDI" },
];

impl Instrument {
    pub fn find(id: &str) -> Option<&'static Instrument> {
        INSTRUMENTS.iter().find(|i| i.id == id)
    }
}
