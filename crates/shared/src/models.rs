use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name given to projects created without an explicit name
pub const DEFAULT_PROJECT_NAME: &str = "New Project";

/// Tempo the backend assigns to new projects
pub const DEFAULT_BPM: u32 = 120;

/// Sessions this close to expiry are treated as expired
const EXPIRY_LEEWAY_SECS: i64 = 30;

// ============================================================================
// Auth
// ============================================================================

/// Account identity as reported by the auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Live authenticated session with the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_LEEWAY_SECS) <= now
    }

    /// Two sessions are the same if they belong to the same user and carry the same token
    pub fn same_as(&self, other: &AuthSession) -> bool {
        self.user.id == other.user.id && self.access_token == other.access_token
    }
}

// ============================================================================
// Profiles
// ============================================================================

/// Row of the `profiles` table, keyed by the user id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

// ============================================================================
// Projects
// ============================================================================

/// Row of the `projects` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    #[serde(default = "default_bpm")]
    pub bpm: u32,
    #[serde(default)]
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_bpm() -> u32 {
    DEFAULT_BPM
}

/// Insert payload for `projects`; unset fields take the server defaults
#[derive(Debug, Clone, Serialize)]
pub struct NewProject {
    pub name: String,
    pub owner_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl NewProject {
    pub fn new(owner_id: Uuid, name: Option<&str>) -> Self {
        Self {
            name: name.unwrap_or(DEFAULT_PROJECT_NAME).to_string(),
            owner_id,
            bpm: None,
            is_public: None,
        }
    }
}

/// Partial update of a project; only set fields are sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl ProjectUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.bpm.is_none() && self.is_public.is_none()
    }
}

/// Role of a user on a shared project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CollaboratorRole {
    Owner,
    Editor,
    Viewer,
    Other(String),
}

impl From<String> for CollaboratorRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "owner" => Self::Owner,
            "editor" => Self::Editor,
            "viewer" => Self::Viewer,
            _ => Self::Other(role),
        }
    }
}

impl From<CollaboratorRole> for String {
    fn from(role: CollaboratorRole) -> Self {
        match role {
            CollaboratorRole::Owner => "owner".to_string(),
            CollaboratorRole::Editor => "editor".to_string(),
            CollaboratorRole::Viewer => "viewer".to_string(),
            CollaboratorRole::Other(role) => role,
        }
    }
}

/// Row of the `project_collaborators` join table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCollaborator {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: CollaboratorRole,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tracks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Midi,
    Audio,
}

/// Mixer strip state stored alongside each track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            muted: false,
            solo: false,
        }
    }
}

impl TrackSettings {
    /// Volume is kept within 0.0..=1.0
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Pan is kept within -1.0 (left) ..= 1.0 (right)
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn volume_percent(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }

    pub fn set_volume_percent(&mut self, percent: u8) {
        self.set_volume(f32::from(percent) / 100.0);
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    pub fn toggle_solo(&mut self) {
        self.solo = !self.solo;
    }
}

/// Row of the `tracks` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub settings: TrackSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    /// Decode `content` as MIDI data; `None` for audio tracks or malformed content
    pub fn midi_content(&self) -> Option<MidiContent> {
        match self.kind {
            TrackKind::Midi => serde_json::from_value(self.content.clone()).ok(),
            TrackKind::Audio => None,
        }
    }

    /// Decode `content` as audio data; `None` for MIDI tracks or malformed content
    pub fn audio_content(&self) -> Option<AudioContent> {
        match self.kind {
            TrackKind::Audio => serde_json::from_value(self.content.clone()).ok(),
            TrackKind::Midi => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiNote {
    pub pitch: u8,
    pub velocity: u8,
    /// Position in beats from the start of the track
    pub start_time: f64,
    /// Length in beats
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiContent {
    pub instrument: String,
    #[serde(default)]
    pub notes: Vec<MidiNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioContent {
    pub audio_url: String,
    #[serde(default)]
    pub waveform: Vec<f32>,
}

// ============================================================================
// Tests
// ============================================================================
