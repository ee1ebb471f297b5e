use serde::{Deserialize, Serialize};

/// OAuth authorization-code token for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub uri: String,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

impl Artist {
    pub fn uri(&self) -> String {
        format!("spotify:artist:{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub popularity: u32,
    pub artists: Vec<Artist>,
}

impl Track {
    pub fn uri(&self) -> String {
        format!("spotify:track:{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub uri: String,
    pub owner_id: String,
}

/// One row of the chart feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub title: String,
    pub artist: String,
    pub count: u64,
    pub url: String,
}

impl RankingEntry {
    /// Track id embedded as the last path segment of the entry url,
    /// e.g. `https://open.spotify.com/track/{id}`.
    pub fn track_id(&self) -> Option<&str> {
        let trimmed = self.url.trim().trim_end_matches('/');
        let path = trimmed.split(['?', '#']).next().unwrap_or("");
        match path.rsplit('/').next() {
            Some(id) if !id.is_empty() && id != path => Some(id),
            _ => None,
        }
    }
}

/// Track and artist ids a user excluded from playlist generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteSet {
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
}

impl MuteSet {
    pub fn is_track_muted(&self, id: &str) -> bool {
        self.tracks.iter().any(|t| t == id)
    }

    pub fn is_artist_muted(&self, id: &str) -> bool {
        self.artists.iter().any(|a| a == id)
    }

    /// A track is blocked by its own id or by any of its artists.
    pub fn blocks(&self, track: &Track) -> bool {
        self.is_track_muted(&track.id) || track.artists.iter().any(|a| self.is_artist_muted(&a.id))
    }

    /// Returns true when the set changed.
    pub fn set_track_muted(&mut self, id: &str, muted: bool) -> bool {
        toggle(&mut self.tracks, id, muted)
    }

    /// Returns true when the set changed.
    pub fn set_artist_muted(&mut self, id: &str, muted: bool) -> bool {
        toggle(&mut self.artists, id, muted)
    }
}

fn toggle(ids: &mut Vec<String>, id: &str, muted: bool) -> bool {
    let present = ids.iter().any(|x| x == id);
    match (muted, present) {
        (true, false) => {
            ids.push(id.to_string());
            true
        }
        (false, true) => {
            ids.retain(|x| x != id);
            true
        }
        _ => false,
    }
}

/// Everything persisted for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub mutes: MuteSet,
    #[serde(default)]
    pub target_playlist_id: Option<String>,
}

/// A ranking track as seen by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTrack {
    pub id: String,
    pub name: String,
    pub artist_ids: Vec<String>,
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserArtist {
    pub id: String,
    pub name: String,
    pub muted: bool,
}
