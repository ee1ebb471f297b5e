#![allow(dead_code)]

use async_trait::async_trait;
use ranking_playlist_sync::api::RemoteApi;
use ranking_playlist_sync::error::{Result, SyncError};
use ranking_playlist_sync::models::{Artist, Credential, Playlist, Profile, Track, UserRecord};
use ranking_playlist_sync::ranking::RankingSource;
use ranking_playlist_sync::store::CredentialStore;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn credential(access: &str) -> Credential {
    Credential {
        access_token: access.to_string(),
        token_type: "Bearer".into(),
        scope: "playlist-modify-public playlist-modify-private playlist-read-private".into(),
        expires_in: 3600,
        refresh_token: "refresh-1".into(),
    }
}

pub fn track(id: &str, artist_ids: &[&str]) -> Track {
    Track {
        id: id.to_string(),
        name: format!("track {}", id),
        popularity: 50,
        artists: artist_ids
            .iter()
            .map(|a| Artist {
                id: a.to_string(),
                name: format!("artist {}", a),
            })
            .collect(),
    }
}

#[derive(Default)]
pub struct Calls {
    pub refresh: usize,
    pub profile: usize,
    pub playlists: usize,
    pub replaced: Vec<(String, Vec<String>)>,
    pub descriptions: Vec<(String, String)>,
    pub tokens_seen: Vec<String>,
}

/// Remote stub: calls carrying `valid_token` succeed, any other token is
/// reported as expired. `refresh` hands out `refreshed_token`.
/// `describe_token`, when set, is the only token `set_description` accepts.
pub struct StubApi {
    pub valid_token: String,
    pub describe_token: Option<String>,
    pub refreshed_token: String,
    pub refresh_rejects: bool,
    pub replace_unauthorized: bool,
    pub describe_fails: bool,
    pub calls: Mutex<Calls>,
}

impl StubApi {
    pub fn new(valid_token: &str) -> Self {
        Self {
            valid_token: valid_token.to_string(),
            describe_token: None,
            refreshed_token: valid_token.to_string(),
            refresh_rejects: false,
            replace_unauthorized: false,
            describe_fails: false,
            calls: Mutex::new(Calls::default()),
        }
    }

    fn check(&self, credential: &Credential) -> Result<()> {
        self.check_against(credential, &self.valid_token)
    }

    fn check_against(&self, credential: &Credential, valid: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .tokens_seen
            .push(credential.access_token.clone());
        if credential.access_token == valid {
            Ok(())
        } else {
            Err(SyncError::AccessTokenExpired("The access token expired(401)".into()))
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.calls.lock().unwrap().refresh
    }

    pub fn replaced(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().replaced.clone()
    }

    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().descriptions.clone()
    }
}

#[async_trait]
impl RemoteApi for StubApi {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        self.calls.lock().unwrap().refresh += 1;
        if self.refresh_rejects {
            return Err(SyncError::Authorization("invalid_grant".into()));
        }
        Ok(Credential {
            access_token: self.refreshed_token.clone(),
            ..credential.clone()
        })
    }

    async fn get_profile(&self, credential: &Credential) -> Result<Profile> {
        self.check(credential)?;
        self.calls.lock().unwrap().profile += 1;
        Ok(Profile {
            id: "user-1".into(),
            display_name: Some("User One".into()),
            uri: "spotify:user:user-1".into(),
            country: Some("JP".into()),
        })
    }

    async fn get_playlists(&self, credential: &Credential) -> Result<Vec<Playlist>> {
        self.check(credential)?;
        self.calls.lock().unwrap().playlists += 1;
        Ok(vec![Playlist {
            id: "pl-1".into(),
            name: "Daily Top".into(),
            public: false,
            uri: "spotify:playlist:pl-1".into(),
            owner_id: "user-1".into(),
        }])
    }

    async fn replace_tracks(
        &self,
        credential: &Credential,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        if self.replace_unauthorized {
            return Err(SyncError::Unauthorized("Insufficient client scope(401)".into()));
        }
        self.check(credential)?;
        let mut calls = self.calls.lock().unwrap();
        calls.replaced.push((playlist_id.to_string(), uris.to_vec()));
        Ok(format!("snapshot-{}", calls.replaced.len()))
    }

    async fn set_description(
        &self,
        credential: &Credential,
        playlist_id: &str,
        description: &str,
    ) -> Result<()> {
        let valid = self.describe_token.as_deref().unwrap_or(&self.valid_token);
        self.check_against(credential, valid)?;
        if self.describe_fails {
            return Err(SyncError::Api {
                status: 500,
                body: "server error".into(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .descriptions
            .push((playlist_id.to_string(), description.to_string()));
        Ok(())
    }
}

/// In-memory store that keeps every saved record for inspection.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, UserRecord>>,
    saves: Mutex<Vec<UserRecord>>,
}

impl MemoryStore {
    pub fn with_record(user_key: &str, record: UserRecord) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .unwrap()
            .insert(user_key.to_string(), record);
        store
    }

    pub fn get(&self, user_key: &str) -> UserRecord {
        self.records
            .lock()
            .unwrap()
            .get(user_key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn saves(&self) -> Vec<UserRecord> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load(&self, user_key: &str) -> Result<UserRecord> {
        Ok(self.get(user_key))
    }

    async fn save(&self, user_key: &str, record: &UserRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(user_key.to_string(), record.clone());
        self.saves.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct StaticRanking(pub Vec<Track>);

#[async_trait]
impl RankingSource for StaticRanking {
    async fn tracks(&self, _force_refresh: bool) -> Result<Vec<Track>> {
        Ok(self.0.clone())
    }
}
