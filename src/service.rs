//! Playlist reconciliation for one user.
//!
//! [`ReconcileService`] is the only place that knows about credential
//! expiry: every remote call goes through [`ReconcileService::with_refresh`],
//! which refreshes at most once per call and persists the outcome (new
//! credential, or a cleared one) before returning.
//!
//! Callers must not run two operations for the same user concurrently; a
//! refresh in one could invalidate the credential the other still holds.

use crate::api::RemoteApi;
use crate::error::{Result, SyncError};
use crate::models::{Credential, MuteSet, Playlist, Profile, Track, UserArtist, UserRecord, UserTrack};
use crate::ranking::{unique_artists, RankingSource};
use crate::store::CredentialStore;
use chrono::{FixedOffset, Offset, Utc};
use std::future::Future;
use tracing::{debug, info, warn};

/// Maximum items the playlist replace endpoint accepts in one call.
pub const PLAYLIST_REPLACE_LIMIT: usize = 100;

/// URIs of the first `limit` tracks not blocked by `mutes`, in ranking order.
pub fn select_uris(tracks: &[Track], mutes: &MuteSet, limit: usize) -> Vec<String> {
    tracks
        .iter()
        .filter(|t| !mutes.blocks(t))
        .take(limit)
        .map(Track::uri)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub playlist_id: String,
    pub snapshot_id: String,
    pub uris: Vec<String>,
    pub description: String,
}

/// Ranking annotated with one user's mutes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RankingView {
    pub tracks: Vec<UserTrack>,
    pub artists: Vec<UserArtist>,
}

/// Per-call context: the user's key and the record as last loaded or saved.
/// `refreshed` is set once the credential has been refreshed during this call.
struct UserSession {
    user_key: String,
    record: UserRecord,
    refreshed: bool,
}

impl UserSession {
    fn credential(&self) -> Result<Credential> {
        self.record
            .credential
            .clone()
            .ok_or_else(|| SyncError::MissingCredential(self.user_key.clone()))
    }
}

pub struct ReconcileService<'a, A, S, R> {
    api: &'a A,
    store: &'a S,
    ranking: &'a R,
    offset: FixedOffset,
}

impl<'a, A, S, R> ReconcileService<'a, A, S, R>
where
    A: RemoteApi,
    S: CredentialStore,
    R: RankingSource,
{
    pub fn new(api: &'a A, store: &'a S, ranking: &'a R) -> Self {
        Self {
            api,
            store,
            ranking,
            offset: Utc.fix(),
        }
    }

    /// Offset used for the timestamp written into playlist descriptions.
    /// Out-of-range values keep UTC.
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        match hours.checked_mul(3600).and_then(FixedOffset::east_opt) {
            Some(o) => self.offset = o,
            None => warn!("Ignoring invalid UTC offset {}h; using UTC", hours),
        }
        self
    }

    async fn open_session(&self, user_key: &str) -> Result<UserSession> {
        let record = self.store.load(user_key).await?;
        Ok(UserSession {
            user_key: user_key.to_string(),
            record,
            refreshed: false,
        })
    }

    async fn persist(&self, session: &UserSession) -> Result<()> {
        self.store.save(&session.user_key, &session.record).await
    }

    /// Refresh the session credential, persisting the result either way.
    async fn refresh(&self, session: &mut UserSession, stale: &Credential) -> Result<Credential> {
        match self.api.refresh(stale).await {
            Ok(fresh) => {
                session.record.credential = Some(fresh.clone());
                self.persist(session).await?;
                info!("Refreshed credential for user {}", session.user_key);
                Ok(fresh)
            }
            Err(SyncError::Authorization(msg)) => {
                warn!(
                    "Refresh rejected for user {} ({}); clearing stored credential",
                    session.user_key, msg
                );
                session.record.credential = None;
                self.persist(session).await?;
                Err(SyncError::Authorization(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Run `op` with the current credential; on expiry refresh and run it
    /// one more time. The second result is final. Only the first expiry of a
    /// session is recovered: once refreshed, a later expiry in the same call
    /// is returned as is.
    async fn with_refresh<T, F, Fut>(&self, session: &mut UserSession, op: F) -> Result<T>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credential = session.credential()?;
        match op(credential.clone()).await {
            Err(SyncError::AccessTokenExpired(msg)) if session.refreshed => {
                warn!(
                    "Access token expired again for user {} after refresh: {}",
                    session.user_key, msg
                );
                Err(SyncError::AccessTokenExpired(msg))
            }
            Err(SyncError::AccessTokenExpired(msg)) => {
                debug!("Access token expired for user {}: {}", session.user_key, msg);
                let fresh = self.refresh(session, &credential).await?;
                session.refreshed = true;
                op(fresh).await
            }
            other => other,
        }
    }

    /// Cached profile when present, otherwise fetched and cached.
    pub async fn get_profile(&self, user_key: &str) -> Result<Profile> {
        let mut session = self.open_session(user_key).await?;
        if let Some(profile) = &session.record.profile {
            return Ok(profile.clone());
        }
        let api = self.api;
        let profile = self
            .with_refresh(&mut session, move |c| async move { api.get_profile(&c).await })
            .await?;
        session.record.profile = Some(profile.clone());
        self.persist(&session).await?;
        Ok(profile)
    }

    pub async fn get_playlists(&self, user_key: &str) -> Result<Vec<Playlist>> {
        let mut session = self.open_session(user_key).await?;
        let api = self.api;
        self.with_refresh(&mut session, move |c| async move { api.get_playlists(&c).await })
            .await
    }

    pub async fn set_target_playlist(&self, user_key: &str, playlist_id: &str) -> Result<()> {
        let mut session = self.open_session(user_key).await?;
        session.record.target_playlist_id = Some(playlist_id.to_string());
        self.persist(&session).await?;
        info!("User {} target playlist set to {}", user_key, playlist_id);
        Ok(())
    }

    /// Returns true when the mute set changed.
    pub async fn set_track_muted(&self, user_key: &str, track_id: &str, muted: bool) -> Result<bool> {
        let mut session = self.open_session(user_key).await?;
        let changed = session.record.mutes.set_track_muted(track_id, muted);
        if changed {
            self.persist(&session).await?;
        }
        Ok(changed)
    }

    /// Returns true when the mute set changed.
    pub async fn set_artist_muted(&self, user_key: &str, artist_id: &str, muted: bool) -> Result<bool> {
        let mut session = self.open_session(user_key).await?;
        let changed = session.record.mutes.set_artist_muted(artist_id, muted);
        if changed {
            self.persist(&session).await?;
        }
        Ok(changed)
    }

    pub async fn ranking_view(&self, user_key: &str, force_refresh: bool) -> Result<RankingView> {
        let session = self.open_session(user_key).await?;
        let mutes = &session.record.mutes;
        let tracks = self.ranking.tracks(force_refresh).await?;

        let user_tracks = tracks
            .iter()
            .map(|t| UserTrack {
                id: t.id.clone(),
                name: t.name.clone(),
                artist_ids: t.artists.iter().map(|a| a.id.clone()).collect(),
                muted: mutes.is_track_muted(&t.id),
            })
            .collect();
        let user_artists = unique_artists(&tracks)
            .into_iter()
            .map(|a| UserArtist {
                muted: mutes.is_artist_muted(&a.id),
                id: a.id,
                name: a.name,
            })
            .collect();
        Ok(RankingView {
            tracks: user_tracks,
            artists: user_artists,
        })
    }

    fn description_now(&self) -> String {
        let now = Utc::now().with_timezone(&self.offset);
        format!("{} updated", now.format("%Y-%m-%d %H:%M:%S"))
    }

    /// Rewrite the playlist with the unmuted top tracks, then stamp its
    /// description. `playlist_id` falls back to the stored target.
    pub async fn replace_playlist(&self, user_key: &str, playlist_id: Option<&str>) -> Result<ReplaceOutcome> {
        let mut session = self.open_session(user_key).await?;
        let playlist_id = match playlist_id
            .map(str::to_string)
            .or_else(|| session.record.target_playlist_id.clone())
        {
            Some(id) => id,
            None => {
                return Err(SyncError::Configuration(format!(
                    "no target playlist for user {}",
                    user_key
                )))
            }
        };

        let tracks = self.ranking.tracks(false).await?;
        let uris = select_uris(&tracks, &session.record.mutes, PLAYLIST_REPLACE_LIMIT);
        debug!(
            "User {}: {} of {} ranking tracks selected",
            user_key,
            uris.len(),
            tracks.len()
        );

        let api = self.api;
        let pid = playlist_id.as_str();
        let items = uris.as_slice();
        let snapshot_id = self
            .with_refresh(&mut session, move |c| async move {
                api.replace_tracks(&c, pid, items).await
            })
            .await?;

        // Not rolled back on failure; the error still reaches the caller.
        let description = self.description_now();
        let text = description.as_str();
        self.with_refresh(&mut session, move |c| async move {
            api.set_description(&c, pid, text).await
        })
        .await?;

        info!(
            "Playlist {} replaced with {} tracks for user {} (snapshot {})",
            playlist_id,
            uris.len(),
            user_key,
            snapshot_id
        );
        Ok(ReplaceOutcome {
            playlist_id,
            snapshot_id,
            uris,
            description,
        })
    }
}
