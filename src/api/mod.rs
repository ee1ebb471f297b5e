pub mod auth;
pub mod spotify;

use crate::error::Result;
use crate::models::{Credential, Playlist, Profile};

/// Remote operations the reconciliation service needs.
/// Every call takes the credential explicitly so the client holds no user state.
/// Implementations: spotify::SpotifyClient (and scripted stubs in tests).
#[async_trait::async_trait]
pub trait RemoteApi: Send + Sync {
    /// Exchange the refresh token for a new access token. Fails with
    /// `SyncError::Authorization` on any non-success response; never retries.
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;

    async fn get_profile(&self, credential: &Credential) -> Result<Profile>;

    async fn get_playlists(&self, credential: &Credential) -> Result<Vec<Playlist>>;

    /// Replace every item of the playlist, returning the new snapshot id.
    async fn replace_tracks(
        &self,
        credential: &Credential,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String>;

    async fn set_description(
        &self,
        credential: &Credential,
        playlist_id: &str,
        description: &str,
    ) -> Result<()>;
}
