use super::RemoteApi;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{Credential, Playlist, Profile, Track};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::{debug, warn};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Prefix of the 401 error message the Web API sends for an expired token.
pub const TOKEN_EXPIRED_MARKER: &str = "The access token expired";

/// Ids per request accepted by the several-tracks endpoint.
pub const TRACK_BATCH_SIZE: usize = 50;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn basic_auth(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        general_purpose::STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

fn bearer(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// Sort a non-success response into the error taxonomy; success passes through.
pub async fn check_response(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|j| j["error"]["message"].as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        let message = format!("{}({})", message, status.as_u16());
        if message.starts_with(TOKEN_EXPIRED_MARKER) {
            return Err(SyncError::AccessTokenExpired(message));
        }
        return Err(SyncError::Unauthorized(message));
    }
    Err(SyncError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Pull the `error` field out of a token endpoint failure, falling back to the raw body.
fn token_error_payload(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|j| match &j["error"] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| body.to_string())
}

/// User-resource client backed by the Spotify Web API.
/// Holds only application credentials and endpoints; the user credential is
/// passed into every call.
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String, auth_base: String, api_base: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            auth_base: auth_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.auth_base.clone(),
            cfg.api_base.clone(),
        )
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.auth_base)
    }

    /// Authorization-code exchange performed once at login.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credential> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .header(AUTHORIZATION, basic_auth(&self.client_id, &self.client_secret))
            .form(&params)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let tr: TokenResponse = resp.json().await?;
        let refresh_token = tr
            .refresh_token
            .ok_or_else(|| SyncError::Authorization("token response has no refresh_token".into()))?;
        Ok(Credential {
            access_token: tr.access_token,
            token_type: tr.token_type,
            scope: tr.scope.unwrap_or_default(),
            expires_in: tr.expires_in,
            refresh_token,
        })
    }
}

#[async_trait]
impl RemoteApi for SpotifyClient {
    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", credential.refresh_token.as_str()),
        ];
        let resp = self
            .client
            .post(self.token_url())
            .header(AUTHORIZATION, basic_auth(&self.client_id, &self.client_secret))
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Spotify token refresh failed: {} - {}", status, body);
            return Err(SyncError::Authorization(token_error_payload(&body)));
        }
        let tr: TokenResponse = resp.json().await?;
        debug!("Spotify token refreshed, expires in {}s", tr.expires_in);
        Ok(Credential {
            access_token: tr.access_token,
            token_type: tr.token_type,
            scope: tr.scope.unwrap_or_else(|| credential.scope.clone()),
            expires_in: tr.expires_in,
            // the endpoint usually keeps the old refresh token valid and omits it
            refresh_token: tr
                .refresh_token
                .unwrap_or_else(|| credential.refresh_token.clone()),
        })
    }

    async fn get_profile(&self, credential: &Credential) -> Result<Profile> {
        let url = format!("{}/me", self.api_base);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, bearer(&credential.access_token))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_playlists(&self, credential: &Credential) -> Result<Vec<Playlist>> {
        let mut playlists = Vec::new();
        let mut next_url = Some(format!("{}/me/playlists?limit=50", self.api_base));
        while let Some(url) = next_url {
            let resp = self
                .client
                .get(&url)
                .header(AUTHORIZATION, bearer(&credential.access_token))
                .send()
                .await?;
            let resp = check_response(resp).await?;
            let j: serde_json::Value = resp.json().await?;
            if let Some(items) = j["items"].as_array() {
                for pl in items {
                    playlists.push(Playlist {
                        id: pl["id"].as_str().unwrap_or("").to_string(),
                        name: pl["name"].as_str().unwrap_or("").to_string(),
                        public: pl["public"].as_bool().unwrap_or(false),
                        uri: pl["uri"].as_str().unwrap_or("").to_string(),
                        owner_id: pl["owner"]["id"].as_str().unwrap_or("").to_string(),
                    });
                }
            }
            next_url = j["next"].as_str().map(|s| s.to_string());
        }
        Ok(playlists)
    }

    async fn replace_tracks(
        &self,
        credential: &Credential,
        playlist_id: &str,
        uris: &[String],
    ) -> Result<String> {
        // Percent-encoding a few hundred URIs overflows the remote URL limit,
        // so the comma-joined list goes into the query string as-is.
        // An empty list clears the playlist; the body alone carries it.
        let mut url = format!("{}/playlists/{}/tracks", self.api_base, playlist_id);
        if !uris.is_empty() {
            url.push_str("?uris=");
            url.push_str(&uris.join(","));
        }
        let resp = self
            .client
            .put(&url)
            .header(AUTHORIZATION, bearer(&credential.access_token))
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "uris": uris }))
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        let j: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        match j["snapshot_id"].as_str() {
            Some(snapshot_id) => Ok(snapshot_id.to_string()),
            None => {
                warn!("Replace of playlist {} returned no snapshot_id", playlist_id);
                Err(SyncError::Api { status, body })
            }
        }
    }

    async fn set_description(
        &self,
        credential: &Credential,
        playlist_id: &str,
        description: &str,
    ) -> Result<()> {
        let url = format!("{}/playlists/{}", self.api_base, playlist_id);
        let resp = self
            .client
            .put(&url)
            .header(AUTHORIZATION, bearer(&credential.access_token))
            .json(&json!({ "description": description }))
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

/// Catalog lookups authenticated with the client-credentials flow.
/// The application token is fetched lazily and re-fetched once when it expires.
pub struct CatalogClient {
    client: Client,
    client_id: String,
    client_secret: String,
    auth_base: String,
    api_base: String,
    market: Option<String>,
    token: tokio::sync::Mutex<Option<String>>,
}

impl CatalogClient {
    pub fn new(client_id: String, client_secret: String, auth_base: String, api_base: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            auth_base: auth_base.trim_end_matches('/').to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            market: None,
            token: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut c = Self::new(
            cfg.client_id.clone(),
            cfg.client_secret.clone(),
            cfg.auth_base.clone(),
            cfg.api_base.clone(),
        );
        c.market = cfg.market.clone();
        c
    }

    async fn fetch_app_token(&self) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/api/token", self.auth_base))
            .header(AUTHORIZATION, basic_auth(&self.client_id, &self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let tr: TokenResponse = resp.json().await?;
        debug!("Fetched client-credentials token ({})", tr.token_type);
        Ok(tr.access_token)
    }

    async fn app_token(&self, force: bool) -> Result<String> {
        let mut lock = self.token.lock().await;
        if force || lock.is_none() {
            *lock = Some(self.fetch_app_token().await?);
        }
        lock.clone()
            .ok_or_else(|| SyncError::Authorization("no application token".into()))
    }

    async fn tracks_batch(&self, ids: &[String], token: &str) -> Result<Vec<Track>> {
        let mut url = format!("{}/tracks?ids={}", self.api_base, ids.join(","));
        if let Some(m) = &self.market {
            url.push_str("&market=");
            url.push_str(m);
        }
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, bearer(token))
            .send()
            .await?;
        let resp = check_response(resp).await?;

        #[derive(Deserialize)]
        struct SeveralTracks {
            tracks: Vec<Option<Track>>,
        }
        let body: SeveralTracks = resp.json().await?;
        // unknown ids come back as null entries
        Ok(body.tracks.into_iter().flatten().collect())
    }

    /// Resolve track ids in batches of [`TRACK_BATCH_SIZE`], results in request order.
    pub async fn get_several_tracks(&self, ids: &[String]) -> Result<Vec<Track>> {
        let mut tracks = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(TRACK_BATCH_SIZE) {
            let token = self.app_token(false).await?;
            let batch = match self.tracks_batch(chunk, &token).await {
                Err(SyncError::AccessTokenExpired(_)) => {
                    debug!("Client-credentials token expired, fetching a new one");
                    let token = self.app_token(true).await?;
                    self.tracks_batch(chunk, &token).await?
                }
                other => other?,
            };
            debug!("Fetched {} tracks", batch.len());
            tracks.extend(batch);
        }
        Ok(tracks)
    }
}
