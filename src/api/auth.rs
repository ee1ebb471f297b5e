use super::spotify::SpotifyClient;
use super::RemoteApi;
use crate::config::Config;
use crate::store::CredentialStore;
use anyhow::{anyhow, Result};
use tracing::info;
use url::Url;

/// Manual OAuth helper:
/// 1. Build the authorization URL and print it.
/// 2. User approves and gets redirected to the redirect URI (which may fail to load).
/// 3. User pastes the full redirect URL back into the CLI.
/// 4. The `code` param is exchanged for an access + refresh token.
/// 5. The profile is fetched and stored together with the credential under the profile id.
pub fn authorize_url(cfg: &Config, state: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/authorize", cfg.auth_base.trim_end_matches('/')))?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("response_type", "code")
            .append_pair("client_id", &cfg.client_id)
            .append_pair("redirect_uri", &cfg.redirect_uri);
        if !cfg.scopes.is_empty() {
            q.append_pair("scope", &cfg.scopes.join(" "));
        }
        if let Some(s) = state {
            q.append_pair("state", s);
        }
    }
    Ok(url)
}

/// Extract the authorization code from a pasted redirect URL.
pub fn code_from_redirect(redirect: &str) -> Result<String> {
    let parsed = Url::parse(redirect.trim()).map_err(|e| anyhow!("invalid url pasted: {}", e))?;
    if let Some((_, err)) = parsed.query_pairs().find(|(k, _)| k == "error") {
        return Err(anyhow!("authorization denied: {}", err));
    }
    let code = parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .ok_or_else(|| anyhow!("no code in redirect URL"))?
        .1
        .into_owned();
    Ok(code)
}

/// Exchange `code`, fetch the profile and persist both. Returns the user key (profile id).
pub async fn complete_login<S: CredentialStore>(
    cfg: &Config,
    client: &SpotifyClient,
    store: &S,
    code: &str,
) -> Result<String> {
    let credential = client.exchange_code(code, &cfg.redirect_uri).await?;
    let profile = client.get_profile(&credential).await?;
    let user_key = profile.id.clone();

    let mut record = store.load(&user_key).await?;
    record.credential = Some(credential);
    record.profile = Some(profile);
    store.save(&user_key, &record).await?;
    info!("Stored credential for user {}", user_key);
    Ok(user_key)
}

pub async fn run_login<S: CredentialStore>(cfg: &Config, store: &S) -> Result<String> {
    if !cfg.has_client_credentials() {
        return Err(anyhow!(
            "client_id/client_secret missing (config or SPOTIFY_CLIENT_ID/SPOTIFY_CLIENT_SECRET)"
        ));
    }
    let url = authorize_url(cfg, None)?;
    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        url
    );
    println!("After authorizing, copy the full redirect URL and paste it here:");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let code = code_from_redirect(&input)?;

    let client = SpotifyClient::from_config(cfg);
    complete_login(cfg, &client, store, &code).await
}
