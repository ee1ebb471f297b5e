use mockito::{Matcher, Server};
use ranking_playlist_sync::api::spotify::CatalogClient;
use ranking_playlist_sync::ranking::{parse_chart_csv, ChartFeed, ChartRanking, RankingSource};
use serde_json::json;

const CHART: &str = "\
,,,\"Note that these figures are generated using a formula that protects against any artificial inflation of chart positions.\",
Position,\"Track Name\",Artist,Streams,URL
1,\"Song, With Comma\",Band X,523004,https://open.spotify.com/track/aaa
2,Plain Song,Band Y,420001,https://open.spotify.com/track/bbb
3,\"Say \"\"Hi\"\"\",Band X,100000,https://open.spotify.com/track/ccc
broken,row
";

#[test]
fn parse_chart_skips_headers_and_short_rows() {
    let entries = parse_chart_csv(CHART);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].rank, 1);
    assert_eq!(entries[0].title, "Song, With Comma");
    assert_eq!(entries[0].artist, "Band X");
    assert_eq!(entries[0].count, 523004);
    assert_eq!(entries[0].track_id(), Some("aaa"));
    assert_eq!(entries[2].title, "Say \"Hi\"");
    assert_eq!(entries[2].track_id(), Some("ccc"));
}

#[test]
fn parse_chart_handles_crlf_and_bad_numbers() {
    let text = "note\r\nheader\r\n1,A,B,10,https://open.spotify.com/track/x\r\nx,A,B,10,https://open.spotify.com/track/y\r\n";
    let entries = parse_chart_csv(text);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, "https://open.spotify.com/track/x");
}

#[test]
fn chart_ranking_resolves_tracks_and_caches() {
    let mut server = Server::new();
    let base = server.url();

    let m_chart = server
        .mock("GET", "/chart.csv")
        .with_status(200)
        .with_header("content-type", "text/csv")
        .with_body(CHART)
        .expect(2)
        .create();
    let _m_token = server
        .mock("POST", "/api/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": "app-token", "token_type": "Bearer", "expires_in": 3600}).to_string())
        .create();
    let m_tracks = server
        .mock("GET", "/tracks")
        .match_query(Matcher::UrlEncoded("ids".into(), "aaa,bbb,ccc".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"tracks": [
                {"id": "aaa", "name": "Song, With Comma", "popularity": 90, "artists": [{"id": "x", "name": "Band X"}]},
                {"id": "bbb", "name": "Plain Song", "popularity": 80, "artists": [{"id": "y", "name": "Band Y"}, {"id": "x", "name": "Band X"}]},
                {"id": "ccc", "name": "Say Hi", "popularity": 70, "artists": [{"id": "x", "name": "Band X"}]}
            ]})
            .to_string(),
        )
        .expect(2)
        .create();

    let ranking = ChartRanking::new(
        ChartFeed::new(format!("{}/chart.csv", base)),
        CatalogClient::new("id".into(), "secret".into(), base.clone(), base),
    );
    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        let tracks = ranking.tracks(false).await.expect("tracks");
        let ids: Vec<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc"]);

        // served from cache
        let again = ranking.tracks(false).await.expect("cached tracks");
        assert_eq!(again, tracks);
        let artists = ranking.artists(false).await.expect("artists");
        let artist_ids: Vec<&str> = artists.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(artist_ids, vec!["x", "y"]);
        assert_eq!(ranking.entries(false).await.expect("entries").len(), 3);

        // forced refresh hits the feed again
        ranking.tracks(true).await.expect("refreshed tracks");
    });

    m_chart.assert();
    m_tracks.assert();
}

#[test]
fn chart_feed_error_propagates() {
    let mut server = Server::new();
    let _m = server.mock("GET", "/chart.csv").with_status(404).create();

    let feed = ChartFeed::new(format!("{}/chart.csv", server.url()));
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt.block_on(feed.fetch()).unwrap_err();
    assert!(err.to_string().contains("404"));
}
