use anyhow::Context;
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{is_url, ResolveError, Resolver, TrackRef, TrackSet};
use crate::config::Config;

const UNTITLED: &str = "Untitled";
const SEARCH_PREFIX: &str = "ytsearch";

/// Resolver respaldado por el ejecutable `yt-dlp`
pub struct YtDlpResolver {
    binary: String,
    audio_format: String,
    max_playlist_size: usize,
}

/// Información extraída de yt-dlp (`--dump-single-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    // Los videos no disponibles de una playlist llegan como `null`
    entries: Option<Vec<Option<YtDlpInfo>>>,
}

impl YtDlpInfo {
    fn into_queue_ref(self, fallback: &str) -> TrackRef {
        TrackRef::new(
            self.webpage_url
                .or(self.url)
                .unwrap_or_else(|| fallback.to_string()),
            self.title.unwrap_or_else(|| UNTITLED.to_string()),
        )
    }
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            audio_format: config.audio_format.clone(),
            max_playlist_size: config.max_playlist_size,
        }
    }

    /// El texto libre se envuelve como búsqueda de un solo resultado; las
    /// búsquedas ya explícitas pasan tal cual
    fn target(query: &str) -> String {
        let query = query.trim();
        if is_url(query) || is_search(query) {
            query.to_string()
        } else {
            format!("{}1:{}", SEARCH_PREFIX, query)
        }
    }

    fn args(&self, target: &str, want_stream: bool) -> Vec<String> {
        let mut args = vec!["--dump-single-json".to_string(), "--no-warnings".to_string()];

        if want_stream {
            args.extend([
                "--no-playlist".to_string(),
                "-f".to_string(),
                self.audio_format.clone(),
            ]);
        } else {
            args.extend([
                "--flat-playlist".to_string(),
                "--playlist-end".to_string(),
                self.max_playlist_size.to_string(),
            ]);
        }

        args.push("--".to_string());
        args.push(target.to_string());
        args
    }

    /// Verifica que el ejecutable exista y responda
    pub async fn version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Error al ejecutar {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("{} --version terminó con {}", self.binary, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `ytsearch:`, `ytsearch5:` o `ytsearchall:`
fn is_search(query: &str) -> bool {
    query
        .strip_prefix(SEARCH_PREFIX)
        .and_then(|rest| rest.split_once(':'))
        .is_some_and(|(count, _)| count == "all" || count.chars().all(|c| c.is_ascii_digit()))
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, query: &str, want_stream: bool) -> Result<TrackSet, ResolveError> {
        let target = Self::target(query);
        debug!("📊 yt-dlp {} (stream: {})", target, want_stream);

        let output = Command::new(&self.binary)
            .args(self.args(&target, want_stream))
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Service(error.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // Un track sin locator propio se vuelve a buscar con la consulta original
        let set = parse_track_set(&stdout, &target, query.trim(), want_stream)?;
        info!("🎵 `{}` resuelto a {} track(s)", target, set.len());
        Ok(set)
    }
}

fn parse_track_set(
    json: &str,
    target: &str,
    fallback: &str,
    want_stream: bool,
) -> Result<TrackSet, ResolveError> {
    let info: YtDlpInfo = serde_json::from_str(json)?;

    if want_stream {
        let entry = match info.entries {
            Some(entries) => entries.into_iter().flatten().next(),
            None => Some(info),
        };

        return entry
            .and_then(|entry| {
                let stream = entry.url?;
                Some(TrackSet::single(TrackRef::new(
                    stream,
                    entry.title.unwrap_or_else(|| UNTITLED.to_string()),
                )))
            })
            .ok_or_else(|| ResolveError::NoResults(target.to_string()));
    }

    let set = match info.entries {
        Some(entries) => TrackSet::playlist(
            info.title,
            entries
                .into_iter()
                .flatten()
                .map(|entry| entry.into_queue_ref(fallback))
                .collect(),
        ),
        None => TrackSet::single(info.into_queue_ref(fallback)),
    };

    if set.is_empty() {
        return Err(ResolveError::NoResults(target.to_string()));
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> YtDlpResolver {
        YtDlpResolver::new(&Config::default())
    }

    #[test]
    fn free_text_becomes_single_search() {
        assert_eq!(YtDlpResolver::target(" lofi beats "), "ytsearch1:lofi beats");
        assert_eq!(
            YtDlpResolver::target("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn metadata_args_expand_playlists_with_cap() {
        let args = resolver().args("https://example.com/list", false);
        assert!(args.contains(&"--flat-playlist".to_string()));
        assert!(args.contains(&"100".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/list");
    }

    #[test]
    fn stream_args_select_audio_format() {
        let args = resolver().args("https://example.com/v", true);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"bestaudio[abr<=96]/bestaudio".to_string()));
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn parses_single_video_metadata() {
        let json = r#"{"title": "Song", "webpage_url": "https://www.youtube.com/watch?v=a", "url": "https://cdn/a"}"#;
        let set = parse_track_set(json, "ytsearch1:q", "q", false).unwrap();
        assert_eq!(
            set.tracks,
            vec![TrackRef::new("https://www.youtube.com/watch?v=a", "Song")]
        );
    }

    #[test]
    fn parses_flat_playlist_skipping_unavailable_entries() {
        let json = r#"{
            "title": "Mix",
            "entries": [
                {"title": "One", "url": "https://www.youtube.com/watch?v=1"},
                null,
                {"url": "https://www.youtube.com/watch?v=3"}
            ]
        }"#;
        let set = parse_track_set(json, "https://list", "https://list", false).unwrap();
        assert_eq!(set.playlist_title.as_deref(), Some("Mix"));
        assert_eq!(
            set.tracks,
            vec![
                TrackRef::new("https://www.youtube.com/watch?v=1", "One"),
                TrackRef::new("https://www.youtube.com/watch?v=3", "Untitled"),
            ]
        );
    }

    #[test]
    fn entry_without_locator_falls_back_to_query() {
        let json = r#"{"title": "Bare"}"#;
        let set = parse_track_set(json, "ytsearch1:bare", "bare", false).unwrap();
        assert_eq!(set.tracks[0].locator, "bare");

        // Re-resolver el locator produce la misma búsqueda, sin doble prefijo
        assert_eq!(YtDlpResolver::target(&set.tracks[0].locator), "ytsearch1:bare");
    }

    #[test]
    fn explicit_search_is_not_wrapped_again() {
        assert_eq!(YtDlpResolver::target("ytsearch1:bare"), "ytsearch1:bare");
        assert_eq!(YtDlpResolver::target("ytsearch5:lofi"), "ytsearch5:lofi");
        assert_eq!(
            YtDlpResolver::target("ytsearch tutorial"),
            "ytsearch1:ytsearch tutorial"
        );
    }

    #[test]
    fn empty_search_has_no_results() {
        let json = r#"{"title": "nothing", "entries": []}"#;
        let err = parse_track_set(json, "ytsearch1:nothing", "nothing", false).unwrap_err();
        assert!(matches!(err, ResolveError::NoResults(_)));
    }

    #[test]
    fn stream_uses_direct_url_of_first_entry() {
        let json = r#"{"entries": [{"title": "Song", "url": "https://cdn.example.com/audio.webm"}]}"#;
        let stream = parse_track_set(json, "ytsearch1:song", "song", true)
            .unwrap()
            .into_stream_locator("ytsearch1:song")
            .unwrap();
        assert_eq!(stream, "https://cdn.example.com/audio.webm");
    }

    #[test]
    fn stream_without_url_is_an_error() {
        let json = r#"{"title": "Song", "webpage_url": "https://www.youtube.com/watch?v=a"}"#;
        assert!(matches!(
            parse_track_set(
                json,
                "https://www.youtube.com/watch?v=a",
                "https://www.youtube.com/watch?v=a",
                true
            ),
            Err(ResolveError::NoResults(_))
        ));
    }

    #[test]
    fn garbage_output_is_malformed() {
        assert!(matches!(
            parse_track_set("ERROR: nope", "ytsearch1:q", "q", false),
            Err(ResolveError::Malformed(_))
        ));
    }
}
