pub mod ytdlp;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

pub use ytdlp::YtDlpResolver;

/// Un track resuelto: dónde encontrarlo y cómo mostrarlo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRef {
    pub locator: String,
    pub title: String,
}

impl TrackRef {
    pub fn new(locator: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
        }
    }
}

/// Resultado de una resolución: uno o varios tracks en orden
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSet {
    pub playlist_title: Option<String>,
    pub tracks: Vec<TrackRef>,
}

impl TrackSet {
    pub fn single(track: TrackRef) -> Self {
        Self {
            playlist_title: None,
            tracks: vec![track],
        }
    }

    pub fn playlist(title: Option<String>, tracks: Vec<TrackRef>) -> Self {
        Self {
            playlist_title: title,
            tracks,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Consume el set de una resolución con `want_stream` y devuelve la URL reproducible
    pub fn into_stream_locator(self, query: &str) -> Result<String, ResolveError> {
        self.tracks
            .into_iter()
            .next()
            .map(|track| track.locator)
            .ok_or_else(|| ResolveError::NoResults(query.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no results for `{0}`")]
    NoResults(String),
    #[error("media service error: {0}")]
    Service(String),
    #[error("could not run resolver: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected resolver output: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("resolution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("resolver pool is shut down")]
    PoolClosed,
}

/// Servicio externo de indexación de medios
///
/// `want_stream = false` devuelve metadata suficiente para encolar (puede
/// expandir playlists). `want_stream = true` devuelve exactamente un track
/// cuyo `locator` es una URL de stream reproducible directamente.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str, want_stream: bool) -> Result<TrackSet, ResolveError>;
}

/// Pool acotado de workers para resoluciones
///
/// Cada resolución corre en su propia task con un permiso del semáforo, de
/// modo que ni el contexto de dispatch ni los handlers de comandos esperan
/// una búsqueda lenta en línea, y una guild colgada no bloquea a las demás.
#[derive(Clone)]
pub struct ResolverPool {
    resolver: Arc<dyn Resolver>,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl ResolverPool {
    pub fn new(resolver: Arc<dyn Resolver>, workers: usize, timeout: Duration) -> Self {
        Self {
            resolver,
            workers: Arc::new(Semaphore::new(workers)),
            timeout,
        }
    }

    pub async fn resolve(&self, query: &str, want_stream: bool) -> Result<TrackSet, ResolveError> {
        let resolver = self.resolver.clone();
        let workers = self.workers.clone();
        let timeout = self.timeout;
        let query = query.to_string();

        let task = tokio::spawn(async move {
            let _permit = workers
                .acquire_owned()
                .await
                .map_err(|_| ResolveError::PoolClosed)?;

            debug!("🔍 Resolviendo `{}` (stream: {})", query, want_stream);
            match tokio::time::timeout(timeout, resolver.resolve(&query, want_stream)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("⏰ Timeout resolviendo `{}`", query);
                    Err(ResolveError::Timeout(timeout))
                }
            }
        });

        task.await
            .map_err(|e| ResolveError::Service(format!("resolver task failed: {}", e)))?
    }

    /// Resuelve un locator encolado a una URL de stream fresca
    pub async fn resolve_stream(&self, locator: &str) -> Result<String, ResolveError> {
        self.resolve(locator, true)
            .await?
            .into_stream_locator(locator)
    }

    pub fn close(&self) {
        self.workers.close();
    }
}

/// Único análisis de lenguaje natural: ¿es esto una URL?
pub fn is_url(query: &str) -> bool {
    Url::parse(query.trim())
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
