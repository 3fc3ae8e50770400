use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    bridge::{DispatchBridge, DriverEvent},
    driver::{Announcer, Command, Enqueued, GuildStatus, PlaybackDriver, Reply},
    error::PlaybackError,
    voice::VoiceGateway,
};
use crate::sources::{ResolveError, ResolverPool, TrackRef};

/// Pedido de reproducción tal como llega desde un comando
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub guild_id: GuildId,
    pub query: String,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: ChannelId,
}

/// Resultado de un `play`: qué entró a la cola y si arrancó un episodio nuevo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOutcome {
    pub playlist_title: Option<String>,
    pub tracks: Vec<TrackRef>,
    pub dropped: usize,
    pub started: bool,
}

/// Fachada para la capa de comandos
///
/// Cada operación viaja como comando al contexto de dispatch y espera su
/// respuesta; la única espera larga es la resolución de metadata de `play`,
/// que corre en el pool de resolvers.
#[derive(Clone)]
pub struct AudioPlayer {
    bridge: DispatchBridge,
    resolver: ResolverPool,
    gateway: Arc<dyn VoiceGateway>,
}

impl AudioPlayer {
    /// Levanta el contexto de dispatch y devuelve la fachada junto a su task
    pub fn start(
        max_queue_size: usize,
        resolver: ResolverPool,
        gateway: Arc<dyn VoiceGateway>,
        announcer: Arc<dyn Announcer>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (bridge, rx) = DispatchBridge::channel();
        let driver = PlaybackDriver::new(max_queue_size, resolver.clone(), announcer, bridge.clone());
        let dispatcher = tokio::spawn(driver.run(rx, shutdown));

        let player = Self {
            bridge,
            resolver,
            gateway,
        };
        (player, dispatcher)
    }

    pub async fn play(&self, request: PlayRequest) -> Result<PlayOutcome, PlaybackError> {
        let PlayRequest {
            guild_id,
            query,
            voice_channel,
            text_channel,
        } = request;

        let voice_channel = voice_channel.ok_or(PlaybackError::NotInVoiceChannel)?;

        let set = self.resolver.resolve(&query, false).await?;
        if set.is_empty() {
            return Err(ResolveError::NoResults(query).into());
        }

        let session = self.gateway.connect(guild_id, voice_channel).await?;

        let tracks = set.tracks.clone();
        let Enqueued {
            added,
            dropped,
            started,
        } = self
            .request(guild_id, |reply| Command::Enqueue {
                tracks,
                session,
                voice_channel,
                text_channel,
                reply,
            })
            .await?;

        info!(
            "🎶 {} canciones encoladas en guild {} ({} descartadas, inicio: {})",
            added, guild_id, dropped, started
        );

        let mut tracks = set.tracks;
        tracks.truncate(added);

        Ok(PlayOutcome {
            playlist_title: set.playlist_title,
            tracks,
            dropped,
            started,
        })
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<TrackRef, PlaybackError> {
        self.request(guild_id, |reply| Command::Skip { reply }).await
    }

    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(guild_id, |reply| Command::Stop { reply }).await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(guild_id, |reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<(), PlaybackError> {
        self.request(guild_id, |reply| Command::Resume { reply }).await
    }

    /// Títulos pendientes en orden de reproducción
    pub async fn queue(&self, guild_id: GuildId) -> Result<Vec<String>, PlaybackError> {
        Ok(self.status(guild_id).await?.pending)
    }

    pub async fn status(&self, guild_id: GuildId) -> Result<GuildStatus, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.bridge.submit(guild_id, Command::Status { reply })?;
        rx.await.map_err(|_| PlaybackError::DispatcherClosed)
    }

    /// El bot salió de un canal de voz; `channel_id` es el canal que dejó,
    /// si el gateway lo informa
    pub fn connection_lost(&self, guild_id: GuildId, channel_id: Option<ChannelId>) {
        self.bridge
            .schedule(guild_id, DriverEvent::ConnectionLost { channel_id });
    }

    async fn request<T>(
        &self,
        guild_id: GuildId,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PlaybackError> {
        let (reply, rx) = oneshot::channel();
        self.bridge.submit(guild_id, command(reply))?;
        rx.await.map_err(|_| PlaybackError::DispatcherClosed)?
    }
}
