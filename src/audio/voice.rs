use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{bridge::CompletionHook, error::PlaybackError};

/// Conexión viva a un canal de voz de una guild
///
/// Las operaciones son fire-and-forget; el fin de un stream se informa solo
/// a través del `CompletionHook` entregado en `play`.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    async fn play(&self, stream: &str, on_complete: CompletionHook) -> Result<(), PlaybackError>;
    async fn stop(&self);
    async fn pause(&self) -> Result<(), PlaybackError>;
    async fn resume(&self) -> Result<(), PlaybackError>;
    async fn disconnect(&self);
}

/// Subsistema de voz: abre sesiones por guild
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, PlaybackError>;
}

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, PlaybackError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlaybackError::VoiceConnection(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Arc::new(SongbirdSession {
            manager: self.manager.clone(),
            guild_id,
            call,
            http: self.http.clone(),
            current: Mutex::new(None),
        }))
    }
}

struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    fn current(&self) -> Result<TrackHandle, PlaybackError> {
        self.current
            .lock()
            .clone()
            .ok_or(PlaybackError::NoActivePlayback)
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn play(&self, stream: &str, on_complete: CompletionHook) -> Result<(), PlaybackError> {
        let input: Input = HttpRequest::new(self.http.clone(), stream.to_string()).into();
        let handle = self.call.lock().await.play_input(input);

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackCompletion {
                        guild_id: self.guild_id,
                        hook: on_complete.clone(),
                    },
                )
                .map_err(|e| PlaybackError::VoiceConnection(e.to_string()))?;
        }

        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop() {
                debug!("El track ya había terminado en guild {}: {}", self.guild_id, e);
            }
        }
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.current()?
            .pause()
            .map_err(|e| PlaybackError::VoiceConnection(e.to_string()))
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        self.current()?
            .play()
            .map_err(|e| PlaybackError::VoiceConnection(e.to_string()))
    }

    async fn disconnect(&self) {
        self.current.lock().take();
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("Error al desconectar de voz en guild {}: {:?}", self.guild_id, e);
        }
        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
    }
}

/// Handler de songbird para fin o error de un track
///
/// Corre en los hilos de eventos de songbird, por eso solo dispara el hook.
struct TrackCompletion {
    guild_id: GuildId,
    hook: CompletionHook,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(err) = &state.playing {
                    warn!("❌ Error en track para guild {}: {:?}", self.guild_id, err);
                }
            }
        }

        self.hook.fire();
        None
    }
}
