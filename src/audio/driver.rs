use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    bridge::{CompletionHook, Dispatch, DispatchBridge, DriverEvent},
    error::PlaybackError,
    queue::QueueRegistry,
    voice::VoiceSession,
};
use crate::sources::{ResolverPool, TrackRef};

/// Publica mensajes en el canal de texto que originó la reproducción
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, channel_id: ChannelId, message: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Playing,
    Advancing,
    Draining,
}

/// Foto del estado de una guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildStatus {
    pub phase: Phase,
    pub active: bool,
    pub paused: bool,
    pub now_playing: Option<TrackRef>,
    pub pending: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub added: usize,
    pub dropped: usize,
    pub started: bool,
}

pub type Reply<T> = oneshot::Sender<Result<T, PlaybackError>>;

pub enum Command {
    Enqueue {
        tracks: Vec<TrackRef>,
        session: Arc<dyn VoiceSession>,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        reply: Reply<Enqueued>,
    },
    Skip { reply: Reply<TrackRef> },
    Stop { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Status { reply: oneshot::Sender<GuildStatus> },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Enqueue {
                tracks,
                voice_channel,
                text_channel,
                ..
            } => f
                .debug_struct("Enqueue")
                .field("tracks", &tracks.len())
                .field("voice_channel", voice_channel)
                .field("text_channel", text_channel)
                .finish(),
            Command::Skip { .. } => f.write_str("Skip"),
            Command::Stop { .. } => f.write_str("Stop"),
            Command::Pause { .. } => f.write_str("Pause"),
            Command::Resume { .. } => f.write_str("Resume"),
            Command::Status { .. } => f.write_str("Status"),
        }
    }
}

struct GuildPlayback {
    phase: Phase,
    ticket: u64,
    session: Option<Arc<dyn VoiceSession>>,
    voice_channel: ChannelId,
    text_channel: ChannelId,
    now_playing: Option<TrackRef>,
    paused: bool,
}

impl GuildPlayback {
    fn new(voice_channel: ChannelId, text_channel: ChannelId) -> Self {
        Self {
            phase: Phase::Idle,
            ticket: 0,
            session: None,
            voice_channel,
            text_channel,
            now_playing: None,
            paused: false,
        }
    }

    fn transition(&mut self, guild_id: GuildId, phase: Phase) {
        debug!("🎛️ Guild {}: {:?} → {:?}", guild_id, self.phase, phase);
        self.phase = phase;
    }
}

/// Máquina de estados de reproducción de todas las guilds
///
/// Corre como una única task: es la dueña exclusiva del `QueueRegistry` y
/// del estado por guild, y procesa comandos y eventos estrictamente en el
/// orden en que llegan por el `DispatchBridge`.
///
/// Cada episodio Resolving/Playing recibe un ticket nuevo; los eventos con un
/// ticket viejo (callbacks tardíos después de `stop`, un par Error + End del
/// mismo track) se descartan, así que por guild hay a lo sumo un avance en
/// vuelo.
///
/// `leaving` guarda las guilds que desconectamos nosotros: Discord confirma
/// esa salida con un `ConnectionLost` que llega tarde y no debe drenar un
/// episodio nuevo.
pub struct PlaybackDriver {
    registry: QueueRegistry,
    guilds: HashMap<GuildId, GuildPlayback>,
    leaving: HashSet<GuildId>,
    resolver: ResolverPool,
    announcements: mpsc::UnboundedSender<(ChannelId, String)>,
    bridge: DispatchBridge,
    next_ticket: u64,
}

impl PlaybackDriver {
    pub fn new(
        max_queue_size: usize,
        resolver: ResolverPool,
        announcer: Arc<dyn Announcer>,
        bridge: DispatchBridge,
    ) -> Self {
        // Un solo publicador: los avisos salen en el orden en que se emiten
        let (announcements, mut pending) = mpsc::unbounded_channel::<(ChannelId, String)>();
        tokio::spawn(async move {
            while let Some((channel_id, message)) = pending.recv().await {
                announcer.announce(channel_id, message).await;
            }
        });

        Self {
            registry: QueueRegistry::new(max_queue_size),
            guilds: HashMap::new(),
            leaving: HashSet::new(),
            resolver,
            announcements,
            bridge,
            next_ticket: 0,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Dispatch>, shutdown: CancellationToken) {
        info!("🎛️ Contexto de dispatch iniciado");

        loop {
            let dispatch = tokio::select! {
                _ = shutdown.cancelled() => break,
                dispatch = rx.recv() => match dispatch {
                    Some(dispatch) => dispatch,
                    None => break,
                },
            };

            match dispatch {
                Dispatch::Command { guild_id, command } => {
                    debug!("📝 {:?} en guild {}", command, guild_id);
                    self.handle_command(guild_id, command).await;
                }
                Dispatch::Event { guild_id, event } => self.handle_event(guild_id, event).await,
            }
        }

        info!("🛑 Contexto de dispatch detenido");
    }

    async fn handle_command(&mut self, guild_id: GuildId, command: Command) {
        match command {
            Command::Enqueue {
                tracks,
                session,
                voice_channel,
                text_channel,
                reply,
            } => {
                let result = self.enqueue(guild_id, tracks, session, voice_channel, text_channel);
                let start = matches!(result, Ok(Enqueued { started: true, .. }));
                let _ = reply.send(result);

                if start {
                    self.advance(guild_id).await;
                }
            }
            Command::Skip { reply } => {
                let _ = reply.send(self.skip(guild_id).await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop(guild_id).await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.set_paused(guild_id, true).await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.set_paused(guild_id, false).await);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status(guild_id));
            }
        }
    }

    async fn handle_event(&mut self, guild_id: GuildId, event: DriverEvent) {
        match event {
            DriverEvent::StreamResolved {
                ticket,
                track,
                result,
            } => {
                if !self.is_current(guild_id, Phase::Resolving, ticket) {
                    debug!("Resolución obsoleta para guild {} (ticket {})", guild_id, ticket);
                    return;
                }

                match result {
                    Ok(stream) => self.start_playback(guild_id, ticket, track, &stream).await,
                    Err(err) => {
                        warn!("❌ No se pudo resolver {} en guild {}: {}", track.title, guild_id, err);
                        self.announce(
                            guild_id,
                            format!("❌ Error fetching audio for **{}**: {}", track.title, err),
                        );
                        self.set_phase(guild_id, Phase::Advancing);
                        self.advance(guild_id).await;
                    }
                }
            }
            DriverEvent::PlaybackFinished { ticket } => {
                if !self.is_current(guild_id, Phase::Playing, ticket) {
                    debug!("Fin de track obsoleto para guild {} (ticket {})", guild_id, ticket);
                    return;
                }

                if let Some(playback) = self.guilds.get_mut(&guild_id) {
                    playback.now_playing = None;
                    playback.paused = false;
                }
                self.set_phase(guild_id, Phase::Advancing);
                self.advance(guild_id).await;
            }
            DriverEvent::ConnectionLost { channel_id } => {
                if self.leaving.remove(&guild_id) {
                    debug!("Confirmación de nuestra propia salida de voz en guild {}", guild_id);
                    return;
                }

                let Some(playback) = self.guilds.get(&guild_id) else {
                    return;
                };
                if channel_id.is_some_and(|channel_id| channel_id != playback.voice_channel) {
                    debug!(
                        "Salida de un canal ajeno ({:?}) en guild {}, ignorada",
                        channel_id, guild_id
                    );
                    return;
                }

                warn!("🔌 Conexión de voz perdida en guild {}", guild_id);
                self.teardown(guild_id, false).await;
            }
        }
    }

    fn enqueue(
        &mut self,
        guild_id: GuildId,
        tracks: Vec<TrackRef>,
        session: Arc<dyn VoiceSession>,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<Enqueued, PlaybackError> {
        let requested = tracks.len();
        let added = self.registry.enqueue_many(guild_id, tracks);
        if added == 0 {
            return Err(PlaybackError::QueueFull(self.registry.capacity()));
        }

        let started = !self.registry.is_active(guild_id);
        let playback = self
            .guilds
            .entry(guild_id)
            .or_insert_with(|| GuildPlayback::new(voice_channel, text_channel));

        // La sesión del episodio en curso se conserva
        if playback.session.is_none() {
            playback.session = Some(session);
            playback.voice_channel = voice_channel;
        }

        if started {
            playback.text_channel = text_channel;
            self.registry.set_active(guild_id, true);
        }

        Ok(Enqueued {
            added,
            dropped: requested - added,
            started,
        })
    }

    /// Saca un solo track y lo manda a resolver; con la cola vacía, drena
    async fn advance(&mut self, guild_id: GuildId) {
        let Some(track) = self.registry.dequeue_one(guild_id) else {
            self.drain(guild_id).await;
            return;
        };

        let Some(playback) = self.guilds.get_mut(&guild_id) else {
            warn!("Guild {} activa sin estado de reproducción", guild_id);
            self.drain(guild_id).await;
            return;
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        playback.ticket = ticket;
        playback.now_playing = None;
        playback.paused = false;
        playback.transition(guild_id, Phase::Resolving);

        info!("🔍 Resolviendo stream de {} en guild {}", track.title, guild_id);

        let resolver = self.resolver.clone();
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            let result = resolver.resolve_stream(&track.locator).await;
            bridge.schedule(
                guild_id,
                DriverEvent::StreamResolved {
                    ticket,
                    track,
                    result,
                },
            );
        });
    }

    async fn start_playback(&mut self, guild_id: GuildId, ticket: u64, track: TrackRef, stream: &str) {
        let Some(session) = self.guilds.get(&guild_id).and_then(|p| p.session.clone()) else {
            warn!("Guild {} sin sesión de voz", guild_id);
            self.drain(guild_id).await;
            return;
        };

        let hook = CompletionHook::new(self.bridge.clone(), guild_id, ticket);
        match session.play(stream, hook).await {
            Ok(()) => {
                info!("🎵 Reproduciendo: {} en guild {}", track.title, guild_id);
                self.announce(guild_id, format!("🎵 Now playing: **{}**", track.title));

                if let Some(playback) = self.guilds.get_mut(&guild_id) {
                    playback.now_playing = Some(track);
                    playback.paused = false;
                    playback.transition(guild_id, Phase::Playing);
                }
            }
            Err(err) => {
                // Un track que no arranca es un track malo: se pasa al siguiente
                warn!("❌ Error de voz en guild {}: {}", guild_id, err);
                self.announce(guild_id, format!("❌ Could not play **{}**: {}", track.title, err));
                self.set_phase(guild_id, Phase::Advancing);
                self.advance(guild_id).await;
            }
        }
    }

    /// Libera la conexión de voz y deja la guild en Idle
    async fn drain(&mut self, guild_id: GuildId) {
        self.teardown(guild_id, true).await;
    }

    /// `self_initiated` indica si Discord todavía va a confirmar la salida
    async fn teardown(&mut self, guild_id: GuildId, self_initiated: bool) {
        let session = self.guilds.remove(&guild_id).and_then(|mut playback| {
            playback.transition(guild_id, Phase::Draining);
            playback.session
        });

        if let Some(session) = session {
            session.disconnect().await;
            if self_initiated {
                self.leaving.insert(guild_id);
            }
        }

        self.registry.clear(guild_id);
        self.registry.set_active(guild_id, false);
        info!("⏹️ Reproducción terminada en guild {}", guild_id);
    }

    async fn skip(&mut self, guild_id: GuildId) -> Result<TrackRef, PlaybackError> {
        let playback = self
            .guilds
            .get(&guild_id)
            .filter(|playback| playback.phase == Phase::Playing)
            .ok_or(PlaybackError::NoActivePlayback)?;

        let skipped = playback
            .now_playing
            .clone()
            .ok_or(PlaybackError::NoActivePlayback)?;

        // El callback de fin de track es el que hace avanzar la cola
        if let Some(session) = playback.session.clone() {
            session.stop().await;
        }

        info!("⏭️ Saltado {} en guild {}", skipped.title, guild_id);
        Ok(skipped)
    }

    async fn stop(&mut self, guild_id: GuildId) -> Result<(), PlaybackError> {
        let session = self.guilds.get(&guild_id).and_then(|p| p.session.clone());
        if session.is_none() && !self.registry.is_active(guild_id) {
            return Err(PlaybackError::NoActivePlayback);
        }

        self.registry.clear(guild_id);
        if let Some(session) = session {
            session.stop().await;
        }
        self.drain(guild_id).await;

        Ok(())
    }

    async fn set_paused(&mut self, guild_id: GuildId, paused: bool) -> Result<(), PlaybackError> {
        let playback = self
            .guilds
            .get_mut(&guild_id)
            .filter(|playback| playback.phase == Phase::Playing)
            .ok_or(PlaybackError::NoActivePlayback)?;

        match (playback.paused, paused) {
            (true, true) => return Err(PlaybackError::AlreadyPaused),
            (false, false) => return Err(PlaybackError::AlreadyPlaying),
            _ => {}
        }

        let session = playback
            .session
            .clone()
            .ok_or(PlaybackError::NoActivePlayback)?;

        if paused {
            session.pause().await?;
            info!("⏸️ Reproducción pausada en guild {}", guild_id);
        } else {
            session.resume().await?;
            info!("▶️ Reproducción reanudada en guild {}", guild_id);
        }

        playback.paused = paused;
        Ok(())
    }

    fn status(&self, guild_id: GuildId) -> GuildStatus {
        let playback = self.guilds.get(&guild_id);

        GuildStatus {
            phase: playback.map_or(Phase::Idle, |p| p.phase),
            active: self.registry.is_active(guild_id),
            paused: playback.is_some_and(|p| p.paused),
            now_playing: playback.and_then(|p| p.now_playing.clone()),
            pending: self.registry.titles(guild_id),
        }
    }

    fn is_current(&self, guild_id: GuildId, phase: Phase, ticket: u64) -> bool {
        self.guilds
            .get(&guild_id)
            .is_some_and(|p| p.phase == phase && p.ticket == ticket)
    }

    fn set_phase(&mut self, guild_id: GuildId, phase: Phase) {
        if let Some(playback) = self.guilds.get_mut(&guild_id) {
            playback.transition(guild_id, phase);
        }
    }

    /// Los envíos a Discord no bloquean el contexto de dispatch; salen en orden
    fn announce(&self, guild_id: GuildId, message: String) {
        let Some(channel_id) = self.guilds.get(&guild_id).map(|p| p.text_channel) else {
            return;
        };

        if self.announcements.send((channel_id, message)).is_err() {
            debug!("Publicador de avisos cerrado para guild {}", guild_id);
        }
    }
}
