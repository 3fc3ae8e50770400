//! Fakes del subsistema de voz, del resolver y del canal de texto.
//!
//! Registran cada llamada en canales para que los tests esperen efectos
//! observables en lugar de dormir.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{
    bridge::CompletionHook,
    driver::Announcer,
    error::PlaybackError,
    player::{AudioPlayer, PlayRequest},
    voice::{VoiceGateway, VoiceSession},
};
use crate::sources::{ResolveError, Resolver, ResolverPool, TrackRef, TrackSet};

pub fn guild() -> GuildId {
    GuildId::new(100)
}

pub fn other_guild() -> GuildId {
    GuildId::new(101)
}

pub fn voice_channel() -> ChannelId {
    ChannelId::new(200)
}

pub fn text_channel() -> ChannelId {
    ChannelId::new(300)
}

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCall {
    Connect(ChannelId),
    Play(String),
    Stop,
    Pause,
    Resume,
    Disconnect,
}

pub struct FakeSession {
    calls: mpsc::UnboundedSender<VoiceCall>,
    hook: Mutex<Option<CompletionHook>>,
    fail_play: AtomicBool,
}

impl FakeSession {
    /// Termina el stream actual disparando el callback desde otro hilo,
    /// como hace el runtime de audio real
    pub fn finish(&self) {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            std::thread::spawn(move || hook.fire())
                .join()
                .expect("completion thread panicked");
        }
    }

    /// Copia del hook del stream actual, para dispararlo tarde
    pub fn current_hook(&self) -> Option<CompletionHook> {
        self.hook.lock().clone()
    }

    pub fn fail_next_play(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: VoiceCall) {
        let _ = self.calls.send(call);
    }
}

#[async_trait]
impl VoiceSession for FakeSession {
    async fn play(&self, stream: &str, on_complete: CompletionHook) -> Result<(), PlaybackError> {
        if self.fail_play.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::VoiceConnection("driver gone".to_string()));
        }
        *self.hook.lock() = Some(on_complete);
        self.record(VoiceCall::Play(stream.to_string()));
        Ok(())
    }

    async fn stop(&self) {
        self.record(VoiceCall::Stop);
        // Detener un stream también dispara su callback de fin
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook.fire();
        }
    }

    async fn pause(&self) -> Result<(), PlaybackError> {
        self.record(VoiceCall::Pause);
        Ok(())
    }

    async fn resume(&self) -> Result<(), PlaybackError> {
        self.record(VoiceCall::Resume);
        Ok(())
    }

    async fn disconnect(&self) {
        self.hook.lock().take();
        self.record(VoiceCall::Disconnect);
    }
}

/// Una sesión por guild, creada la primera vez que se la pide, con su
/// propio registro de llamadas
#[derive(Default)]
struct FakeGateway {
    sessions: Mutex<HashMap<GuildId, Arc<FakeSession>>>,
    calls: Mutex<HashMap<GuildId, mpsc::UnboundedReceiver<VoiceCall>>>,
}

impl FakeGateway {
    fn session(&self, guild_id: GuildId) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .entry(guild_id)
            .or_insert_with(|| {
                let (calls, rx) = mpsc::unbounded_channel();
                self.calls.lock().insert(guild_id, rx);
                Arc::new(FakeSession {
                    calls,
                    hook: Mutex::new(None),
                    fail_play: AtomicBool::new(false),
                })
            })
            .clone()
    }

    fn take_calls(&self, guild_id: GuildId) -> mpsc::UnboundedReceiver<VoiceCall> {
        self.session(guild_id);
        self.calls
            .lock()
            .remove(&guild_id)
            .expect("voice calls already taken")
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, PlaybackError> {
        let session = self.session(guild_id);
        session.record(VoiceCall::Connect(channel_id));
        Ok(session)
    }
}

/// Los avisos de error tardan más en publicarse que el resto
struct FakeAnnouncer {
    messages: mpsc::UnboundedSender<(ChannelId, String)>,
}

#[async_trait]
impl Announcer for FakeAnnouncer {
    async fn announce(&self, channel_id: ChannelId, message: String) {
        if message.starts_with('❌') {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = self.messages.send((channel_id, message));
    }
}

/// Resolver en memoria
///
/// Las consultas se registran con `with_query`; cada track `X` se encola
/// con locator `track:X` y resuelve su stream a `stream:track:X`.
#[derive(Default)]
pub struct FakeResolver {
    catalog: HashMap<String, Vec<TrackRef>>,
    broken: HashSet<String>,
    hung: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: &str, titles: &[&str]) -> Self {
        let tracks = titles
            .iter()
            .map(|title| TrackRef::new(locator(title), *title))
            .collect();
        self.catalog.insert(query.to_string(), tracks);
        self
    }

    /// La resolución de stream de este track falla
    pub fn broken(mut self, title: &str) -> Self {
        self.broken.insert(locator(title));
        self
    }

    /// La resolución de stream de este track no termina nunca
    pub fn hang(mut self, title: &str) -> Self {
        self.hung.insert(locator(title));
        self
    }

    /// Cada resolución de stream espera un permiso del semáforo
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

pub fn locator(title: &str) -> String {
    format!("track:{}", title)
}

pub fn stream(title: &str) -> String {
    format!("stream:track:{}", title)
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, query: &str, want_stream: bool) -> Result<TrackSet, ResolveError> {
        if !want_stream {
            return match self.catalog.get(query) {
                Some(tracks) if tracks.len() == 1 => Ok(TrackSet::single(tracks[0].clone())),
                Some(tracks) => Ok(TrackSet::playlist(Some(query.to_string()), tracks.clone())),
                None => Err(ResolveError::NoResults(query.to_string())),
            };
        }

        if self.hung.contains(query) {
            std::future::pending::<()>().await;
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|_| ResolveError::PoolClosed)?.forget();
        }

        if self.broken.contains(query) {
            return Err(ResolveError::Service("video unavailable".to_string()));
        }

        Ok(TrackSet::single(TrackRef::new(format!("stream:{}", query), query)))
    }
}

pub struct Harness {
    pub player: AudioPlayer,
    /// Sesión de voz de `guild()`
    pub session: Arc<FakeSession>,
    gateway: Arc<FakeGateway>,
    voice: HashMap<GuildId, mpsc::UnboundedReceiver<VoiceCall>>,
    announcements: mpsc::UnboundedReceiver<(ChannelId, String)>,
    shutdown: CancellationToken,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub fn start(resolver: FakeResolver) -> Self {
        Self::with_capacity(resolver, 100)
    }

    pub fn with_capacity(resolver: FakeResolver, max_queue_size: usize) -> Self {
        let (announce_tx, announcements) = mpsc::unbounded_channel();

        let gateway = Arc::new(FakeGateway::default());
        let session = gateway.session(guild());
        let announcer = Arc::new(FakeAnnouncer {
            messages: announce_tx,
        });
        let resolver = ResolverPool::new(Arc::new(resolver), 4, Duration::from_secs(5));

        let shutdown = CancellationToken::new();
        let (player, dispatcher) =
            AudioPlayer::start(max_queue_size, resolver, gateway.clone(), announcer, shutdown.clone());

        Self {
            player,
            session,
            gateway,
            voice: HashMap::new(),
            announcements,
            shutdown,
            dispatcher,
        }
    }

    pub fn request(query: &str) -> PlayRequest {
        Self::request_in(guild(), query)
    }

    pub fn request_in(guild_id: GuildId, query: &str) -> PlayRequest {
        PlayRequest {
            guild_id,
            query: query.to_string(),
            voice_channel: Some(voice_channel()),
            text_channel: text_channel(),
        }
    }

    pub fn session_for(&self, guild_id: GuildId) -> Arc<FakeSession> {
        self.gateway.session(guild_id)
    }

    fn calls(&mut self, guild_id: GuildId) -> &mut mpsc::UnboundedReceiver<VoiceCall> {
        let gateway = &self.gateway;
        self.voice
            .entry(guild_id)
            .or_insert_with(|| gateway.take_calls(guild_id))
    }

    pub async fn next_voice(&mut self) -> VoiceCall {
        self.next_voice_in(guild()).await
    }

    pub async fn next_voice_in(&mut self, guild_id: GuildId) -> VoiceCall {
        tokio::time::timeout(WAIT, self.calls(guild_id).recv())
            .await
            .expect("timed out waiting for a voice call")
            .expect("voice channel closed")
    }

    pub async fn next_announcement(&mut self) -> String {
        let (channel, message) = tokio::time::timeout(WAIT, self.announcements.recv())
            .await
            .expect("timed out waiting for an announcement")
            .expect("announcement channel closed");
        assert_eq!(channel, text_channel());
        message
    }

    pub fn no_pending_voice(&mut self) -> bool {
        self.no_pending_voice_in(guild())
    }

    pub fn no_pending_voice_in(&mut self, guild_id: GuildId) -> bool {
        self.calls(guild_id).try_recv().is_err()
    }

    pub async fn shutdown(self) -> AudioPlayer {
        self.shutdown.cancel();
        self.dispatcher.await.expect("dispatcher panicked");
        self.player
    }
}
