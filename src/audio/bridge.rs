use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc;
use tracing::debug;

use super::{driver::Command, error::PlaybackError};
use crate::sources::{ResolveError, TrackRef};

/// Eventos que hacen avanzar la máquina de estados de una guild
#[derive(Debug)]
pub enum DriverEvent {
    /// Terminó la resolución de stream del track sacado de la cola
    StreamResolved {
        ticket: u64,
        track: TrackRef,
        result: Result<String, ResolveError>,
    },
    /// El stream terminó: natural, con error o detenido
    PlaybackFinished { ticket: u64 },
    /// El bot quedó fuera de voz; `channel_id` es el canal que dejó
    ConnectionLost { channel_id: Option<ChannelId> },
}

/// Mensaje hacia el contexto de dispatch
#[derive(Debug)]
pub enum Dispatch {
    Command { guild_id: GuildId, command: Command },
    Event { guild_id: GuildId, event: DriverEvent },
}

/// Puente hacia el contexto de dispatch
///
/// `schedule` es síncrono y puede llamarse desde cualquier hilo, incluidos
/// los hilos de eventos de songbird. Todo lo enviado se procesa en orden en
/// la única task que posee el estado de las colas.
#[derive(Debug, Clone)]
pub struct DispatchBridge {
    tx: mpsc::UnboundedSender<Dispatch>,
}

impl DispatchBridge {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Encola un evento para la guild; no hace nada si el dispatch ya terminó
    pub fn schedule(&self, guild_id: GuildId, event: DriverEvent) {
        if let Err(err) = self.tx.send(Dispatch::Event { guild_id, event }) {
            debug!(
                "Contexto de dispatch cerrado, descartando evento para guild {}: {:?}",
                guild_id, err.0
            );
        }
    }

    pub(crate) fn submit(&self, guild_id: GuildId, command: Command) -> Result<(), PlaybackError> {
        self.tx
            .send(Dispatch::Command { guild_id, command })
            .map_err(|_| PlaybackError::DispatcherClosed)
    }
}

/// Callback de fin de reproducción entregado a la sesión de voz
///
/// Su única acción es pasar un evento al puente; nunca toca el estado.
#[derive(Debug, Clone)]
pub struct CompletionHook {
    bridge: DispatchBridge,
    guild_id: GuildId,
    ticket: u64,
}

impl CompletionHook {
    pub fn new(bridge: DispatchBridge, guild_id: GuildId, ticket: u64) -> Self {
        Self {
            bridge,
            guild_id,
            ticket,
        }
    }

    pub fn fire(&self) {
        self.bridge.schedule(
            self.guild_id,
            DriverEvent::PlaybackFinished {
                ticket: self.ticket,
            },
        );
    }
}
