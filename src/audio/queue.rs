use serenity::model::id::GuildId;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

use crate::sources::TrackRef;

/// Cola de una guild: tracks pendientes en orden FIFO y si hay un ciclo de
/// reproducción en curso
#[derive(Debug, Default)]
pub struct GuildQueue {
    pending: VecDeque<TrackRef>,
    active: bool,
}

impl GuildQueue {
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Equivalente a una entrada ausente
    fn is_vacant(&self) -> bool {
        self.pending.is_empty() && !self.active
    }
}

/// Mapa guild → cola
///
/// Sin sincronización interna: el único dueño es el contexto de dispatch,
/// que lo muta desde una sola task.
#[derive(Debug)]
pub struct QueueRegistry {
    queues: HashMap<GuildId, GuildQueue>,
    max_size: usize,
}

impl QueueRegistry {
    pub fn new(max_size: usize) -> Self {
        Self {
            queues: HashMap::new(),
            max_size,
        }
    }

    /// Agrega tracks al final en el orden recibido; devuelve cuántos entraron
    pub fn enqueue_many(&mut self, guild_id: GuildId, tracks: Vec<TrackRef>) -> usize {
        let queue = self.queues.entry(guild_id).or_default();
        let available_space = self.max_size.saturating_sub(queue.pending.len());
        let to_add = tracks.len().min(available_space);

        queue.pending.extend(tracks.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola de guild {}", to_add, guild_id);
        to_add
    }

    /// Saca la cabeza de la cola (FIFO estricto)
    pub fn dequeue_one(&mut self, guild_id: GuildId) -> Option<TrackRef> {
        let next = self.queues.get_mut(&guild_id)?.pending.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola de guild {}: {}", guild_id, track.title),
            None => debug!("📭 Cola vacía para guild {}", guild_id),
        }
        next
    }

    pub fn clear(&mut self, guild_id: GuildId) {
        if let Some(queue) = self.queues.get_mut(&guild_id) {
            queue.pending.clear();
            info!("🗑️ Cola limpiada en guild {}", guild_id);
        }
        self.evict_if_vacant(guild_id);
    }

    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.queues
            .get(&guild_id)
            .is_some_and(GuildQueue::is_active)
    }

    pub fn set_active(&mut self, guild_id: GuildId, active: bool) {
        self.queues.entry(guild_id).or_default().active = active;
        self.evict_if_vacant(guild_id);
    }

    /// Títulos pendientes en orden de reproducción
    pub fn titles(&self, guild_id: GuildId) -> Vec<String> {
        self.queues
            .get(&guild_id)
            .map(|queue| queue.pending.iter().map(|track| track.title.clone()).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn get(&self, guild_id: GuildId) -> Option<&GuildQueue> {
        self.queues.get(&guild_id)
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    fn evict_if_vacant(&mut self, guild_id: GuildId) {
        if self.queues.get(&guild_id).is_some_and(GuildQueue::is_vacant) {
            self.queues.remove(&guild_id);
        }
    }
}
