//! # Audio Module
//!
//! Colas por guild y reproducción secuencial en canales de voz.
//!
//! ## Architecture
//!
//! ### [`driver`] - Contexto de dispatch
//! - Una sola task dueña de todas las colas y del estado por guild
//! - Máquina de estados Idle → Resolving → Playing → Advancing → Draining
//! - Descarta eventos obsoletos por ticket
//!
//! ### [`bridge`] - Puente de eventos
//! - Canal hacia el contexto de dispatch, usable desde cualquier hilo
//! - `CompletionHook` para los callbacks de fin de track de songbird
//!
//! ### [`queue`] - Colas
//! - FIFO estricto por guild, con capacidad máxima
//!
//! ### [`voice`] - Voz
//! - Conexiones de songbird detrás de `VoiceGateway` / `VoiceSession`
//!
//! ### [`player`] - Fachada
//! - Lo que usan los handlers de comandos: `play`, `skip`, `stop`, `pause`,
//!   `resume`, `queue`, `status`

pub mod bridge;
pub mod driver;
pub mod error;
pub mod player;
pub mod queue;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
