//! # Módulo del Acceptor
//! src/server/mod.rs
//!
//! Este módulo implementa el rol Acceptor del servidor:
//! 1. Lanza y registra los procesos Worker
//! 2. Acepta conexiones TCP en el puerto configurado
//! 3. Las reparte por round-robin transfiriendo el file descriptor
//! 4. Centraliza el log y el limitador global de POSTs

pub mod dispatcher;
pub mod tcp;

// Re-exportar para facilitar el uso
pub use dispatcher::{Dispatcher, WorkerHandle};
pub use tcp::Server;
