//! # File Server
//! src/lib.rs
//!
//! Servidor de archivos HTTP/1.0 multiproceso implementado desde cero
//! para demostrar conceptos de sistemas operativos: procesos, IPC,
//! sincronización entre procesos y manejo de recursos compartidos.
//!
//! ## Arquitectura
//!
//! Un proceso **Acceptor** es dueño del puerto TCP y reparte cada
//! conexión por round-robin entre N procesos **Worker**, transfiriendo el
//! file descriptor por un socket Unix (`SCM_RIGHTS`). Cada Worker atiende
//! sus conexiones con un pool de threads propio.
//!
//! El servidor está dividido en módulos especializados:
//! - `http`: Parsing y manejo del protocolo HTTP/1.0
//! - `config`: Configuración por CLI y variables de entorno
//! - `ipc`: Mensajes y canales entre Acceptor y Workers
//! - `server`: Rol Acceptor (accept, despacho, orquestación de Workers)
//! - `worker`: Rol Worker (cola de conexiones, pool de threads, handler)
//! - `limiter`: Tope global de POSTs concurrentes entre procesos
//! - `lock`: Locks de archivo para serializar escrituras
//! - `logger`: Log central de requests, una línea por request
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use file_server::config::Config;
//! use file_server::server::Server;
//!
//! let config = Config::default();
//! let mut server = Server::new(config);
//! server.run().expect("Error al iniciar servidor");
//! ```

pub mod config;
pub mod http;
pub mod ipc;
pub mod limiter;
pub mod lock;
pub mod logger;
pub mod server;
pub mod worker;
