//! # Configuración del Servidor
//! src/config.rs
//!
//! Este módulo define la configuración del servidor de archivos con soporte
//! completo para argumentos CLI y variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./file_server --port 8080 \
//!   --workers 5 \
//!   --threads 20 \
//!   --max-posts 5 \
//!   --static-root ./static
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=0.0.0.0 ./file_server
//! ```
//!
//! El mismo binario corre en dos roles: Acceptor (por defecto) y Worker
//! (cuando el Acceptor lo relanza con `--internal-worker-id`). Los flags
//! que un Worker necesita se reenvían al hijo en `worker_args()`.

use clap::Parser;
use std::path::PathBuf;

/// Configuración del servidor de archivos HTTP/1.0
#[derive(Debug, Clone, Parser)]
#[command(name = "file_server")]
#[command(about = "Servidor de archivos HTTP/1.0 multiproceso para Principios de Sistemas Operativos")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "8080", env = "HTTP_PORT")]
    pub port: u16,

    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "HTTP_HOST")]
    pub host: String,

    /// Directorio raíz de archivos estáticos (lecturas GET y subidas POST)
    #[arg(long = "static-root", default_value = "./static", env = "STATIC_ROOT")]
    pub static_root: String,

    /// Archivo de log de requests
    #[arg(long = "log-path", default_value = "./server.log", env = "LOG_PATH")]
    pub log_path: String,

    /// Directorio para los sockets Unix de IPC
    #[arg(long = "ipc-dir", default_value = "./run", env = "IPC_DIR")]
    pub ipc_dir: String,

    // === Procesos y threads ===

    /// Número de procesos Worker
    #[arg(long, default_value = "5", env = "WORKERS")]
    pub workers: usize,

    /// Tamaño del pool de threads dentro de cada Worker
    #[arg(long, default_value = "20", env = "THREADS")]
    pub threads: usize,

    /// Capacidad de la cola interna de conexiones de cada Worker
    #[arg(long = "queue-capacity", default_value = "64", env = "QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    // === Control de concurrencia ===

    /// Máximo de POSTs procesándose a la vez, global entre todos los Workers
    #[arg(long = "max-posts", default_value = "5", env = "MAX_POSTS")]
    pub max_posts: usize,

    /// Timeout en milisegundos para adquirir el lock de un archivo
    #[arg(long = "lock-timeout-ms", default_value = "5000", env = "LOCK_TIMEOUT_MS")]
    pub lock_timeout_ms: u64,

    /// Milisegundos que un POST retiene su ticket antes de responder
    /// (0 = sin retención; el original dormía 2 s para hacer visible el límite)
    #[arg(long = "post-hold-ms", default_value = "0", env = "POST_HOLD_MS")]
    pub post_hold_ms: u64,

    // === Rol interno ===

    /// Id de Worker cuando el binario corre como proceso hijo (uso interno)
    #[arg(long = "internal-worker-id", hide = true)]
    pub internal_worker_id: Option<usize>,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use clap::Parser;
    /// use file_server::config::Config;
    ///
    /// let config = Config::parse_from(["file_server"]);
    /// assert_eq!(config.address(), "127.0.0.1:8080");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Indica si el binario corre como proceso Worker
    pub fn is_worker(&self) -> bool {
        self.internal_worker_id.is_some()
    }

    /// Socket de reportes (Worker → Acceptor)
    pub fn report_sock(&self) -> PathBuf {
        PathBuf::from(&self.ipc_dir).join("report.sock")
    }

    /// Socket del limitador de POSTs (servido por el Acceptor)
    pub fn limiter_sock(&self) -> PathBuf {
        PathBuf::from(&self.ipc_dir).join("limiter.sock")
    }

    /// Socket de despacho de un Worker (Acceptor → Worker)
    pub fn worker_sock(&self, worker_id: usize) -> PathBuf {
        PathBuf::from(&self.ipc_dir).join(format!("worker-{}.sock", worker_id))
    }

    /// Flags que el Acceptor reenvía al relanzarse como Worker
    ///
    /// El hijo vuelve a parsear un `Config`, así que solo hace falta
    /// reenviar los valores que difieren de los defaults del Worker.
    pub fn worker_args(&self, worker_id: usize) -> Vec<String> {
        vec![
            "--internal-worker-id".to_string(), worker_id.to_string(),
            "--static-root".to_string(), self.static_root.clone(),
            "--ipc-dir".to_string(), self.ipc_dir.clone(),
            "--threads".to_string(), self.threads.to_string(),
            "--queue-capacity".to_string(), self.queue_capacity.to_string(),
            "--lock-timeout-ms".to_string(), self.lock_timeout_ms.to_string(),
            "--post-hold-ms".to_string(), self.post_hold_ms.to_string(),
        ]
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("Workers must be >= 1".to_string());
        }
        if self.threads == 0 {
            return Err("Threads per worker must be >= 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be >= 1".to_string());
        }
        if self.max_posts == 0 {
            return Err("Max concurrent POSTs must be >= 1".to_string());
        }
        if self.lock_timeout_ms == 0 {
            return Err("Lock timeout must be > 0".to_string());
        }

        Ok(())
    }

    /// Imprime un resumen de la configuración
    pub fn print_summary(&self) {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║        RedUnix HTTP/1.0 File Server Configuration            ║");
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("🌐 Network:");
        println!("   Address:      {}", self.address());
        println!("   Static root:  {}", self.static_root);
        println!("   Log file:     {}", self.log_path);
        println!("   IPC dir:      {}", self.ipc_dir);
        println!();
        println!("👥 Concurrency:");
        println!("   Workers:      {} processes", self.workers);
        println!("   Threads:      {} per worker", self.threads);
        println!("   Queue:        {} connections per worker", self.queue_capacity);
        println!("   Max POSTs:    {} (global)", self.max_posts);
        println!();
        println!("🔒 File locking:");
        println!("   Lock timeout: {} ms", self.lock_timeout_ms);

        if self.post_hold_ms > 0 {
            println!("   POST hold:    {} ms (testing)", self.post_hold_ms);
        }

        println!();
        println!("═══════════════════════════════════════════════════════════════");
        println!();
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            static_root: "./static".to_string(),
            log_path: "./server.log".to_string(),
            ipc_dir: "./run".to_string(),
            workers: 5,
            threads: 20,
            queue_capacity: 64,
            max_posts: 5,
            lock_timeout_ms: 5_000,
            post_hold_ms: 0,
            internal_worker_id: None,
        }
    }
}
