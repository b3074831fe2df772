//! # File Server - Entry Point
//! src/main.rs
//!
//! Punto de entrada del servidor de archivos HTTP/1.0.
//!
//! El mismo binario corre en dos roles: Acceptor (por defecto) y Worker
//! (cuando el Acceptor lo relanza con `--internal-worker-id`).

use file_server::config::Config;
use file_server::server::Server;
use file_server::worker;

fn main() {
    let config = Config::new();

    // Rol Worker: proceso hijo relanzado por el Acceptor
    if let Some(worker_id) = config.internal_worker_id {
        if let Err(e) = worker::run(&config, worker_id) {
            eprintln!("💥 Worker {} fatal error: {}", worker_id, e);
            std::process::exit(1);
        }
        return;
    }

    // Rol Acceptor
    println!("=================================");
    println!("  RedUnix HTTP/1.0 File Server");
    println!("  Principios de Sistemas Operativos");
    println!("=================================\n");

    let mut server = Server::new(config);

    // Iniciar el servidor (esto bloqueará el thread)
    if let Err(e) = server.run() {
        eprintln!("💥 Error fatal: {}", e);
        std::process::exit(1);
    }
}
