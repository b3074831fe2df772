//! # Proceso Acceptor
//! src/server/tcp.rs
//!
//! El Acceptor es el proceso padre y único dueño del puerto TCP. En el
//! arranque:
//!
//! 1. Levanta el logger central y el limitador global de POSTs.
//! 2. Escucha en `report.sock` y relanza el binario N veces como Workers
//!    (`--internal-worker-id`).
//! 3. Espera el `Hello` de cada Worker y recién entonces conecta su canal
//!    de despacho: el rendezvous garantiza que nunca se despacha a un
//!    socket que todavía no existe.
//! 4. Acepta conexiones TCP y las reparte por round-robin, transfiriendo
//!    el fd; su propia copia se cierra al despachar.
//!
//! Los reportes de los Workers llegan por `report.sock` y se reenvían al
//! logger; el EOF de ese canal es la señal de que un Worker murió.

use crate::config::Config;
use crate::http::{Response, StatusCode};
use crate::ipc::{CompletionReport, Hello};
use crate::limiter::PostLimiter;
use crate::logger::RequestLog;
use crate::server::dispatcher::{Dispatcher, WorkerHandle};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::process::{Child, Command};
use std::thread;

/// Servidor de archivos multiproceso (rol Acceptor)
pub struct Server {
    config: Config,
    children: Vec<Child>,
}

impl Server {
    /// Crea el servidor con la configuración dada
    pub fn new(config: Config) -> Self {
        Self {
            config,
            children: Vec::new(),
        }
    }

    /// Corre el Acceptor hasta que no queden Workers vivos
    pub fn run(&mut self) -> io::Result<()> {
        self.config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        std::fs::create_dir_all(&self.config.ipc_dir)?;
        std::fs::create_dir_all(&self.config.static_root)?;

        self.config.print_summary();

        // Servicios centrales: log y limitador viven en este proceso
        let log = RequestLog::start(Path::new(&self.config.log_path))?;
        let _limiter = PostLimiter::start(&self.config.limiter_sock(), self.config.max_posts)?;

        // El canal de reportes se escucha antes de lanzar a los hijos
        let report_sock = self.config.report_sock();
        if report_sock.exists() {
            std::fs::remove_file(&report_sock)?;
        }
        let report_listener = UnixListener::bind(&report_sock)?;

        self.spawn_workers()?;
        let dispatcher = self.rendezvous(&report_listener, &log)?;

        // Recién ahora se toma el puerto: todos los Workers están listos
        let listener = TcpListener::bind(self.config.address())?;
        println!(
            "[Acceptor] ✅ Listening on {} with {} workers",
            self.config.address(),
            self.config.workers
        );

        let result = self.accept_loop(&listener, &dispatcher);

        println!("[Acceptor] 🔒 Shutting down workers");
        dispatcher.shutdown_all();
        for child in &mut self.children {
            let _ = child.wait();
        }

        result
    }

    /// Relanza el binario una vez por Worker
    fn spawn_workers(&mut self) -> io::Result<()> {
        let exe = std::env::current_exe()?;

        for worker_id in 0..self.config.workers {
            let child = Command::new(&exe)
                .args(self.config.worker_args(worker_id))
                .spawn()?;
            println!(
                "[Acceptor] 🚀 Spawned worker {} (pid {})",
                worker_id,
                child.id()
            );
            self.children.push(child);
        }

        Ok(())
    }

    /// Espera el `Hello` de cada Worker y arma el despachador
    ///
    /// Por cada Worker registrado queda un thread leyendo sus reportes y
    /// reenviándolos al logger.
    fn rendezvous(
        &self,
        report_listener: &UnixListener,
        log: &RequestLog,
    ) -> io::Result<Dispatcher> {
        let mut handles: Vec<WorkerHandle> = Vec::with_capacity(self.config.workers);

        for _ in 0..self.config.workers {
            let (stream, _) = report_listener.accept()?;
            let mut reader = BufReader::new(stream);

            let mut line = String::new();
            reader.read_line(&mut line)?;
            let hello: Hello = serde_json::from_str(line.trim())?;

            // El Worker ya creó su socket de despacho antes del Hello
            let handle =
                WorkerHandle::connect(hello.worker_id, &self.config.worker_sock(hello.worker_id))?;
            handles.push(handle);

            let log = log.clone();
            let worker_id = hello.worker_id;
            thread::spawn(move || report_reader(reader, log, worker_id));

            println!("[Acceptor] ✅ Worker {} registered", worker_id);
        }

        // El orden de registro es el orden de llegada; los turnos van por
        // id para que el reparto sea estable
        handles.sort_by_key(|h| h.id());

        Ok(Dispatcher::new(handles))
    }

    /// Loop principal: aceptar y despachar
    ///
    /// Sale con error solo cuando ya no queda ningún Worker vivo.
    fn accept_loop(&self, listener: &TcpListener, dispatcher: &Dispatcher) -> io::Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(conn) => {
                    let peer = conn
                        .peer_addr()
                        .map(|addr| addr.to_string())
                        .unwrap_or_else(|_| "unknown".to_string());

                    match dispatcher.dispatch(&conn, &peer) {
                        // El fd ya viajó; el drop de `conn` cierra la
                        // copia del Acceptor y el Worker queda como único
                        // dueño de la conexión
                        Ok(_worker_id) => {}
                        Err(e) => {
                            // Sin Workers no hay servicio: avisar al
                            // cliente y apagar
                            reject_unavailable(conn);
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    eprintln!("[Acceptor] ❌ Accept failed: {}", e);
                }
            }
        }

        Ok(())
    }
}

/// Lee reportes de un Worker hasta el EOF y los reenvía al logger
fn report_reader(reader: BufReader<UnixStream>, log: RequestLog, worker_id: usize) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        match serde_json::from_str::<CompletionReport>(&line) {
            Ok(report) => log.record(report),
            Err(e) => {
                eprintln!(
                    "[Acceptor] ⚠️  Malformed report from worker {}: {}",
                    worker_id, e
                );
            }
        }
    }
    eprintln!("[Acceptor] ⚠️  Report channel from worker {} closed", worker_id);
}

/// Último recurso: responder 503 cuando no hay Workers que despachen
fn reject_unavailable(mut conn: TcpStream) {
    let response = Response::error(StatusCode::ServiceUnavailable, "Server is shutting down")
        .with_header("Connection", "close");
    let _ = conn.write_all(&response.to_bytes());
    let _ = conn.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_reject_unavailable_writes_503() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (conn, _) = listener.accept().unwrap();

        reject_unavailable(conn);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.0 503 Service Unavailable\r\n"));
    }

    #[test]
    fn test_report_reader_forwards_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("server.log");
        let log = RequestLog::start(&log_path).unwrap();

        let (mut tx, rx) = UnixStream::pair().unwrap();
        let reader = BufReader::new(rx);
        let handle = thread::spawn(move || report_reader(reader, log, 1));

        let report = CompletionReport {
            worker_id: 1,
            method: "GET".to_string(),
            path: "/x.txt".to_string(),
            status: 200,
            timestamp: "2024-01-01 12:00:00".to_string(),
        };
        crate::ipc::write_json_line(&mut tx, &report).unwrap();
        drop(tx); // EOF termina el thread lector

        handle.join().unwrap();

        // El logger es asíncrono: esperar a que la línea aterrice
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let contents = std::fs::read_to_string(&log_path).unwrap_or_default();
            if contents.contains("Worker 1 - GET /x.txt - Status: 200") {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "log line never appeared");
            thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}
