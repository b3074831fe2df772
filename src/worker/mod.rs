//! # Proceso Worker
//! src/worker/mod.rs
//!
//! Un Worker es un proceso hijo del Acceptor. Su ciclo de vida:
//!
//! 1. Crea su socket de despacho (`worker-N.sock`) y se conecta al canal
//!    de reportes, donde se registra con un `Hello`.
//! 2. Lanza su pool de threads alimentado por una [`ConnectionQueue`]
//!    acotada.
//! 3. Recibe conexiones por el canal de despacho y las encola; si la cola
//!    está llena responde 503 él mismo, sin encolar.
//! 4. Cada request atendido produce un `CompletionReport` que viaja de
//!    vuelta al Acceptor para el log central.
//!
//! El Worker termina cuando recibe un frame `Shutdown` o cuando detecta
//! que el Acceptor murió (el canal de reportes se rompe).

pub mod handler;
pub mod pool;

pub use handler::RequestHandler;
pub use pool::ConnectionQueue;

use crate::config::Config;
use crate::http::{Response, StatusCode};
use crate::ipc::{self, CompletionReport, Dispatched, Hello};
use crate::limiter::LimiterClient;
use crate::lock::FileLockManager;
use std::io::{self, Write};
use std::net::TcpStream;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Intervalo de chequeo de vida del Acceptor en el loop de recepción
const LIVENESS_POLL: Duration = Duration::from_secs(1);

/// Corre el proceso Worker hasta el apagado
///
/// `worker_id` viene del flag interno `--internal-worker-id` con el que
/// el Acceptor relanzó el binario.
pub fn run(config: &Config, worker_id: usize) -> io::Result<()> {
    println!("[Worker {}] 🚀 Started (pid {})", worker_id, process::id());

    std::fs::create_dir_all(&config.static_root)?;

    // Socket de despacho: debe existir antes de anunciarse con el Hello,
    // porque el Acceptor despacha apenas lo recibe
    let sock_path = config.worker_sock(worker_id);
    if sock_path.exists() {
        std::fs::remove_file(&sock_path)?;
    }
    let dispatch = UnixDatagram::bind(&sock_path)?;
    dispatch.set_read_timeout(Some(LIVENESS_POLL))?;

    // Canal de reportes + registro
    let report_stream = UnixStream::connect(config.report_sock())?;
    let mut hello_writer = report_stream.try_clone()?;
    ipc::write_json_line(&mut hello_writer, &Hello { worker_id })?;

    // Un único thread es dueño del stream de reportes; el resto encola.
    // Si la escritura falla, el Acceptor murió: se baja la bandera para
    // que el loop principal salga.
    let acceptor_alive = Arc::new(AtomicBool::new(true));
    let (report_tx, report_rx) = mpsc::channel::<CompletionReport>();
    let report_writer = {
        let acceptor_alive = Arc::clone(&acceptor_alive);
        let mut stream = report_stream;
        thread::spawn(move || {
            for report in report_rx {
                if ipc::write_json_line(&mut stream, &report).is_err() {
                    acceptor_alive.store(false, Ordering::Release);
                    break;
                }
            }
        })
    };

    // Pool de threads
    let queue = ConnectionQueue::new(config.queue_capacity);
    let handler = Arc::new(RequestHandler::new(
        worker_id,
        PathBuf::from(&config.static_root),
        LimiterClient::new(config.limiter_sock()),
        FileLockManager::new(Duration::from_millis(config.lock_timeout_ms)),
        Duration::from_millis(config.post_hold_ms),
    ));

    let mut pool = Vec::with_capacity(config.threads);
    for _ in 0..config.threads {
        let queue = queue.clone();
        let handler = Arc::clone(&handler);
        let report_tx = report_tx.clone();
        pool.push(thread::spawn(move || {
            while let Some((conn, peer)) = queue.dequeue() {
                if let Some(report) = handler.handle(conn, &peer) {
                    let _ = report_tx.send(report);
                }
            }
        }));
    }

    println!(
        "[Worker {}] 👥 Pool ready: {} threads, queue capacity {}",
        worker_id, config.threads, config.queue_capacity
    );

    // Loop de recepción de conexiones
    loop {
        match ipc::recv_frame(&dispatch) {
            Ok(Dispatched::Connection(conn, peer)) => {
                if let Err((conn, peer)) = queue.try_enqueue(conn, peer) {
                    // Cola llena: rechazar acá mismo, el pool está saturado
                    let report = reject_saturated(worker_id, conn, &peer);
                    let _ = report_tx.send(report);
                }
            }
            Ok(Dispatched::Shutdown) => {
                println!("[Worker {}] 🔒 Shutdown requested", worker_id);
                break;
            }
            Err(e) if is_timeout(&e) => {
                // Sin tráfico: chequear que el Acceptor siga vivo
                if !acceptor_alive.load(Ordering::Acquire) {
                    eprintln!("[Worker {}] ⚠️  Acceptor gone, exiting", worker_id);
                    break;
                }
            }
            Err(e) => {
                eprintln!("[Worker {}] ❌ Dispatch channel error: {}", worker_id, e);
                break;
            }
        }
    }

    // Drenar lo encolado y esperar al pool; el último reporte tiene que
    // salir antes de cerrar el proceso
    queue.close();
    for thread in pool {
        let _ = thread.join();
    }
    drop(report_tx);
    let _ = report_writer.join();

    let _ = std::fs::remove_file(&sock_path);
    println!("[Worker {}] 👋 Stopped", worker_id);
    Ok(())
}

/// Responde 503 a una conexión que no entró en la cola
fn reject_saturated(worker_id: usize, mut conn: TcpStream, _peer: &str) -> CompletionReport {
    let mut response = Response::error(
        StatusCode::ServiceUnavailable,
        "Worker queue is full, try again later",
    );
    response.add_header("Connection", "close");
    response.add_header("X-Worker-Id", &worker_id.to_string());

    let _ = conn.write_all(&response.to_bytes());
    let _ = conn.flush();

    CompletionReport::new(worker_id, "-", "-", StatusCode::ServiceUnavailable.as_u16())
}

/// Distingue el timeout del poll de un error real del canal
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
