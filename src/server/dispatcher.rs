//! # Despachador Round-Robin
//! src/server/dispatcher.rs
//!
//! Reparte las conexiones aceptadas entre los Workers por turno rotativo.
//! El contador de turnos avanza en **cada intento**, incluso cuando el
//! Worker elegido está muerto y hay que saltarlo: así el reparto sigue
//! siendo parejo entre los vivos.
//!
//! Un Worker se da por muerto cuando el envío por su canal de despacho
//! falla (típicamente `ECONNREFUSED` si el proceso ya no existe). No hay
//! reintentos sobre el mismo Worker: la conexión va al siguiente vivo.

use crate::ipc::{self, DispatchFrame};
use std::io;
use std::net::TcpStream;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Canal de despacho hacia un proceso Worker
pub struct WorkerHandle {
    /// Id del Worker
    id: usize,

    /// Socket de despacho, ya conectado al `worker-N.sock` del Worker
    channel: UnixDatagram,

    /// Falso una vez que un envío falló; no se vuelve a intentar
    alive: bool,
}

impl WorkerHandle {
    /// Conecta un canal de despacho al socket de un Worker
    pub fn connect(id: usize, sock_path: &Path) -> io::Result<Self> {
        let channel = UnixDatagram::unbound()?;
        channel.connect(sock_path)?;
        Ok(Self::new(id, channel))
    }

    /// Construye un handle sobre un canal ya conectado
    pub fn new(id: usize, channel: UnixDatagram) -> Self {
        Self {
            id,
            channel,
            alive: true,
        }
    }

    /// Id del Worker detrás de este handle
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Reparte conexiones entre Workers por round-robin
pub struct Dispatcher {
    /// Handles hacia los Workers, indexados por turno
    workers: Mutex<Vec<WorkerHandle>>,

    /// Turnos consumidos desde el arranque (incluye saltos sobre muertos)
    counter: AtomicUsize,
}

impl Dispatcher {
    /// Crea un despachador sobre los handles dados
    pub fn new(workers: Vec<WorkerHandle>) -> Self {
        Self {
            workers: Mutex::new(workers),
            counter: AtomicUsize::new(0),
        }
    }

    /// Despacha una conexión al siguiente Worker vivo
    ///
    /// El fd de `conn` viaja por el canal de despacho; el caller debe
    /// cerrar su copia después (con el drop alcanza). Retorna el id del
    /// Worker elegido, o error si ya no queda ninguno vivo.
    pub fn dispatch(&self, conn: &TcpStream, peer: &str) -> io::Result<usize> {
        let mut workers = self.workers.lock().unwrap();
        let total = workers.len();

        // A lo sumo una vuelta completa: si nadie acepta, no hay Workers
        for _ in 0..total {
            let turn = self.counter.fetch_add(1, Ordering::Relaxed);
            let worker = &mut workers[turn % total];

            if !worker.alive {
                continue;
            }

            let frame = DispatchFrame::Connection {
                peer: peer.to_string(),
            };
            match ipc::send_frame(&worker.channel, &frame, Some(conn)) {
                Ok(()) => return Ok(worker.id),
                Err(e) => {
                    eprintln!(
                        "[Acceptor] ⚠️  Worker {} unreachable, marking dead: {}",
                        worker.id, e
                    );
                    worker.alive = false;
                }
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "no live workers to dispatch to",
        ))
    }

    /// Envía la orden de apagado a todos los Workers vivos
    pub fn shutdown_all(&self) {
        let workers = self.workers.lock().unwrap();
        for worker in workers.iter().filter(|w| w.alive) {
            if let Err(e) = ipc::send_frame(&worker.channel, &DispatchFrame::Shutdown, None) {
                eprintln!(
                    "[Acceptor] ⚠️  Failed to notify worker {} of shutdown: {}",
                    worker.id, e
                );
            }
        }
    }

    /// Cantidad de Workers todavía vivos
    pub fn live_count(&self) -> usize {
        let workers = self.workers.lock().unwrap();
        workers.iter().filter(|w| w.alive).count()
    }
}
