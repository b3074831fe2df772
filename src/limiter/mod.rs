//! # Limitador Global de POSTs Concurrentes
//! src/limiter/mod.rs
//!
//! Implementa el tope duro de POSTs procesándose a la vez, contado entre
//! **todos** los procesos Worker combinados, no por Worker.
//!
//! Como los Workers son procesos separados, el contador vive en un solo
//! lugar: el proceso Acceptor. Los Workers lo alcanzan por un socket Unix:
//!
//! ```text
//! Worker ──connect──▶ limiter.sock (Acceptor)
//!        ──'A'─────▶  pedir admisión
//!        ◀─'+'──────  concedido (el slot queda tomado)
//!        ◀─'-'──────  ocupado (responder 503)
//! ```
//!
//! El ticket **es** la conexión: mientras el `UnixStream` del lado Worker
//! siga abierto, el slot sigue tomado. Al hacer drop del [`Ticket`] (en
//! cualquier camino de salida, incluido un panic del handler o la muerte
//! del proceso Worker) el socket se cierra, el Acceptor ve EOF y libera el
//! slot. Eso da liberación exactamente-una-vez por construcción: no existe
//! un `release()` que se pueda llamar dos veces ni sobre un ticket ajeno.
//!
//! `acquire` es no bloqueante respecto a la capacidad: si el contador está
//! en el tope responde `Busy` de inmediato, sin encolar, para mantener la
//! latencia acotada.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

/// Byte de petición de admisión (Worker → Acceptor)
const ACQUIRE: u8 = b'A';

/// Respuesta: admisión concedida
const GRANTED: u8 = b'+';

/// Respuesta: capacidad agotada
const BUSY: u8 = b'-';

/// Lado servidor del limitador; vive en el proceso Acceptor
pub struct PostLimiter {
    /// Slots tomados en este instante
    active: Arc<Mutex<usize>>,

    /// Tope fijo de slots, definido al arrancar
    capacity: usize,
}

impl PostLimiter {
    /// Arranca el servicio del limitador sobre `sock_path`
    ///
    /// Crea el socket (reemplazando restos de una corrida anterior) y
    /// lanza el thread aceptador. Cada ticket concedido ocupa un thread
    /// que muere al liberarse el slot; nunca hay más de `capacity` vivos.
    pub fn start(sock_path: &Path, capacity: usize) -> io::Result<Self> {
        if sock_path.exists() {
            std::fs::remove_file(sock_path)?;
        }
        let listener = UnixListener::bind(sock_path)?;

        let active = Arc::new(Mutex::new(0usize));
        let accept_counter = Arc::clone(&active);

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let counter = Arc::clone(&accept_counter);
                        thread::spawn(move || attend_ticket(stream, counter, capacity));
                    }
                    Err(e) => {
                        eprintln!("[Limiter] ❌ Error aceptando conexión: {}", e);
                    }
                }
            }
        });

        Ok(Self { active, capacity })
    }

    /// Slots tomados en este momento (para diagnóstico y tests)
    pub fn active(&self) -> usize {
        *self.active.lock().unwrap()
    }

    /// Tope configurado
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Atiende una conexión de ticket hasta que el Worker libere el slot
fn attend_ticket(mut stream: UnixStream, active: Arc<Mutex<usize>>, capacity: usize) {
    let mut request = [0u8; 1];
    if stream.read_exact(&mut request).is_err() || request[0] != ACQUIRE {
        return;
    }

    // Decisión atómica: mirar el contador y tomar el slot en un solo lock
    let granted = {
        let mut count = active.lock().unwrap();
        if *count < capacity {
            *count += 1;
            true
        } else {
            false
        }
    };

    if !granted {
        let _ = stream.write_all(&[BUSY]);
        return;
    }

    if stream.write_all(&[GRANTED]).is_err() {
        // El Worker murió entre el connect y la respuesta: devolver el slot
        release_slot(&active);
        return;
    }

    // El slot queda tomado mientras la conexión viva. El Worker no envía
    // nada más; el read retorna 0 (EOF) cuando el Ticket se dropea.
    let mut sink = [0u8; 8];
    loop {
        match stream.read(&mut sink) {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    release_slot(&active);
}

fn release_slot(active: &Arc<Mutex<usize>>) {
    let mut count = active.lock().unwrap();
    debug_assert!(*count > 0, "limiter counter must never go negative");
    *count = count.saturating_sub(1);
}

/// Resultado de pedir admisión
#[derive(Debug)]
pub enum Admission {
    /// Slot concedido; soltar el ticket libera el slot
    Granted(Ticket),

    /// Capacidad agotada; el caller responde 503 sin esperar
    Busy,
}

/// Prueba de admisión de un POST
///
/// Propiedad transferida, no copiada: liberar es dropear. No hay forma de
/// liberar dos veces ni de liberar el ticket de otro thread.
#[derive(Debug)]
pub struct Ticket {
    _stream: UnixStream,
}

/// Lado cliente del limitador; vive en cada proceso Worker
#[derive(Debug, Clone)]
pub struct LimiterClient {
    sock_path: PathBuf,
}

impl LimiterClient {
    /// Crea un cliente apuntando al socket del limitador
    pub fn new(sock_path: PathBuf) -> Self {
        Self { sock_path }
    }

    /// Pide admisión para procesar un POST
    ///
    /// Retorna `Granted` con el ticket, o `Busy` inmediatamente si el
    /// contador global está en el tope. Un error de IO (Acceptor caído,
    /// socket roto) se propaga y el handler lo traduce a 500.
    pub fn acquire(&self) -> io::Result<Admission> {
        let mut stream = UnixStream::connect(&self.sock_path)?;
        stream.write_all(&[ACQUIRE])?;

        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply)?;

        match reply[0] {
            GRANTED => Ok(Admission::Granted(Ticket { _stream: stream })),
            BUSY => Ok(Admission::Busy),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected limiter reply byte: {}", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn start_limiter(capacity: usize) -> (PostLimiter, LimiterClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("limiter.sock");
        let limiter = PostLimiter::start(&sock, capacity).unwrap();
        let client = LimiterClient::new(sock);
        (limiter, client, dir)
    }

    fn acquire_granted(client: &LimiterClient) -> Ticket {
        match client.acquire().unwrap() {
            Admission::Granted(ticket) => ticket,
            Admission::Busy => panic!("expected granted, got busy"),
        }
    }

    /// Reintenta acquire hasta que haya slot (la liberación vía EOF
    /// tarda un instante en ser observada por el servidor)
    fn acquire_eventually(client: &LimiterClient) -> Ticket {
        for _ in 0..50 {
            match client.acquire().unwrap() {
                Admission::Granted(ticket) => return ticket,
                Admission::Busy => thread::sleep(Duration::from_millis(20)),
            }
        }
        panic!("slot was never released");
    }

    #[test]
    fn test_grants_up_to_capacity() {
        let (limiter, client, _dir) = start_limiter(2);

        let _t1 = acquire_granted(&client);
        let _t2 = acquire_granted(&client);

        assert_eq!(limiter.active(), 2);
        assert!(matches!(client.acquire().unwrap(), Admission::Busy));
    }

    #[test]
    fn test_busy_does_not_consume_slot() {
        let (limiter, client, _dir) = start_limiter(1);

        let _t1 = acquire_granted(&client);
        for _ in 0..3 {
            assert!(matches!(client.acquire().unwrap(), Admission::Busy));
        }
        assert_eq!(limiter.active(), 1);
    }

    #[test]
    fn test_drop_releases_slot() {
        let (limiter, client, _dir) = start_limiter(1);

        let ticket = acquire_granted(&client);
        assert!(matches!(client.acquire().unwrap(), Admission::Busy));

        drop(ticket);
        let _t2 = acquire_eventually(&client);
        assert_eq!(limiter.active(), 1);
    }

    #[test]
    fn test_clients_share_one_counter() {
        // Dos clientes (como dos procesos Worker) contra el mismo socket
        let (_limiter, client_a, dir) = start_limiter(2);
        let client_b = LimiterClient::new(dir.path().join("limiter.sock"));

        let _t1 = acquire_granted(&client_a);
        let _t2 = acquire_granted(&client_b);

        assert!(matches!(client_a.acquire().unwrap(), Admission::Busy));
        assert!(matches!(client_b.acquire().unwrap(), Admission::Busy));
    }

    #[test]
    fn test_capacity_reported() {
        let (limiter, _client, _dir) = start_limiter(5);
        assert_eq!(limiter.capacity(), 5);
        assert_eq!(limiter.active(), 0);
    }
}
