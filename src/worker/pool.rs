//! # Cola de Conexiones del Worker
//! src/worker/pool.rs
//!
//! Implementa la cola thread-safe que alimenta al pool de threads de un
//! Worker. El loop de recepción IPC encola conexiones; los threads del
//! pool las desencolan de a una.
//!
//! La cola es acotada: si está llena, `try_enqueue` devuelve la conexión
//! al caller para que responda 503 en vez de encolar sin límite.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};

/// Una conexión despachada esperando thread: el socket y el peer
type PendingConnection = (TcpStream, String);

/// Estado interno protegido por el mutex
struct QueueState {
    items: VecDeque<PendingConnection>,
    closed: bool,
}

/// Cola FIFO acotada de conexiones, compartida entre threads
pub struct ConnectionQueue {
    /// Estado interno
    state: Arc<Mutex<QueueState>>,

    /// Condvar para despertar threads esperando conexiones
    condvar: Arc<Condvar>,

    /// Capacidad máxima de la cola
    max_capacity: usize,
}

impl ConnectionQueue {
    /// Crea una nueva cola con capacidad máxima
    pub fn new(max_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            })),
            condvar: Arc::new(Condvar::new()),
            max_capacity,
        }
    }

    /// Encola una conexión sin bloquear
    ///
    /// Si la cola está llena (o cerrada), devuelve la conexión en el
    /// `Err` para que el caller pueda responder 503 y cerrarla.
    pub fn try_enqueue(
        &self,
        conn: TcpStream,
        peer: String,
    ) -> Result<(), PendingConnection> {
        let mut state = self.state.lock().unwrap();

        if state.closed || state.items.len() >= self.max_capacity {
            return Err((conn, peer));
        }

        state.items.push_back((conn, peer));

        // Notificar a un thread esperando
        self.condvar.notify_one();

        Ok(())
    }

    /// Desencola la siguiente conexión, bloqueando hasta que haya una
    ///
    /// Retorna `None` cuando la cola fue cerrada y no quedan conexiones:
    /// la señal para que el thread del pool termine.
    pub fn dequeue(&self) -> Option<PendingConnection> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }

            // Esperar a que haya conexiones o a que cierren la cola
            state = self.condvar.wait(state).unwrap();
        }
    }

    /// Cierra la cola y despierta a todos los threads esperando
    ///
    /// Las conexiones ya encoladas se siguen atendiendo antes de que los
    /// threads terminen.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.condvar.notify_all();
    }

    /// Retorna el tamaño actual de la cola
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.items.len()
    }

    /// Verifica si la cola está vacía
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retorna la capacidad máxima
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

impl Clone for ConnectionQueue {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            condvar: Arc::clone(&self.condvar),
            max_capacity: self.max_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Fabrica pares de TcpStream reales por loopback
    fn make_conn(listener: &TcpListener) -> TcpStream {
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (conn, _) = listener.accept().unwrap();
        conn
    }

    #[test]
    fn test_enqueue_dequeue_fifo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = ConnectionQueue::new(4);

        queue.try_enqueue(make_conn(&listener), "primero".to_string()).unwrap();
        queue.try_enqueue(make_conn(&listener), "segundo".to_string()).unwrap();

        let (_, peer1) = queue.dequeue().unwrap();
        let (_, peer2) = queue.dequeue().unwrap();
        assert_eq!(peer1, "primero");
        assert_eq!(peer2, "segundo");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rejects_when_full() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = ConnectionQueue::new(2);

        queue.try_enqueue(make_conn(&listener), "a".to_string()).unwrap();
        queue.try_enqueue(make_conn(&listener), "b".to_string()).unwrap();

        let rejected = queue.try_enqueue(make_conn(&listener), "c".to_string());
        let (_, peer) = rejected.unwrap_err();
        assert_eq!(peer, "c"); // la conexión vuelve al caller
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = ConnectionQueue::new(4);

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue().map(|(_, peer)| peer))
        };

        thread::sleep(Duration::from_millis(50));
        queue.try_enqueue(make_conn(&listener), "tarde".to_string()).unwrap();

        assert_eq!(consumer.join().unwrap(), Some("tarde".to_string()));
    }

    #[test]
    fn test_close_wakes_blocked_threads() {
        let queue = ConnectionQueue::new(4);

        let mut consumers = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            consumers.push(thread::spawn(move || queue.dequeue()));
        }

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for consumer in consumers {
            assert!(consumer.join().unwrap().is_none());
        }
    }

    #[test]
    fn test_close_drains_pending_items() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = ConnectionQueue::new(4);

        queue.try_enqueue(make_conn(&listener), "pendiente".to_string()).unwrap();
        queue.close();

        // Lo encolado antes del close se sigue entregando
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_enqueue_after_close_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = ConnectionQueue::new(4);

        queue.close();
        assert!(queue.try_enqueue(make_conn(&listener), "x".to_string()).is_err());
    }

    #[test]
    fn test_max_capacity() {
        let queue = ConnectionQueue::new(64);
        assert_eq!(queue.max_capacity(), 64);
    }
}
