//! # Mensajes IPC entre Acceptor y Workers
//! src/ipc/mod.rs
//!
//! Este módulo define los mensajes que cruzan las fronteras de proceso y
//! las primitivas para moverlos:
//!
//! - **Canal de despacho** (Acceptor → Worker): un `UnixDatagram` por
//!   Worker. Cada datagrama lleva un [`DispatchFrame`] en JSON y, si el
//!   frame es una conexión, el file descriptor del `TcpStream` viaja como
//!   mensaje de control `SCM_RIGHTS` en el mismo `sendmsg`. Usamos
//!   datagramas porque preservan los límites de mensaje y porque enviar a
//!   un socket cuyo dueño murió falla con `ECONNREFUSED`, que es la señal
//!   de Worker caído.
//! - **Canal de reportes** (Worker → Acceptor): un `UnixStream` por Worker
//!   sobre el que viajan líneas JSON: primero un [`Hello`] y después un
//!   [`CompletionReport`] por request atendido.
//!
//! La propiedad de la conexión TCP se transfiere completa: después de
//! despachar, el Acceptor cierra su copia del fd y solo el Worker puede
//! responder al cliente.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::os::unix::net::UnixDatagram;
use vmm_sys_util::sock_ctrl_msg::ScmSocket;

/// Tamaño máximo de un frame de despacho serializado
pub const MAX_FRAME_BYTES: usize = 512;

/// Frame que el Acceptor envía por el canal de despacho
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchFrame {
    /// Conexión entrante; el fd del socket viaja en el mismo sendmsg
    Connection {
        /// Dirección del cliente, solo informativa
        peer: String,
    },

    /// Orden de apagado ordenado del Worker
    Shutdown,
}

/// Primer mensaje que un Worker escribe en el canal de reportes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Id del Worker que se está registrando
    pub worker_id: usize,
}

/// Resultado de atender un request, producido por un Worker
///
/// El Acceptor lo reenvía al Logger; una línea de log por reporte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Id del Worker que atendió el request
    pub worker_id: usize,

    /// Método HTTP ("GET", "POST", o el verbo rechazado)
    pub method: String,

    /// Path pedido
    pub path: String,

    /// Código de estado efectivamente enviado al cliente
    pub status: u16,

    /// Timestamp de finalización, ya formateado
    pub timestamp: String,
}

impl CompletionReport {
    /// Crea un reporte con timestamp del momento actual
    pub fn new(worker_id: usize, method: &str, path: &str, status: u16) -> Self {
        Self {
            worker_id,
            method: method.to_string(),
            path: path.to_string(),
            status,
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Formatea el reporte como línea de log
    ///
    /// Formato: `[timestamp] Worker N - METHOD path - Status: code`
    pub fn log_line(&self) -> String {
        format!(
            "[{}] Worker {} - {} {} - Status: {}",
            self.timestamp, self.worker_id, self.method, self.path, self.status
        )
    }
}

/// Mensaje recibido por un Worker en su canal de despacho
#[derive(Debug)]
pub enum Dispatched {
    /// Una conexión lista para atender, con la dirección del cliente
    Connection(TcpStream, String),

    /// El Acceptor pidió apagado
    Shutdown,
}

/// Convierte un error errno de vmm-sys-util a `io::Error`
fn errno_to_io(e: vmm_sys_util::errno::Error) -> io::Error {
    io::Error::from_raw_os_error(e.errno())
}

/// Envía un frame por el canal de despacho
///
/// Si `conn` está presente, su fd viaja como `SCM_RIGHTS` junto al JSON.
/// El llamador conserva la propiedad de `conn` y debe cerrarlo después:
/// el kernel duplica el descriptor al entregarlo.
pub fn send_frame(
    channel: &UnixDatagram,
    frame: &DispatchFrame,
    conn: Option<&TcpStream>,
) -> io::Result<()> {
    let payload = serde_json::to_vec(frame)?;

    match conn {
        Some(stream) => {
            channel
                .send_with_fd(&payload[..], stream.as_raw_fd())
                .map_err(errno_to_io)?;
        }
        None => {
            channel.send(&payload)?;
        }
    }

    Ok(())
}

/// Recibe el siguiente frame del canal de despacho (bloqueante)
///
/// Un frame `Connection` sin fd adjunto es un error de protocolo: sin el
/// descriptor no hay a quién responder.
pub fn recv_frame(channel: &UnixDatagram) -> io::Result<Dispatched> {
    let mut buf = [0u8; MAX_FRAME_BYTES];
    let (len, fd) = channel.recv_with_fd(&mut buf).map_err(errno_to_io)?;

    let frame: DispatchFrame = serde_json::from_slice(&buf[..len])?;

    match (frame, fd) {
        (DispatchFrame::Connection { peer }, Some(file)) => {
            // El fd llegó como File genérico; lo reinterpretamos como el
            // socket TCP que es.
            let stream = unsafe { TcpStream::from_raw_fd(file.into_raw_fd()) };
            Ok(Dispatched::Connection(stream, peer))
        }
        (DispatchFrame::Connection { .. }, None) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "dispatch frame arrived without a file descriptor",
        )),
        (DispatchFrame::Shutdown, _) => Ok(Dispatched::Shutdown),
    }
}

/// Escribe un valor serializable como una línea JSON
///
/// Usado por el canal de reportes (un mensaje por línea).
pub fn write_json_line<T: Serialize, W: Write>(writer: &mut W, value: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;

    #[test]
    fn test_dispatch_frame_json_roundtrip() {
        let frame = DispatchFrame::Connection {
            peer: "127.0.0.1:4321".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"connection\""));

        let back: DispatchFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);

        let shutdown: DispatchFrame =
            serde_json::from_str(r#"{"kind":"shutdown"}"#).unwrap();
        assert_eq!(shutdown, DispatchFrame::Shutdown);
    }

    #[test]
    fn test_completion_report_log_line() {
        let report = CompletionReport {
            worker_id: 3,
            method: "GET".to_string(),
            path: "/notas.txt".to_string(),
            status: 200,
            timestamp: "2024-01-01 12:00:00".to_string(),
        };

        assert_eq!(
            report.log_line(),
            "[2024-01-01 12:00:00] Worker 3 - GET /notas.txt - Status: 200"
        );
    }

    #[test]
    fn test_completion_report_new_sets_timestamp() {
        let report = CompletionReport::new(0, "POST", "/upload", 201);
        assert_eq!(report.worker_id, 0);
        assert_eq!(report.status, 201);
        // Formato "YYYY-MM-DD HH:MM:SS"
        assert_eq!(report.timestamp.len(), 19);
    }

    #[test]
    fn test_send_recv_connection_transfers_fd() {
        let (tx, rx) = UnixDatagram::pair().unwrap();

        // Conexión TCP real por loopback para tener un fd que pasar
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server_conn, peer) = listener.accept().unwrap();

        let frame = DispatchFrame::Connection {
            peer: peer.to_string(),
        };
        send_frame(&tx, &frame, Some(&server_conn)).unwrap();
        // El emisor cierra su copia; el receptor conserva la suya
        drop(server_conn);

        match recv_frame(&rx).unwrap() {
            Dispatched::Connection(mut conn, got_peer) => {
                assert_eq!(got_peer, peer.to_string());
                conn.write_all(b"pong").unwrap();
            }
            other => panic!("expected connection, got {:?}", other),
        }

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_send_recv_shutdown() {
        let (tx, rx) = UnixDatagram::pair().unwrap();

        send_frame(&tx, &DispatchFrame::Shutdown, None).unwrap();

        match recv_frame(&rx).unwrap() {
            Dispatched::Shutdown => {}
            other => panic!("expected shutdown, got {:?}", other),
        }
    }

    #[test]
    fn test_write_json_line() {
        let mut buf = Vec::new();
        let hello = Hello { worker_id: 7 };
        write_json_line(&mut buf, &hello).unwrap();

        let mut reader = BufReader::new(&buf[..]);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();

        let back: Hello = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(back, hello);
    }
}
