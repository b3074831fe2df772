//! # Handler de Requests
//! src/worker/handler.rs
//!
//! Atiende una conexión completa dentro de un thread del pool: lee el
//! request del socket, lo resuelve contra el directorio estático y escribe
//! la respuesta. Cada conexión produce exactamente un [`CompletionReport`]
//! para el log, sea cual sea el resultado.
//!
//! ## Reglas de resolución
//!
//! - `GET /archivo` sirve `static_root/archivo` (200), o 404 si no existe.
//!   Un path que escapa de la raíz (`..`) se rechaza con 400 **antes** de
//!   tocar el filesystem.
//! - `POST /upload` guarda el body en un archivo nuevo con nombre único y
//!   responde 201. La admisión pasa primero por el limitador global (503
//!   si el tope está tomado) y la escritura por el lock del archivo.
//! - Cualquier otro verbo recibe 405; un request malformado, 400.

use crate::http::{find_header_end, Method, ParseError, Request, Response, StatusCode};
use crate::ipc::CompletionReport;
use crate::limiter::{Admission, LimiterClient};
use crate::lock::{FileLockManager, LockError};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Tamaño máximo aceptado de un request completo (headers + body)
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Tamaño del buffer de lectura del socket
const READ_CHUNK: usize = 4096;

/// Timeout de lectura: un cliente mudo no puede retener el thread
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Atiende requests dentro de un proceso Worker
///
/// Es compartido entre todos los threads del pool vía `Arc`; no tiene
/// estado mutable propio, la sincronización vive en el limitador y en el
/// lock manager.
pub struct RequestHandler {
    /// Id del Worker dueño de este handler
    worker_id: usize,

    /// Raíz de archivos estáticos
    static_root: PathBuf,

    /// Cliente del limitador global de POSTs
    limiter: LimiterClient,

    /// Locks de archivo para serializar escrituras
    locks: FileLockManager,

    /// Retención del ticket POST antes de responder (0 = sin retención)
    post_hold: Duration,
}

impl RequestHandler {
    /// Crea un handler con los parámetros dados
    pub fn new(
        worker_id: usize,
        static_root: PathBuf,
        limiter: LimiterClient,
        locks: FileLockManager,
        post_hold: Duration,
    ) -> Self {
        Self {
            worker_id,
            static_root,
            limiter,
            locks,
            post_hold,
        }
    }

    /// Atiende una conexión de principio a fin
    ///
    /// Retorna un reporte por cada request atendido, incluso si la
    /// respuesta no se pudo escribir (el status reportado es el que se
    /// intentó enviar). Un peer que conecta y cierra sin mandar nada no
    /// produce respuesta ni reporte. La conexión se cierra al salir;
    /// HTTP/1.0 no reutiliza conexiones.
    pub fn handle(&self, mut conn: TcpStream, _peer: &str) -> Option<CompletionReport> {
        let _ = conn.set_read_timeout(Some(READ_TIMEOUT));

        let (response, method, path) = self.process(&mut conn)?;
        let status = response.status().as_u16();

        let mut response = response;
        response.add_header("Connection", "close");
        response.add_header("X-Worker-Id", &self.worker_id.to_string());

        if let Err(e) = conn.write_all(&response.to_bytes()).and_then(|_| conn.flush()) {
            eprintln!("[Worker {}] ⚠️  Failed to write response: {}", self.worker_id, e);
        }

        Some(CompletionReport::new(self.worker_id, &method, &path, status))
    }

    /// Lee y resuelve el request; retorna la respuesta más el método y
    /// path para el reporte. `None` si el peer cerró sin mandar nada.
    fn process(&self, conn: &mut TcpStream) -> Option<(Response, String, String)> {
        let raw = match read_request(conn) {
            Ok(raw) => raw,
            Err(_) => {
                let response = Response::error(
                    StatusCode::InternalServerError,
                    "Failed to read request",
                );
                return Some((response, "-".to_string(), "-".to_string()));
            }
        };

        if raw.is_empty() {
            // Conexión abierta y cerrada sin datos: nada que responder
            return None;
        }

        if raw.len() > MAX_REQUEST_BYTES {
            let response = Response::error(StatusCode::BadRequest, "Request too large");
            return Some((response, "-".to_string(), "-".to_string()));
        }

        match Request::parse(&raw) {
            Ok(request) => {
                let method = request.method().as_str().to_string();
                let path = request.path().to_string();

                let response = match request.method() {
                    Method::GET => self.handle_get(&request),
                    Method::POST => self.handle_post(&request),
                };

                Some((response, method, path))
            }
            Err(ParseError::UnsupportedMethod(verb)) => {
                // Para el log: el path todavía se puede rescatar de la
                // request line aunque el verbo no esté soportado
                let path = request_line_path(&raw).unwrap_or_else(|| "-".to_string());
                let response = Response::error(
                    StatusCode::MethodNotAllowed,
                    "Only GET and POST are supported",
                );
                Some((response, verb, path))
            }
            Err(e) => {
                let response =
                    Response::error(StatusCode::BadRequest, &format!("Bad request: {}", e));
                Some((response, "-".to_string(), "-".to_string()))
            }
        }
    }

    /// GET: sirve un archivo del directorio estático
    fn handle_get(&self, request: &Request) -> Response {
        let file_path = match resolve_static_path(&self.static_root, request.path()) {
            Some(path) => path,
            // Sin acceso al filesystem: el rechazo es puramente léxico
            None => return Response::error(StatusCode::BadRequest, "Invalid file path"),
        };

        if !file_path.is_file() {
            return Response::error(StatusCode::NotFound, "File not found");
        }

        match std::fs::read(&file_path) {
            Ok(contents) => Response::new(StatusCode::Ok)
                .with_header("Content-Type", "text/plain")
                .with_body_bytes(contents),
            Err(e) => {
                eprintln!("[Worker {}] ❌ Failed to read file: {}", self.worker_id, e);
                Response::error(StatusCode::InternalServerError, "Failed to read file")
            }
        }
    }

    /// POST: guarda el body como un archivo nuevo bajo el directorio
    /// estático
    fn handle_post(&self, request: &Request) -> Response {
        let body = request.body();
        if body.is_empty() {
            return Response::error(StatusCode::BadRequest, "Empty request body");
        }

        // Admisión global antes de cualquier trabajo: si los slots están
        // tomados, el rechazo es inmediato, sin encolar
        let ticket = match self.limiter.acquire() {
            Ok(Admission::Granted(ticket)) => ticket,
            Ok(Admission::Busy) => {
                return Response::error(
                    StatusCode::ServiceUnavailable,
                    "Server is handling the maximum number of concurrent uploads",
                );
            }
            Err(e) => {
                eprintln!("[Worker {}] ❌ Limiter unreachable: {}", self.worker_id, e);
                return Response::error(
                    StatusCode::InternalServerError,
                    "Upload admission failed",
                );
            }
        };

        let result = self.store_upload(body);

        // Retención opcional del slot, para hacer observable el tope
        if !self.post_hold.is_zero() {
            thread::sleep(self.post_hold);
        }
        drop(ticket);

        match result {
            Ok(filename) => Response::new(StatusCode::Created)
                .with_header("Content-Type", "text/plain")
                .with_body(&format!("File created successfully: {}\n", filename)),
            Err(LockError::Timeout(path)) => {
                eprintln!(
                    "[Worker {}] ⚠️  Lock timeout on {}",
                    self.worker_id,
                    path.display()
                );
                Response::error(
                    StatusCode::InternalServerError,
                    "Timed out waiting for file lock",
                )
            }
            Err(LockError::Io(e)) => {
                eprintln!("[Worker {}] ❌ Failed to store upload: {}", self.worker_id, e);
                Response::error(StatusCode::InternalServerError, "Failed to store file")
            }
        }
    }

    /// Crea el archivo de subida con nombre único y escribe el body bajo
    /// el lock del archivo
    fn store_upload(&self, body: &[u8]) -> Result<String, LockError> {
        // Nombre único: timestamp + sufijo aleatorio. `create_new` detecta
        // la colisión (dos POSTs en el mismo segundo con el mismo sufijo)
        // y se reintenta con otro sufijo.
        let filename = loop {
            let candidate = format!(
                "{}_{:08x}.txt",
                Local::now().format("%Y%m%d_%H%M%S"),
                rand::random::<u32>()
            );
            let path = self.static_root.join(&candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let path = self.static_root.join(&filename);
        self.locks.with_lock(&path, |file| {
            file.write_all(body)?;
            file.flush()?;
            // El 201 promete durabilidad, no solo page cache
            file.sync_all()
        })?;

        Ok(filename)
    }
}

/// Lee un request completo del socket
///
/// Acumula hasta encontrar el fin de headers (`\r\n\r\n`) y después hasta
/// completar `Content-Length` bytes de body, si el header está presente.
fn read_request(conn: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = conn.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);

        if data.len() > MAX_REQUEST_BYTES {
            // El caller responde 400; no tiene sentido seguir leyendo
            break;
        }

        if let Some(pos) = find_header_end(&data) {
            let body_received = data.len() - (pos + 4);
            match content_length(&data[..pos]) {
                Some(expected) if body_received < expected => continue,
                _ => break,
            }
        }
    }

    Ok(data)
}

/// Extrae Content-Length de la sección de headers cruda
fn content_length(head: &[u8]) -> Option<usize> {
    let head = std::str::from_utf8(head).ok()?;
    for line in head.split("\r\n").skip(1) {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

/// Extrae el path de la request line para el reporte, si se puede
fn request_line_path(raw: &[u8]) -> Option<String> {
    let head = std::str::from_utf8(raw.split(|&b| b == b'\r').next()?).ok()?;
    head.split_whitespace().nth(1).map(|p| p.to_string())
}

/// Resuelve un path de request contra la raíz estática, léxicamente
///
/// Normaliza `.` y `..` sin tocar el filesystem. Retorna `None` si el
/// path intenta escapar de la raíz; el caller responde 400 sin haber
/// accedido a ningún archivo.
pub fn resolve_static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                // Un `..` sin nada que subir escapa de la raíz
                if parts.pop().is_none() {
                    return None;
                }
            }
            // RootDir o Prefix no pueden aparecer en un path relativo
            _ => return None,
        }
    }

    let mut resolved = root.to_path_buf();
    for part in parts {
        resolved.push(part);
    }
    Some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::PostLimiter;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    struct TestServer {
        handler: Arc<RequestHandler>,
        listener: TcpListener,
        _limiter: PostLimiter,
        dir: tempfile::TempDir,
    }

    /// Arma un handler real contra un static root temporal y un limitador
    /// propio
    fn test_server(max_posts: usize, post_hold: Duration) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let static_root = dir.path().join("static");
        std::fs::create_dir_all(&static_root).unwrap();

        let sock = dir.path().join("limiter.sock");
        let limiter = PostLimiter::start(&sock, max_posts).unwrap();

        let handler = Arc::new(RequestHandler::new(
            7,
            static_root,
            LimiterClient::new(sock),
            FileLockManager::new(Duration::from_secs(2)),
            post_hold,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        TestServer {
            handler,
            listener,
            _limiter: limiter,
            dir,
        }
    }

    /// Manda `raw` por loopback, corre el handler del lado servidor y
    /// retorna (respuesta completa, reporte)
    fn roundtrip(server: &TestServer, raw: &[u8]) -> (String, CompletionReport) {
        let addr = server.listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let (conn, peer) = server.listener.accept().unwrap();
        let report = server.handler.handle(conn, &peer.to_string()).unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        (response, report)
    }

    fn static_root(server: &TestServer) -> PathBuf {
        server.dir.path().join("static")
    }

    #[test]
    fn test_get_existing_file() {
        let server = test_server(5, Duration::ZERO);
        std::fs::write(static_root(&server).join("notas.txt"), "contenido\n").unwrap();

        let (response, report) = roundtrip(&server, b"GET /notas.txt HTTP/1.0\r\n\r\n");

        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("X-Worker-Id: 7\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("contenido\n"));
        assert_eq!(report.status, 200);
        assert_eq!(report.method, "GET");
        assert_eq!(report.path, "/notas.txt");
    }

    #[test]
    fn test_get_missing_file() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) = roundtrip(&server, b"GET /no-existe.txt HTTP/1.0\r\n\r\n");

        assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));
        assert_eq!(report.status, 404);
    }

    #[test]
    fn test_get_traversal_rejected() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) =
            roundtrip(&server, b"GET /../../etc/passwd HTTP/1.0\r\n\r\n");

        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert_eq!(report.status, 400);
    }

    #[test]
    fn test_unsupported_method() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) = roundtrip(&server, b"DELETE /notas.txt HTTP/1.0\r\n\r\n");

        assert!(response.starts_with("HTTP/1.0 405 Method Not Allowed\r\n"));
        assert_eq!(report.status, 405);
        assert_eq!(report.method, "DELETE");
        assert_eq!(report.path, "/notas.txt");
    }

    #[test]
    fn test_malformed_request() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) = roundtrip(&server, b"GET\r\n\r\n");

        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert_eq!(report.status, 400);
    }

    #[test]
    fn test_post_creates_file() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) = roundtrip(
            &server,
            b"POST /upload HTTP/1.0\r\nContent-Length: 11\r\n\r\nhola mundo\n",
        );

        assert!(response.starts_with("HTTP/1.0 201 Created\r\n"));
        assert_eq!(report.status, 201);

        // El archivo existe bajo el static root con el body exacto
        let entries: Vec<_> = std::fs::read_dir(static_root(&server))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read(&entries[0]).unwrap(), b"hola mundo\n");

        let name = entries[0].file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with(".txt"));
        // timestamp (15) + '_' + 8 hex + ".txt"
        assert_eq!(name.len(), 15 + 1 + 8 + 4);
    }

    #[test]
    fn test_post_empty_body_rejected() {
        let server = test_server(5, Duration::ZERO);

        let (response, report) = roundtrip(
            &server,
            b"POST /upload HTTP/1.0\r\nContent-Length: 0\r\n\r\n",
        );

        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert_eq!(report.status, 400);
        assert_eq!(
            std::fs::read_dir(static_root(&server)).unwrap().count(),
            0
        );
    }

    #[test]
    fn test_post_busy_when_limit_reached() {
        let server = test_server(1, Duration::ZERO);

        // Tomar el único slot directamente, como haría otro Worker
        let other = LimiterClient::new(server.dir.path().join("limiter.sock"));
        let _held = match other.acquire().unwrap() {
            Admission::Granted(ticket) => ticket,
            Admission::Busy => panic!("slot should be free"),
        };

        let (response, report) = roundtrip(
            &server,
            b"POST /upload HTTP/1.0\r\nContent-Length: 4\r\n\r\nhola",
        );

        assert!(response.starts_with("HTTP/1.0 503 Service Unavailable\r\n"));
        assert_eq!(report.status, 503);
        // Nada se escribió
        assert_eq!(
            std::fs::read_dir(static_root(&server)).unwrap().count(),
            0
        );
    }

    #[test]
    fn test_silent_close_produces_no_report() {
        let server = test_server(5, Duration::ZERO);
        let addr = server.listener.local_addr().unwrap();

        // Conectar y cerrar sin mandar nada
        let client = TcpStream::connect(addr).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        let (conn, peer) = server.listener.accept().unwrap();
        assert!(server.handler.handle(conn, &peer.to_string()).is_none());
    }

    #[test]
    fn test_resolve_static_path() {
        let root = Path::new("/srv/static");

        assert_eq!(
            resolve_static_path(root, "/notas.txt"),
            Some(PathBuf::from("/srv/static/notas.txt"))
        );
        assert_eq!(
            resolve_static_path(root, "/sub/dir/a.txt"),
            Some(PathBuf::from("/srv/static/sub/dir/a.txt"))
        );
        // `..` que no escapa se normaliza
        assert_eq!(
            resolve_static_path(root, "/sub/../notas.txt"),
            Some(PathBuf::from("/srv/static/notas.txt"))
        );
        // `.` se ignora
        assert_eq!(
            resolve_static_path(root, "/./notas.txt"),
            Some(PathBuf::from("/srv/static/notas.txt"))
        );
        // "/" resuelve a la raíz misma (el caller verá que no es archivo)
        assert_eq!(resolve_static_path(root, "/"), Some(root.to_path_buf()));
    }

    #[test]
    fn test_resolve_static_path_escape_rejected() {
        let root = Path::new("/srv/static");

        assert_eq!(resolve_static_path(root, "/../secreto.txt"), None);
        assert_eq!(resolve_static_path(root, "/../../etc/passwd"), None);
        assert_eq!(resolve_static_path(root, "/a/../../b"), None);
    }

    #[test]
    fn test_content_length_parsing() {
        assert_eq!(
            content_length(b"POST /u HTTP/1.0\r\nContent-Length: 42"),
            Some(42)
        );
        assert_eq!(
            content_length(b"POST /u HTTP/1.0\r\ncontent-length: 7"),
            Some(7)
        );
        assert_eq!(content_length(b"GET / HTTP/1.0"), None);
    }
}
