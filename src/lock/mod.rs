//! # Lock Manager de Archivos
//! src/lock/mod.rs
//!
//! Serializa las escrituras a un mismo archivo entre los threads de un
//! Worker y entre los Workers como procesos separados.
//!
//! Usa locks advisory de `fs2` (flock) sobre el archivo destino: el mismo
//! path es exclusivo entre threads y procesos, y paths distintos nunca
//! contienden entre sí. La adquisición es acotada: se reintenta con
//! `try_lock_exclusive` hasta un deadline y después falla con
//! [`LockError::Timeout`], que el handler traduce a 500 en vez de colgar
//! el thread para siempre.
//!
//! La liberación está garantizada en todo camino de salida: el lock vive
//! en un guard interno que lo suelta en su `Drop`, incluso si el closure
//! retorna error o entra en panic.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Intervalo entre reintentos de try_lock
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errores del lock manager
#[derive(Debug)]
pub enum LockError {
    /// No se pudo obtener el lock dentro del timeout configurado
    Timeout(PathBuf),

    /// Error de IO abriendo el archivo o durante la sección crítica
    Io(io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Timeout(path) => {
                write!(f, "Timed out waiting for lock on {}", path.display())
            }
            LockError::Io(e) => write!(f, "Lock IO error: {}", e),
        }
    }
}

impl std::error::Error for LockError {}

impl From<io::Error> for LockError {
    fn from(e: io::Error) -> Self {
        LockError::Io(e)
    }
}

/// Guard interno: suelta el lock al dropearse
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // El kernel también libera al cerrar el fd; esto solo lo adelanta
        let _ = self.file.unlock();
    }
}

/// Manager de locks exclusivos por path
#[derive(Debug, Clone)]
pub struct FileLockManager {
    /// Tiempo máximo de espera por un lock
    timeout: Duration,
}

impl FileLockManager {
    /// Crea un manager con el timeout de adquisición dado
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Ejecuta `f` con acceso exclusivo al archivo en `path`
    ///
    /// Abre (o crea) el archivo, adquiere el lock exclusivo bloqueando
    /// hasta el timeout, corre `f` con el archivo ya protegido y libera
    /// el lock al salir — también si `f` retorna error o entra en panic.
    ///
    /// # Ejemplo
    /// ```
    /// use file_server::lock::FileLockManager;
    /// use std::io::Write;
    /// use std::time::Duration;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let path = dir.path().join("datos.txt");
    /// let locks = FileLockManager::new(Duration::from_secs(1));
    ///
    /// locks.with_lock(&path, |file| file.write_all(b"hola")).unwrap();
    /// ```
    pub fn with_lock<T, F>(&self, path: &Path, f: F) -> Result<T, LockError>
    where
        F: FnOnce(&mut File) -> io::Result<T>,
    {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + self.timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(LockError::Timeout(path.to_path_buf()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut guard = LockGuard { file };
        let result = f(&mut guard.file).map_err(LockError::Io)?;

        Ok(result)
    }
}
