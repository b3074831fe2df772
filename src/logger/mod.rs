//! # Logger de Requests
//! src/logger/mod.rs
//!
//! Escribe una línea por request completado:
//!
//! ```text
//! [2024-01-01 12:00:00] Worker 3 - GET /notas.txt - Status: 200
//! ```
//!
//! Un solo thread escritor es dueño del archivo de log y consume reportes
//! de un canal mpsc. Con un único escritor no hay contención multi-writer
//! que arbitrar: los Workers reportan al Acceptor por IPC y el Acceptor
//! encola aquí.
//!
//! `record` nunca falla hacia el caller: un problema del log no puede
//! tumbar el manejo de requests. Los errores de escritura van a stderr.

use crate::ipc::CompletionReport;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;

/// Handle clonable del logger; los clones comparten el mismo escritor
#[derive(Debug, Clone)]
pub struct RequestLog {
    sender: mpsc::Sender<CompletionReport>,
}

impl RequestLog {
    /// Abre (o crea) el archivo de log y arranca el thread escritor
    pub fn start(log_path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let (sender, receiver) = mpsc::channel();

        thread::spawn(move || writer_loop(file, receiver));

        Ok(Self { sender })
    }

    /// Encola un reporte para escribirlo al log
    ///
    /// Nunca retorna error: si el escritor murió, el reporte se vuelca a
    /// stderr como sink de respaldo.
    pub fn record(&self, report: CompletionReport) {
        if let Err(e) = self.sender.send(report) {
            eprintln!("[Logger] ⚠️  Writer thread gone, dropping to stderr: {}", e.0.log_line());
        }
    }
}

/// Loop del thread escritor: consume reportes hasta que no queden senders
fn writer_loop(mut file: File, receiver: mpsc::Receiver<CompletionReport>) {
    for report in receiver {
        let line = report.log_line();
        if let Err(e) = writeln!(file, "{}", line) {
            eprintln!("[Logger] ⚠️  Write failed ({}): {}", e, line);
            continue;
        }
        let _ = file.flush();
    }
}
