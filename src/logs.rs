use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{mpsc, LazyLock, Mutex},
    thread,
};

use anyhow::{Context, Result};
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    {ContentLimit, FileRotate},
};
use log::Log;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

/// Where the host app wants log lines delivered (e.g. a debug console).
static HOST_SINK: LazyLock<Mutex<Option<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(None));

/// Feeds the dispatcher thread, so logging never blocks on the host sink.
static LOG_SENDER: LazyLock<Mutex<Option<mpsc::Sender<String>>>> =
    LazyLock::new(|| Mutex::new(None));

pub struct MainLogger {
    write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>,
}

impl MainLogger {
    fn new(write_logger: Box<WriteLogger<FileRotate<AppendTimestamp>>>) -> Self {
        Self { write_logger }
    }
}

impl Log for MainLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.write_logger.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.write_logger.log(record);

        let message = format!(
            "{}:{} -- {}",
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(tx) = LOG_SENDER.lock().unwrap().as_ref() {
            // the dispatcher only goes away with the process
            let _ = tx.send(message);
        }
    }

    fn flush(&self) {
        self.write_logger.flush();
    }
}

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "vroom.log";
const MAX_LOG_FILES: usize = 3;
const LINES_PER_LOG_FILE: usize = 1000;

fn log_dir(cache_dir: &str) -> PathBuf {
    Path::new(cache_dir).join(LOG_DIR)
}

pub fn init(cache_dir: &str) -> Result<()> {
    let rotating_file = FileRotate::new(
        log_dir(cache_dir).join(LOG_FILE),
        AppendTimestamp::default(FileLimit::MaxFiles(MAX_LOG_FILES)),
        ContentLimit::Lines(LINES_PER_LOG_FILE),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let write_logger = WriteLogger::new(
        LevelFilter::Info,
        ConfigBuilder::new().set_time_format_rfc3339().build(),
        rotating_file,
    );
    log::set_boxed_logger(Box::new(MainLogger::new(write_logger)))
        .context("a logger is already installed")?;
    log::set_max_level(LevelFilter::Info);

    init_dispatcher();
    Ok(())
}

fn init_dispatcher() {
    let mut guard = LOG_SENDER.lock().unwrap();
    if guard.is_some() {
        return;
    }

    let (tx, rx) = mpsc::channel::<String>();
    *guard = Some(tx);

    thread::spawn(move || {
        while let Ok(msg) = rx.recv() {
            let mut sink = HOST_SINK.lock().unwrap();
            let disconnected = match sink.as_ref() {
                Some(host) => host.send(msg).is_err(),
                None => false,
            };
            if disconnected {
                *sink = None;
            }
        }
    });
}

pub fn set_host_sink(sink: mpsc::Sender<String>) {
    let mut guard = HOST_SINK.lock().unwrap();
    *guard = Some(sink);
}

/// Bundles every trip log file (rotated ones included) into a zip at
/// `target_file_path`. Entries are stored uncompressed under `logs/`.
pub fn export(cache_dir: &str, target_file_path: &str) -> Result<()> {
    let target = File::create(target_file_path)
        .with_context(|| format!("failed to create {target_file_path}"))?;
    let mut zip = zip::ZipWriter::new(target);
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let dir = log_dir(cache_dir);
    let mut log_files: Vec<PathBuf> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("no logs to export under {}", dir.display());
            Vec::new()
        }
        Err(e) => return Err(e).context("failed to list log files"),
    };
    log_files.sort();

    for path in log_files {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        zip.start_file(format!("{LOG_DIR}/{file_name}"), options)?;
        io::copy(&mut File::open(&path)?, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}
