//! Compression of retired log files
//!
//! Every `*.log` file in the log directory except the active one is
//! stream-compressed into a `*.log.zst` sibling and then deleted. A file name
//! that shows up again after it was archived gets appended to the existing
//! archive as a further zstd frame. Files are processed one at a time; a failed
//! compression keeps the original and rolls the archive back, a failed delete
//! leaves both files behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::rotation::ROTATION_SUFFIX;

/// Suffix appended to a log file name once it is compressed
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// zstd level used for retired logs
const COMPRESSION_LEVEL: i32 = 9;

/// Outcome of one compaction pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Names of files compressed and removed
    pub compressed: Vec<String>,
    /// Files that could not be fully processed, with the reason
    pub failed: Vec<(String, String)>,
}

/// Compress every retired log file in `log_dir`
///
/// `active_file` is the name of the file currently being written; it is never
/// touched. This performs blocking I/O.
pub fn compress_old_logs(log_dir: &Path, active_file: &str) -> io::Result<CompactionReport> {
    let mut report = CompactionReport::default();

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !name.ends_with(ROTATION_SUFFIX) || name == active_file {
            continue;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let target = compressed_path(&path);
        if let Err(e) = compress_file(&path, &target) {
            report.failed.push((name, format!("compression failed: {}", e)));
            continue;
        }
        if let Err(e) = fs::remove_file(&path) {
            report.failed.push((name, format!("delete failed: {}", e)));
            continue;
        }
        report.compressed.push(name);
    }

    report.compressed.sort();
    Ok(report)
}

/// Path of the compressed sibling of `path`
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESSED_SUFFIX);
    PathBuf::from(name)
}

fn compress_file(source: &Path, target: &Path) -> io::Result<()> {
    let reader = BufReader::new(File::open(source)?);
    append_compressed(reader, target)
}

/// Append one zstd frame holding `reader` to `target`
///
/// Frames already in `target` survive a failure.
fn append_compressed<R: Read>(reader: R, target: &Path) -> io::Result<()> {
    let existed = target.exists();
    let file = OpenOptions::new().create(true).append(true).open(target)?;
    let keep = file.metadata()?.len();

    let result = encode_frame(reader, file);
    if result.is_err() {
        roll_back(target, existed, keep);
    }
    result
}

fn encode_frame<R: Read>(reader: R, file: File) -> io::Result<()> {
    let mut writer = BufWriter::new(file);
    zstd::stream::copy_encode(reader, &mut writer, COMPRESSION_LEVEL)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

fn roll_back(target: &Path, existed: bool, keep: u64) {
    if !existed {
        let _ = fs::remove_file(target);
        return;
    }
    if let Ok(file) = OpenOptions::new().write(true).open(target) {
        let _ = file.set_len(keep);
    }
}

/// Runs compaction passes in the background, at most one at a time
#[derive(Debug, Clone, Default)]
pub struct LogCompactor {
    running: Arc<AtomicBool>,
}

/// Clears the running flag when a pass ends, even by panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LogCompactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pass is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start a pass on the blocking pool
    ///
    /// Returns `None` without doing anything if the previous pass has not
    /// finished yet.
    pub fn spawn(&self, log_dir: PathBuf, active_file: String) -> Option<JoinHandle<()>> {
        // Entries logged from outside the runtime (e.g. a panic hook) skip the pass
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Previous log compaction still running, skipping");
            return None;
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        Some(runtime.spawn_blocking(move || {
            let _guard = guard;
            match compress_old_logs(&log_dir, &active_file) {
                Ok(report) => {
                    if !report.compressed.is_empty() {
                        debug!("Compressed {} old log files", report.compressed.len());
                    }
                    for (name, reason) in &report.failed {
                        warn!("Could not compact log file {}: {}", name, reason);
                    }
                }
                Err(e) => warn!("Could not scan {} for old logs: {}", log_dir.display(), e),
            }
        }))
    }
}
