//! The snapshot producer: pause a process, copy its readable mappings.

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use failure::{bail, format_err, Error, ResultExt};
use log::{info, warn};

use pymemsnap::MappedAddr;

/// Regions are copied in chunks of this size; a failed chunk truncates the
/// region but never aborts the pass.
const CHUNK_SIZE: u64 = 1024 * 1024;

/// Keeps the target stopped for the guard's lifetime. SIGCONT is sent on
/// every exit path, including panics.
pub struct ProcessPauseGuard {
    pid: libc::pid_t,
}

impl ProcessPauseGuard {
    pub fn new(pid: u32) -> Result<ProcessPauseGuard, Error> {
        let pid = pid as libc::pid_t;
        if unsafe { libc::kill(pid, libc::SIGSTOP) } != 0 {
            bail!("cannot stop process {}", pid);
        }
        Ok(ProcessPauseGuard { pid })
    }
}

impl Drop for ProcessPauseGuard {
    fn drop(&mut self) {
        unsafe {
            libc::kill(self.pid, libc::SIGCONT);
        }
    }
}

/// The readable, non-shared mappings of a process, from `/proc/<pid>/maps`.
pub fn ranges_for_pid(pid: u32) -> Result<Vec<(MappedAddr, u64)>, Error> {
    let maps = fs::read_to_string(format!("/proc/{}/maps", pid))
        .with_context(|_| format!("cannot read maps for process {}", pid))?;
    let mut ranges = vec![];
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let range = match fields.next() {
            Some(range) => range,
            None => continue,
        };
        let perms = match fields.next() {
            Some(perms) => perms,
            None => continue,
        };
        if !perms.starts_with('r') {
            continue;
        }
        // Skip shared-memory objects (e.g. object-store mappings); their
        // contents belong to other processes.
        if perms.len() >= 4 && perms.as_bytes()[3] == b's' {
            continue;
        }
        let mut bounds = range.splitn(2, '-');
        let start = u64::from_str_radix(bounds.next().unwrap_or(""), 16)?;
        let end = u64::from_str_radix(
            bounds
                .next()
                .ok_or_else(|| format_err!("malformed maps line: {}", line))?,
            16,
        )?;
        ranges.push((MappedAddr(start), end.saturating_sub(start)));
    }
    Ok(ranges)
}

/// Copies one region into `mem.<hexstart>.<hexend>.bin`, stopping early at
/// the first unreadable chunk.
fn copy_region(
    mem: &File,
    directory: &Path,
    base: MappedAddr,
    size: u64,
) -> Result<(), Error> {
    let end = base.offset_bytes(size);
    let path = directory.join(format!("mem.{:x}.{:x}.bin", base.0, end.0));
    let mut out = File::create(&path)?;
    let mut offset = 0u64;
    let mut buffer = vec![0u8; CHUNK_SIZE as usize];
    while offset < size {
        let want = (size - offset).min(CHUNK_SIZE) as usize;
        match mem.read_at(&mut buffer[..want], base.0 + offset) {
            Ok(0) => break,
            Ok(read) => {
                out.write_all(&buffer[..read])?;
                offset += read as u64;
            }
            Err(err) => {
                warn!("region at {} truncated at {:#x}: {}", base, offset, err);
                break;
            }
        }
    }
    // The file name promises `end - start` bytes; rename to the bytes we
    // actually got so the reader accepts it.
    if offset < size {
        let actual = directory.join(format!(
            "mem.{:x}.{:x}.bin",
            base.0,
            base.offset_bytes(offset).0
        ));
        fs::rename(&path, &actual)?;
    }
    Ok(())
}

/// Pauses `pid` and writes its readable memory as a directory-form
/// snapshot. `max_threads` of 0 means one writer per CPU's worth: a small
/// fixed pool.
pub fn dump(pid: u32, directory: &Path, max_threads: usize) -> Result<(), Error> {
    if !directory.is_dir() {
        fs::create_dir_all(directory)?;
    }
    let _pause = ProcessPauseGuard::new(pid)?;
    let ranges = ranges_for_pid(pid)?;
    let total: u64 = ranges.iter().map(|(_, size)| size).sum();

    let mem = Arc::new(
        File::open(format!("/proc/{}/mem", pid))
            .with_context(|_| format!("cannot open memory of process {}", pid))?,
    );
    let workers = if max_threads == 0 { 4 } else { max_threads };
    let next = Arc::new(AtomicUsize::new(0));
    let ranges = Arc::new(ranges);
    let mut handles = vec![];
    for _ in 0..workers.min(ranges.len().max(1)) {
        let mem = Arc::clone(&mem);
        let next = Arc::clone(&next);
        let ranges = Arc::clone(&ranges);
        let directory = directory.to_path_buf();
        handles.push(thread::spawn(move || {
            loop {
                let index = next.fetch_add(1, Ordering::SeqCst);
                if index >= ranges.len() {
                    break;
                }
                let (base, size) = ranges[index];
                if let Err(err) = copy_region(&mem, &directory, base, size) {
                    warn!("failed to copy region at {}: {}", base, err);
                }
            }
        }));
    }
    for handle in handles {
        handle
            .join()
            .map_err(|_| format_err!("a region writer panicked"))?;
    }
    info!("dumped {} bytes in {} ranges", total, ranges.len());
    Ok(())
}
