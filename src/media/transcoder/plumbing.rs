// OS plumbing for the mux strategies: fd-passed pipes, FIFOs, scratch files

use std::io;
use std::path::Path;

use tempfile::NamedTempFile;

/// Scratch file that is removed when dropped
pub(crate) fn scratch_file(dir: &Path, role: &str, suffix: &str) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!("tubemux-{}-", role))
        .suffix(suffix)
        .tempfile_in(dir)
}

/// Async handle for writing to a scratch file
pub(crate) fn scratch_writer(file: &NamedTempFile) -> io::Result<tokio::fs::File> {
    Ok(tokio::fs::File::from_std(file.as_file().try_clone()?))
}

#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(unix)]
mod unix {
    use super::*;

    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::path::PathBuf;
    use std::time::Duration;

    use nix::sys::stat::Mode;
    use tempfile::TempDir;
    use tokio::net::unix::pipe;
    use tokio::process::Command;
    use tokio_util::sync::CancellationToken;

    use crate::media::transcoder::feeder::FeedError;

    /// Descriptors at or above this never collide with the child's targets
    const RAISED_FD_FLOOR: RawFd = 10;

    /// How often to retry opening a FIFO the tool has not opened yet
    const FIFO_OPEN_RETRY: Duration = Duration::from_millis(20);

    /// Anonymous pipe whose read end is handed to the child
    pub(crate) struct FdPipe {
        pub read: OwnedFd,
        pub write: OwnedFd,
    }

    impl FdPipe {
        /// Both ends close-on-exec; the read end raised out of the low fd range
        pub fn new() -> io::Result<Self> {
            let (read, write) = cloexec_pipe()?;
            Ok(Self {
                read: raise_fd(read)?,
                write,
            })
        }

        pub fn sender(write: OwnedFd) -> io::Result<pipe::Sender> {
            pipe::Sender::from_owned_fd(write)
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        Ok(nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
        let (read, write) = nix::unistd::pipe()?;
        Ok((raise_fd(read)?, raise_fd(write)?))
    }

    /// Duplicate `fd` to the lowest free descriptor >= RAISED_FD_FLOOR, close-on-exec
    fn raise_fd(fd: OwnedFd) -> io::Result<OwnedFd> {
        // SAFETY: fcntl on a descriptor we own; the result is a fresh descriptor
        let raised = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, RAISED_FD_FLOOR) };
        if raised < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raised` was just returned by fcntl and is owned by nobody else
        Ok(unsafe { OwnedFd::from_raw_fd(raised) })
    }

    /// Make each `(source, target)` descriptor pair visible to the child as `target`
    ///
    /// dup2 clears close-on-exec on the target, so only these descriptors
    /// survive into the tool.
    pub(crate) fn map_fds(cmd: &mut Command, mapping: [(RawFd, RawFd); 2]) {
        // SAFETY: only async-signal-safe dup2 runs between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                for (source, target) in mapping {
                    if libc::dup2(source, target) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    /// Two FIFOs in a private scratch directory; dropping removes all of it
    pub(crate) struct FifoPair {
        _dir: TempDir,
        pub video: PathBuf,
        pub audio: PathBuf,
    }

    impl FifoPair {
        pub fn create(scratch_dir: &Path, session_id: &str) -> io::Result<Self> {
            let dir = tempfile::Builder::new()
                .prefix("tubemux-fifo-")
                .tempdir_in(scratch_dir)?;
            let video = dir.path().join(format!("video_{}.fifo", session_id));
            let audio = dir.path().join(format!("audio_{}.fifo", session_id));

            let mode = Mode::S_IRUSR | Mode::S_IWUSR;
            nix::unistd::mkfifo(&video, mode)?;
            nix::unistd::mkfifo(&audio, mode)?;

            Ok(Self {
                _dir: dir,
                video,
                audio,
            })
        }
    }

    /// Open the write side of a FIFO once the tool has opened it for reading
    ///
    /// A non-blocking open fails with ENXIO until a reader exists, so this
    /// polls until it succeeds or the session is cancelled.
    pub(crate) async fn open_fifo_writer(
        path: &Path,
        token: &CancellationToken,
    ) -> Result<pipe::Sender, FeedError> {
        loop {
            match pipe::OpenOptions::new().open_sender(path) {
                Ok(sender) => return Ok(sender),
                Err(err) if err.raw_os_error() == Some(libc::ENXIO) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(FeedError::Cancelled),
                        _ = tokio::time::sleep(FIFO_OPEN_RETRY) => {}
                    }
                }
                Err(err) => return Err(FeedError::Sink(err)),
            }
        }
    }
}
