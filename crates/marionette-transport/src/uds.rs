use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::endpoint::ChannelEndpoint;
use crate::error::{Result, TransportError};
use crate::stream::IpcStream;

/// Listening half of a channel endpoint over Unix domain sockets.
///
/// The agent side binds one listener per role; the controller side
/// only connects. The socket file is created mode 0600 and removed on
/// drop if its inode identity is unchanged.
pub struct ChannelListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl ChannelListener {
    /// Permission mode for created socket paths.
    const SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a channel endpoint.
    ///
    /// Creates the base directory if missing. A stale socket file at
    /// the path is removed first; any other existing file is an error.
    pub fn bind(endpoint: &ChannelEndpoint) -> Result<Self> {
        let path = endpoint.path();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        std::fs::create_dir_all(endpoint.base_dir()).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| TransportError::Bind {
                    path: path.clone(),
                    source: e,
                })?;
            } else {
                return Err(TransportError::Bind {
                    path: path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                });
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(|e| TransportError::Bind {
                path: path.clone(),
                source: e,
            })?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| TransportError::Bind {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, role = ?endpoint.role(), pid = endpoint.pid(), "channel endpoint listening");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted channel connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        if let Some((expected_dev, expected_ino)) = self.created_inode {
            if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
                if metadata.file_type().is_socket()
                    && metadata.dev() == expected_dev
                    && metadata.ino() == expected_ino
                {
                    debug!(path = ?self.path, "removing socket file");
                    let _ = std::fs::remove_file(&self.path);
                }
            }
        }
    }
}

/// Connect to a listening channel endpoint (blocking).
pub fn connect(endpoint: &ChannelEndpoint) -> Result<IpcStream> {
    let path = endpoint.path();
    let stream =
        std::os::unix::net::UnixStream::connect(&path).map_err(|e| TransportError::Connect {
            path: path.clone(),
            source: e,
        })?;
    debug!(?path, "connected to channel endpoint");
    Ok(IpcStream::from_unix(stream))
}
