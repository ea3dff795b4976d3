use super::{FsClient, FsClientError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Error kind the daemon reports for methods it does not implement.
const UNKNOWN_METHOD: &str = "unknown_method";

#[derive(Debug, Serialize)]
struct Request<'a> {
    method: &'a str,
    checkout: &'a Path,
    repo_path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a Path>,
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    kind: String,
    message: String,
}

/// Talks to the daemon with one JSON request line and one JSON response line
/// per connection.
pub struct SocketFsClient {
    socket_path: PathBuf,
}

impl SocketFsClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into() }
    }

    fn call(&self, request: &Request<'_>) -> Result<(), FsClientError> {
        let line = self.round_trip(request)?;
        let response: Response = serde_json::from_str(&line)
            .map_err(|e| FsClientError::Transport(format!("malformed response: {}", e)))?;

        if response.ok {
            return Ok(());
        }

        match response.error {
            Some(err) if err.kind == UNKNOWN_METHOD => {
                Err(FsClientError::UnsupportedOperation(request.method.to_string()))
            }
            Some(err) => Err(FsClientError::Remote(err.message)),
            None => Err(FsClientError::Remote(format!("{} failed", request.method))),
        }
    }

    #[cfg(unix)]
    fn round_trip(&self, request: &Request<'_>) -> Result<String, FsClientError> {
        use std::io::{BufRead, BufReader, Write};
        use std::os::unix::net::UnixStream;

        let transport = |e: std::io::Error| {
            FsClientError::Transport(format!("{}: {}", self.socket_path.display(), e))
        };

        let mut stream = UnixStream::connect(&self.socket_path).map_err(transport)?;
        let mut payload = serde_json::to_vec(request)
            .map_err(|e| FsClientError::Transport(e.to_string()))?;
        payload.push(b'\n');
        stream.write_all(&payload).map_err(transport)?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).map_err(transport)?;
        Ok(line)
    }

    #[cfg(not(unix))]
    fn round_trip(&self, _request: &Request<'_>) -> Result<String, FsClientError> {
        Err(FsClientError::Transport("unix sockets are not available on this platform".into()))
    }
}

impl FsClient for SocketFsClient {
    fn add_bind_mount(
        &self,
        checkout: &Path,
        repo_path: &Path,
        target: &Path,
    ) -> Result<(), FsClientError> {
        tracing::debug!(
            "addBindMount {} {} -> {}",
            checkout.display(),
            repo_path.display(),
            target.display()
        );
        self.call(&Request { method: "addBindMount", checkout, repo_path, target: Some(target) })
    }

    fn remove_bind_mount(&self, checkout: &Path, repo_path: &Path) -> Result<(), FsClientError> {
        tracing::debug!("removeBindMount {} {}", checkout.display(), repo_path.display());
        self.call(&Request { method: "removeBindMount", checkout, repo_path, target: None })
    }
}
