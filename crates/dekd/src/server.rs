//! Control socket: JSON-lines request/response over a Unix domain socket

use anyhow::Result;
use dek_core::proto::{decode_line, encode_line, DekRequest, DekResponse};
use dek_core::{DekError, DekResult, ErrorKind, Kek, PersonaId};
use dek_crypto::CryptoBackend;
use dek_keystore::{DekManager, PersonaRegistry};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::metrics::DekMetrics;

/// Longest accepted request line. The largest request carries two 516-byte
/// KEKs in base64, well under this.
const MAX_LINE_LEN: usize = 16 * 1024;

/// Persona registry file kept in step with boot/add/remove
pub struct RegistryFile {
    path: PathBuf,
    registry: Mutex<PersonaRegistry>,
}

impl RegistryFile {
    pub fn new(path: PathBuf, registry: PersonaRegistry) -> Self {
        Self {
            path,
            registry: Mutex::new(registry),
        }
    }

    /// Write `change` to disk, then run `op` with the registry still held.
    ///
    /// The file is restored if `op` fails, and `op` never runs if the file
    /// cannot be written. Holding the registry across both keeps the order
    /// of file updates equal to the order of table updates.
    fn commit<T>(
        &self,
        change: RegistryChange,
        op: impl FnOnce() -> DekResult<T>,
    ) -> DekResult<T> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let previous = registry.clone();
        change.apply_to(&mut registry);

        if let Err(e) = registry.save(&self.path) {
            *registry = previous;
            return Err(DekError::Io(std::io::Error::other(format!(
                "persona registry save failed: {e:#}"
            ))));
        }

        let result = op();
        if result.is_err() {
            *registry = previous;
            if let Err(e) = registry.save(&self.path) {
                error!("persona registry restore failed: {e:#}");
            }
        }
        result
    }
}

enum RegistryChange {
    Upsert(PersonaId, Kek),
    Remove(PersonaId),
}

impl RegistryChange {
    fn for_request(req: &DekRequest) -> Option<Self> {
        match req {
            DekRequest::OnBoot {
                persona_id,
                public_kek,
            }
            | DekRequest::OnUserAdded {
                persona_id,
                public_kek,
            } => Some(RegistryChange::Upsert(*persona_id, public_kek.clone())),
            DekRequest::OnUserRemoved { persona_id } => Some(RegistryChange::Remove(*persona_id)),
            _ => None,
        }
    }

    fn apply_to(self, registry: &mut PersonaRegistry) {
        match self {
            RegistryChange::Upsert(id, public) => registry.upsert(id, public),
            RegistryChange::Remove(id) => {
                registry.remove(id);
            }
        }
    }
}

/// Request handler shared by all connections
pub struct ControlServer<B> {
    manager: Arc<DekManager<B>>,
    registry: Option<RegistryFile>,
    metrics: DekMetrics,
}

impl<B: CryptoBackend + 'static> ControlServer<B> {
    pub fn new(
        manager: Arc<DekManager<B>>,
        registry: Option<RegistryFile>,
        metrics: DekMetrics,
    ) -> Self {
        metrics.set_personas(manager.list_personas().len());
        Self {
            manager,
            registry,
            metrics,
        }
    }

    /// Decode, run and answer one request line.
    pub fn handle_line(&self, line: &str) -> DekResponse {
        let req: DekRequest = match decode_line(line) {
            Ok(req) => req,
            Err(e) => {
                self.metrics.observe("unknown", ErrorKind::InvalidArgument.as_str());
                return DekResponse::Error {
                    kind: ErrorKind::InvalidArgument,
                    message: e.to_string(),
                };
            }
        };

        let op = req.name();
        let persona = req.persona_id();

        match self.run(req) {
            Ok(resp) => {
                debug!(op, ?persona, "request ok");
                self.metrics.observe(op, "ok");
                if change_affects_table(op) {
                    self.metrics.set_personas(self.manager.list_personas().len());
                }
                resp
            }
            Err(e) => {
                info!(op, ?persona, kind = e.kind().as_str(), "request failed: {e}");
                self.metrics.observe(op, e.kind().as_str());
                DekResponse::from(&e)
            }
        }
    }

    fn run(&self, req: DekRequest) -> DekResult<DekResponse> {
        match (&self.registry, RegistryChange::for_request(&req)) {
            (Some(file), Some(change)) => file.commit(change, || self.manager.dispatch(req)),
            _ => self.manager.dispatch(req),
        }
    }
}

fn change_affects_table(op: &str) -> bool {
    matches!(op, "on_boot" | "on_user_added" | "on_user_removed")
}

/// Accept connections on `socket_path` until the listener fails.
pub async fn serve<B: CryptoBackend + 'static>(
    socket_path: &Path,
    server: Arc<ControlServer<B>>,
) -> Result<()> {
    // Remove stale socket if it exists
    if socket_path.exists() {
        tokio::fs::remove_file(socket_path).await?;
    }

    // Create parent directory if needed
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let listener = UnixListener::bind(socket_path)
        .map_err(|e| anyhow::anyhow!("binding {}: {e}", socket_path.display()))?;

    info!(socket = %socket_path.display(), "control socket ready");

    loop {
        let (stream, _) = listener.accept().await?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, server).await {
                warn!("control connection closed: {e}");
            }
        });
    }
}

async fn handle_connection<B: CryptoBackend + 'static>(
    stream: UnixStream,
    server: Arc<ControlServer<B>>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                server.metrics.observe("unknown", ErrorKind::InvalidArgument.as_str());
                let resp = DekResponse::Error {
                    kind: ErrorKind::InvalidArgument,
                    message: format!("request line exceeds {MAX_LINE_LEN} bytes"),
                };
                writer.write_all(encode_line(&resp)?.as_bytes()).await?;
                warn!("oversized request line, closing control connection");
                return Ok(());
            }
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let resp = server.handle_line(&line);
        writer.write_all(encode_line(&resp)?.as_bytes()).await?;
    }
    Ok(())
}
