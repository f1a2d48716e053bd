//! Daemon lifecycle: key table setup, registry restore, systemd notify, control socket

use anyhow::Result;
use dek_core::config::DekConfig;
use dek_crypto::SoftwareEngine;
use dek_keystore::{DekManager, KeyStore, PersonaRegistry};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics::DekMetrics;
use crate::server::{ControlServer, RegistryFile};

pub async fn run(config: DekConfig) -> Result<()> {
    info!("daemon starting");

    let store = KeyStore::from_config(&config.keystore);
    info!(
        capacity = store.capacity(),
        max_persona_id = config.keystore.max_persona_id,
        "persona table ready"
    );
    let manager = Arc::new(DekManager::new(store, SoftwareEngine::new()));

    // ── Persona registry ─────────────────────────────────────────────────
    let registry_file = config.keystore.registry_path.clone().map(|path| {
        let registry = PersonaRegistry::load(&path).unwrap_or_else(|e| {
            warn!("persona registry load failed: {e:#} (starting empty)");
            PersonaRegistry::default()
        });
        registry.boot_into(&manager);
        RegistryFile::new(path, registry)
    });

    // Start Prometheus metrics endpoint
    let mut registry = Registry::default();
    let metrics = DekMetrics::register(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let registry = Arc::new(registry);
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, registry).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let server = Arc::new(ControlServer::new(manager, registry_file, metrics));

    // Send systemd ready notification
    notify_ready();

    crate::server::serve(&config.daemon.socket, server).await
}

fn notify_ready() {
    // $NOTIFY_SOCKET is only set under systemd Type=notify
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
