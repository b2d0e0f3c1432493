//! klatsch-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;
pub mod tcp;
pub mod udp;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use klatsch_auth::TokenVerwaltung;
use klatsch_rooms::RaumRegistry;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::oneshot;

use config::ServerConfig;
use tcp::RaumControlDienst;
use udp::{BroadcastDienst, EndpunktKarte};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet beide Dienste und laeuft bis zum Shutdown-Signal
    ///
    /// Scheitert einer der beiden Binds, startet der Server gar nicht.
    /// Faellt spaeter einer der Dienst-Tasks aus, wird der gesamte Server
    /// beendet statt halb weiterzulaufen.
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            udp = %self.config.udp_bind_adresse(),
            "Server startet"
        );

        let tcp_listener = TcpListener::bind(self.config.tcp_bind_adresse())
            .await
            .with_context(|| {
                format!("TCP-Bind auf {} fehlgeschlagen", self.config.tcp_bind_adresse())
            })?;
        let udp_socket = Arc::new(
            UdpSocket::bind(self.config.udp_bind_adresse())
                .await
                .with_context(|| {
                    format!("UDP-Bind auf {} fehlgeschlagen", self.config.udp_bind_adresse())
                })?,
        );

        let (registry, ereignisse) = RaumRegistry::neu();
        let token_verwaltung = TokenVerwaltung::neu(registry.clone());
        let endpunkte = EndpunktKarte::neu();

        let control = RaumControlDienst::neu(
            registry.clone(),
            token_verwaltung.clone(),
            endpunkte.clone(),
            Duration::from_secs(self.config.raeume.anfrage_timeout_sekunden),
        );
        let broadcast = BroadcastDienst::neu(
            Arc::clone(&udp_socket),
            registry.clone(),
            token_verwaltung.clone(),
            endpunkte.clone(),
            self.config.server.name.clone(),
        );

        let mut tcp_task = tokio::spawn(async move { control.starten(tcp_listener).await });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let empfangs_dienst = broadcast.clone();
        let mut udp_task = tokio::spawn(async move {
            empfangs_dienst.empfangs_loop_starten(shutdown_rx).await;
        });

        let ereignis_dienst = broadcast.clone();
        let ereignis_task = tokio::spawn(async move {
            ereignis_dienst.ereignis_loop_starten(ereignisse).await;
        });

        let sweep_task = tokio::spawn(sweep_loop(
            registry.clone(),
            token_verwaltung.clone(),
            endpunkte.clone(),
            Duration::from_secs(self.config.raeume.sweep_intervall_sekunden),
        ));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::select! {
            ergebnis = &mut tcp_task => {
                match ergebnis {
                    Ok(Ok(())) => tracing::error!("TCP-Dienst unerwartet beendet"),
                    Ok(Err(e)) => tracing::error!(fehler = %e, "TCP-Dienst ausgefallen"),
                    Err(e) => tracing::error!(fehler = %e, "TCP-Task abgestuerzt"),
                }
            }
            ergebnis = &mut udp_task => {
                match ergebnis {
                    Ok(()) => tracing::error!("UDP-Dienst unerwartet beendet"),
                    Err(e) => tracing::error!(fehler = %e, "UDP-Task abgestuerzt"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            }
        }

        // Geordneter Abbau: UDP-Loop ueber das Signal, der Rest per Abort
        let _ = shutdown_tx.send(());
        tcp_task.abort();
        sweep_task.abort();
        ereignis_task.abort();
        // Nicht erneut pollen wenn der Select ueber den UDP-Zweig endete
        if !udp_task.is_finished() {
            let _ = udp_task.await;
        }

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Entfernt periodisch hostlose Raeume samt ihrer Token und Endpunkte
async fn sweep_loop(
    registry: RaumRegistry,
    token_verwaltung: TokenVerwaltung,
    endpunkte: EndpunktKarte,
    intervall: Duration,
) {
    let mut ticker = tokio::time::interval(intervall);
    // Erster Tick feuert sofort, den ueberspringen wir
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let verwaiste = registry.inaktive_bereinigen().await;
        if verwaiste.is_empty() {
            continue;
        }
        tracing::info!(anzahl = verwaiste.len(), "Verwaiste Token nach Sweep widerrufen");
        token_verwaltung.alle_widerrufen(&verwaiste).await;
        for token in &verwaiste {
            endpunkte.entfernen(token);
        }
    }
}
