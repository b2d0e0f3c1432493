//! UDP-Chat-Dienst: Empfang, Autorisierung und Fan-out
//!
//! Der Dienst kennt keine Verbindungen. Jedes eingehende Datagramm wird
//! fuer sich dekodiert und gegen den Token-Dienst geprueft; alles
//! Ungueltige wird kommentarlos verworfen (nur Log, keine Antwort an den
//! Absender). Das erste gueltige Datagramm eines Teilnehmers registriert
//! nebenbei seinen UDP-Endpunkt fuer den Rueckweg.
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! ChatDatagramm::dekodieren()      <- Rahmen-Validierung
//!     |
//!     v
//! TokenVerwaltung::validieren()    <- Token + Absender-IP
//!     |
//!     v
//! Endpunkt-Registrierung           <- Token -> SocketAddr
//!     |
//!     +--> rundsenden() an alle Raum-Teilnehmer mit bekanntem Endpunkt
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use klatsch_auth::TokenVerwaltung;
use klatsch_core::{MitgliedschaftsEreignis, Token};
use klatsch_protocol::chat::{ChatDatagramm, NachrichtenTyp, ServerDatagramm, MAX_CLIENT_DATAGRAMM};
use klatsch_rooms::RaumRegistry;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Gemeinsame Karte der zuletzt gesehenen UDP-Endpunkte je Token
///
/// Wird vom Chat-Dienst befuellt. Geleert wird sie ueberall dort, wo
/// Token widerrufen werden: beim Verlassen, beim Sweep und beim
/// Raum-Abbau waehrend eines Beitrittsversuchs. Ein widerrufenes Token
/// darf keinen Eintrag zuruecklassen, sonst waechst die Karte unbegrenzt.
#[derive(Clone, Default)]
pub struct EndpunktKarte {
    eintraege: Arc<DashMap<Token, SocketAddr>>,
}

impl EndpunktKarte {
    /// Erstellt eine leere Karte
    pub fn neu() -> Self {
        Self::default()
    }

    /// Merkt sich den Endpunkt eines Tokens (ueberschreibt den alten)
    pub fn einfuegen(&self, token: Token, adresse: SocketAddr) {
        self.eintraege.insert(token, adresse);
    }

    /// Entfernt den Eintrag eines Tokens
    pub fn entfernen(&self, token: &Token) {
        self.eintraege.remove(token);
    }

    /// Zuletzt gesehener Endpunkt des Tokens
    pub fn adresse_von(&self, token: &Token) -> Option<SocketAddr> {
        self.eintraege.get(token).map(|eintrag| *eintrag.value())
    }

    /// Anzahl registrierter Endpunkte
    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

/// Der UDP-Dienst fuer den Chat-Kanal
///
/// Clone gibt ein Handle auf dieselben geteilten Dienste.
#[derive(Clone)]
pub struct BroadcastDienst {
    socket: Arc<UdpSocket>,
    registry: RaumRegistry,
    token_verwaltung: TokenVerwaltung,
    /// Geteilt mit Control-Dienst und Sweep
    endpunkte: EndpunktKarte,
    /// Urheber-Name fuer System-Benachrichtigungen
    server_name: String,
}

impl BroadcastDienst {
    /// Erstellt den Dienst ueber einem bereits gebundenen Socket
    pub fn neu(
        socket: Arc<UdpSocket>,
        registry: RaumRegistry,
        token_verwaltung: TokenVerwaltung,
        endpunkte: EndpunktKarte,
        server_name: String,
    ) -> Self {
        Self {
            socket,
            registry,
            token_verwaltung,
            endpunkte,
            server_name,
        }
    }

    /// Startet die Empfangs-Loop (laeuft bis `shutdown_rx` ein Signal sendet)
    pub async fn empfangs_loop_starten(&self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut buf = [0u8; MAX_CLIENT_DATAGRAMM];

        info!("Chat-Empfangs-Loop gestartet");
        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, absender)) => {
                            self.datagramm_verarbeiten(&buf[..len], absender).await;
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            // Busy-Loop bei persistentem Fehler vermeiden
                            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    info!("Chat-Dienst: Shutdown-Signal empfangen");
                    break;
                }
            }
        }
        info!("Chat-Empfangs-Loop beendet");
    }

    /// Konsumiert Mitgliedschafts-Ereignisse und sendet Hinweise in die Raeume
    pub async fn ereignis_loop_starten(
        &self,
        mut ereignisse: mpsc::UnboundedReceiver<MitgliedschaftsEreignis>,
    ) {
        while let Some(ereignis) = ereignisse.recv().await {
            match ereignis {
                MitgliedschaftsEreignis::Beigetreten {
                    raum_name,
                    benutzername,
                    ..
                } => {
                    let hinweis = ServerDatagramm {
                        typ: NachrichtenTyp::BenutzerBeitritt,
                        benutzername: self.server_name.clone(),
                        text: format!("{benutzername} hat den Raum betreten"),
                    };
                    self.rundsenden(&raum_name, &hinweis).await;
                }
                MitgliedschaftsEreignis::Verlassen {
                    raum_name,
                    benutzername,
                    token,
                } => {
                    self.endpunkte.entfernen(&token);
                    let hinweis = ServerDatagramm {
                        typ: NachrichtenTyp::BenutzerAustritt,
                        benutzername: self.server_name.clone(),
                        text: format!("{benutzername} hat den Raum verlassen"),
                    };
                    self.rundsenden(&raum_name, &hinweis).await;
                }
            }
        }
        debug!("Ereignis-Loop beendet, Sender geschlossen");
    }

    // -----------------------------------------------------------------------
    // Internes Datagramm-Processing
    // -----------------------------------------------------------------------

    /// Prueft ein eingehendes Datagramm und faechert es in den Raum auf
    async fn datagramm_verarbeiten(&self, daten: &[u8], absender: SocketAddr) {
        let datagramm = match ChatDatagramm::dekodieren(daten) {
            Ok(d) => d,
            Err(e) => {
                debug!(absender = %absender, fehler = %e, "Ungueltiges Chat-Datagramm verworfen");
                return;
            }
        };

        let token = Token::neu(datagramm.token);
        let bindung = match self.token_verwaltung.validieren(&token, absender.ip()).await {
            Some(b) => b,
            None => {
                debug!(absender = %absender, token = %token, "Unautorisiertes Datagramm verworfen");
                return;
            }
        };

        // Raum im Datagramm muss zur Token-Bindung passen
        if bindung.raum_name != datagramm.raum_name {
            debug!(
                absender = %absender,
                gebunden = %bindung.raum_name,
                angegeben = %datagramm.raum_name,
                "Datagramm fuer fremden Raum verworfen"
            );
            return;
        }

        // Endpunkt fuer den Rueckweg merken (jedes Datagramm aktualisiert)
        self.endpunkte.einfuegen(token, absender);

        let nachricht = ServerDatagramm {
            typ: NachrichtenTyp::Chat,
            benutzername: bindung.benutzername,
            text: datagramm.text,
        };
        self.rundsenden(&bindung.raum_name, &nachricht).await;
    }

    /// Sendet ein Datagramm an alle Raum-Teilnehmer mit bekanntem Endpunkt
    ///
    /// Sendefehler einzelner Empfaenger werden geloggt und uebersprungen;
    /// sie beeintraechtigen die uebrigen Empfaenger nicht.
    async fn rundsenden(&self, raum_name: &str, datagramm: &ServerDatagramm) {
        let bytes = match datagramm.kodieren() {
            Ok(b) => b,
            Err(e) => {
                warn!(raum = %raum_name, fehler = %e, "Datagramm nicht kodierbar, verworfen");
                return;
            }
        };

        let token = self.registry.teilnehmer_token(raum_name).await;
        let mut gesendet = 0usize;
        for t in &token {
            let ziel = match self.endpunkte.adresse_von(t) {
                Some(ziel) => ziel,
                None => continue,
            };
            match self.socket.send_to(&bytes, ziel).await {
                Ok(_) => gesendet += 1,
                Err(e) => {
                    warn!(ziel = %ziel, fehler = %e, "UDP-Sendefehler, Empfaenger uebersprungen");
                }
            }
        }
        trace!(
            raum = %raum_name,
            teilnehmer = token.len(),
            gesendet,
            "Datagramm rundgesendet"
        );
    }
}
