//! TCP-Control-Dienst: eine TCRP-Transaktion pro Verbindung
//!
//! Der Dienst akzeptiert Verbindungen, liest genau eine Anfrage
//! (REQUEST), beantwortet sie (RESPONSE) und stellt bei Erfolg ein Token
//! aus (COMPLETION). Danach wird die Verbindung geschlossen; Clients
//! oeffnen fuer jede Operation eine frische Verbindung.

use std::time::Duration;

use klatsch_auth::TokenVerwaltung;
use klatsch_core::KlatschError;
use klatsch_protocol::tcrp::{
    self, nachricht_lesen, nachricht_schreiben, Operation, StatusCode, TcrpNachricht,
    TcrpPayload, Zustand,
};
use klatsch_rooms::RaumRegistry;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::udp::EndpunktKarte;

/// Der TCP-Dienst fuer Raum-Erstellung und -Beitritt
///
/// Clone gibt ein Handle auf dieselben geteilten Dienste.
#[derive(Clone)]
pub struct RaumControlDienst {
    registry: RaumRegistry,
    token_verwaltung: TokenVerwaltung,
    endpunkte: EndpunktKarte,
    anfrage_timeout: Duration,
}

impl RaumControlDienst {
    /// Erstellt den Dienst ueber den geteilten Zustands-Handles
    pub fn neu(
        registry: RaumRegistry,
        token_verwaltung: TokenVerwaltung,
        endpunkte: EndpunktKarte,
        anfrage_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            token_verwaltung,
            endpunkte,
            anfrage_timeout,
        }
    }

    /// Accept-Loop: behandelt jede Verbindung in einem eigenen Task
    ///
    /// Laeuft bis der Listener einen Fehler liefert.
    pub async fn starten(self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let dienst = self.clone();
            tokio::spawn(async move {
                debug!(adresse = %addr, "TCP-Verbindung angenommen");
                dienst.verbindung_behandeln(stream).await;
            });
        }
    }

    /// Wickelt genau eine TCRP-Transaktion ab
    async fn verbindung_behandeln(&self, mut stream: TcpStream) {
        let addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(fehler = %e, "Peer-Adresse nicht ermittelbar");
                return;
            }
        };

        let anfrage =
            match tokio::time::timeout(self.anfrage_timeout, nachricht_lesen(&mut stream)).await {
                Ok(Ok(nachricht)) => nachricht,
                Ok(Err(e)) => {
                    debug!(adresse = %addr, fehler = %e, "Ungueltige oder abgebrochene Anfrage");
                    return;
                }
                Err(_) => {
                    debug!(adresse = %addr, "Anfrage-Timeout, Verbindung geschlossen");
                    return;
                }
            };

        if anfrage.zustand != Zustand::Anfrage {
            warn!(
                adresse = %addr,
                zustand = ?anfrage.zustand,
                "Unerwarteter Zustand vom Client, Verbindung geschlossen"
            );
            return;
        }

        // Anfrage-Nutzlast muss die strukturierte Form tragen
        let (benutzername, passwort) = match anfrage.payload {
            TcrpPayload::Anfrage {
                ref username,
                ref password,
            } => (username.clone(), password.clone()),
            ref andere => {
                debug!(adresse = %addr, payload = ?andere, "Fehlgeformte Anfrage-Nutzlast");
                let antwort = antwort_bauen(
                    &anfrage,
                    StatusCode::ServerFehler,
                    "Anfrage-Nutzlast nicht lesbar",
                );
                antwort_senden(&mut stream, &antwort).await;
                return;
            }
        };

        match anfrage.operation {
            Operation::RaumErstellen => {
                self.erstellen_behandeln(&mut stream, &anfrage, &benutzername, passwort, addr.ip())
                    .await;
            }
            Operation::RaumBeitreten => {
                self.beitreten_behandeln(&mut stream, &anfrage, &benutzername, passwort, addr.ip())
                    .await;
            }
        }
    }

    /// CREATE_ROOM: Raum anlegen, Host eintragen, Token ausstellen
    async fn erstellen_behandeln(
        &self,
        stream: &mut TcpStream,
        anfrage: &TcrpNachricht,
        benutzername: &str,
        passwort: Option<String>,
        ip: std::net::IpAddr,
    ) {
        let raum_name = &anfrage.raum_name;

        if let Err(fehler) = self
            .registry
            .erstellen(raum_name, benutzername, ip, passwort)
            .await
        {
            let antwort = tcrp::raum_erstellen_antwort(
                raum_name,
                status_fuer_fehler(&fehler),
                &fehler.to_string(),
            );
            antwort_senden(stream, &antwort).await;
            return;
        }

        let antwort = tcrp::raum_erstellen_antwort(raum_name, StatusCode::Erfolg, "Raum angelegt");
        if !antwort_senden(stream, &antwort).await {
            return;
        }

        let token = self
            .token_verwaltung
            .ausstellen(raum_name, benutzername, ip)
            .await;
        if let Err(fehler) = self
            .registry
            .teilnehmer_hinzufuegen(raum_name, token.clone(), benutzername, ip)
            .await
        {
            // Token nicht haengen lassen wenn der Eintrag scheitert
            warn!(raum = %raum_name, fehler = %fehler, "Host-Eintrag fehlgeschlagen");
            self.token_verwaltung.widerrufen(&token).await;
            return;
        }

        info!(raum = %raum_name, host = %benutzername, "Raum erstellt und Host eingetragen");
        let abschluss = tcrp::raum_erstellen_abschluss(raum_name, token.als_str(), benutzername);
        antwort_senden(stream, &abschluss).await;
    }

    /// JOIN_ROOM: Beitritt pruefen, Teilnehmer eintragen, Token ausstellen
    async fn beitreten_behandeln(
        &self,
        stream: &mut TcpStream,
        anfrage: &TcrpNachricht,
        benutzername: &str,
        passwort: Option<String>,
        ip: std::net::IpAddr,
    ) {
        let raum_name = &anfrage.raum_name;

        if let Err(beitritt_fehler) = self
            .registry
            .beitritt_pruefen(raum_name, benutzername, passwort.as_deref())
            .await
        {
            // Ein nebenbei abgebauter Raum hinterlaesst verwaiste Token;
            // ihre Endpunkt-Eintraege muessen mit raus
            self.token_verwaltung
                .alle_widerrufen(&beitritt_fehler.verwaiste_token)
                .await;
            for token in &beitritt_fehler.verwaiste_token {
                self.endpunkte.entfernen(token);
            }
            let antwort = tcrp::raum_beitreten_antwort(
                raum_name,
                status_fuer_fehler(&beitritt_fehler.fehler),
                &beitritt_fehler.fehler.to_string(),
            );
            antwort_senden(stream, &antwort).await;
            return;
        }

        let antwort = tcrp::raum_beitreten_antwort(raum_name, StatusCode::Erfolg, "Beitritt erlaubt");
        if !antwort_senden(stream, &antwort).await {
            return;
        }

        let token = self
            .token_verwaltung
            .ausstellen(raum_name, benutzername, ip)
            .await;
        let (host, anzahl) = match self
            .registry
            .teilnehmer_hinzufuegen(raum_name, token.clone(), benutzername, ip)
            .await
        {
            Ok(ergebnis) => ergebnis,
            Err(fehler) => {
                warn!(raum = %raum_name, fehler = %fehler, "Beitritts-Eintrag fehlgeschlagen");
                self.token_verwaltung.widerrufen(&token).await;
                return;
            }
        };

        info!(raum = %raum_name, benutzer = %benutzername, anzahl, "Teilnehmer beigetreten");
        let abschluss =
            tcrp::raum_beitreten_abschluss(raum_name, token.als_str(), &host, anzahl as u32);
        antwort_senden(stream, &abschluss).await;
    }
}

/// Baut eine RESPONSE mit der Operation der eingegangenen Anfrage
fn antwort_bauen(anfrage: &TcrpNachricht, status: StatusCode, text: &str) -> TcrpNachricht {
    match anfrage.operation {
        Operation::RaumErstellen => tcrp::raum_erstellen_antwort(&anfrage.raum_name, status, text),
        Operation::RaumBeitreten => tcrp::raum_beitreten_antwort(&anfrage.raum_name, status, text),
    }
}

/// Sendet eine Nachricht; Sendefehler beenden die Transaktion
async fn antwort_senden(stream: &mut TcpStream, nachricht: &TcrpNachricht) -> bool {
    match nachricht_schreiben(stream, nachricht).await {
        Ok(()) => true,
        Err(e) => {
            debug!(fehler = %e, "TCP-Sendefehler, Transaktion abgebrochen");
            false
        }
    }
}

/// Bildet einen Dienst-Fehler auf den Draht-Status ab
fn status_fuer_fehler(fehler: &KlatschError) -> StatusCode {
    match fehler {
        KlatschError::RaumExistiert(_) => StatusCode::RaumExistiert,
        KlatschError::RaumNichtGefunden(_) => StatusCode::RaumNichtGefunden,
        KlatschError::RaumVoll(_) => StatusCode::RaumVoll,
        KlatschError::UngueltigerBenutzername => StatusCode::UngueltigerBenutzername,
        KlatschError::UngueltigerRaumname => StatusCode::UngueltigerName,
        KlatschError::NichtAutorisiert => StatusCode::NichtAutorisiert,
        KlatschError::Intern(_) | KlatschError::Anyhow(_) => StatusCode::ServerFehler,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    struct Aufbau {
        addr: std::net::SocketAddr,
        registry: RaumRegistry,
        token_verwaltung: TokenVerwaltung,
        endpunkte: EndpunktKarte,
    }

    async fn dienst_starten() -> Aufbau {
        let (registry, _rx) = RaumRegistry::neu();
        let token_verwaltung = TokenVerwaltung::neu(registry.clone());
        let endpunkte = EndpunktKarte::neu();
        let dienst = RaumControlDienst::neu(
            registry.clone(),
            token_verwaltung.clone(),
            endpunkte.clone(),
            Duration::from_secs(5),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = dienst.starten(listener).await;
        });
        Aufbau {
            addr,
            registry,
            token_verwaltung,
            endpunkte,
        }
    }

    async fn transaktion(
        addr: std::net::SocketAddr,
        anfrage: TcrpNachricht,
    ) -> (TcrpNachricht, Option<TcrpNachricht>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        nachricht_schreiben(&mut stream, &anfrage).await.unwrap();
        let antwort = nachricht_lesen(&mut stream).await.unwrap();
        let abschluss = nachricht_lesen(&mut stream).await.ok();
        (antwort, abschluss)
    }

    #[tokio::test]
    async fn raum_erstellen_liefert_token() {
        let aufbau = dienst_starten().await;

        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Alice", "Lobby", None),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::Erfolg,
                ..
            }
        ));
        let abschluss = abschluss.unwrap();
        assert_eq!(abschluss.zustand, Zustand::Abschluss);
        match abschluss.payload {
            TcrpPayload::ErstellungAbschluss {
                ref token,
                ref host_username,
                room_created,
            } => {
                assert!(!token.is_empty());
                assert_eq!(host_username, "Alice");
                assert!(room_created);
            }
            andere => panic!("Unerwartete Abschluss-Nutzlast: {andere:?}"),
        }
        assert_eq!(aufbau.registry.raum_anzahl().await, 1);
    }

    #[tokio::test]
    async fn doppelte_erstellung_liefert_raum_existiert() {
        let aufbau = dienst_starten().await;

        transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Alice", "Lobby", None),
        )
        .await;
        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Bob", "Lobby", None),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::RaumExistiert,
                ..
            }
        ));
        assert!(abschluss.is_none());
    }

    #[tokio::test]
    async fn beitritt_nach_erstellung() {
        let aufbau = dienst_starten().await;

        transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Alice", "Privat", Some("pw".into())),
        )
        .await;
        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_beitreten_anfrage("Bob", "Privat", Some("pw".into())),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::Erfolg,
                ..
            }
        ));
        match abschluss.unwrap().payload {
            TcrpPayload::BeitrittAbschluss {
                ref host_username,
                participant_count,
                room_joined,
                ..
            } => {
                assert_eq!(host_username, "Alice");
                assert_eq!(participant_count, 2);
                assert!(room_joined);
            }
            andere => panic!("Unerwartete Abschluss-Nutzlast: {andere:?}"),
        }
    }

    #[tokio::test]
    async fn beitritt_mit_falschem_passwort() {
        let aufbau = dienst_starten().await;

        transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Alice", "Privat", Some("pw".into())),
        )
        .await;
        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_beitreten_anfrage("Bob", "Privat", Some("falsch".into())),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::NichtAutorisiert,
                ..
            }
        ));
        assert!(abschluss.is_none());
    }

    #[tokio::test]
    async fn beitritt_zu_unbekanntem_raum() {
        let aufbau = dienst_starten().await;

        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_beitreten_anfrage("Bob", "Nirgendwo", None),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::RaumNichtGefunden,
                ..
            }
        ));
        assert!(abschluss.is_none());
    }

    #[tokio::test]
    async fn ungueltiger_raumname_abgelehnt() {
        let aufbau = dienst_starten().await;

        let (antwort, _) = transaktion(
            aufbau.addr,
            tcrp::raum_erstellen_anfrage("Alice", " lobby", None),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::UngueltigerName,
                ..
            }
        ));
        assert_eq!(aufbau.registry.raum_anzahl().await, 0);
    }

    #[tokio::test]
    async fn rohtext_anfrage_liefert_server_fehler() {
        let aufbau = dienst_starten().await;

        let anfrage = TcrpNachricht {
            raum_name: "Lobby".into(),
            operation: Operation::RaumErstellen,
            zustand: Zustand::Anfrage,
            payload: TcrpPayload::Rohtext("kein json".into()),
        };
        let (antwort, abschluss) = transaktion(aufbau.addr, anfrage).await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::ServerFehler,
                ..
            }
        ));
        assert!(abschluss.is_none());
    }

    #[tokio::test]
    async fn beitritts_abbau_raeumt_endpunkte_und_token_auf() {
        let aufbau = dienst_starten().await;
        let ip: std::net::IpAddr = "127.0.0.1".parse().unwrap();

        // Raum mit Host und einem weiteren Teilnehmer aufbauen
        aufbau
            .registry
            .erstellen("Lobby", "Alice", ip, None)
            .await
            .unwrap();
        let host_token = aufbau.token_verwaltung.ausstellen("Lobby", "Alice", ip).await;
        aufbau
            .registry
            .teilnehmer_hinzufuegen("Lobby", host_token.clone(), "Alice", ip)
            .await
            .unwrap();
        let bob_token = aufbau.token_verwaltung.ausstellen("Lobby", "Bob", ip).await;
        aufbau
            .registry
            .teilnehmer_hinzufuegen("Lobby", bob_token.clone(), "Bob", ip)
            .await
            .unwrap();

        // Bob hat bereits ein Chat-Datagramm gesendet und ist registriert
        aufbau
            .endpunkte
            .einfuegen(bob_token.clone(), "127.0.0.1:45000".parse().unwrap());

        // Host verlaesst den Raum; der naechste Beitrittsversuch baut ab
        aufbau.registry.teilnehmer_entfernen("Lobby", &host_token).await;
        let (antwort, abschluss) = transaktion(
            aufbau.addr,
            tcrp::raum_beitreten_anfrage("Carol", "Lobby", None),
        )
        .await;

        assert!(matches!(
            antwort.payload,
            TcrpPayload::Antwort {
                status_code: StatusCode::RaumNichtGefunden,
                ..
            }
        ));
        assert!(abschluss.is_none());
        assert_eq!(aufbau.registry.raum_anzahl().await, 0);
        // Verwaistes Token ist widerrufen und hinterlaesst keinen Endpunkt
        assert!(aufbau
            .token_verwaltung
            .validieren(&bob_token, ip)
            .await
            .is_none());
        assert!(aufbau.endpunkte.adresse_von(&bob_token).is_none());
        assert_eq!(aufbau.endpunkte.anzahl(), 0);
    }
}
