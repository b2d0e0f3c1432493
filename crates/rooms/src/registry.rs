//! Die Raum-Registry: gemeinsame Wahrheitsquelle fuer TCP und UDP
//!
//! Alle Mutationen laufen unter einem `RwLock`; Pruefen-und-Einfuegen
//! geschieht atomar unter dem Write-Guard, damit zwei gleichzeitige
//! CREATE_ROOM-Anfragen fuer denselben Namen nicht beide durchgehen.
//!
//! Mitgliedschafts-Aenderungen werden zusaetzlich als
//! `MitgliedschaftsEreignis` ueber einen mpsc-Kanal publiziert, damit der
//! UDP-Dienst Beitritts- und Austritts-Hinweise an die Raeume senden kann.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use klatsch_core::{KlatschError, MitgliedschaftsEreignis, Token};
use klatsch_protocol::tcrp::{benutzername_gueltig, raumname_gueltig};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::raum::Raum;

/// Fehlgeschlagene Beitritts-Pruefung
///
/// Traegt neben dem eigentlichen Fehler die Token ein, die durch einen
/// Raum-Abbau verwaist sind; der Aufrufer muss sie beim Token-Dienst
/// widerrufen.
#[derive(Debug)]
pub struct BeitrittFehler {
    /// Grund der Ablehnung
    pub fehler: KlatschError,
    /// Token eines nebenbei abgebauten Raums (meist leer)
    pub verwaiste_token: Vec<Token>,
}

impl From<KlatschError> for BeitrittFehler {
    fn from(fehler: KlatschError) -> Self {
        Self {
            fehler,
            verwaiste_token: Vec::new(),
        }
    }
}

struct Inner {
    raeume: RwLock<HashMap<String, Raum>>,
    ereignisse: mpsc::UnboundedSender<MitgliedschaftsEreignis>,
}

/// Thread-sicheres Handle auf die Raum-Registry
///
/// Clone gibt eine Referenz auf denselben inneren Zustand.
#[derive(Clone)]
pub struct RaumRegistry {
    inner: Arc<Inner>,
}

impl RaumRegistry {
    /// Erstellt eine leere Registry samt Ereignis-Empfaenger
    pub fn neu() -> (Self, mpsc::UnboundedReceiver<MitgliedschaftsEreignis>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            inner: Arc::new(Inner {
                raeume: RwLock::new(HashMap::new()),
                ereignisse: tx,
            }),
        };
        (registry, rx)
    }

    // -----------------------------------------------------------------------
    // Raum-Lebenszyklus
    // -----------------------------------------------------------------------

    /// Legt einen neuen Raum an
    ///
    /// # Fehler
    /// - `UngueltigerRaumname` / `UngueltigerBenutzername` bei
    ///   Validierungsfehlern
    /// - `RaumExistiert` wenn der Name bereits vergeben ist
    pub async fn erstellen(
        &self,
        name: &str,
        host_benutzername: &str,
        host_ip: IpAddr,
        passwort: Option<String>,
    ) -> Result<(), KlatschError> {
        if !raumname_gueltig(name) {
            return Err(KlatschError::UngueltigerRaumname);
        }
        if !benutzername_gueltig(host_benutzername) {
            return Err(KlatschError::UngueltigerBenutzername);
        }

        let mut raeume = self.inner.raeume.write().await;
        if raeume.contains_key(name) {
            return Err(KlatschError::RaumExistiert(name.to_string()));
        }
        raeume.insert(
            name.to_string(),
            Raum::neu(
                name.to_string(),
                host_benutzername.to_string(),
                host_ip,
                passwort,
            ),
        );
        info!(raum = %name, host = %host_benutzername, "Raum angelegt");
        Ok(())
    }

    /// Prueft ob ein Beitritt zulaessig waere, ohne ihn durchzufuehren
    ///
    /// Findet die Pruefung heraus, dass der Host den Raum verlassen hat,
    /// wird der Raum sofort abgebaut und die verwaisten Token werden an
    /// den Aufrufer zurueckgegeben.
    pub async fn beitritt_pruefen(
        &self,
        raum_name: &str,
        benutzername: &str,
        passwort: Option<&str>,
    ) -> Result<(), BeitrittFehler> {
        if !benutzername_gueltig(benutzername) {
            return Err(KlatschError::UngueltigerBenutzername.into());
        }

        let mut raeume = self.inner.raeume.write().await;
        let pruefung = {
            let raum = raeume
                .get(raum_name)
                .ok_or_else(|| KlatschError::RaumNichtGefunden(raum_name.to_string()))?;
            if raum.ist_host_aktiv() {
                Some(raum.passwort_pruefen(passwort))
            } else {
                None
            }
        };

        match pruefung {
            // Host weg -> Raum sofort abbauen, Beitritt schlaegt fehl
            None => {
                let verwaiste_token: Vec<Token> = raeume
                    .remove(raum_name)
                    .map(|raum| raum.teilnehmer.into_keys().collect())
                    .unwrap_or_default();
                warn!(
                    raum = %raum_name,
                    verwaiste = verwaiste_token.len(),
                    "Host abwesend, Raum beim Beitrittsversuch abgebaut"
                );
                Err(BeitrittFehler {
                    fehler: KlatschError::RaumNichtGefunden(raum_name.to_string()),
                    verwaiste_token,
                })
            }
            Some(false) => Err(KlatschError::NichtAutorisiert.into()),
            Some(true) => Ok(()),
        }
    }

    /// Baut einen Raum ab und gibt alle Teilnehmer-Token zurueck
    pub async fn raum_abbauen(&self, raum_name: &str) -> Vec<Token> {
        let mut raeume = self.inner.raeume.write().await;
        match raeume.remove(raum_name) {
            Some(raum) => {
                info!(raum = %raum_name, teilnehmer = raum.teilnehmer.len(), "Raum abgebaut");
                raum.teilnehmer.into_keys().collect()
            }
            None => Vec::new(),
        }
    }

    /// Entfernt alle Raeume ohne aktiven Host
    ///
    /// Gibt die Token aller entfernten Teilnehmer zurueck, damit der
    /// Aufrufer sie widerrufen kann.
    pub async fn inaktive_bereinigen(&self) -> Vec<Token> {
        let mut raeume = self.inner.raeume.write().await;
        let tot: Vec<String> = raeume
            .iter()
            .filter(|(_, raum)| !raum.ist_host_aktiv())
            .map(|(name, _)| name.clone())
            .collect();

        let mut verwaiste = Vec::new();
        for name in tot {
            if let Some(raum) = raeume.remove(&name) {
                debug!(raum = %name, "Inaktiven Raum entfernt");
                verwaiste.extend(raum.teilnehmer.into_keys());
            }
        }
        verwaiste
    }

    // -----------------------------------------------------------------------
    // Teilnehmer
    // -----------------------------------------------------------------------

    /// Traegt einen Teilnehmer in einen Raum ein
    ///
    /// Gibt bei Erfolg Host-Benutzername und neue Teilnehmerzahl zurueck
    /// und publiziert ein `Beigetreten`-Ereignis.
    pub async fn teilnehmer_hinzufuegen(
        &self,
        raum_name: &str,
        token: Token,
        benutzername: &str,
        ip: IpAddr,
    ) -> Result<(String, usize), KlatschError> {
        let mut raeume = self.inner.raeume.write().await;
        let raum = raeume
            .get_mut(raum_name)
            .ok_or_else(|| KlatschError::RaumNichtGefunden(raum_name.to_string()))?;

        raum.teilnehmer_hinzufuegen(token.clone(), benutzername.to_string(), ip);
        let host = raum.host_benutzername.clone();
        let anzahl = raum.teilnehmer_anzahl();
        debug!(raum = %raum_name, benutzer = %benutzername, anzahl, "Teilnehmer eingetragen");

        // Empfaenger kann beim Herunterfahren bereits weg sein
        let _ = self
            .inner
            .ereignisse
            .send(MitgliedschaftsEreignis::Beigetreten {
                raum_name: raum_name.to_string(),
                benutzername: benutzername.to_string(),
                token,
            });
        Ok((host, anzahl))
    }

    /// Entfernt einen Teilnehmer und publiziert ein `Verlassen`-Ereignis
    ///
    /// Gibt den Benutzernamen des Entfernten zurueck, falls vorhanden.
    pub async fn teilnehmer_entfernen(&self, raum_name: &str, token: &Token) -> Option<String> {
        let mut raeume = self.inner.raeume.write().await;
        let raum = raeume.get_mut(raum_name)?;
        let teilnehmer = raum.teilnehmer.remove(token)?;
        debug!(raum = %raum_name, benutzer = %teilnehmer.benutzername, "Teilnehmer entfernt");

        let _ = self
            .inner
            .ereignisse
            .send(MitgliedschaftsEreignis::Verlassen {
                raum_name: raum_name.to_string(),
                benutzername: teilnehmer.benutzername.clone(),
                token: token.clone(),
            });
        Some(teilnehmer.benutzername)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Ob das Token aktuell Teilnehmer des genannten Raums ist
    pub async fn ist_teilnehmer(&self, raum_name: &str, token: &Token) -> bool {
        let raeume = self.inner.raeume.read().await;
        raeume
            .get(raum_name)
            .map(|raum| raum.teilnehmer.contains_key(token))
            .unwrap_or(false)
    }

    /// Token aller aktuellen Teilnehmer eines Raums
    pub async fn teilnehmer_token(&self, raum_name: &str) -> Vec<Token> {
        let raeume = self.inner.raeume.read().await;
        raeume
            .get(raum_name)
            .map(|raum| raum.teilnehmer.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Anzahl existierender Raeume
    pub async fn raum_anzahl(&self) -> usize {
        self.inner.raeume.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn doppelter_raumname_abgelehnt() {
        let (registry, _rx) = RaumRegistry::neu();
        registry
            .erstellen("Lobby", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap();
        let fehler = registry
            .erstellen("Lobby", "Bob", ip("10.0.0.2"), None)
            .await
            .unwrap_err();
        assert!(matches!(fehler, KlatschError::RaumExistiert(_)));
        assert_eq!(registry.raum_anzahl().await, 1);
    }

    #[tokio::test]
    async fn ungueltige_namen_abgelehnt() {
        let (registry, _rx) = RaumRegistry::neu();
        let fehler = registry
            .erstellen(" lobby", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap_err();
        assert!(matches!(fehler, KlatschError::UngueltigerRaumname));

        let fehler = registry
            .erstellen("lobby", "", ip("10.0.0.1"), None)
            .await
            .unwrap_err();
        assert!(matches!(fehler, KlatschError::UngueltigerBenutzername));
    }

    #[tokio::test]
    async fn beitritt_passwort_regeln() {
        let (registry, _rx) = RaumRegistry::neu();
        registry
            .erstellen("Privat", "Alice", ip("10.0.0.1"), Some("geheim".into()))
            .await
            .unwrap();
        registry
            .teilnehmer_hinzufuegen("Privat", Token::neu("t_a"), "Alice", ip("10.0.0.1"))
            .await
            .unwrap();

        assert!(registry
            .beitritt_pruefen("Privat", "Bob", Some("geheim"))
            .await
            .is_ok());

        let fehler = registry
            .beitritt_pruefen("Privat", "Bob", Some("falsch"))
            .await
            .unwrap_err();
        assert!(matches!(fehler.fehler, KlatschError::NichtAutorisiert));

        let fehler = registry
            .beitritt_pruefen("Privat", "Bob", None)
            .await
            .unwrap_err();
        assert!(matches!(fehler.fehler, KlatschError::NichtAutorisiert));
    }

    #[tokio::test]
    async fn beitritt_unbekannter_raum() {
        let (registry, _rx) = RaumRegistry::neu();
        let fehler = registry
            .beitritt_pruefen("Nirgendwo", "Bob", None)
            .await
            .unwrap_err();
        assert!(matches!(fehler.fehler, KlatschError::RaumNichtGefunden(_)));
        assert!(fehler.verwaiste_token.is_empty());
    }

    #[tokio::test]
    async fn toter_host_baut_raum_beim_beitritt_ab() {
        let (registry, _rx) = RaumRegistry::neu();
        registry
            .erstellen("Lobby", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap();
        let host_token = Token::neu("t_host");
        registry
            .teilnehmer_hinzufuegen("Lobby", host_token.clone(), "Alice", ip("10.0.0.1"))
            .await
            .unwrap();
        let bob_token = Token::neu("t_bob");
        registry
            .teilnehmer_hinzufuegen("Lobby", bob_token.clone(), "Bob", ip("10.0.0.2"))
            .await
            .unwrap();

        // Host verlaesst den Raum
        registry.teilnehmer_entfernen("Lobby", &host_token).await;

        let fehler = registry
            .beitritt_pruefen("Lobby", "Carol", None)
            .await
            .unwrap_err();
        assert!(matches!(fehler.fehler, KlatschError::RaumNichtGefunden(_)));
        assert_eq!(fehler.verwaiste_token, vec![bob_token]);
        assert_eq!(registry.raum_anzahl().await, 0);
    }

    #[tokio::test]
    async fn bereinigung_entfernt_hostlose_raeume() {
        let (registry, _rx) = RaumRegistry::neu();
        registry
            .erstellen("Aktiv", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap();
        registry
            .teilnehmer_hinzufuegen("Aktiv", Token::neu("t_a"), "Alice", ip("10.0.0.1"))
            .await
            .unwrap();

        registry
            .erstellen("Verwaist", "Eve", ip("10.0.0.3"), None)
            .await
            .unwrap();
        let eve_token = Token::neu("t_e");
        registry
            .teilnehmer_hinzufuegen("Verwaist", eve_token.clone(), "Eve", ip("10.0.0.3"))
            .await
            .unwrap();
        let rest_token = Token::neu("t_r");
        registry
            .teilnehmer_hinzufuegen("Verwaist", rest_token.clone(), "Bob", ip("10.0.0.4"))
            .await
            .unwrap();
        registry.teilnehmer_entfernen("Verwaist", &eve_token).await;

        let verwaiste = registry.inaktive_bereinigen().await;
        assert_eq!(verwaiste, vec![rest_token]);
        assert_eq!(registry.raum_anzahl().await, 1);
        assert!(registry
            .beitritt_pruefen("Aktiv", "Carol", None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn mitgliedschafts_ereignisse_werden_publiziert() {
        let (registry, mut rx) = RaumRegistry::neu();
        registry
            .erstellen("Lobby", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap();
        let token = Token::neu("t_a");
        registry
            .teilnehmer_hinzufuegen("Lobby", token.clone(), "Alice", ip("10.0.0.1"))
            .await
            .unwrap();
        registry.teilnehmer_entfernen("Lobby", &token).await;

        let erstes = rx.recv().await.unwrap();
        assert!(matches!(
            erstes,
            MitgliedschaftsEreignis::Beigetreten { ref benutzername, .. } if benutzername == "Alice"
        ));
        let zweites = rx.recv().await.unwrap();
        assert!(matches!(
            zweites,
            MitgliedschaftsEreignis::Verlassen { ref raum_name, .. } if raum_name == "Lobby"
        ));
    }

    #[tokio::test]
    async fn teilnehmerzahl_nach_beitritten() {
        let (registry, _rx) = RaumRegistry::neu();
        registry
            .erstellen("Lobby", "Alice", ip("10.0.0.1"), None)
            .await
            .unwrap();
        let (host, anzahl) = registry
            .teilnehmer_hinzufuegen("Lobby", Token::neu("t_a"), "Alice", ip("10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(host, "Alice");
        assert_eq!(anzahl, 1);
        let (_, anzahl) = registry
            .teilnehmer_hinzufuegen("Lobby", Token::neu("t_b"), "Bob", ip("10.0.0.2"))
            .await
            .unwrap();
        assert_eq!(anzahl, 2);
        assert_eq!(registry.teilnehmer_token("Lobby").await.len(), 2);
    }
}
