//! Raum- und Teilnehmer-Datentypen

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use klatsch_core::types::Token;

/// Ein Teilnehmer eines Raums
#[derive(Debug, Clone)]
pub struct Teilnehmer {
    /// Anzeigename (im Raum nicht zwingend eindeutig)
    pub benutzername: String,
    /// IP-Adresse aus der TCRP-Transaktion
    pub ip: IpAddr,
    /// Beitrittszeitpunkt
    pub beigetreten_am: DateTime<Utc>,
    /// Ob dieser Teilnehmer als Host zaehlt
    pub ist_host: bool,
}

/// Ein Chat-Raum mit Host, optionalem Passwort und Teilnehmern
///
/// Raeume existieren nur im Speicher; mit dem Serverprozess endet auch
/// jeder Raum.
#[derive(Debug)]
pub struct Raum {
    /// Eindeutiger Raumname (Schluessel der Registry)
    pub name: String,
    /// Benutzername des Erstellers
    pub host_benutzername: String,
    /// IP des Erstellers
    pub host_ip: IpAddr,
    /// Passwort im Klartext; `None` heisst offener Raum
    pub passwort: Option<String>,
    /// Erstellungszeitpunkt
    pub erstellt_am: DateTime<Utc>,
    /// Teilnehmer, adressiert ueber ihr Token
    pub teilnehmer: HashMap<Token, Teilnehmer>,
}

impl Raum {
    /// Erstellt einen neuen, noch leeren Raum
    pub fn neu(
        name: String,
        host_benutzername: String,
        host_ip: IpAddr,
        passwort: Option<String>,
    ) -> Self {
        Self {
            name,
            host_benutzername,
            host_ip,
            passwort,
            erstellt_am: Utc::now(),
            teilnehmer: HashMap::new(),
        }
    }

    /// Prueft ein angebotenes Passwort gegen den Raum
    ///
    /// Ein offener Raum akzeptiert nur Anfragen ohne Passwort; ein
    /// geschuetzter Raum nur das exakt uebereinstimmende.
    pub fn passwort_pruefen(&self, angebot: Option<&str>) -> bool {
        match (&self.passwort, angebot) {
            (None, None) => true,
            (Some(erwartet), Some(angebot)) => erwartet == angebot,
            _ => false,
        }
    }

    /// Fuegt einen Teilnehmer hinzu
    ///
    /// ACHTUNG: Host-Status wird ueber Benutzername-Gleichheit abgeleitet.
    /// Ein zweiter Teilnehmer mit dem Namen des Hosts zaehlt damit
    /// ebenfalls als Host und haelt den Raum am Leben.
    pub fn teilnehmer_hinzufuegen(&mut self, token: Token, benutzername: String, ip: IpAddr) {
        let ist_host = benutzername == self.host_benutzername;
        self.teilnehmer.insert(
            token,
            Teilnehmer {
                benutzername,
                ip,
                beigetreten_am: Utc::now(),
                ist_host,
            },
        );
    }

    /// Ob mindestens ein Teilnehmer mit Host-Status im Raum ist
    pub fn ist_host_aktiv(&self) -> bool {
        self.teilnehmer.values().any(|t| t.ist_host)
    }

    /// Aktuelle Teilnehmerzahl
    pub fn teilnehmer_anzahl(&self) -> usize {
        self.teilnehmer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn passwort_regeln() {
        let offen = Raum::neu("a".into(), "Host".into(), test_ip(), None);
        assert!(offen.passwort_pruefen(None));
        assert!(!offen.passwort_pruefen(Some("egal")));

        let geschuetzt = Raum::neu("b".into(), "Host".into(), test_ip(), Some("geheim".into()));
        assert!(geschuetzt.passwort_pruefen(Some("geheim")));
        assert!(!geschuetzt.passwort_pruefen(Some("falsch")));
        assert!(!geschuetzt.passwort_pruefen(None));
    }

    #[test]
    fn host_status_ueber_namensgleichheit() {
        let mut raum = Raum::neu("a".into(), "Alice".into(), test_ip(), None);
        raum.teilnehmer_hinzufuegen(Token::neu("t1"), "Alice".into(), test_ip());
        raum.teilnehmer_hinzufuegen(Token::neu("t2"), "Bob".into(), test_ip());
        assert!(raum.ist_host_aktiv());

        // Zweiter "Alice"-Eintrag zaehlt ebenfalls als Host
        raum.teilnehmer_hinzufuegen(Token::neu("t3"), "Alice".into(), test_ip());
        assert_eq!(
            raum.teilnehmer.values().filter(|t| t.ist_host).count(),
            2
        );
    }

    #[test]
    fn host_abwesend_nach_entfernen() {
        let mut raum = Raum::neu("a".into(), "Alice".into(), test_ip(), None);
        let host_token = Token::neu("t_host");
        raum.teilnehmer_hinzufuegen(host_token.clone(), "Alice".into(), test_ip());
        raum.teilnehmer_hinzufuegen(Token::neu("t_bob"), "Bob".into(), test_ip());

        raum.teilnehmer.remove(&host_token);
        assert!(!raum.ist_host_aktiv());
        assert_eq!(raum.teilnehmer_anzahl(), 1);
    }
}
