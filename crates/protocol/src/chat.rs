//! UDP-Chat-Kanal: Datagramm-Codecs fuer beide Richtungen
//!
//! Der Chat-Kanal ist verbindungslos und bewusst schlank: keine
//! Zustellgarantie, keine Reihenfolge-Garantie, keine Wiederholung.
//!
//! ## Client -> Server (max. 4096 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Raumname-Laenge
//!  1       1   Token-Laenge
//!  2+      N   Raumname-Bytes, Token-Bytes, Nachrichten-Bytes (Rest)
//! ```
//!
//! ## Server -> Client (max. 4094 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Nachrichtentyp
//!  1       1   Benutzername-Laenge
//!  2       1   Nachrichten-Laenge
//!  3+      N   Benutzername-Bytes, Nachrichten-Bytes
//! ```
//!
//! Beide Laengenfelder im Server-Datagramm sind 1 Byte breit; Benutzername
//! und Nachricht sind daher auf je 255 UTF-8-Bytes begrenzt.

use crate::error::ProtokollFehler;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Maximale Groesse eines Client-Datagramms
pub const MAX_CLIENT_DATAGRAMM: usize = 4096;

/// Maximale Groesse eines Server-Datagramms
pub const MAX_SERVER_DATAGRAMM: usize = 4094;

/// Header-Groesse des Client-Datagramms
pub const CLIENT_HEADER_GROESSE: usize = 2;

/// Header-Groesse des Server-Datagramms
pub const SERVER_HEADER_GROESSE: usize = 3;

/// Maximale Laenge eines Nachrichtentexts im Server-Datagramm
pub const MAX_TEXT: usize = 255;

// ---------------------------------------------------------------------------
// Nachrichtentyp
// ---------------------------------------------------------------------------

/// Typ-Byte eines Server-Datagramms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NachrichtenTyp {
    /// Regulaere Chat-Nachricht eines Teilnehmers
    Chat = 1,
    /// Server-generierte Hinweisnachricht
    System = 2,
    /// Beitritts-Benachrichtigung
    BenutzerBeitritt = 3,
    /// Austritts-Benachrichtigung
    BenutzerAustritt = 4,
}

impl NachrichtenTyp {
    /// Konvertiert ein Byte in einen `NachrichtenTyp`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Chat),
            2 => Some(Self::System),
            3 => Some(Self::BenutzerBeitritt),
            4 => Some(Self::BenutzerAustritt),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

/// Eingehendes Chat-Datagramm eines Clients
#[derive(Debug, Clone, PartialEq)]
pub struct ChatDatagramm {
    /// Zielraum
    pub raum_name: String,
    /// Bearer-Token aus der TCRP-Transaktion
    pub token: String,
    /// Nachrichtentext (UTF-8, Rest des Datagramms)
    pub text: String,
}

impl ChatDatagramm {
    /// Serialisiert das Datagramm
    pub fn kodieren(&self) -> Result<Vec<u8>, ProtokollFehler> {
        let raum = self.raum_name.as_bytes();
        let token = self.token.as_bytes();
        if raum.len() > 255 {
            return Err(ProtokollFehler::ZuLang {
                feld: "Raumname",
                laenge: raum.len(),
                maximum: 255,
            });
        }
        if token.len() > 255 {
            return Err(ProtokollFehler::ZuLang {
                feld: "Token",
                laenge: token.len(),
                maximum: 255,
            });
        }

        let gesamt = CLIENT_HEADER_GROESSE + raum.len() + token.len() + self.text.len();
        if gesamt > MAX_CLIENT_DATAGRAMM {
            return Err(ProtokollFehler::ZuLang {
                feld: "Datagramm",
                laenge: gesamt,
                maximum: MAX_CLIENT_DATAGRAMM,
            });
        }

        let mut buf = Vec::with_capacity(gesamt);
        buf.push(raum.len() as u8);
        buf.push(token.len() as u8);
        buf.extend_from_slice(raum);
        buf.extend_from_slice(token);
        buf.extend_from_slice(self.text.as_bytes());
        Ok(buf)
    }

    /// Deserialisiert ein Client-Datagramm
    ///
    /// Alle Bytes nach Raumname und Token gehoeren zum Nachrichtentext.
    pub fn dekodieren(daten: &[u8]) -> Result<Self, ProtokollFehler> {
        if daten.len() > MAX_CLIENT_DATAGRAMM {
            return Err(ProtokollFehler::ZuLang {
                feld: "Datagramm",
                laenge: daten.len(),
                maximum: MAX_CLIENT_DATAGRAMM,
            });
        }
        if daten.len() < CLIENT_HEADER_GROESSE {
            return Err(ProtokollFehler::Framing {
                vorhanden: daten.len(),
                benoetigt: CLIENT_HEADER_GROESSE,
            });
        }

        let raum_laenge = daten[0] as usize;
        let token_laenge = daten[1] as usize;
        let erwartet = CLIENT_HEADER_GROESSE + raum_laenge + token_laenge;
        if daten.len() < erwartet {
            return Err(ProtokollFehler::UnvollstaendigerRumpf {
                vorhanden: daten.len(),
                erwartet,
            });
        }

        let raum_ende = CLIENT_HEADER_GROESSE + raum_laenge;
        let token_ende = raum_ende + token_laenge;
        let raum_name = std::str::from_utf8(&daten[CLIENT_HEADER_GROESSE..raum_ende])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Raumname" })?
            .to_string();
        let token = std::str::from_utf8(&daten[raum_ende..token_ende])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Token" })?
            .to_string();
        let text = std::str::from_utf8(&daten[token_ende..])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Text" })?
            .to_string();

        Ok(Self {
            raum_name,
            token,
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Ausgehendes Datagramm an einen Chat-Teilnehmer
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDatagramm {
    /// Typ der Nachricht
    pub typ: NachrichtenTyp,
    /// Urheber (bei System-Nachrichten der Server-Name)
    pub benutzername: String,
    /// Nachrichtentext (UTF-8, max. 255 Bytes)
    pub text: String,
}

impl ServerDatagramm {
    /// Serialisiert das Datagramm
    ///
    /// # Fehler
    /// - `ZuLang` wenn Benutzername oder Text 255 Bytes ueberschreiten
    pub fn kodieren(&self) -> Result<Vec<u8>, ProtokollFehler> {
        let name = self.benutzername.as_bytes();
        let text = self.text.as_bytes();
        if name.len() > 255 {
            return Err(ProtokollFehler::ZuLang {
                feld: "Benutzername",
                laenge: name.len(),
                maximum: 255,
            });
        }
        if text.len() > MAX_TEXT {
            return Err(ProtokollFehler::ZuLang {
                feld: "Text",
                laenge: text.len(),
                maximum: MAX_TEXT,
            });
        }

        let mut buf = Vec::with_capacity(SERVER_HEADER_GROESSE + name.len() + text.len());
        buf.push(self.typ as u8);
        buf.push(name.len() as u8);
        buf.push(text.len() as u8);
        buf.extend_from_slice(name);
        buf.extend_from_slice(text);
        Ok(buf)
    }

    /// Deserialisiert ein Server-Datagramm
    pub fn dekodieren(daten: &[u8]) -> Result<Self, ProtokollFehler> {
        if daten.len() < SERVER_HEADER_GROESSE {
            return Err(ProtokollFehler::Framing {
                vorhanden: daten.len(),
                benoetigt: SERVER_HEADER_GROESSE,
            });
        }

        let typ = NachrichtenTyp::from_u8(daten[0]).ok_or(ProtokollFehler::UnbekannterCode {
            feld: "Nachrichtentyp",
            wert: daten[0],
        })?;
        let name_laenge = daten[1] as usize;
        let text_laenge = daten[2] as usize;
        let erwartet = SERVER_HEADER_GROESSE + name_laenge + text_laenge;
        if daten.len() < erwartet {
            return Err(ProtokollFehler::UnvollstaendigerRumpf {
                vorhanden: daten.len(),
                erwartet,
            });
        }

        let name_ende = SERVER_HEADER_GROESSE + name_laenge;
        let benutzername = std::str::from_utf8(&daten[SERVER_HEADER_GROESSE..name_ende])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Benutzername" })?
            .to_string();
        let text = std::str::from_utf8(&daten[name_ende..name_ende + text_laenge])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Text" })?
            .to_string();

        Ok(Self {
            typ,
            benutzername,
            text,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
