//! TCRP – The Chat Room Protocol (TCP-Control-Kanal)
//!
//! Framebasiertes Binaerprotokoll fuer Raum-Erstellung und -Beitritt.
//! Pro Verbindung wird genau eine Transaktion abgewickelt
//! (REQUEST -> RESPONSE -> optional COMPLETION).
//!
//! ## Rahmenformat (Header = 32 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Raumname-Laenge (UTF-8-Bytes)
//!  1       1   Operation (1 = CREATE_ROOM, 2 = JOIN_ROOM)
//!  2       1   Zustand (0 = REQUEST, 1 = RESPONSE, 2 = COMPLETION)
//!  3      29   Nutzlast-Laenge (big-endian, fuehrende Nullen)
//! 32+      N   Raumname-Bytes, danach Nutzlast-Bytes (UTF-8)
//! ```
//!
//! Die Nutzlast ist JSON (kompakte Objekt-Notation); Nutzlast-Bytes die
//! kein gueltiges JSON sind werden als Rohtext dekodiert – das ist kein
//! Fehler, sondern der vereinbarte Fallback.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtokollFehler;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Feste Header-Groesse in Bytes
pub const HEADER_GROESSE: usize = 32;

/// Breite des Nutzlast-Laengenfelds in Bytes (Entscheidung: 29, damit der
/// Header exakt 32 Bytes breit ist; symmetrisch in encode und decode)
pub const LAENGENFELD_GROESSE: usize = 29;

/// Maximale Raumname-Laenge in UTF-8-Bytes
pub const MAX_RAUM_NAME: usize = 255;

/// Maximale Benutzername-Laenge in UTF-8-Bytes
pub const MAX_BENUTZERNAME: usize = 255;

/// Maximale Nutzlast-Laenge (2^29 - 1 Bytes)
pub const MAX_NUTZLAST: usize = (1 << 29) - 1;

// ---------------------------------------------------------------------------
// Operation / Zustand / StatusCode
// ---------------------------------------------------------------------------

/// TCRP-Operationscodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Neuen Raum anlegen
    RaumErstellen = 1,
    /// Bestehendem Raum beitreten
    RaumBeitreten = 2,
}

impl Operation {
    /// Konvertiert ein Byte in eine `Operation`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::RaumErstellen),
            2 => Some(Self::RaumBeitreten),
            _ => None,
        }
    }
}

/// TCRP-Zustandscodes innerhalb einer Transaktion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Zustand {
    /// Client sendet die initiale Anfrage
    Anfrage = 0,
    /// Server antwortet mit Status-Code
    Antwort = 1,
    /// Server sendet das ausgestellte Token
    Abschluss = 2,
}

impl Zustand {
    /// Konvertiert ein Byte in einen `Zustand`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Anfrage),
            1 => Some(Self::Antwort),
            2 => Some(Self::Abschluss),
            _ => None,
        }
    }
}

/// Status-Codes fuer Server-Antworten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum StatusCode {
    Erfolg = 0,
    RaumExistiert = 1,
    RaumNichtGefunden = 2,
    RaumVoll = 3,
    UngueltigerBenutzername = 4,
    UngueltigerName = 5,
    ServerFehler = 6,
    NichtAutorisiert = 7,
}

impl TryFrom<u8> for StatusCode {
    type Error = ProtokollFehler;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Erfolg),
            1 => Ok(Self::RaumExistiert),
            2 => Ok(Self::RaumNichtGefunden),
            3 => Ok(Self::RaumVoll),
            4 => Ok(Self::UngueltigerBenutzername),
            5 => Ok(Self::UngueltigerName),
            6 => Ok(Self::ServerFehler),
            7 => Ok(Self::NichtAutorisiert),
            wert => Err(ProtokollFehler::UnbekannterCode {
                feld: "Status",
                wert,
            }),
        }
    }
}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> Self {
        status as u8
    }
}

// ---------------------------------------------------------------------------
// Nutzlast
// ---------------------------------------------------------------------------

/// Geschlossene Menge getaggter Nutzlast-Varianten
///
/// Eine Variante pro Operation-x-Zustand-Form statt einer offenen
/// Mapping-Struktur. Die JSON-Feldnamen sind Teil des Draht-Formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TcrpPayload {
    /// COMPLETION eines Beitritts (JOIN_ROOM x COMPLETION)
    BeitrittAbschluss {
        token: String,
        host_username: String,
        participant_count: u32,
        room_joined: bool,
    },
    /// COMPLETION einer Erstellung (CREATE_ROOM x COMPLETION)
    ErstellungAbschluss {
        token: String,
        host_username: String,
        room_created: bool,
    },
    /// RESPONSE beider Operationen
    Antwort {
        status_code: StatusCode,
        message: String,
    },
    /// REQUEST beider Operationen
    Anfrage {
        username: String,
        password: Option<String>,
    },
    /// Fallback: Nutzlast-Bytes die keiner strukturierten Form entsprechen
    Rohtext(String),
}

impl TcrpPayload {
    /// Serialisiert die Nutzlast in Bytes
    ///
    /// Strukturierte Varianten werden als kompaktes JSON kodiert,
    /// `Rohtext` als nackte UTF-8-Bytes ohne JSON-Anfuehrungszeichen.
    fn kodieren(&self) -> Result<Vec<u8>, ProtokollFehler> {
        match self {
            Self::Rohtext(text) => Ok(text.clone().into_bytes()),
            strukturiert => serde_json::to_vec(strukturiert)
                .map_err(|_| ProtokollFehler::Utf8 { feld: "Nutzlast" }),
        }
    }

    /// Dekodiert Nutzlast-Bytes
    ///
    /// Versucht zuerst strukturiertes JSON; schlaegt das fehl, wird auf
    /// Rohtext zurueckgefallen. Nur ungueltiges UTF-8 ist ein Fehler.
    fn dekodieren(bytes: &[u8]) -> Result<Self, ProtokollFehler> {
        if bytes.is_empty() {
            return Ok(Self::Rohtext(String::new()));
        }
        if let Ok(payload) = serde_json::from_slice::<TcrpPayload>(bytes) {
            return Ok(payload);
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Nutzlast" })?;
        Ok(Self::Rohtext(text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TcrpNachricht
// ---------------------------------------------------------------------------

/// Eine vollstaendige TCRP-Nachricht (Header + Raumname + Nutzlast)
#[derive(Debug, Clone, PartialEq)]
pub struct TcrpNachricht {
    /// Raumname (UTF-8, max. 255 Bytes)
    pub raum_name: String,
    /// Operation dieser Transaktion
    pub operation: Operation,
    /// Zustand innerhalb der Transaktion
    pub zustand: Zustand,
    /// Getypte Nutzlast
    pub payload: TcrpPayload,
}

impl TcrpNachricht {
    /// Serialisiert die Nachricht in einen Byte-Vec
    ///
    /// # Fehler
    /// - `ZuLang` wenn Raumname oder Nutzlast ihr Maximum ueberschreiten
    pub fn kodieren(&self) -> Result<Vec<u8>, ProtokollFehler> {
        let name_bytes = self.raum_name.as_bytes();
        if name_bytes.len() > MAX_RAUM_NAME {
            return Err(ProtokollFehler::ZuLang {
                feld: "Raumname",
                laenge: name_bytes.len(),
                maximum: MAX_RAUM_NAME,
            });
        }

        let nutzlast = self.payload.kodieren()?;
        if nutzlast.len() > MAX_NUTZLAST {
            return Err(ProtokollFehler::ZuLang {
                feld: "Nutzlast",
                laenge: nutzlast.len(),
                maximum: MAX_NUTZLAST,
            });
        }

        let mut buf = Vec::with_capacity(HEADER_GROESSE + name_bytes.len() + nutzlast.len());
        buf.push(name_bytes.len() as u8);
        buf.push(self.operation as u8);
        buf.push(self.zustand as u8);

        // 29-Byte-Laengenfeld: fuehrende Nullen, die letzten 8 Bytes
        // tragen den Wert (big-endian)
        let mut laengenfeld = [0u8; LAENGENFELD_GROESSE];
        laengenfeld[LAENGENFELD_GROESSE - 8..]
            .copy_from_slice(&(nutzlast.len() as u64).to_be_bytes());
        buf.extend_from_slice(&laengenfeld);

        buf.extend_from_slice(name_bytes);
        buf.extend_from_slice(&nutzlast);
        Ok(buf)
    }

    /// Deserialisiert eine Nachricht aus einem Byte-Slice
    ///
    /// Ueberzaehlige Bytes nach der deklarierten Nutzlast werden ignoriert.
    ///
    /// # Fehler
    /// - `Framing` wenn weniger als 32 Bytes vorhanden sind
    /// - `UnbekannterCode` bei ungueltigem Operations- oder Zustandsbyte
    /// - `UnvollstaendigerRumpf` wenn die deklarierten Laengen die
    ///   vorhandenen Bytes ueberschreiten
    pub fn dekodieren(daten: &[u8]) -> Result<Self, ProtokollFehler> {
        if daten.len() < HEADER_GROESSE {
            return Err(ProtokollFehler::Framing {
                vorhanden: daten.len(),
                benoetigt: HEADER_GROESSE,
            });
        }

        let name_laenge = daten[0] as usize;
        let operation = Operation::from_u8(daten[1]).ok_or(ProtokollFehler::UnbekannterCode {
            feld: "Operation",
            wert: daten[1],
        })?;
        let zustand = Zustand::from_u8(daten[2]).ok_or(ProtokollFehler::UnbekannterCode {
            feld: "Zustand",
            wert: daten[2],
        })?;
        let nutzlast_laenge = nutzlast_laenge_lesen(&daten[3..HEADER_GROESSE])?;

        let erwartet = HEADER_GROESSE + name_laenge + nutzlast_laenge;
        if daten.len() < erwartet {
            return Err(ProtokollFehler::UnvollstaendigerRumpf {
                vorhanden: daten.len(),
                erwartet,
            });
        }

        let name_ende = HEADER_GROESSE + name_laenge;
        let raum_name = std::str::from_utf8(&daten[HEADER_GROESSE..name_ende])
            .map_err(|_| ProtokollFehler::Utf8 { feld: "Raumname" })?
            .to_string();
        let payload = TcrpPayload::dekodieren(&daten[name_ende..name_ende + nutzlast_laenge])?;

        Ok(Self {
            raum_name,
            operation,
            zustand,
            payload,
        })
    }
}

/// Liest das 29-Byte-Laengenfeld und prueft es gegen `MAX_NUTZLAST`
fn nutzlast_laenge_lesen(feld: &[u8]) -> Result<usize, ProtokollFehler> {
    debug_assert_eq!(feld.len(), LAENGENFELD_GROESSE);

    // Alles oberhalb der letzten 8 Bytes muss Null sein, sonst liegt der
    // deklarierte Wert sicher ueber dem Maximum
    if feld[..LAENGENFELD_GROESSE - 8].iter().any(|&b| b != 0) {
        return Err(ProtokollFehler::ZuLang {
            feld: "Nutzlast",
            laenge: usize::MAX,
            maximum: MAX_NUTZLAST,
        });
    }

    let mut wert_bytes = [0u8; 8];
    wert_bytes.copy_from_slice(&feld[LAENGENFELD_GROESSE - 8..]);
    let wert = u64::from_be_bytes(wert_bytes) as usize;
    if wert > MAX_NUTZLAST {
        return Err(ProtokollFehler::ZuLang {
            feld: "Nutzlast",
            laenge: wert,
            maximum: MAX_NUTZLAST,
        });
    }
    Ok(wert)
}

// ---------------------------------------------------------------------------
// Validierung
// ---------------------------------------------------------------------------

/// Prueft einen Raumnamen gegen die Protokoll-Beschraenkungen
///
/// Abgelehnt werden: leere Namen, mehr als 255 UTF-8-Bytes, fuehrender
/// oder abschliessender Whitespace, Steuerzeichen.
pub fn raumname_gueltig(name: &str) -> bool {
    bezeichner_gueltig(name, MAX_RAUM_NAME)
}

/// Prueft einen Benutzernamen gegen die Protokoll-Beschraenkungen
pub fn benutzername_gueltig(name: &str) -> bool {
    bezeichner_gueltig(name, MAX_BENUTZERNAME)
}

fn bezeichner_gueltig(name: &str, max_bytes: usize) -> bool {
    if name.is_empty() || name.len() > max_bytes {
        return false;
    }
    if name.trim() != name {
        return false;
    }
    // Keine Steuerzeichen (Codepoints unter U+0020)
    if name.chars().any(|c| c < '\u{20}') {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Nachrichten-Konstruktoren (rein, seiteneffektfrei)
// ---------------------------------------------------------------------------

/// Baut eine CREATE_ROOM-Anfrage
pub fn raum_erstellen_anfrage(
    benutzername: &str,
    raum_name: &str,
    passwort: Option<String>,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumErstellen,
        zustand: Zustand::Anfrage,
        payload: TcrpPayload::Anfrage {
            username: benutzername.to_string(),
            password: passwort,
        },
    }
}

/// Baut eine CREATE_ROOM-Antwort mit Status-Code
pub fn raum_erstellen_antwort(
    raum_name: &str,
    status: StatusCode,
    nachricht: &str,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumErstellen,
        zustand: Zustand::Antwort,
        payload: TcrpPayload::Antwort {
            status_code: status,
            message: nachricht.to_string(),
        },
    }
}

/// Baut den CREATE_ROOM-Abschluss mit dem ausgestellten Token
pub fn raum_erstellen_abschluss(
    raum_name: &str,
    token: &str,
    host_benutzername: &str,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumErstellen,
        zustand: Zustand::Abschluss,
        payload: TcrpPayload::ErstellungAbschluss {
            token: token.to_string(),
            host_username: host_benutzername.to_string(),
            room_created: true,
        },
    }
}

/// Baut eine JOIN_ROOM-Anfrage
pub fn raum_beitreten_anfrage(
    benutzername: &str,
    raum_name: &str,
    passwort: Option<String>,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumBeitreten,
        zustand: Zustand::Anfrage,
        payload: TcrpPayload::Anfrage {
            username: benutzername.to_string(),
            password: passwort,
        },
    }
}

/// Baut eine JOIN_ROOM-Antwort mit Status-Code
pub fn raum_beitreten_antwort(
    raum_name: &str,
    status: StatusCode,
    nachricht: &str,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumBeitreten,
        zustand: Zustand::Antwort,
        payload: TcrpPayload::Antwort {
            status_code: status,
            message: nachricht.to_string(),
        },
    }
}

/// Baut den JOIN_ROOM-Abschluss mit Token, Host und Teilnehmerzahl
pub fn raum_beitreten_abschluss(
    raum_name: &str,
    token: &str,
    host_benutzername: &str,
    teilnehmer_anzahl: u32,
) -> TcrpNachricht {
    TcrpNachricht {
        raum_name: raum_name.to_string(),
        operation: Operation::RaumBeitreten,
        zustand: Zustand::Abschluss,
        payload: TcrpPayload::BeitrittAbschluss {
            token: token.to_string(),
            host_username: host_benutzername.to_string(),
            participant_count: teilnehmer_anzahl,
            room_joined: true,
        },
    }
}

// ---------------------------------------------------------------------------
// Async Lesen/Schreiben eines Rahmens
// ---------------------------------------------------------------------------

/// Liest genau eine TCRP-Nachricht aus einem `AsyncRead`
///
/// # Fehler
/// - `UnexpectedEof` wenn die Verbindung vor Abschluss des Rahmens endet
/// - `InvalidData` bei ungueltigem Header oder Rumpf
pub async fn nachricht_lesen<R>(reader: &mut R) -> io::Result<TcrpNachricht>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_GROESSE];
    reader.read_exact(&mut header).await?;

    let name_laenge = header[0] as usize;
    let nutzlast_laenge = nutzlast_laenge_lesen(&header[3..HEADER_GROESSE])?;

    let mut rumpf = vec![0u8; name_laenge + nutzlast_laenge];
    reader.read_exact(&mut rumpf).await?;

    let mut daten = Vec::with_capacity(HEADER_GROESSE + rumpf.len());
    daten.extend_from_slice(&header);
    daten.extend_from_slice(&rumpf);
    Ok(TcrpNachricht::dekodieren(&daten)?)
}

/// Schreibt genau eine TCRP-Nachricht in einen `AsyncWrite`
pub async fn nachricht_schreiben<W>(writer: &mut W, nachricht: &TcrpNachricht) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = nachricht.kodieren()?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
