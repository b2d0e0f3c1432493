//! Fehlertypen fuer die Codecs
//!
//! Dekodierfehler sind immer lokale Fehler am Empfangsort: die Verbindung
//! bzw. das Datagramm wird verworfen, der Dienst laeuft weiter.

use thiserror::Error;

/// Alle moeglichen Fehler beim Kodieren und Dekodieren
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtokollFehler {
    /// Weniger Bytes vorhanden als der feste Header benoetigt
    #[error("Rahmen zu kurz: {vorhanden} Bytes (Header benoetigt {benoetigt})")]
    Framing { vorhanden: usize, benoetigt: usize },

    /// Die deklarierten Laengen ueberschreiten die tatsaechlich
    /// vorhandenen Bytes
    #[error("Rumpf unvollstaendig: {vorhanden} Bytes vorhanden, {erwartet} erwartet")]
    UnvollstaendigerRumpf { vorhanden: usize, erwartet: usize },

    /// Operations-, Zustands- oder Nachrichtentyp-Byte ausserhalb der
    /// definierten Menge
    #[error("Unbekannter {feld}-Code: {wert}")]
    UnbekannterCode { feld: &'static str, wert: u8 },

    /// Ein Feld ueberschreitet sein Maximum; Kodierer lehnen ab statt
    /// stillschweigend zu kuerzen
    #[error("{feld} zu lang: {laenge} Bytes (Maximum {maximum})")]
    ZuLang {
        feld: &'static str,
        laenge: usize,
        maximum: usize,
    },

    /// Feldinhalt ist kein gueltiges UTF-8
    #[error("Ungueltiges UTF-8 im Feld {feld}")]
    Utf8 { feld: &'static str },
}

impl From<ProtokollFehler> for std::io::Error {
    fn from(fehler: ProtokollFehler) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, fehler.to_string())
    }
}
