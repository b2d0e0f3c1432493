//! Fehlertypen fuer Klatsch
//!
//! Zentraler Fehler-Enum der alle Geschaeftsregel- und Validierungsfehler
//! abdeckt. Die Abbildung auf TCRP-Status-Codes erfolgt im Server-Crate;
//! Fehler ueberqueren die Netzwerkgrenze nie als Exceptions.

use thiserror::Error;

/// Globaler Result-Alias fuer Klatsch
pub type Result<T> = std::result::Result<T, KlatschError>;

/// Alle moeglichen Fehler im Klatsch-System
#[derive(Debug, Error)]
pub enum KlatschError {
    // --- Geschaeftsregeln ---
    #[error("Raum existiert bereits: {0}")]
    RaumExistiert(String),

    #[error("Raum nicht gefunden: {0}")]
    RaumNichtGefunden(String),

    #[error("Raum ist voll: {0}")]
    RaumVoll(String),

    #[error("Falsches Passwort")]
    NichtAutorisiert,

    // --- Validierung ---
    #[error("Ungueltiger Raumname")]
    UngueltigerRaumname,

    #[error("Ungueltiger Benutzername")]
    UngueltigerBenutzername,

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl KlatschError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = KlatschError::RaumExistiert("Lobby".into());
        assert_eq!(e.to_string(), "Raum existiert bereits: Lobby");
    }

    #[test]
    fn intern_hilfsfunktion() {
        let e = KlatschError::intern("kaputt");
        assert!(matches!(e, KlatschError::Intern(_)));
        assert_eq!(e.to_string(), "Interner Fehler: kaputt");
    }
}
