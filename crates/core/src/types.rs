//! Gemeinsame Typen fuer Klatsch
//!
//! Das Token verwendet das Newtype-Pattern um Verwechslungen mit anderen
//! Strings (Raumname, Benutzername) zur Compilezeit auszuschliessen.
//! Die Erzeugung neuer Token liegt in `klatsch-auth`.

use serde::{Deserialize, Serialize};

/// Opaker Inhaber-Berechtigungsnachweis fuer Raum-Mitgliedschaft
///
/// Wird bei der Ausstellung an genau ein (Raum, Benutzername, IP)-Tripel
/// gebunden. Der innere String ist URL-sicheres Base64.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    /// Umhuellt einen bereits erzeugten Token-String
    pub fn neu(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    /// Gibt den vollstaendigen Token-String zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }

    /// Gekuerzte Darstellung fuer Log-Ausgaben (erste 8 Zeichen)
    ///
    /// Vollstaendige Token gehoeren nicht ins Log.
    pub fn gekuerzt(&self) -> &str {
        let ende = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..ende]
    }
}

impl From<String> for Token {
    fn from(wert: String) -> Self {
        Self(wert)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "token:{}...", self.gekuerzt())
    }
}
