//! klatsch-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Klatsch-Crates gemeinsam genutzt werden: das Token als
//! Inhaber-Berechtigungsnachweis, Mitgliedschafts-Ereignisse und der
//! zentrale Fehler-Enum.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{KlatschError, Result};
pub use event::MitgliedschaftsEreignis;
pub use types::Token;
