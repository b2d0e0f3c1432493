//! klatsch-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert beide Draht-Formate des Systems:
//! - [`tcrp`] – das framebasierte Control-Protokoll (TCP) fuer
//!   Raum-Erstellung und -Beitritt
//! - [`chat`] – die Datagramm-Formate (UDP) fuer den Echtzeit-Chat
//!
//! Beide Seiten muessen sich bit-genau auf Header-Breite und
//! Feld-Reihenfolge einigen; alle Mehrbyte-Felder sind big-endian.

pub mod chat;
pub mod error;
pub mod tcrp;

pub use error::ProtokollFehler;
pub use tcrp::{Operation, StatusCode, TcrpNachricht, TcrpPayload, Zustand};
