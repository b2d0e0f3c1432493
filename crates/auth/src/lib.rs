//! Token-Ausstellung und -Validierung fuer Klatsch
//!
//! Token sind an genau ein (Raum, Benutzername, IP)-Tripel gebunden und
//! leben hoechstens so lange wie ihr Raum. Die Validierung ist
//! fail-closed: alles was nicht eindeutig gueltig ist, ist ungueltig.

pub mod token;

pub use token::{TokenBindung, TokenVerwaltung};
