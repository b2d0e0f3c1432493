//! Raum-Verwaltung: Registry, Teilnehmer und Lebenszyklus
//!
//! Die `RaumRegistry` ist die einzige Wahrheitsquelle ueber existierende
//! Raeume und ihre Teilnehmer. TCP-Control und UDP-Chat teilen sich
//! dieselbe Instanz.

pub mod raum;
pub mod registry;

pub use raum::{Raum, Teilnehmer};
pub use registry::{BeitrittFehler, RaumRegistry};
