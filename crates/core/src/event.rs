//! Mitgliedschafts-Ereignisse
//!
//! Die Raum-Registry meldet Beitritte und Austritte ueber einen
//! tokio-mpsc-Kanal an den Broadcast-Dienst, der daraus USER_JOIN- und
//! USER_LEAVE-Datagramme erzeugt. Die Erzeugung der Hinweise haengt damit
//! an der Registry-Mutation, nicht am Datagramm-Handler.

use crate::types::Token;
use serde::{Deserialize, Serialize};

/// Ereignis einer Mitgliedschafts-Aenderung in einem Raum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MitgliedschaftsEreignis {
    /// Ein Teilnehmer ist einem Raum beigetreten
    Beigetreten {
        raum_name: String,
        benutzername: String,
        token: Token,
    },
    /// Ein Teilnehmer hat einen Raum verlassen
    Verlassen {
        raum_name: String,
        benutzername: String,
        token: Token,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ereignis_ist_serde_kompatibel() {
        let ereignis = MitgliedschaftsEreignis::Beigetreten {
            raum_name: "Lobby".into(),
            benutzername: "Alice".into(),
            token: Token::neu("t1"),
        };
        let json = serde_json::to_string(&ereignis).unwrap();
        let _: MitgliedschaftsEreignis = serde_json::from_str(&json).unwrap();
    }
}
