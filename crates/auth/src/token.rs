//! Ausstellung, Bindung und Widerruf von Inhaber-Token

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use klatsch_core::Token;
use klatsch_rooms::RaumRegistry;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Bindung eines Tokens an sein (Raum, Benutzername, IP)-Tripel
#[derive(Debug, Clone)]
pub struct TokenBindung {
    /// Raum fuer den das Token gilt
    pub raum_name: String,
    /// Benutzername aus der TCRP-Transaktion
    pub benutzername: String,
    /// IP an die das Token gebunden ist
    pub ip: IpAddr,
    /// Ausstellungszeitpunkt
    pub ausgestellt_am: DateTime<Utc>,
}

struct Inner {
    bindungen: RwLock<HashMap<Token, TokenBindung>>,
    registry: RaumRegistry,
}

/// Thread-sicheres Handle auf den Token-Speicher
///
/// Clone gibt eine Referenz auf denselben inneren Zustand. Die Registry
/// wird bei der Validierung konsultiert, damit widerrufene Mitgliedschaft
/// sofort auch das Token entwerten kann.
#[derive(Clone)]
pub struct TokenVerwaltung {
    inner: Arc<Inner>,
}

impl TokenVerwaltung {
    /// Erstellt eine Token-Verwaltung ueber der gegebenen Registry
    pub fn neu(registry: RaumRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                bindungen: RwLock::new(HashMap::new()),
                registry,
            }),
        }
    }

    /// Stellt ein frisches Token fuer das gegebene Tripel aus
    pub async fn ausstellen(
        &self,
        raum_name: &str,
        benutzername: &str,
        ip: IpAddr,
    ) -> Token {
        let token = Token::neu(token_generieren());
        let bindung = TokenBindung {
            raum_name: raum_name.to_string(),
            benutzername: benutzername.to_string(),
            ip,
            ausgestellt_am: Utc::now(),
        };
        self.inner
            .bindungen
            .write()
            .await
            .insert(token.clone(), bindung);
        debug!(raum = %raum_name, benutzer = %benutzername, token = %token, "Token ausgestellt");
        token
    }

    /// Validiert ein Token gegen die Absender-IP
    ///
    /// Fail-closed: `None` bei unbekanntem Token, IP-Abweichung oder wenn
    /// die Registry das Token nicht mehr als Teilnehmer fuehrt.
    pub async fn validieren(&self, token: &Token, absender_ip: IpAddr) -> Option<TokenBindung> {
        let bindung = {
            let bindungen = self.inner.bindungen.read().await;
            bindungen.get(token)?.clone()
        };

        if bindung.ip != absender_ip {
            warn!(
                token = %token,
                erwartet = %bindung.ip,
                absender = %absender_ip,
                "Token von fremder IP verwendet"
            );
            return None;
        }

        // Registry-Abgleich ausserhalb des Bindungs-Guards
        if !self
            .inner
            .registry
            .ist_teilnehmer(&bindung.raum_name, token)
            .await
        {
            return None;
        }
        Some(bindung)
    }

    /// Widerruft ein einzelnes Token
    pub async fn widerrufen(&self, token: &Token) -> Option<TokenBindung> {
        let bindung = self.inner.bindungen.write().await.remove(token);
        if let Some(ref bindung) = bindung {
            debug!(raum = %bindung.raum_name, token = %token, "Token widerrufen");
        }
        bindung
    }

    /// Widerruft eine Menge von Token (z. B. nach einem Raum-Abbau)
    pub async fn alle_widerrufen(&self, token: &[Token]) {
        if token.is_empty() {
            return;
        }
        let mut bindungen = self.inner.bindungen.write().await;
        for t in token {
            bindungen.remove(t);
        }
        debug!(anzahl = token.len(), "Token-Stapel widerrufen");
    }

    /// Anzahl aktuell gebundener Token
    pub async fn anzahl(&self) -> usize {
        self.inner.bindungen.read().await.len()
    }
}

/// Erzeugt 32 Zufallsbytes als URL-sicheres Base64 ohne Padding
fn token_generieren() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}
