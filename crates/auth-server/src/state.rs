use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// The persisted authorization map: which addresses may stream at all, and
/// which link tokens each address has been handed.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthData {
    authorized_ips: HashSet<String>,
    ip_tokens: HashMap<String, HashSet<String>>,
}

/// Concurrent authorization store, written back to a JSON document on every
/// mutation. Consumers use the capability surface (`is_authorized`,
/// `validate_token`, `issue_token`) rather than the map itself.
#[derive(Clone)]
pub struct AuthState {
    data: Arc<RwLock<AuthData>>,
    data_path: PathBuf,
}

impl AuthState {
    pub fn new(data_dir: PathBuf) -> Self {
        let data_path = data_dir.join("auth.json");

        let data = if data_path.exists() {
            match fs::File::open(&data_path) {
                Ok(file) => serde_json::from_reader(file).unwrap_or_else(|err| {
                    warn!("Failed to deserialize auth file: {err}. Starting fresh.");
                    AuthData::default()
                }),
                Err(err) => {
                    warn!("Failed to open auth file: {err}. Starting fresh.");
                    AuthData::default()
                }
            }
        } else {
            AuthData::default()
        };

        Self {
            data: Arc::new(RwLock::new(data)),
            data_path,
        }
    }

    pub fn is_authorized(&self, ip: &str) -> bool {
        self.data.read().authorized_ips.contains(ip)
    }

    pub fn validate_token(&self, ip: &str, token: &str) -> bool {
        self.data
            .read()
            .ip_tokens
            .get(ip)
            .is_some_and(|tokens| tokens.contains(token))
    }

    /// Mints a fresh token bound to `ip` and persists it.
    pub fn issue_token(&self, ip: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        {
            let mut data = self.data.write();
            data.ip_tokens
                .entry(ip.to_string())
                .or_default()
                .insert(token.clone());
        }
        self.save();
        token
    }

    pub fn authorize(&self, ip: &str) {
        {
            let mut data = self.data.write();
            data.authorized_ips.insert(ip.to_string());
            data.ip_tokens.entry(ip.to_string()).or_default();
        }
        self.save();
    }

    /// Drops the address and every token it was ever handed.
    pub fn revoke(&self, ip: &str) {
        {
            let mut data = self.data.write();
            data.authorized_ips.remove(ip);
            data.ip_tokens.remove(ip);
        }
        self.save();
    }

    fn save(&self) {
        let bytes = {
            let data = self.data.read();
            serde_json::to_vec_pretty(&*data).unwrap_or_default()
        };

        let tmp_path = self.data_path.with_extension("tmp");
        if let Ok(mut file) = fs::File::create(&tmp_path) {
            if file.write_all(&bytes).is_ok() {
                let _ = file.sync_all();
                let _ = fs::rename(&tmp_path, &self.data_path);
            }
        } else {
            tracing::error!("Failed to create temp file for saving auth data");
        }
    }
}
