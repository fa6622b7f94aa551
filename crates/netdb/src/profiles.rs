//! Peer reliability profiles, consulted by hop selection.

use serde::{Deserialize, Serialize};

use garlicroute_core::timestamp_s;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterProfile {
    pub tunnels_agreed: u64,
    pub tunnels_declined: u64,
    pub tunnels_non_replied: u64,
    pub last_updated_s: u64,
}

impl RouterProfile {
    pub fn tunnel_agreed(&mut self) {
        self.tunnels_agreed += 1;
        self.last_updated_s = timestamp_s();
    }

    pub fn tunnel_declined(&mut self) {
        self.tunnels_declined += 1;
        self.last_updated_s = timestamp_s();
    }

    pub fn tunnel_non_replied(&mut self) {
        self.tunnels_non_replied += 1;
        self.last_updated_s = timestamp_s();
    }

    /// A peer is a bad hop candidate when it mostly declines or ignores
    /// build requests.
    pub fn is_bad(&self) -> bool {
        let total = self.tunnels_agreed + self.tunnels_declined + self.tunnels_non_replied;
        if total < 4 {
            return false;
        }
        self.tunnels_agreed * 3 < total
    }
}
