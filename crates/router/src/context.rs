//! The local router's identity, capabilities, and published RouterInfo.

use std::path::Path;

use tracing::info;

use garlicroute_core::{PrivateKeys, RouterAddress, RouterInfo};
use garlicroute_settings::RouterSettings;

use crate::Result;

/// Reachability as the transports report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStatus {
    Ok,
    Testing,
    Firewalled,
    Unknown,
    Proxy,
    Mesh,
}

pub struct RouterContext {
    keys: PrivateKeys,
    router_info: RouterInfo,
    status: RouterStatus,
    accepts_tunnels: bool,
    netid: u32,
    bandwidth: char,
    floodfill: bool,
}

impl RouterContext {
    /// Load `router.keys` from the data dir, generating a fresh identity on
    /// first start, and build the signed RouterInfo.
    pub fn load_or_create(settings: &RouterSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir)?;
        let keys_path = settings.data_dir.join("router.keys");
        let keys = if keys_path.exists() {
            PrivateKeys::read_file(&keys_path)?
        } else {
            info!("no router keys found, generating a new identity");
            let keys = PrivateKeys::generate()?;
            keys.write_file(&keys_path)?;
            keys
        };

        let router_info = RouterInfo::new(keys.identity().clone());
        let mut context = Self {
            keys,
            router_info,
            status: RouterStatus::Unknown,
            accepts_tunnels: true,
            netid: settings.netid,
            bandwidth: settings.bandwidth,
            floodfill: settings.floodfill,
        };
        context.refresh_router_info()?;
        context.persist_router_info(&settings.data_dir)?;
        Ok(context)
    }

    pub fn keys(&self) -> &PrivateKeys {
        &self.keys
    }

    pub fn ident(&self) -> garlicroute_core::IdentHash {
        self.keys.identity().hash()
    }

    pub fn router_info(&self) -> &RouterInfo {
        &self.router_info
    }

    pub fn netid(&self) -> u32 {
        self.netid
    }

    pub fn is_floodfill(&self) -> bool {
        self.floodfill
    }

    pub fn status(&self) -> RouterStatus {
        self.status
    }

    pub fn accepts_tunnels(&self) -> bool {
        self.accepts_tunnels
    }

    /// Cleared during graceful shutdown while transit drains.
    pub fn set_accepts_tunnels(&mut self, accepts: bool) {
        self.accepts_tunnels = accepts;
    }

    /// Returns true when the published RouterInfo changed and needs a
    /// republish.
    pub fn set_status(&mut self, status: RouterStatus) -> Result<bool> {
        if self.status == status {
            return Ok(false);
        }
        self.status = status;
        self.refresh_router_info()?;
        Ok(true)
    }

    pub fn set_addresses(&mut self, addresses: Vec<RouterAddress>) -> Result<()> {
        self.router_info.set_addresses(addresses);
        self.refresh_router_info()
    }

    fn caps_string(&self) -> String {
        let mut caps = String::new();
        caps.push(self.bandwidth);
        if self.floodfill {
            caps.push(garlicroute_core::caps::FLOODFILL);
        }
        match self.status {
            RouterStatus::Ok => caps.push(garlicroute_core::caps::REACHABLE),
            RouterStatus::Firewalled => caps.push(garlicroute_core::caps::UNREACHABLE),
            _ => {}
        }
        caps
    }

    fn refresh_router_info(&mut self) -> Result<()> {
        let caps = self.caps_string();
        self.router_info.set_caps(&caps);
        self.router_info.set_option("netId", &self.netid.to_string());
        self.router_info.sign(self.keys.signing())?;
        Ok(())
    }

    pub fn persist_router_info(&self, data_dir: &Path) -> Result<()> {
        let bytes = self.router_info.to_bytes()?;
        std::fs::write(data_dir.join("router.info"), bytes)?;
        Ok(())
    }

    /// The serialized published RouterInfo.
    pub fn router_info_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.router_info.to_bytes()?)
    }
}
