//! Local destinations: persistent keys, LeaseSets, and the inbound data
//! sink their worker drains.

use std::path::Path;

use garlicroute_core::{IdentHash, Lease, LeaseSet, PrivateKeys};

use crate::Result;

pub struct LocalDestination {
    keys: PrivateKeys,
    name: String,
}

impl LocalDestination {
    /// Load `destinations/<name>.dat`, creating fresh keys on first use.
    pub fn load_or_create(data_dir: &Path, name: &str) -> Result<Self> {
        let dir = data_dir.join("destinations");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.dat", name));
        let keys = if path.exists() {
            PrivateKeys::read_file(&path)?
        } else {
            let keys = PrivateKeys::generate()?;
            keys.write_file(&path)?;
            keys
        };
        Ok(Self {
            keys,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> IdentHash {
        self.keys.identity().hash()
    }

    pub fn keys(&self) -> &PrivateKeys {
        &self.keys
    }

    /// The pool this destination's tunnels live in.
    pub fn pool_name(&self) -> String {
        format!("dest-{}", self.name)
    }

    /// Sign a LeaseSet over the current inbound leases. None when there is
    /// nothing to advertise.
    pub fn make_lease_set(&self, leases: Vec<Lease>) -> Result<Option<LeaseSet>> {
        if leases.is_empty() {
            return Ok(None);
        }
        let mut set = LeaseSet::new(
            self.keys.identity().clone(),
            *self.keys.encryption().public_key(),
            leases,
        );
        set.sign(self.keys.signing())?;
        Ok(Some(set))
    }
}
