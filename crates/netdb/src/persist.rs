//! Disk layout: `netDb/rX/routerInfo-<base64>.dat` sharded by the first
//! base64 character of the hash, and `peerProfiles/pX/profile-<base64>.txt`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use garlicroute_core::IdentHash;
use garlicroute_crypto::BASE64_I2P;

use crate::profiles::RouterProfile;
use crate::store::NetDbStore;
use crate::Result;

fn shard_dir(base: &Path, prefix: &str, encoded: &str) -> PathBuf {
    let shard = encoded.chars().next().unwrap_or('-');
    base.join(format!("{}{}", prefix, shard))
}

pub fn router_info_path(netdb_dir: &Path, hash: &IdentHash) -> PathBuf {
    let encoded = BASE64_I2P.encode(hash.as_bytes());
    shard_dir(netdb_dir, "r", &encoded).join(format!("routerInfo-{}.dat", encoded))
}

pub fn profile_path(profiles_dir: &Path, hash: &IdentHash) -> PathBuf {
    let encoded = BASE64_I2P.encode(hash.as_bytes());
    shard_dir(profiles_dir, "p", &encoded).join(format!("profile-{}.txt", encoded))
}

/// Write every stored RouterInfo under `netDb/`.
pub fn save_router_infos(store: &NetDbStore, netdb_dir: &Path) -> Result<usize> {
    let mut saved = 0;
    for info in store.all_router_infos() {
        let Ok(bytes) = info.to_bytes() else { continue };
        let path = router_info_path(netdb_dir, &info.hash());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        saved += 1;
    }
    Ok(saved)
}

/// Load RouterInfos from disk into the store. Unparseable files are removed.
pub fn load_router_infos(store: &NetDbStore, netdb_dir: &Path) -> Result<usize> {
    let mut loaded = 0;
    if !netdb_dir.exists() {
        return Ok(0);
    }
    for shard in fs::read_dir(netdb_dir)? {
        let shard = shard?.path();
        if !shard.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&shard)? {
            let path = entry?.path();
            match fs::read(&path) {
                Ok(bytes) => match store.add_router_info(&bytes) {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "dropping bad router info file");
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable router info file"),
            }
        }
    }
    Ok(loaded)
}

pub fn save_profiles(store: &NetDbStore, profiles_dir: &Path) -> Result<usize> {
    let mut saved = 0;
    for (hash, profile) in store.all_profiles() {
        let path = profile_path(profiles_dir, &hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&profile)
            .expect("profile serializes");
        fs::write(&path, json)?;
        saved += 1;
    }
    Ok(saved)
}

pub fn load_profiles(store: &NetDbStore, profiles_dir: &Path) -> Result<usize> {
    if !profiles_dir.exists() {
        return Ok(0);
    }
    let mut profiles: Vec<(IdentHash, RouterProfile)> = Vec::new();
    for shard in fs::read_dir(profiles_dir)? {
        let shard = shard?.path();
        if !shard.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&shard)? {
            let path = entry?.path();
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(encoded) = name.strip_prefix("profile-") else {
                continue;
            };
            let Ok(hash) = IdentHash::from_base64(encoded) else {
                continue;
            };
            match fs::read_to_string(&path)
                .ok()
                .and_then(|json| serde_json::from_str(&json).ok())
            {
                Some(profile) => profiles.push((hash, profile)),
                None => debug!(path = %path.display(), "skipping bad profile file"),
            }
        }
    }
    let count = profiles.len();
    store.load_profiles(profiles);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use garlicroute_core::{PrivateKeys, RouterInfo};

    fn store_with_router() -> (NetDbStore, IdentHash) {
        let store = NetDbStore::new(IdentHash([0; 32]));
        let keys = PrivateKeys::generate().unwrap();
        let mut info = RouterInfo::new(keys.identity().clone());
        info.set_caps("LR");
        info.sign(keys.signing()).unwrap();
        let bytes = info.to_bytes().unwrap();
        store.add_router_info(&bytes).unwrap();
        (store, keys.identity().hash())
    }

    #[test]
    fn test_router_info_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let netdb_dir = dir.path().join("netDb");
        let (store, hash) = store_with_router();

        assert_eq!(save_router_infos(&store, &netdb_dir).unwrap(), 1);
        let path = router_info_path(&netdb_dir, &hash);
        assert!(path.exists());
        // sharded under rX where X is the first base64 character
        let shard = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert!(shard.starts_with('r'));
        assert_eq!(shard.len(), 2);

        let restored = NetDbStore::new(IdentHash([0; 32]));
        assert_eq!(load_router_infos(&restored, &netdb_dir).unwrap(), 1);
        assert!(restored.find_router_info(&hash).is_some());
    }

    #[test]
    fn test_corrupt_files_are_removed_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let netdb_dir = dir.path().join("netDb");
        let shard = netdb_dir.join("rA");
        fs::create_dir_all(&shard).unwrap();
        let bad = shard.join("routerInfo-garbage.dat");
        fs::write(&bad, b"not a router info").unwrap();

        let store = NetDbStore::new(IdentHash([0; 32]));
        assert_eq!(load_router_infos(&store, &netdb_dir).unwrap(), 0);
        assert!(!bad.exists());
    }

    #[test]
    fn test_profiles_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let profiles_dir = dir.path().join("peerProfiles");
        let store = NetDbStore::new(IdentHash([0; 32]));
        let peer = IdentHash([9; 32]);
        store.update_profile(&peer, |p| p.tunnel_agreed());

        assert_eq!(save_profiles(&store, &profiles_dir).unwrap(), 1);

        let restored = NetDbStore::new(IdentHash([0; 32]));
        assert_eq!(load_profiles(&restored, &profiles_dir).unwrap(), 1);
        assert_eq!(restored.profile(&peer).unwrap().tunnels_agreed, 1);
    }
}
