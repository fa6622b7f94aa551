//! Build-message assembly, transit-side handling, and reply peeling.
//!
//! The record order on the wire is shuffled. Before transmission every
//! record belonging to a hop after hop `h` is AES-decrypted under
//! `(h.reply_key, h.reply_iv)`, cancelling the encryption each downstream
//! hop applies when it records its response, so every hop finds its own slot
//! as raw ElGamal.

use rand::seq::SliceRandom;
use rand::{rngs::OsRng, RngCore};

use garlicroute_core::IdentHash;
use garlicroute_crypto::CbcAes;
use garlicroute_i2np::{
    BuildRequestRecord, BuildResponseRecord, TunnelBuildMessage, BUILD_RECORD_SIZE,
    STANDARD_BUILD_RECORDS,
};

use crate::config::TunnelConfig;
use crate::{Result, TunnelError};

/// Create the wire message for `config`, assigning record indices to hops.
/// The last hop's forwarded message id is `reply_msg_id`; that is the key
/// the pending-build table watches for.
pub fn create_build_message(
    config: &mut TunnelConfig,
    reply_msg_id: u32,
) -> Result<TunnelBuildMessage> {
    let num_hops = config.hops.len();
    if num_hops == 0 {
        return Err(TunnelError::NoHops);
    }
    let num_records = num_hops.max(STANDARD_BUILD_RECORDS);

    let mut indices: Vec<usize> = (0..num_records).collect();
    indices.shuffle(&mut OsRng);

    let mut records = vec![[0u8; BUILD_RECORD_SIZE]; num_records];
    let request_time = TunnelConfig::request_time_hours();

    for (i, hop) in config.hops.iter_mut().enumerate() {
        let next_msg_id = if i == num_hops - 1 {
            reply_msg_id
        } else {
            TunnelConfig::random_msg_id()
        };
        let request = BuildRequestRecord {
            receive_tunnel: hop.tunnel_id,
            our_ident: hop.ident,
            next_tunnel: hop.next_tunnel_id,
            next_ident: hop.next_ident,
            layer_key: hop.layer_key,
            iv_key: hop.iv_key,
            reply_key: hop.reply_key,
            reply_iv: hop.reply_iv,
            is_gateway: hop.is_gateway,
            is_endpoint: hop.is_endpoint,
            request_time,
            next_msg_id,
        };
        let idx = indices[i];
        records[idx] = request.encrypt_to(&hop.ident, &hop.encryption_key)?;
        hop.record_index = idx;
    }

    // fake records keep the hop count ambiguous
    for idx in indices.iter().skip(num_hops) {
        OsRng.fill_bytes(&mut records[*idx]);
    }

    // cancel the reply encryption downstream hops will apply: for each hop
    // from the second-to-last backward, decrypt every later hop's record
    for h in (0..num_hops.saturating_sub(1)).rev() {
        let cipher = CbcAes::new(config.hops[h].reply_key);
        let iv = config.hops[h].reply_iv;
        for later in &config.hops[h + 1..] {
            cipher.decrypt(&iv, &mut records[later.record_index]);
        }
    }

    Ok(TunnelBuildMessage::new(records))
}

/// What a transit router does with a build request addressed to it.
pub struct BuildOutcome {
    /// The decrypted request (the engine turns it into a transit tunnel when
    /// accepted).
    pub request: BuildRequestRecord,
    /// The message to forward to the next hop, re-encrypted.
    pub message: TunnelBuildMessage,
}

/// Find, decrypt, and answer our record; re-encrypt every record under our
/// reply key. Returns `None` when no record addresses us.
pub fn handle_build_request(
    message: &TunnelBuildMessage,
    our_ident: &IdentHash,
    secret_key: &[u8; 256],
    response: u8,
) -> Option<Result<BuildOutcome>> {
    let our_index = message
        .records
        .iter()
        .position(|r| garlicroute_i2np::record_is_for(r, our_ident))?;

    Some((|| {
        let request = BuildRequestRecord::decrypt(&message.records[our_index], secret_key)?;

        let mut records = message.records.clone();
        records[our_index] = BuildResponseRecord { ret: response }.encode();

        let cipher = CbcAes::new(request.reply_key);
        for record in records.iter_mut() {
            cipher.encrypt(&request.reply_iv, record);
        }

        Ok(BuildOutcome {
            request,
            message: TunnelBuildMessage {
                records,
                variable: message.variable,
            },
        })
    })())
}

/// Peel the reply at the tunnel creator: for each hop from last to first,
/// decrypt its own slot and every earlier slot under that hop's reply key,
/// then read each hop's accept/reject byte.
pub fn process_build_reply(config: &TunnelConfig, message: &TunnelBuildMessage) -> Result<Vec<u8>> {
    let mut records = message.records.clone();
    let num_records = records.len();

    for h in (0..config.hops.len()).rev() {
        let cipher = CbcAes::new(config.hops[h].reply_key);
        let iv = config.hops[h].reply_iv;
        for earlier in &config.hops[..=h] {
            if earlier.record_index < num_records {
                cipher.decrypt(&iv, &mut records[earlier.record_index]);
            } else {
                return Err(TunnelError::Malformed("record index out of range"));
            }
        }
    }

    Ok(config
        .hops
        .iter()
        .map(|hop| BuildResponseRecord::ret_of(&records[hop.record_index]))
        .collect())
}
