//! On-disk envelope for stored object states.
//!
//! ```text
//! magic "DTXS" | version u8 | uid [16] | type name len u32 | type name
//!   | payload len u64 | payload | sha256 [32]
//! ```
//!
//! The digest covers every byte before it, so a torn or altered file is
//! detected on read rather than decoded as garbage.

use sha2::{Digest, Sha256};

use durabletx_common::{Result, TxError, Uid};

const MAGIC: &[u8; 4] = b"DTXS";
const VERSION: u8 = 1;
const DIGEST_LEN: usize = 32;

/// Compute SHA-256 hash.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Wrap a payload for storage.
pub fn seal(uid: Uid, type_name: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        MAGIC.len() + 1 + 16 + 4 + type_name.len() + 8 + payload.len() + DIGEST_LEN,
    );
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(uid.as_bytes());
    out.extend_from_slice(&(type_name.len() as u32).to_be_bytes());
    out.extend_from_slice(type_name.as_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(payload);
    let digest = sha256(&out);
    out.extend_from_slice(&digest);
    out
}

/// Verify an envelope and return its payload.
///
/// Fails with `CorruptState` if the envelope is truncated, fails its digest,
/// or belongs to a different object.
pub fn unseal(bytes: &[u8], uid: Uid, type_name: &str) -> Result<Vec<u8>> {
    if bytes.len() < DIGEST_LEN {
        return Err(TxError::corrupt(format!("{uid}: envelope truncated")));
    }
    let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
    if sha256(body) != digest {
        return Err(TxError::corrupt(format!("{uid}: digest mismatch")));
    }

    let mut reader = Reader { body, pos: 0 };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(TxError::corrupt(format!("{uid}: bad magic")));
    }
    let version = reader.take(1)?[0];
    if version != VERSION {
        return Err(TxError::corrupt(format!(
            "{uid}: unsupported envelope version {version}"
        )));
    }
    let mut uid_bytes = [0u8; 16];
    uid_bytes.copy_from_slice(reader.take(16)?);
    let stored_uid = Uid::from_bytes(uid_bytes);
    let name_len = reader.u32()? as usize;
    let stored_type = reader.take(name_len)?;
    if stored_uid != uid || stored_type != type_name.as_bytes() {
        return Err(TxError::corrupt(format!(
            "{uid}: envelope belongs to {stored_uid} ({})",
            String::from_utf8_lossy(stored_type)
        )));
    }
    let payload_len = reader.u64()? as usize;
    let payload = reader.take(payload_len)?.to_vec();
    if reader.pos != body.len() {
        return Err(TxError::corrupt(format!("{uid}: trailing bytes in envelope")));
    }
    Ok(payload)
}

struct Reader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.body.len() - self.pos < len {
            return Err(TxError::corrupt("envelope truncated"));
        }
        let body: &'a [u8] = self.body;
        let slice = &body[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }
}
