//! RAKP authentication and session protection primitives: HMAC-SHA1 for key
//! exchange and integrity, AES-CBC-128 for confidentiality (cipher suite 3).

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bmcmon_session::SessionError;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub const AES_BLOCK: usize = 16;

/// HMAC-SHA1 over the concatenation of `chunks`.
pub fn hmac_sha1(key: &[u8], chunks: &[&[u8]]) -> [u8; 20] {
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac accepts any key length");
    for chunk in chunks {
        mac.update(chunk);
    }
    mac.finalize().into_bytes().into()
}

/// Derives the Session Integrity Key from the key-generating key (the user
/// password, absent a BMC key) and both sides' random numbers.
pub fn session_integrity_key(
    kg: &[u8],
    console_random: &[u8; 16],
    managed_random: &[u8; 16],
    role: u8,
    username: &str,
) -> [u8; 20] {
    hmac_sha1(
        kg,
        &[
            console_random,
            managed_random,
            &[role],
            &[username.len() as u8],
            username.as_bytes(),
        ],
    )
}

/// Additional key 1, used for session integrity.
pub fn k1(sik: &[u8; 20]) -> [u8; 20] {
    hmac_sha1(sik, &[&[0x01; 20]])
}

/// Additional key 2; its first 16 bytes are the AES confidentiality key.
pub fn k2(sik: &[u8; 20]) -> [u8; 20] {
    hmac_sha1(sik, &[&[0x02; 20]])
}

/// Encrypts an IPMI payload: confidentiality pad (0x01, 0x02, ... plus a
/// pad-length byte) to the AES block size, then CBC under a fresh IV, which
/// is prepended to the ciphertext.
pub fn encrypt(key: &[u8; 16], iv: &[u8; 16], payload: &[u8]) -> Vec<u8> {
    let pad = (AES_BLOCK - (payload.len() + 1) % AES_BLOCK) % AES_BLOCK;
    let mut padded = Vec::with_capacity(payload.len() + pad + 1);
    padded.extend_from_slice(payload);
    for i in 0..pad {
        padded.push((i + 1) as u8);
    }
    padded.push(pad as u8);

    let ciphertext = Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<NoPadding>(&padded);
    let mut out = Vec::with_capacity(AES_BLOCK + ciphertext.len());
    out.extend_from_slice(iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Reverses [`encrypt`]: splits off the IV, decrypts, strips the
/// confidentiality trailer.
pub fn decrypt(
    command: &'static str,
    key: &[u8; 16],
    payload: &[u8],
) -> Result<Vec<u8>, SessionError> {
    if payload.len() < AES_BLOCK * 2 || payload[AES_BLOCK..].len() % AES_BLOCK != 0 {
        return Err(SessionError::Malformed {
            command,
            reason: "encrypted payload has invalid length",
        });
    }
    let (iv, ciphertext) = payload.split_at(AES_BLOCK);
    let iv: [u8; 16] = iv.try_into().expect("split_at yields a block");
    let mut plaintext = ciphertext.to_vec();
    Aes128CbcDec::new(key.into(), (&iv).into())
        .decrypt_padded_mut::<NoPadding>(&mut plaintext)
        .map_err(|_| SessionError::Malformed {
            command,
            reason: "decryption failed",
        })?;
    let Some(&pad) = plaintext.last() else {
        return Err(SessionError::Malformed {
            command,
            reason: "empty plaintext",
        });
    };
    let trailer = usize::from(pad) + 1;
    if trailer > plaintext.len() {
        return Err(SessionError::Malformed {
            command,
            reason: "confidentiality pad exceeds payload",
        });
    }
    plaintext.truncate(plaintext.len() - trailer);
    Ok(plaintext)
}
