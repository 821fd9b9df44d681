//! Container header parsing, serialization and re-encryption.
//!
//! Header wire format (integers little-endian):
//!
//! ```text
//! magic   : 8 bytes  "crypt4gh"
//! version : u32      1
//! count   : u32      number of packets
//! packet  : length u32 (inclusive of the length field)
//!           method u32 (0 = X25519/ChaCha20-Poly1305 envelope,
//!                       1 = ed25519 signature, plaintext)
//!           method-specific body
//! ```
//!
//! An envelope body is `writer_pubkey[32] || nonce[12] || ciphertext+tag`.
//! The decrypted payload starts with a packet type: `0` carries the data
//! encryption method and a session key, `1` carries an edit list.

use crate::error::{CryptError, CryptResult};
use crate::keys::{HeaderSigningKey, PublicKey, SecretKey};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Container magic bytes.
pub const MAGIC: [u8; 8] = *b"crypt4gh";

/// Container format version.
pub const VERSION: u32 = 1;

/// Data encryption method: ChaCha20-Poly1305 over 64 KiB segments.
pub const DATA_METHOD_CHACHA20_POLY1305: u32 = 0;

const METHOD_X25519_CHACHA20_POLY1305: u32 = 0;
const METHOD_SIGNATURE_ED25519: u32 = 1;

const PACKET_TYPE_DATA_ENC: u32 = 0;
const PACKET_TYPE_EDIT_LIST: u32 = 1;

const WRITER_PUBKEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SIGNATURE_LEN: usize = 64;

/// Upper bound on a single packet, to reject corrupted length fields
/// before allocating.
const MAX_PACKET_LEN: usize = 1 << 20;
const MAX_PACKET_COUNT: u32 = 256;

const HKDF_SALT: &[u8] = b"seqvault header envelope v1";

/// One self-contained unit within a container header.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Packet {
    Envelope {
        writer: [u8; WRITER_PUBKEY_LEN],
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    },
    Signature([u8; SIGNATURE_LEN]),
}

impl Packet {
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Envelope {
                writer,
                nonce,
                ciphertext,
            } => {
                let len = 4 + 4 + WRITER_PUBKEY_LEN + NONCE_LEN + ciphertext.len();
                out.extend_from_slice(&(len as u32).to_le_bytes());
                out.extend_from_slice(&METHOD_X25519_CHACHA20_POLY1305.to_le_bytes());
                out.extend_from_slice(writer);
                out.extend_from_slice(nonce);
                out.extend_from_slice(ciphertext);
            }
            Self::Signature(sig) => {
                let len = 4 + 4 + SIGNATURE_LEN;
                out.extend_from_slice(&(len as u32).to_le_bytes());
                out.extend_from_slice(&METHOD_SIGNATURE_ED25519.to_le_bytes());
                out.extend_from_slice(sig);
            }
        }
    }
}

/// The decrypted content of a header: session keys and edit-list metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderContent {
    pub session_keys: Vec<[u8; 32]>,
    pub data_method: u32,
    pub edit_list: Option<Vec<u64>>,
}

impl HeaderContent {
    pub fn new(session_key: [u8; 32]) -> Self {
        Self {
            session_keys: vec![session_key],
            data_method: DATA_METHOD_CHACHA20_POLY1305,
            edit_list: None,
        }
    }

    pub fn with_edit_list(mut self, lengths: Vec<u64>) -> Self {
        self.edit_list = Some(lengths);
        self
    }
}

/// A parsed container header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    packets: Vec<Packet>,
}

impl Header {
    /// Number of packets, including a trailing signature packet if present.
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Whether the header carries a trailing signature packet.
    pub fn is_signed(&self) -> bool {
        matches!(self.packets.last(), Some(Packet::Signature(_)))
    }

    /// Parse a header from an exact byte slice.
    pub fn from_bytes(data: &[u8]) -> CryptResult<Self> {
        let (count, mut offset) = parse_preamble(data)?;

        let mut packets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if data.len() < offset + 8 {
                return Err(CryptError::InvalidContainerFormat(
                    "truncated packet".to_string(),
                ));
            }
            let len = read_u32(data, offset) as usize;
            if !(8..=MAX_PACKET_LEN).contains(&len) {
                return Err(CryptError::InvalidContainerFormat(format!(
                    "invalid packet length {len}"
                )));
            }
            if data.len() < offset + len {
                return Err(CryptError::InvalidContainerFormat(
                    "packet length exceeds header".to_string(),
                ));
            }
            let method = read_u32(data, offset + 4);
            let body = &data[offset + 8..offset + len];
            let packet = match method {
                METHOD_X25519_CHACHA20_POLY1305 => {
                    if body.len() < WRITER_PUBKEY_LEN + NONCE_LEN + TAG_LEN {
                        return Err(CryptError::InvalidContainerFormat(
                            "envelope packet too short".to_string(),
                        ));
                    }
                    let mut writer = [0u8; WRITER_PUBKEY_LEN];
                    writer.copy_from_slice(&body[..WRITER_PUBKEY_LEN]);
                    let mut nonce = [0u8; NONCE_LEN];
                    nonce.copy_from_slice(
                        &body[WRITER_PUBKEY_LEN..WRITER_PUBKEY_LEN + NONCE_LEN],
                    );
                    Packet::Envelope {
                        writer,
                        nonce,
                        ciphertext: body[WRITER_PUBKEY_LEN + NONCE_LEN..].to_vec(),
                    }
                }
                METHOD_SIGNATURE_ED25519 => {
                    let sig: [u8; SIGNATURE_LEN] = body.try_into().map_err(|_| {
                        CryptError::InvalidContainerFormat(format!(
                            "signature packet must be {SIGNATURE_LEN} bytes, got {}",
                            body.len()
                        ))
                    })?;
                    Packet::Signature(sig)
                }
                other => {
                    return Err(CryptError::InvalidContainerFormat(format!(
                        "unsupported packet method {other}"
                    )));
                }
            };
            packets.push(packet);
            offset += len;
        }

        if offset != data.len() {
            return Err(CryptError::InvalidContainerFormat(
                "trailing bytes after header".to_string(),
            ));
        }

        Ok(Self { packets })
    }

    /// Serialize the full header, signature packet included.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_inner(false)
    }

    /// The byte message a trailing signature covers: the full serialized
    /// header minus the signature packet bytes themselves (the packet count
    /// still includes it).
    fn signed_message(&self) -> Vec<u8> {
        self.serialize_inner(true)
    }

    fn serialize_inner(&self, skip_signature_bytes: bool) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.packets.len() as u32).to_le_bytes());
        for packet in &self.packets {
            if skip_signature_bytes && matches!(packet, Packet::Signature(_)) {
                continue;
            }
            packet.write_to(&mut out);
        }
        out
    }

    /// Encrypt header content for a single recipient (writer side; used by
    /// depositor tooling and test fixtures).
    pub fn encrypt(content: &HeaderContent, recipient: &PublicKey) -> CryptResult<Self> {
        let mut packets = Vec::new();
        for session_key in &content.session_keys {
            let payload = data_enc_payload(content.data_method, session_key);
            packets.push(seal_envelope(&payload, recipient)?);
        }
        if let Some(lengths) = &content.edit_list {
            packets.push(seal_envelope(&edit_list_payload(lengths), recipient)?);
        }
        Ok(Self { packets })
    }

    /// Decrypt every envelope packet addressed to the supplied secret key.
    ///
    /// Fails with `UnauthorizedHeader` when not a single packet opens.
    pub fn decrypt(&self, secret: &SecretKey) -> CryptResult<HeaderContent> {
        let reader_pub = secret.public_key();
        let mut session_keys = Vec::new();
        let mut data_method = DATA_METHOD_CHACHA20_POLY1305;
        let mut edit_list = None;
        let mut opened = 0usize;

        for packet in &self.packets {
            let Packet::Envelope {
                writer,
                nonce,
                ciphertext,
            } = packet
            else {
                continue;
            };
            let Some(payload) = open_envelope(secret, &reader_pub, writer, nonce, ciphertext)
            else {
                continue;
            };
            opened += 1;
            match parse_payload(&payload)? {
                Payload::SessionKey { method, key } => {
                    data_method = method;
                    session_keys.push(key);
                }
                Payload::EditList(lengths) => edit_list = Some(lengths),
            }
        }

        if opened == 0 {
            return Err(CryptError::UnauthorizedHeader);
        }
        Ok(HeaderContent {
            session_keys,
            data_method,
            edit_list,
        })
    }

    /// Re-encrypt the header for a new recipient.
    ///
    /// Every packet that opens with `secret` is re-enveloped for `recipient`
    /// with its decrypted payload bytes unchanged; packets addressed to other
    /// recipients are preserved verbatim. A stale signature packet is dropped
    /// and a fresh one appended when a signing key is supplied.
    pub fn reencrypt(
        &self,
        recipient: &PublicKey,
        secret: &SecretKey,
        signing_key: Option<&HeaderSigningKey>,
    ) -> CryptResult<Self> {
        let reader_pub = secret.public_key();
        let mut packets = Vec::with_capacity(self.packets.len() + 1);
        let mut opened = 0usize;

        for packet in &self.packets {
            match packet {
                Packet::Envelope {
                    writer,
                    nonce,
                    ciphertext,
                } => match open_envelope(secret, &reader_pub, writer, nonce, ciphertext) {
                    Some(payload) => {
                        opened += 1;
                        packets.push(seal_envelope(&payload, recipient)?);
                    }
                    None => packets.push(packet.clone()),
                },
                Packet::Signature(_) => {}
            }
        }

        if opened == 0 {
            return Err(CryptError::UnauthorizedHeader);
        }

        let mut header = Self { packets };
        if let Some(key) = signing_key {
            header.sign(key);
        }
        Ok(header)
    }

    fn sign(&mut self, key: &HeaderSigningKey) {
        // The packet count covers the signature packet, so it has to be
        // appended before the signed message is formed.
        self.packets.push(Packet::Signature([0u8; SIGNATURE_LEN]));
        let signature = key.sign(&self.signed_message());
        if let Some(Packet::Signature(slot)) = self.packets.last_mut() {
            *slot = signature;
        }
    }

    /// Verify the trailing signature packet against a verifying key.
    pub fn verify_signature(&self, key: &VerifyingKey) -> CryptResult<()> {
        let Some(Packet::Signature(sig)) = self.packets.last() else {
            return Err(CryptError::InvalidContainerFormat(
                "header carries no signature packet".to_string(),
            ));
        };
        key.verify(&self.signed_message(), &Signature::from_bytes(sig))
            .map_err(|_| {
                CryptError::InvalidContainerFormat(
                    "header signature verification failed".to_string(),
                )
            })
    }
}

/// Read a header off the front of a byte source, leaving the reader
/// positioned at the first body byte.
pub async fn read_header<R>(reader: &mut R) -> CryptResult<Header>
where
    R: AsyncRead + Unpin,
{
    let mut preamble = [0u8; 16];
    reader.read_exact(&mut preamble).await?;
    let (count, _) = parse_preamble(&preamble)?;

    let mut bytes = preamble.to_vec();
    for _ in 0..count {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if !(8..=MAX_PACKET_LEN).contains(&len) {
            return Err(CryptError::InvalidContainerFormat(format!(
                "invalid packet length {len}"
            )));
        }
        let mut body = vec![0u8; len - 4];
        reader.read_exact(&mut body).await?;
        bytes.extend_from_slice(&len_buf);
        bytes.extend_from_slice(&body);
    }

    Header::from_bytes(&bytes)
}

fn parse_preamble(data: &[u8]) -> CryptResult<(u32, usize)> {
    if data.len() < 16 {
        return Err(CryptError::InvalidContainerFormat(
            "truncated preamble".to_string(),
        ));
    }
    if data[..8] != MAGIC {
        return Err(CryptError::InvalidContainerFormat("bad magic".to_string()));
    }
    let version = read_u32(data, 8);
    if version != VERSION {
        return Err(CryptError::InvalidContainerFormat(format!(
            "unsupported version {version}"
        )));
    }
    let count = read_u32(data, 12);
    if count == 0 || count > MAX_PACKET_COUNT {
        return Err(CryptError::InvalidContainerFormat(format!(
            "invalid packet count {count}"
        )));
    }
    Ok((count, 16))
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

enum Payload {
    SessionKey { method: u32, key: [u8; 32] },
    EditList(Vec<u64>),
}

fn data_enc_payload(method: u32, session_key: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    out.extend_from_slice(&PACKET_TYPE_DATA_ENC.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(session_key);
    out
}

fn edit_list_payload(lengths: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + lengths.len() * 8);
    out.extend_from_slice(&PACKET_TYPE_EDIT_LIST.to_le_bytes());
    out.extend_from_slice(&(lengths.len() as u32).to_le_bytes());
    for length in lengths {
        out.extend_from_slice(&length.to_le_bytes());
    }
    out
}

fn parse_payload(payload: &[u8]) -> CryptResult<Payload> {
    if payload.len() < 4 {
        return Err(CryptError::InvalidContainerFormat(
            "packet payload too short".to_string(),
        ));
    }
    match read_u32(payload, 0) {
        PACKET_TYPE_DATA_ENC => {
            if payload.len() != 40 {
                return Err(CryptError::InvalidContainerFormat(
                    "malformed data encryption packet".to_string(),
                ));
            }
            let key: [u8; 32] = payload[8..40].try_into().unwrap();
            Ok(Payload::SessionKey {
                method: read_u32(payload, 4),
                key,
            })
        }
        PACKET_TYPE_EDIT_LIST => {
            if payload.len() < 8 {
                return Err(CryptError::InvalidContainerFormat(
                    "malformed edit list packet".to_string(),
                ));
            }
            let count = read_u32(payload, 4) as usize;
            if payload.len() != 8 + count * 8 {
                return Err(CryptError::InvalidContainerFormat(
                    "edit list length mismatch".to_string(),
                ));
            }
            let lengths = payload[8..]
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            Ok(Payload::EditList(lengths))
        }
        other => Err(CryptError::InvalidContainerFormat(format!(
            "unknown packet type {other}"
        ))),
    }
}

fn derive_envelope_key(
    shared: &[u8; 32],
    writer_pub: &[u8; 32],
    reader_pub: &[u8; 32],
) -> CryptResult<[u8; 32]> {
    let mut info = [0u8; 64];
    info[..32].copy_from_slice(writer_pub);
    info[32..].copy_from_slice(reader_pub);

    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared);
    let mut key = [0u8; 32];
    hkdf.expand(&info, &mut key)
        .map_err(|_| CryptError::Seal("HKDF expansion failed".to_string()))?;
    Ok(key)
}

fn seal_envelope(payload: &[u8], recipient: &PublicKey) -> CryptResult<Packet> {
    let mut ephemeral = [0u8; 32];
    OsRng.fill_bytes(&mut ephemeral);
    let ephemeral = Scalar::from_bytes_mod_order(ephemeral);
    let writer_pub = MontgomeryPoint::mul_base(&ephemeral);
    let shared = ephemeral * recipient.point();

    let key = derive_envelope_key(&shared.to_bytes(), &writer_pub.to_bytes(), recipient.as_bytes())?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), payload)
        .map_err(|e| CryptError::Seal(e.to_string()))?;

    Ok(Packet::Envelope {
        writer: writer_pub.to_bytes(),
        nonce,
        ciphertext,
    })
}

fn open_envelope(
    secret: &SecretKey,
    reader_pub: &PublicKey,
    writer: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Option<Vec<u8>> {
    let shared = secret.scalar() * MontgomeryPoint(*writer);
    let key = derive_envelope_key(&shared.to_bytes(), writer, reader_pub.as_bytes()).ok()?;
    ChaCha20Poly1305::new(Key::from_slice(&key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .ok()
}
