//! Frame encryption for the BM6 link.
//!
//! Every frame exchanged with a BM6 module is a single 16 byte block encrypted
//! with AES-128 in CBC mode, an all-zero IV and no padding. The key is static
//! and shared by every module in the field.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// The length in bytes of every frame on the link
pub const FRAME_LEN: usize = 16;

/// One plaintext or ciphertext frame
pub type Frame = [u8; FRAME_LEN];

/// The key burned into BM6 modules
pub const BM6_KEY: [u8; 16] = [
    0x6c, 0x65, 0x61, 0x67, 0x65, 0x6e, 0x64, 0xff, 0xfe, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x39,
];

/// Encrypts and decrypts single frames with a fixed key.
///
/// The codec is stateless: a fresh CBC context is created for every frame, so
/// each frame is chained from the zero IV and never from a previous frame.
#[derive(Clone, Copy)]
pub struct FrameCipher {
    key: [u8; 16],
}

impl FrameCipher {
    const IV: [u8; 16] = [0; 16];

    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, frame: &Frame) -> Frame {
        let mut block = GenericArray::clone_from_slice(frame);
        Encryptor::new(&self.key.into(), &Self::IV.into()).encrypt_block_mut(&mut block);
        Self::to_frame(&block)
    }

    pub fn decrypt(&self, frame: &Frame) -> Frame {
        let mut block = GenericArray::clone_from_slice(frame);
        Decryptor::new(&self.key.into(), &Self::IV.into()).decrypt_block_mut(&mut block);
        Self::to_frame(&block)
    }

    fn to_frame(block: &[u8]) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(block);
        frame
    }
}

impl Default for FrameCipher {
    fn default() -> Self {
        Self::new(BM6_KEY)
    }
}

// The key is deliberately left out of debug output.
impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
fn frame(h: &str) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame.copy_from_slice(&hex::decode(h).unwrap());
    frame
}

#[test]
fn test_encrypt_request_frame() {
    let cipher = FrameCipher::default();
    let encrypted = cipher.encrypt(&frame("d1550700000000000000000000000000"));
    assert_eq!(hex::encode(encrypted), "697ea0b5d54cf024e794772355554114");
}

#[test]
fn test_decrypt_telemetry_frame() {
    let cipher = FrameCipher::default();
    let decrypted = cipher.decrypt(&frame("bb30be24e423b02308abdeead95a6a2b"));
    assert_eq!(hex::encode(decrypted), "d15507001e0032019000000000000000");
}

#[test]
fn test_round_trip() {
    let cipher = FrameCipher::default();
    for plaintext in [
        [0u8; FRAME_LEN],
        [0xff; FRAME_LEN],
        frame("000102030405060708090a0b0c0d0e0f"),
        frame("d15507011e0032019000000000000000"),
    ] {
        assert_eq!(cipher.decrypt(&cipher.encrypt(&plaintext)), plaintext);
    }
}

#[test]
fn test_frames_are_not_chained() {
    let cipher = FrameCipher::default();
    let plaintext = frame("d1550700000000000000000000000000");
    assert_eq!(cipher.encrypt(&plaintext), cipher.encrypt(&plaintext));
}

#[test]
fn test_other_key_differs() {
    let plaintext = frame("d1550700000000000000000000000000");
    let other = FrameCipher::new([0x42; 16]);
    assert_ne!(other.encrypt(&plaintext), FrameCipher::default().encrypt(&plaintext));
    assert_eq!(format!("{other:?}"), "FrameCipher { .. }");
}
