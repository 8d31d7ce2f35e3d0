//! Size accounting for rclone-crypt encrypted payloads.
//!
//! rclone's crypt backend prefixes a file with a 32-byte header (an 8-byte
//! magic plus a 24-byte nonce) and then encrypts the plaintext in 64 KiB
//! blocks, each growing by a 16-byte `NaCl` secretbox authentication tag. A
//! zero-length plaintext still produces one (empty) tagged block.

const FILE_HEADER_SIZE: u64 = 32;
const BLOCK_SIZE: u64 = 65536;
const BLOCK_OVERHEAD: u64 = 16;

/// Size of the ciphertext that results from encrypting `plain_size` bytes.
#[must_use]
pub fn encrypted_size(plain_size: u64) -> u64 {
    let blocks = if plain_size == 0 {
        1
    } else {
        plain_size.div_ceil(BLOCK_SIZE)
    };
    FILE_HEADER_SIZE + plain_size + blocks * BLOCK_OVERHEAD
}

/// Inverse of [`encrypted_size`]: size of the plaintext that produced a
/// ciphertext of `encrypted_size` bytes.
#[must_use]
pub fn decrypted_size(encrypted_size: u64) -> u64 {
    if encrypted_size <= FILE_HEADER_SIZE + BLOCK_OVERHEAD {
        return 0;
    }
    let remaining = encrypted_size - FILE_HEADER_SIZE;
    let full_blocks = remaining / (BLOCK_SIZE + BLOCK_OVERHEAD);
    let leftover = remaining % (BLOCK_SIZE + BLOCK_OVERHEAD);
    full_blocks * BLOCK_SIZE + leftover.saturating_sub(BLOCK_OVERHEAD)
}
