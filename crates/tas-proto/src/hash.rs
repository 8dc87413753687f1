//! Legacy password digest for `LOGIN`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};

/// Digest a plain-text password the way `LOGIN` expects it: the raw MD5 of
/// the password, base64-encoded.
///
/// MD5 is no protection worth the name; the scheme survives here only
/// because the server side of the protocol demands it.
pub fn hash_password(plain: &str) -> String {
    STANDARD.encode(Md5::digest(plain.as_bytes()))
}
