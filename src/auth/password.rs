//! PBKDF2 password hashes in the `pbkdf2:sha256:<rounds>$<salt>$<hex>` format

use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

fn derive(password: &str, salt: &str, rounds: u32) -> Vec<u8> {
    let mut out = vec![0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut out);
    out
}

pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    let rounds = rounds.max(1);
    format!(
        "pbkdf2:sha256:{}${}${}",
        rounds,
        salt,
        hex::encode(derive(password, &salt, rounds))
    )
}

/// Check `password` against a stored hash; malformed hashes never match
pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(method), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let rounds = match method.split(':').collect::<Vec<_>>().as_slice() {
        ["pbkdf2", "sha256", rounds] => match rounds.parse::<u32>() {
            Ok(r) if r > 0 => r,
            _ => return false,
        },
        _ => return false,
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let actual = derive(password, salt, rounds);
    constant_time_eq(&actual, &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
