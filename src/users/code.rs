use rand::Rng;
use thiserror::Error;

use crate::store::{StoreError, StoreSession};

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 8;

/// Collisions against ~36^8 codes are vanishingly rare; the cap exists so a
/// storage fault can never spin this loop forever.
const MAX_MINT_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("no unused referral code after {attempts} attempts")]
    Exhausted { attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Draw one candidate code: 8 characters, uniform over A-Z0-9.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Keep drawing until a candidate is unused as seen from the caller's
/// session, so codes inserted earlier in the same transaction count as taken.
pub async fn mint_unique(session: &mut dyn StoreSession) -> Result<String, CodeGenError> {
    for _ in 0..MAX_MINT_ATTEMPTS {
        let code = generate();
        if !session.referral_code_exists(&code).await? {
            return Ok(code);
        }
    }
    Err(CodeGenError::Exhausted {
        attempts: MAX_MINT_ATTEMPTS,
    })
}
