// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Encryption key management.
//!
//! Two 16-byte symmetric keys per association: the primary key is installed
//! once as the radio's group key, the local key is bound to the remote peer
//! for unicast traffic. Pairing broadcasts both in the clear and trusts the
//! first responder; there is no authenticated exchange.

use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::config::KEY_LEN;
use crate::error::{Error, Result};

/// Holds the primary (group) key and the local (per-direction) key.
pub struct KeyManager {
    primary: [u8; KEY_LEN],
    local: [u8; KEY_LEN],
    rng: SystemRandom,
}

impl KeyManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: [0u8; KEY_LEN],
            local: [0u8; KEY_LEN],
            rng: SystemRandom::new(),
        }
    }

    /// Fill both keys with fresh entropy.
    ///
    /// The source must be non-deterministic across resets; two devices
    /// choosing keys at the same instant must not collide.
    pub fn choose(&mut self) -> Result<()> {
        self.rng
            .fill(&mut self.primary)
            .and_then(|()| self.rng.fill(&mut self.local))
            .map_err(|_| Error::EntropyFailed)
    }

    /// Zero both keys (encryption disabled, or association torn down).
    pub fn clear(&mut self) {
        self.primary.zeroize();
        self.local.zeroize();
    }

    /// Adopt keys chosen by the tie winner or loaded from persistence.
    pub fn install(&mut self, primary: &[u8; KEY_LEN], local: &[u8; KEY_LEN]) {
        self.primary.copy_from_slice(primary);
        self.local.copy_from_slice(local);
    }

    #[must_use]
    pub fn primary(&self) -> &[u8; KEY_LEN] {
        &self.primary
    }

    #[must_use]
    pub fn local(&self) -> &[u8; KEY_LEN] {
        &self.local
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeyManager {
    fn drop(&mut self) {
        self.primary.zeroize();
        self.local.zeroize();
    }
}
