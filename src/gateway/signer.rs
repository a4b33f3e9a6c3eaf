//! Trading wallet signer.
//!
//! Loads the wallet keypair (base58 string or JSON byte array, the two
//! formats Solana tooling emits) and signs aggregator-built versioned
//! transactions. The fee payer's signature goes in slot 0.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;

use super::{GatewayError, OrderSigner, SignedOrder, UnsignedOrder};

const KEYPAIR_LEN: usize = 64;

/// Signer for the trading wallet.
pub struct WalletSigner {
    keypair: Keypair,
    public_key: String,
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl WalletSigner {
    /// Parse a secret key: base58 of the 64-byte keypair, or a JSON array
    /// of the same bytes.
    pub fn from_secret(secret: &SecretString) -> Result<Self, GatewayError> {
        let raw = secret.expose_secret().trim();
        let bytes = if raw.starts_with('[') {
            serde_json::from_str::<Vec<u8>>(raw)
                .map_err(|e| GatewayError::Signing(format!("invalid key byte array: {e}")))?
        } else {
            bs58::decode(raw)
                .into_vec()
                .map_err(|e| GatewayError::Signing(format!("invalid base58 key: {e}")))?
        };
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GatewayError> {
        if bytes.len() != KEYPAIR_LEN {
            return Err(GatewayError::Signing(format!(
                "expected {KEYPAIR_LEN}-byte keypair, got {} bytes",
                bytes.len()
            )));
        }
        let keypair = Keypair::from_bytes(bytes)
            .map_err(|e| GatewayError::Signing(format!("invalid keypair: {e}")))?;
        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let public_key = keypair.pubkey().to_string();
        Self { keypair, public_key }
    }

    /// Sign a bincode-serialized versioned transaction, returning the
    /// signed bytes. The wallet must be the transaction's fee payer.
    pub fn sign_transaction_bytes(&self, tx: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let mut transaction: VersionedTransaction = bincode::deserialize(tx)
            .map_err(|e| GatewayError::Signing(format!("invalid transaction: {e}")))?;

        let payer = transaction.message.static_account_keys().first().copied();
        if payer != Some(self.keypair.pubkey()) {
            return Err(GatewayError::Signing(format!(
                "fee payer {} is not the trading wallet",
                payer.map(|p| p.to_string()).unwrap_or_else(|| "none".into())
            )));
        }

        let signature = self.keypair.sign_message(&transaction.message.serialize());
        if transaction.signatures.is_empty() {
            transaction.signatures.push(signature);
        } else {
            transaction.signatures[0] = signature;
        }

        bincode::serialize(&transaction)
            .map_err(|e| GatewayError::Signing(format!("cannot serialize signed transaction: {e}")))
    }
}

impl OrderSigner for WalletSigner {
    fn sign(&self, order: &UnsignedOrder) -> Result<SignedOrder, GatewayError> {
        let tx = STANDARD
            .decode(order.transaction.as_bytes())
            .map_err(|e| GatewayError::Signing(format!("invalid base64 transaction: {e}")))?;
        let signed = self.sign_transaction_bytes(&tx)?;
        Ok(SignedOrder {
            request_id: order.request_id.clone(),
            signed_transaction: STANDARD.encode(signed),
        })
    }

    fn public_key(&self) -> String {
        self.public_key.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
