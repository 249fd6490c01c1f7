//! Permit2 batch-transfer permits.
//!
//! The struct that is signed differs from the struct the batch contract takes as input:
//! the signed one carries the `spender`, the contract input does not. The EIP-712 hash is
//! sensitive to field order, so these definitions must match Permit2 exactly.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, eip712_domain};
use tracing::instrument;

use crate::chain::{ChainRpcPort, WalletPort};
use crate::config::PermitNonce;
use crate::error::DonationError;
use crate::timestamp::UnixTimestamp;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct TokenPermissions {
        address token;
        uint256 amount;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct PermitBatchTransferFrom {
        TokenPermissions[] permitted;
        address spender;
        uint256 nonce;
        uint256 deadline;
    }
}

/// Words of the Permit2 nonce bitmap inspected before giving up.
const MAX_BITMAP_WORDS: u64 = 64;

/// EIP-712 domain of the Permit2 deployment on `chain_id`.
pub fn permit_domain(chain_id: u64, permit2: Address) -> Eip712Domain {
    eip712_domain! {
        name: "Permit2",
        chain_id: chain_id,
        verifying_contract: permit2,
    }
}

/// A permit ready to be signed, with the domain it must be signed under.
#[derive(Debug, Clone)]
pub struct UnsignedPermit {
    pub domain: Eip712Domain,
    pub permit: PermitBatchTransferFrom,
}

/// A permit together with the wallet's signature over it.
#[derive(Debug, Clone)]
pub struct SignedPermit {
    pub permit: PermitBatchTransferFrom,
    pub signature: Bytes,
}

/// Builds and signs batch permits for one orchestrator.
pub struct PermitSigner<'a> {
    pub wallet: &'a dyn WalletPort,
    pub rpc: &'a dyn ChainRpcPort,
    pub permit2: Address,
    pub deadline_seconds: u64,
    pub nonce: PermitNonce,
}

impl PermitSigner<'_> {
    /// Build the permit for `transfers`, the literal `(token, amount)` list of one batch call.
    ///
    /// Entries are not merged: the batch contract checks the permit against its transfer list
    /// one entry at a time.
    pub async fn build(
        &self,
        chain_id: u64,
        owner: Address,
        spender: Address,
        transfers: &[(Address, U256)],
    ) -> Result<UnsignedPermit, DonationError> {
        let nonce = match self.nonce {
            PermitNonce::Random => random_nonce(),
            PermitNonce::Bitmap => {
                next_unused_nonce(self.rpc, chain_id, self.permit2, owner).await?
            }
        };
        let now = UnixTimestamp::try_now().map_err(|e| DonationError::Other(e.to_string()))?;
        let deadline = now + self.deadline_seconds;

        let permit = PermitBatchTransferFrom {
            permitted: transfers
                .iter()
                .map(|(token, amount)| TokenPermissions {
                    token: *token,
                    amount: *amount,
                })
                .collect(),
            spender,
            nonce,
            deadline: U256::from(deadline.as_secs()),
        };
        Ok(UnsignedPermit {
            domain: permit_domain(chain_id, self.permit2),
            permit,
        })
    }

    /// Build and sign the permit. A refusal by the donor aborts the chain's batch.
    #[instrument(skip_all, fields(chain_id, transfers = transfers.len()))]
    pub async fn sign(
        &self,
        chain_id: u64,
        owner: Address,
        spender: Address,
        transfers: &[(Address, U256)],
    ) -> Result<SignedPermit, DonationError> {
        let unsigned = self.build(chain_id, owner, spender, transfers).await?;
        tracing::info!(
            chain_id,
            nonce = %unsigned.permit.nonce,
            deadline = %unsigned.permit.deadline,
            "requesting batch permit signature"
        );
        let signature = self
            .wallet
            .sign_typed_data(&unsigned.domain, &unsigned.permit)
            .await
            .inspect_err(|e| tracing::warn!(chain_id, error = %e, "permit signature failed"))?;
        Ok(SignedPermit {
            permit: unsigned.permit,
            signature,
        })
    }
}

/// Random 256-bit permit nonce.
pub fn random_nonce() -> U256 {
    U256::from_be_bytes(rand::random::<[u8; 32]>())
}

/// First unused nonce of `owner` in the Permit2 nonce bitmap.
///
/// Nonce `n` lives in word `n >> 8`, bit `n & 0xff`.
pub async fn next_unused_nonce(
    rpc: &dyn ChainRpcPort,
    chain_id: u64,
    permit2: Address,
    owner: Address,
) -> Result<U256, DonationError> {
    for word in 0..MAX_BITMAP_WORDS {
        let word_pos = U256::from(word);
        let bitmap = rpc.nonce_bitmap(chain_id, permit2, owner, word_pos).await?;
        if bitmap == U256::MAX {
            continue;
        }
        let bit = (!bitmap).trailing_zeros();
        return Ok((word_pos << 8usize) | U256::from(bit));
    }
    Err(DonationError::Other(format!(
        "no unused Permit2 nonce in the first {MAX_BITMAP_WORDS} bitmap words"
    )))
}
