// Solana-backed tCANE ledger.
//
// The on-chain program is custodial: the platform authority signs every
// instruction, and each holder wallet maps to a PDA seeded by the SHA-256 of
// its address.

use super::{LedgerClient, LedgerError, LedgerReceipt, MintReceipt, MintRequest, PaymentRequest, TransferRequest};
use crate::infra::config::SolanaConfig;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_program::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    signer::{
        keypair::{read_keypair_file, Keypair},
        Signer,
    },
    transaction::Transaction,
};
use std::str::FromStr;

const STATE_SEED: &[u8] = b"tcane_state";
const HOLDER_SEED: &[u8] = b"holder";
const PAYMENT_SEED: &[u8] = b"payment";

// 8-byte discriminator + authority + total_supply + total_burned + bump
const STATE_ACCOUNT_LEN: usize = 8 + 32 + 8 + 8 + 1;
// 8-byte discriminator + wallet seed + balance + bump
const HOLDER_ACCOUNT_LEN: usize = 8 + 32 + 8 + 1;

/// Anchor instruction discriminator: first 8 bytes of sha256("global:<name>").
fn discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn wallet_seed(wallet: &str) -> [u8; 32] {
    Sha256::digest(wallet.as_bytes()).into()
}

fn party_code(party: &str) -> u8 {
    match party {
        "farmer" => 0,
        "mill" => 1,
        _ => 2,
    }
}

fn rpc(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Rpc(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramState {
    pub authority: Pubkey,
    pub total_supply: u64,
    pub total_burned: u64,
}

pub struct SolanaLedger {
    client: RpcClient,
    payer: Keypair,
    program_id: Pubkey,
    network: String,
}

impl SolanaLedger {
    pub fn from_config(config: &SolanaConfig) -> anyhow::Result<Self> {
        let program_id = Pubkey::from_str(&config.program_id)
            .map_err(|e| anyhow::anyhow!("Invalid SOLANA_PROGRAM_ID '{}': {}", config.program_id, e))?;
        let payer = read_keypair_file(&*shellexpand::tilde(&config.keypair_path))
            .map_err(|e| anyhow::anyhow!("Failed to read keypair file {}: {}", config.keypair_path, e))?;
        let client = RpcClient::new_with_commitment(config.rpc_url.clone(), CommitmentConfig::confirmed());
        Ok(Self {
            client,
            payer,
            program_id,
            network: config.network.clone(),
        })
    }

    pub fn rpc_client(&self) -> &RpcClient {
        &self.client
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn state_address(&self) -> Pubkey {
        Pubkey::find_program_address(&[STATE_SEED], &self.program_id).0
    }

    pub fn holder_address(&self, wallet: &str) -> Pubkey {
        Pubkey::find_program_address(&[HOLDER_SEED, &wallet_seed(wallet)], &self.program_id).0
    }

    fn payment_address(&self, wallet: &str) -> Pubkey {
        Pubkey::find_program_address(&[PAYMENT_SEED, &wallet_seed(wallet)], &self.program_id).0
    }

    /// Creates the program state account. No-op when it already exists.
    pub async fn initialize(&self) -> anyhow::Result<bool> {
        let state = self.state_address();
        if self.read_state().await?.is_some() {
            return Ok(false);
        }
        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(state, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data: discriminator("initialize").to_vec(),
        };
        let receipt = self.submit(instruction).await?;
        tracing::info!(signature = %receipt.tx_hash, state = %state, "initialized tCANE program state");
        Ok(true)
    }

    pub async fn read_state(&self) -> anyhow::Result<Option<ProgramState>> {
        let account = self
            .client
            .get_account_with_commitment(&self.state_address(), CommitmentConfig::confirmed())
            .await?
            .value;
        let Some(account) = account else {
            return Ok(None);
        };
        let data = account.data;
        if data.len() < STATE_ACCOUNT_LEN {
            anyhow::bail!("State account data too short: {} bytes", data.len());
        }
        let mut authority = [0u8; 32];
        authority.copy_from_slice(&data[8..40]);
        Ok(Some(ProgramState {
            authority: Pubkey::new_from_array(authority),
            total_supply: u64::from_le_bytes(data[40..48].try_into()?),
            total_burned: u64::from_le_bytes(data[48..56].try_into()?),
        }))
    }

    async fn submit(&self, instruction: Instruction) -> anyhow::Result<LedgerReceipt> {
        let mut transaction = Transaction::new_with_payer(&[instruction], Some(&self.payer.pubkey()));
        let recent_blockhash = self.client.get_latest_blockhash().await?;
        transaction.sign(&[&self.payer], recent_blockhash);
        let signature = self.client.send_and_confirm_transaction(&transaction).await?;
        let slot = self.client.get_slot().await?;
        Ok(LedgerReceipt {
            tx_hash: signature.to_string(),
            ledger: slot,
        })
    }

    async fn send(&self, op: &str, instruction: Instruction) -> Result<LedgerReceipt, LedgerError> {
        match self.submit(instruction).await {
            Ok(receipt) => {
                tracing::debug!(op, signature = %receipt.tx_hash, slot = receipt.ledger, "ledger transaction confirmed");
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(op, error = %e, "ledger transaction failed");
                Err(rpc(e))
            }
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaLedger {
    fn network(&self) -> &str {
        &self.network
    }

    async fn mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError> {
        if request.amount == 0 {
            return Err(LedgerError::Rejected("cannot mint zero tokens".into()));
        }
        let holder = self.holder_address(&request.recipient);
        let mut data = discriminator("mint_tokens").to_vec();
        data.extend_from_slice(&wallet_seed(&request.recipient));
        data.extend_from_slice(&request.amount.to_le_bytes());
        data.extend_from_slice(request.production_id.as_bytes());

        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.state_address(), false),
                AccountMeta::new(holder, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data,
        };
        let receipt = self.send("mint", instruction).await?;
        Ok(MintReceipt {
            ledger_token_id: format!("{}:{}", holder, request.production_id.simple()),
            receipt,
        })
    }

    async fn transfer(&self, request: TransferRequest) -> Result<LedgerReceipt, LedgerError> {
        let mut data = discriminator("transfer_tokens").to_vec();
        data.extend_from_slice(&wallet_seed(&request.from));
        data.extend_from_slice(&wallet_seed(&request.to));
        data.extend_from_slice(&request.amount.to_le_bytes());

        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.state_address(), false),
                AccountMeta::new(self.holder_address(&request.from), false),
                AccountMeta::new(self.holder_address(&request.to), false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data,
        };
        self.send("transfer", instruction).await
    }

    async fn burn(&self, holder: &str, amount: u64) -> Result<LedgerReceipt, LedgerError> {
        let mut data = discriminator("burn_tokens").to_vec();
        data.extend_from_slice(&wallet_seed(holder));
        data.extend_from_slice(&amount.to_le_bytes());

        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(self.state_address(), false),
                AccountMeta::new(self.holder_address(holder), false),
                AccountMeta::new(self.payer.pubkey(), true),
            ],
            data,
        };
        self.send("burn", instruction).await
    }

    async fn pay(&self, request: PaymentRequest) -> Result<LedgerReceipt, LedgerError> {
        let mut data = discriminator("record_payment").to_vec();
        data.extend_from_slice(&wallet_seed(&request.recipient));
        data.extend_from_slice(request.reference.as_bytes());
        data.push(party_code(request.party));
        data.extend_from_slice(&request.amount_cents.to_le_bytes());

        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.state_address(), false),
                AccountMeta::new(self.payment_address(&request.recipient), false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data,
        };
        self.send("pay", instruction).await
    }

    async fn balance(&self, holder: &str) -> Result<u64, LedgerError> {
        let account = self
            .client
            .get_account_with_commitment(&self.holder_address(holder), CommitmentConfig::confirmed())
            .await
            .map_err(rpc)?
            .value;
        let Some(account) = account else {
            return Ok(0);
        };
        if account.data.len() < HOLDER_ACCOUNT_LEN {
            return Err(LedgerError::Rpc(format!(
                "holder account data too short: {} bytes",
                account.data.len()
            )));
        }
        let mut amount = [0u8; 8];
        amount.copy_from_slice(&account.data[40..48]);
        Ok(u64::from_le_bytes(amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminators_follow_the_anchor_convention() {
        // sha256("global:initialize")[..8]
        assert_eq!(discriminator("initialize"), [175, 175, 109, 31, 13, 152, 155, 237]);
        assert_ne!(discriminator("mint_tokens"), discriminator("burn_tokens"));
    }

    #[test]
    fn wallet_seeds_are_stable_and_distinct() {
        assert_eq!(wallet_seed("GA"), wallet_seed("GA"));
        assert_ne!(wallet_seed("GA"), wallet_seed("GB"));
        assert_eq!(party_code("mill"), 1);
        assert_eq!(party_code("fund"), 2);
    }
}
