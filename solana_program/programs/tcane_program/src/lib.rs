// Custodial tCANE ledger. The platform authority signs every instruction;
// holders are PDAs keyed by the SHA-256 of their off-chain wallet address.
use anchor_lang::prelude::*;

declare_id!("6fSQZwqdsr8zVSbE8DTo4tsHDW4af3iZyB5KGzEGqyW8");

#[program]
pub mod tcane_program {
    use super::*;

    pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
        let state = &mut ctx.accounts.state;
        state.authority = ctx.accounts.authority.key();
        state.total_supply = 0;
        state.total_burned = 0;
        state.bump = ctx.bumps.state;
        Ok(())
    }

    pub fn mint_tokens(
        ctx: Context<MintTokens>,
        holder_seed: [u8; 32],
        amount: u64,
        production_ref: [u8; 16],
    ) -> Result<()> {
        require!(amount > 0, TcaneError::ZeroAmount);
        let state = &mut ctx.accounts.state;
        state.total_supply = state.total_supply.checked_add(amount).ok_or(TcaneError::Overflow)?;

        let holder = &mut ctx.accounts.holder;
        holder.wallet_seed = holder_seed;
        holder.balance = holder.balance.checked_add(amount).ok_or(TcaneError::Overflow)?;
        holder.bump = ctx.bumps.holder;

        emit!(Minted {
            holder_seed,
            amount,
            production_ref,
        });
        Ok(())
    }

    pub fn transfer_tokens(
        ctx: Context<TransferTokens>,
        from_seed: [u8; 32],
        to_seed: [u8; 32],
        amount: u64,
    ) -> Result<()> {
        require!(amount > 0, TcaneError::ZeroAmount);
        require!(from_seed != to_seed, TcaneError::SelfTransfer);

        let from = &mut ctx.accounts.from;
        from.balance = from.balance.checked_sub(amount).ok_or(TcaneError::InsufficientBalance)?;

        let to = &mut ctx.accounts.to;
        to.wallet_seed = to_seed;
        to.balance = to.balance.checked_add(amount).ok_or(TcaneError::Overflow)?;
        to.bump = ctx.bumps.to;
        Ok(())
    }

    pub fn burn_tokens(ctx: Context<BurnTokens>, _holder_seed: [u8; 32], amount: u64) -> Result<()> {
        require!(amount > 0, TcaneError::ZeroAmount);
        let holder = &mut ctx.accounts.holder;
        holder.balance = holder.balance.checked_sub(amount).ok_or(TcaneError::InsufficientBalance)?;

        let state = &mut ctx.accounts.state;
        state.total_burned = state.total_burned.checked_add(amount).ok_or(TcaneError::Overflow)?;
        Ok(())
    }

    /// Records a fiat payout so revenue distribution leaves an on-chain trail.
    pub fn record_payment(
        ctx: Context<RecordPayment>,
        recipient_seed: [u8; 32],
        reference: [u8; 16],
        party: u8,
        amount_cents: u64,
    ) -> Result<()> {
        require!(party <= 2, TcaneError::UnknownParty);
        let payment = &mut ctx.accounts.payment;
        payment.recipient_seed = recipient_seed;
        payment.last_reference = reference;
        payment.total_paid_cents = payment
            .total_paid_cents
            .checked_add(amount_cents)
            .ok_or(TcaneError::Overflow)?;
        payment.payments += 1;
        payment.bump = ctx.bumps.payment;
        Ok(())
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(
        init_if_needed,
        payer = authority,
        space = 8 + ProgramState::INIT_SPACE,
        seeds = [b"tcane_state"],
        bump
    )]
    pub state: Account<'info, ProgramState>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(holder_seed: [u8; 32])]
pub struct MintTokens<'info> {
    #[account(mut, seeds = [b"tcane_state"], bump = state.bump, has_one = authority)]
    pub state: Account<'info, ProgramState>,
    #[account(
        init_if_needed,
        payer = authority,
        space = 8 + Holder::INIT_SPACE,
        seeds = [b"holder", holder_seed.as_ref()],
        bump
    )]
    pub holder: Account<'info, Holder>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(from_seed: [u8; 32], to_seed: [u8; 32])]
pub struct TransferTokens<'info> {
    #[account(seeds = [b"tcane_state"], bump = state.bump, has_one = authority)]
    pub state: Account<'info, ProgramState>,
    #[account(mut, seeds = [b"holder", from_seed.as_ref()], bump = from.bump)]
    pub from: Account<'info, Holder>,
    #[account(
        init_if_needed,
        payer = authority,
        space = 8 + Holder::INIT_SPACE,
        seeds = [b"holder", to_seed.as_ref()],
        bump
    )]
    pub to: Account<'info, Holder>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(holder_seed: [u8; 32])]
pub struct BurnTokens<'info> {
    #[account(mut, seeds = [b"tcane_state"], bump = state.bump, has_one = authority)]
    pub state: Account<'info, ProgramState>,
    #[account(mut, seeds = [b"holder", holder_seed.as_ref()], bump = holder.bump)]
    pub holder: Account<'info, Holder>,
    #[account(mut)]
    pub authority: Signer<'info>,
}

#[derive(Accounts)]
#[instruction(recipient_seed: [u8; 32])]
pub struct RecordPayment<'info> {
    #[account(seeds = [b"tcane_state"], bump = state.bump, has_one = authority)]
    pub state: Account<'info, ProgramState>,
    #[account(
        init_if_needed,
        payer = authority,
        space = 8 + PaymentLog::INIT_SPACE,
        seeds = [b"payment", recipient_seed.as_ref()],
        bump
    )]
    pub payment: Account<'info, PaymentLog>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

// Field order is read back by the off-chain client; keep it stable.
#[account]
#[derive(InitSpace)]
pub struct ProgramState {
    pub authority: Pubkey,
    pub total_supply: u64,
    pub total_burned: u64,
    pub bump: u8,
}

#[account]
#[derive(InitSpace)]
pub struct Holder {
    pub wallet_seed: [u8; 32],
    pub balance: u64,
    pub bump: u8,
}

#[account]
#[derive(InitSpace)]
pub struct PaymentLog {
    pub recipient_seed: [u8; 32],
    pub last_reference: [u8; 16],
    pub total_paid_cents: u64,
    pub payments: u64,
    pub bump: u8,
}

#[event]
pub struct Minted {
    pub holder_seed: [u8; 32],
    pub amount: u64,
    pub production_ref: [u8; 16],
}

#[error_code]
pub enum TcaneError {
    #[msg("Amount must be greater than zero")]
    ZeroAmount,
    #[msg("Holder balance is too low")]
    InsufficientBalance,
    #[msg("Source and destination are the same holder")]
    SelfTransfer,
    #[msg("Unknown payout party")]
    UnknownParty,
    #[msg("Arithmetic overflow")]
    Overflow,
}
