//! In-process reference ledger: ERC-20 balances and allowances, EIP-2612
//! permits, native coin balances and a settable clock.
//!
//! Used by the test-suites and by hosts that want to simulate a sale before
//! wiring a real chain backend.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use crate::{
    eip712::{recover_signer, Eip712Domain, Permit, PermitSignature},
    ledger::{Issuer, Ledger, LedgerError},
    primitives::{Address, AssetId, Balance, Timestamp},
};

/// First generated token address; later deployments count up from here.
const TOKEN_ADDRESS_BASE: u64 = 0x7000;

#[derive(Clone, Debug, Default)]
struct TokenState {
    name: String,
    symbol: String,
    decimals: u8,
    total_supply: Balance,
    balances: HashMap<Address, Balance>,
    allowances: HashMap<(Address, Address), Balance>,
    nonces: HashMap<Address, u64>,
}

impl TokenState {
    fn balance(&self, who: &Address) -> Balance {
        self.balances.get(who).copied().unwrap_or(0)
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let fb = self.balance(&from);
        if fb < amount {
            return Err(LedgerError::Insufficient);
        }
        let tb = self.balance(&to);
        if from != to {
            let credited = tb.checked_add(amount).ok_or(LedgerError::Overflow)?;
            self.balances.insert(from, fb - amount);
            self.balances.insert(to, credited);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    tokens: BTreeMap<Address, TokenState>,
    native: HashMap<Address, Balance>,
    next_token: u64,
}

impl Inner {
    fn token(&self, token: &Address) -> Result<&TokenState, LedgerError> {
        self.tokens.get(token).ok_or(LedgerError::UnknownToken(*token))
    }

    fn token_mut(&mut self, token: &Address) -> Result<&mut TokenState, LedgerError> {
        self.tokens.get_mut(token).ok_or(LedgerError::UnknownToken(*token))
    }
}

/// Thread-safe in-memory ledger.
#[derive(Debug)]
pub struct MemoryLedger {
    now: AtomicU64,
    chain_id: u64,
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new(chain_id: u64, now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
            chain_id,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Move the clock to `t`. Going backwards is ignored to keep time monotonic.
    pub fn set_now(&self, t: Timestamp) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(seconds)));
    }

    /// Register a permit-enabled token and return its address.
    pub fn deploy_token(&self, name: &str, symbol: &str, decimals: u8) -> Address {
        let mut g = self.inner.write();
        let address = Address::from_low_u64(TOKEN_ADDRESS_BASE + g.next_token);
        g.next_token += 1;
        g.tokens.insert(
            address,
            TokenState {
                name: name.to_string(),
                symbol: symbol.to_string(),
                decimals,
                ..TokenState::default()
            },
        );
        tracing::debug!(target: "ledger", token = %address, name, symbol, decimals, "token deployed");
        address
    }

    pub fn symbol(&self, token: Address) -> Result<String, LedgerError> {
        Ok(self.inner.read().token(&token)?.symbol.clone())
    }

    pub fn mint(&self, token: Address, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        let t = g.token_mut(&token)?;
        let supply = t.total_supply.checked_add(amount).ok_or(LedgerError::Overflow)?;
        let credited = t.balance(&to).checked_add(amount).ok_or(LedgerError::Overflow)?;
        t.total_supply = supply;
        t.balances.insert(to, credited);
        Ok(())
    }

    pub fn burn(&self, token: Address, from: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        let t = g.token_mut(&token)?;
        let fb = t.balance(&from);
        if fb < amount {
            return Err(LedgerError::Insufficient);
        }
        t.balances.insert(from, fb - amount);
        t.total_supply -= amount;
        Ok(())
    }

    pub fn total_supply(&self, token: Address) -> Result<Balance, LedgerError> {
        Ok(self.inner.read().token(&token)?.total_supply)
    }

    pub fn approve(&self, token: Address, owner: Address, spender: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        g.token_mut(&token)?.allowances.insert((owner, spender), amount);
        Ok(())
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<Balance, LedgerError> {
        let g = self.inner.read();
        Ok(g.token(&token)?.allowances.get(&(owner, spender)).copied().unwrap_or(0))
    }

    /// Credit native coin out of thin air (genesis funding, forced sends).
    pub fn fund_native(&self, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        let bal = g.native.entry(to).or_default();
        *bal = bal.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Typed-data domain a wallet signs permits for `token` under.
    pub fn permit_domain(&self, token: Address) -> Result<Eip712Domain, LedgerError> {
        let name = self.inner.read().token(&token)?.name.clone();
        Ok(Eip712Domain::new(name, self.chain_id, token))
    }
}

impl Ledger for MemoryLedger {
    fn now_unix(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn balance_of(&self, asset: AssetId, who: Address) -> Result<Balance, LedgerError> {
        let g = self.inner.read();
        match asset {
            AssetId::Native => Ok(g.native.get(&who).copied().unwrap_or(0)),
            AssetId::Token(token) => Ok(g.token(&token)?.balance(&who)),
        }
    }

    fn decimals(&self, token: Address) -> Result<u8, LedgerError> {
        Ok(self.inner.read().token(&token)?.decimals)
    }

    fn name(&self, token: Address) -> Result<String, LedgerError> {
        Ok(self.inner.read().token(&token)?.name.clone())
    }

    fn nonces(&self, token: Address, owner: Address) -> Result<u64, LedgerError> {
        Ok(self.inner.read().token(&token)?.nonces.get(&owner).copied().unwrap_or(0))
    }

    fn transfer(&self, asset: AssetId, from: Address, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        match asset {
            AssetId::Native => {
                let fb = g.native.get(&from).copied().unwrap_or(0);
                if fb < amount {
                    return Err(LedgerError::Insufficient);
                }
                if from != to {
                    let tb = g.native.get(&to).copied().unwrap_or(0);
                    let credited = tb.checked_add(amount).ok_or(LedgerError::Overflow)?;
                    g.native.insert(from, fb - amount);
                    g.native.insert(to, credited);
                }
            }
            AssetId::Token(token) => g.token_mut(&token)?.move_balance(from, to, amount)?,
        }
        tracing::trace!(target: "ledger", %asset, %from, %to, amount, "transfer");
        Ok(())
    }

    fn transfer_from(
        &self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), LedgerError> {
        let mut g = self.inner.write();
        let t = g.token_mut(&token)?;
        let allowed = t.allowances.get(&(from, spender)).copied().unwrap_or(0);
        if allowed < amount {
            return Err(LedgerError::InsufficientAllowance);
        }
        t.move_balance(from, to, amount)?;
        if allowed != Balance::MAX {
            t.allowances.insert((from, spender), allowed - amount);
        }
        tracing::trace!(target: "ledger", %token, %spender, %from, %to, amount, "transfer_from");
        Ok(())
    }

    fn permit(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        value: Balance,
        deadline: Timestamp,
        signature: &PermitSignature,
    ) -> Result<(), LedgerError> {
        if self.now_unix() > deadline {
            return Err(LedgerError::PermitExpired);
        }
        let mut g = self.inner.write();
        let t = g.token_mut(&token)?;
        let nonce = t.nonces.get(&owner).copied().unwrap_or(0);
        let domain = Eip712Domain::new(t.name.clone(), self.chain_id, token);
        let permit = Permit { owner, spender, value, nonce, deadline };

        let signer = recover_signer(&domain, &permit, signature)
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;
        if signer != owner {
            return Err(LedgerError::InvalidSigner);
        }
        t.nonces.insert(owner, nonce + 1);
        t.allowances.insert((owner, spender), value);
        tracing::trace!(target: "ledger", %token, %owner, %spender, value, nonce, "permit consumed");
        Ok(())
    }
}

impl Issuer for MemoryLedger {
    fn mint(&self, token: Address, to: Address, amount: Balance) -> Result<(), LedgerError> {
        MemoryLedger::mint(self, token, to, amount)
    }

    fn burn(&self, token: Address, from: Address, amount: Balance) -> Result<(), LedgerError> {
        MemoryLedger::burn(self, token, from, amount)
    }

    fn total_supply(&self, token: Address) -> Result<Balance, LedgerError> {
        MemoryLedger::total_supply(self, token)
    }
}
