use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::amount::Amount;
use crate::ids::{digest_id, IdError, ID_BYTES};

const TX_HASH_DOMAIN: &[u8] = b"hdsync-tx";

digest_id!(
    /// Transaction identifier (blake3 over inputs and outputs).
    TxId
);

/// Reference to an output of an earlier transaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxIn {
    pub tx_id: TxId,
    pub index: u32,
}

impl TxIn {
    pub fn new(tx_id: TxId, index: u32) -> Self {
        Self { tx_id, index }
    }
}

impl fmt::Display for TxIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_id, self.index)
    }
}

impl fmt::Debug for TxIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxIn({:?}#{})", self.tx_id, self.index)
    }
}

impl FromStr for TxIn {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tx_id, index) = s
            .split_once('#')
            .ok_or_else(|| IdError::InvalidOutPoint(s.to_string()))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| IdError::InvalidOutPoint(s.to_string()))?;
        Ok(Self::new(TxId::from_hex(tx_id)?, index))
    }
}

impl From<TxIn> for String {
    fn from(value: TxIn) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TxIn {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A transaction output: coins locked to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub address: Address,
    pub amount: Amount,
}

impl TxOut {
    pub fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }
}

/// An input together with the output it spends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub tx_in: TxIn,
    pub spent: TxOut,
}

/// A transaction whose inputs have been linked to the outputs they spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTx {
    pub id: TxId,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<TxOut>,
}

impl ResolvedTx {
    /// Build a transaction and derive its identifier from the contents.
    pub fn new(inputs: Vec<ResolvedInput>, outputs: Vec<TxOut>) -> Self {
        let id = Self::compute_id(&inputs, &outputs);
        Self {
            id,
            inputs,
            outputs,
        }
    }

    pub fn compute_id(inputs: &[ResolvedInput], outputs: &[TxOut]) -> TxId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(TX_HASH_DOMAIN);
        hasher.update(&(inputs.len() as u32).to_be_bytes());
        for input in inputs {
            hasher.update(input.tx_in.tx_id.as_bytes());
            hasher.update(&input.tx_in.index.to_be_bytes());
        }
        hasher.update(&(outputs.len() as u32).to_be_bytes());
        for output in outputs {
            output.address.hash_into(&mut hasher);
            hasher.update(&output.amount.atomic().to_be_bytes());
        }
        let mut id = [0u8; ID_BYTES];
        id.copy_from_slice(hasher.finalize().as_bytes());
        TxId(id)
    }

    /// The outpoint referring to this transaction's `index`-th output.
    pub fn out_point(&self, index: u32) -> TxIn {
        TxIn::new(self.id, index)
    }

    /// Outputs paired with the outpoints that will reference them.
    pub fn indexed_outputs(&self) -> impl Iterator<Item = (TxIn, &TxOut)> + '_ {
        self.outputs
            .iter()
            .enumerate()
            .map(move |(ix, out)| (self.out_point(ix as u32), out))
    }

    pub fn total_output(&self) -> Amount {
        self.outputs.iter().map(|out| out.amount).sum()
    }
}
