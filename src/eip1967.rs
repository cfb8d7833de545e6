//! Storage slots defined by EIP-1967, read to observe where a proxy points.

use ethers::providers::Middleware;
use ethers::types::{Address, H256};
use eyre::WrapErr;
use hex_literal::hex;

use crate::ethers_utils::RpcSigner;

/// `keccak256("eip1967.proxy.implementation") - 1`
pub const IMPLEMENTATION_SLOT: H256 = H256(hex!(
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc"
));

/// `keccak256("eip1967.proxy.admin") - 1`
pub const ADMIN_SLOT: H256 = H256(hex!(
    "b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103"
));

const NUM_BYTES_ADDRESS: usize = 20;

/// Addresses are stored right-aligned in the 32 byte slot.
pub fn address_from_slot(value: H256) -> Address {
    Address::from_slice(&value.as_bytes()[32 - NUM_BYTES_ADDRESS..])
}

async fn read_slot(
    signer: &RpcSigner,
    proxy: Address,
    slot: H256,
) -> eyre::Result<Address> {
    let value = signer
        .get_storage_at(proxy, slot, None)
        .await
        .wrap_err_with(|| format!("Reading slot {slot:?} of {proxy:?}"))?;

    Ok(address_from_slot(value))
}

pub async fn implementation(
    signer: &RpcSigner,
    proxy: Address,
) -> eyre::Result<Address> {
    read_slot(signer, proxy, IMPLEMENTATION_SLOT).await
}

pub async fn admin(signer: &RpcSigner, proxy: Address) -> eyre::Result<Address> {
    read_slot(signer, proxy, ADMIN_SLOT).await
}
