use crate::error::Result;
use crate::storage::Keychain;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, Network, ScriptBuf};
use std::str::FromStr;

const NODE_KEY_PATH: &str = "m/0'";
const FUNDING_KEY_BRANCH: &str = "m/1'";

/// A P2WPKH key owned by the on-chain wallet
#[derive(Clone)]
pub struct WalletKey {
    pub secret: SecretKey,
    pub public: CompressedPublicKey,
    pub address: Address,
    pub script_pubkey: ScriptBuf,
}

/// Every key the node uses, derived from the configured seed
pub struct NodeKeys {
    secp: Secp256k1<All>,
    master: Xpriv,
    network: Network,
    node_id: PublicKey,
}

impl NodeKeys {
    pub fn new(seed: &[u8; 32], network: Network) -> Result<NodeKeys> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(network, seed)?;
        let node_id = Self::derive_secret(&secp, &master, NODE_KEY_PATH)?.public_key(&secp);
        Ok(NodeKeys {
            secp,
            master,
            network,
            node_id,
        })
    }

    fn derive_secret(secp: &Secp256k1<All>, master: &Xpriv, path: &str) -> Result<SecretKey> {
        let path = DerivationPath::from_str(path)?;
        Ok(master.derive_priv(secp, &path)?.private_key)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn node_id(&self) -> PublicKey {
        self.node_id
    }

    /// Funding key for one channel, hardened under the funding branch
    pub fn funding_pubkey(&self, index: u32) -> Result<PublicKey> {
        let path = format!("{FUNDING_KEY_BRANCH}/{}'", index & 0x7fff_ffff);
        let secret = Self::derive_secret(&self.secp, &self.master, &path)?;
        Ok(secret.public_key(&self.secp))
    }

    pub fn wallet_key(&self, keychain: Keychain) -> Result<WalletKey> {
        let coin = if self.network == Network::Bitcoin { 0 } else { 1 };
        let branch = match keychain {
            Keychain::External => 0,
            Keychain::Internal => 1,
        };
        let path = format!("m/84'/{coin}'/0'/{branch}/0");
        let secret = Self::derive_secret(&self.secp, &self.master, &path)?;
        let public = CompressedPublicKey(secret.public_key(&self.secp));
        let address = Address::p2wpkh(&public, self.network);
        let script_pubkey = address.script_pubkey();
        Ok(WalletKey {
            secret,
            public,
            address,
            script_pubkey,
        })
    }

    pub fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys")
            .field("network", &self.network)
            .field("node_id", &self.node_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_deterministic() {
        let a = NodeKeys::new(&[7; 32], Network::Testnet).unwrap();
        let b = NodeKeys::new(&[7; 32], Network::Testnet).unwrap();
        let c = NodeKeys::new(&[8; 32], Network::Testnet).unwrap();
        assert_eq!(a.node_id(), b.node_id());
        assert_ne!(a.node_id(), c.node_id());
        assert_eq!(a.node_id().serialize().len(), 33);
    }

    #[test]
    fn test_funding_keys_differ_per_channel() {
        let keys = NodeKeys::new(&[7; 32], Network::Regtest).unwrap();
        let k1 = keys.funding_pubkey(1).unwrap();
        let k2 = keys.funding_pubkey(2).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, keys.node_id());
        assert_eq!(k1, keys.funding_pubkey(1).unwrap());
    }

    #[test]
    fn test_wallet_addresses_follow_network() {
        let keys = NodeKeys::new(&[7; 32], Network::Testnet).unwrap();
        let receive = keys.wallet_key(Keychain::External).unwrap();
        let change = keys.wallet_key(Keychain::Internal).unwrap();
        assert!(receive.address.to_string().starts_with("tb1q"));
        assert_ne!(receive.address, change.address);
        assert!(receive.script_pubkey.is_p2wpkh());
    }
}
