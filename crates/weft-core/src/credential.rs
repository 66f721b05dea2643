//! Credentials: signed authorization assertions chained back to a genesis key.

use serde::{Deserialize, Serialize};

use crate::canonical::{credential_bytes, credential_signing_bytes};
use crate::crypto::{Blake3Hash, Keypair, PublicKey, Signature};
use crate::error::CoreError;
use crate::types::CredentialId;

/// What a credential allows its subject to do.
///
/// Capabilities are ordered: `Admin` covers `Write`, which covers `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Capability {
    Read = 1,
    Write = 2,
    /// May issue further credentials.
    Admin = 3,
}

impl Capability {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Admin),
            _ => None,
        }
    }

    /// Whether holding `self` satisfies a check for `required`.
    pub fn covers(self, required: Capability) -> bool {
        self >= required
    }
}

/// A signed grant of `capability` from `issuer` to `subject`.
///
/// Root credentials have no parent and must be issued by the space genesis
/// key. Every other credential names the credential that made its issuer an
/// admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub issuer: PublicKey,
    pub subject: PublicKey,
    pub capability: Capability,
    pub parent: Option<CredentialId>,
    pub signature: Signature,
}

impl Credential {
    /// Issue a credential signed by `issuer`.
    pub fn issue(
        issuer: &Keypair,
        subject: PublicKey,
        capability: Capability,
        parent: Option<CredentialId>,
    ) -> Self {
        let issuer_key = issuer.public_key();
        let message = credential_signing_bytes(&issuer_key, &subject, capability, parent.as_ref());

        Self {
            issuer: issuer_key,
            subject,
            capability,
            parent,
            signature: issuer.sign(&message),
        }
    }

    /// Content-addressed id.
    pub fn id(&self) -> CredentialId {
        CredentialId(Blake3Hash::hash(&credential_bytes(self)).0)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Check the issuer's signature. Chain checks live in the key manager.
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let message = credential_signing_bytes(
            &self.issuer,
            &self.subject,
            self.capability,
            self.parent.as_ref(),
        );
        self.issuer.verify(&message, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_ordering() {
        assert!(Capability::Admin.covers(Capability::Write));
        assert!(Capability::Write.covers(Capability::Read));
        assert!(Capability::Write.covers(Capability::Write));
        assert!(!Capability::Read.covers(Capability::Write));
        assert!(!Capability::Write.covers(Capability::Admin));
    }

    #[test]
    fn test_capability_u8() {
        for cap in [Capability::Read, Capability::Write, Capability::Admin] {
            assert_eq!(Capability::from_u8(cap.to_u8()), Some(cap));
        }
        assert_eq!(Capability::from_u8(0), None);
    }

    #[test]
    fn test_issue_and_verify() {
        let genesis = Keypair::from_seed(&[9; 32]);
        let device = Keypair::from_seed(&[1; 32]);
        let cred = Credential::issue(&genesis, device.public_key(), Capability::Write, None);

        assert!(cred.is_root());
        assert_eq!(cred.issuer, genesis.public_key());
        cred.verify_signature().unwrap();
    }

    #[test]
    fn test_tampered_capability_fails() {
        let genesis = Keypair::from_seed(&[9; 32]);
        let device = Keypair::from_seed(&[1; 32]);
        let mut cred = Credential::issue(&genesis, device.public_key(), Capability::Write, None);
        cred.capability = Capability::Admin;
        assert!(cred.verify_signature().is_err());
    }

    #[test]
    fn test_id_covers_parent() {
        let genesis = Keypair::from_seed(&[9; 32]);
        let device = Keypair::from_seed(&[1; 32]);
        let root = Credential::issue(&genesis, device.public_key(), Capability::Admin, None);
        let child = Credential::issue(&genesis, device.public_key(), Capability::Admin, Some(root.id()));
        assert_ne!(root.id(), child.id());
        assert_eq!(root.id(), root.clone().id());
    }
}
