//! Credential admission state.
//!
//! Admission state is built by admitting credentials one at a time. A
//! credential is admitted only when its whole chain back to the genesis key
//! is already admitted, so a lookup never has to walk the chain again.

use std::collections::HashMap;

use weft_core::{Capability, Credential, CredentialId, PublicKey};

use crate::error::{PermsError, Result};

/// A credential that passed admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedCredential {
    pub id: CredentialId,
    pub issuer: PublicKey,
    pub subject: PublicKey,
    pub capability: Capability,
    pub parent: Option<CredentialId>,
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The credential is now admitted.
    Admitted(AdmittedCredential),
    /// It was admitted before.
    AlreadyAdmitted(CredentialId),
}

impl Admission {
    pub fn id(&self) -> CredentialId {
        match self {
            Admission::Admitted(c) => c.id,
            Admission::AlreadyAdmitted(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Admitted credentials for one space, plus credentials waiting on a parent.
#[derive(Debug, Clone)]
pub struct CredentialState {
    genesis: PublicKey,

    /// All admitted credentials by ID.
    admitted: HashMap<CredentialId, AdmittedCredential>,

    /// Index: subject -> highest admitted capability.
    by_subject: HashMap<PublicKey, Capability>,

    /// Credentials whose parent is not admitted yet, keyed by that parent.
    deferred: HashMap<CredentialId, Vec<Credential>>,
}

impl CredentialState {
    pub fn new(genesis: PublicKey) -> Self {
        Self {
            genesis,
            admitted: HashMap::new(),
            by_subject: HashMap::new(),
            deferred: HashMap::new(),
        }
    }

    pub fn genesis(&self) -> PublicKey {
        self.genesis
    }

    /// Check a credential against the current state without admitting it.
    pub fn check(&self, credential: &Credential) -> Result<()> {
        credential
            .verify_signature()
            .map_err(|e| PermsError::Verification(e.to_string()))?;

        match credential.parent {
            None => {
                if credential.issuer != self.genesis {
                    return Err(PermsError::NotGenesis {
                        issuer: credential.issuer,
                    });
                }
            }
            Some(parent_id) => {
                let parent = self
                    .admitted
                    .get(&parent_id)
                    .ok_or(PermsError::UnknownParent(parent_id))?;
                if parent.subject != credential.issuer || parent.capability != Capability::Admin {
                    return Err(PermsError::NotAdmin {
                        issuer: credential.issuer,
                    });
                }
            }
        }
        Ok(())
    }

    /// Check and record a credential.
    pub fn admit(&mut self, credential: &Credential) -> Result<Admission> {
        let id = credential.id();
        if self.admitted.contains_key(&id) {
            return Ok(Admission::AlreadyAdmitted(id));
        }
        self.check(credential)?;

        let admitted = AdmittedCredential {
            id,
            issuer: credential.issuer,
            subject: credential.subject,
            capability: credential.capability,
            parent: credential.parent,
        };
        self.admitted.insert(id, admitted.clone());

        let best = self
            .by_subject
            .entry(credential.subject)
            .or_insert(credential.capability);
        if credential.capability > *best {
            *best = credential.capability;
        }

        Ok(Admission::Admitted(admitted))
    }

    /// Hold a credential until `parent` is admitted.
    pub fn defer(&mut self, parent: CredentialId, credential: Credential) {
        let waiting = self.deferred.entry(parent).or_default();
        if !waiting.contains(&credential) {
            waiting.push(credential);
        }
    }

    /// Take the credentials that were waiting on `parent`.
    pub fn take_deferred(&mut self, parent: &CredentialId) -> Vec<Credential> {
        self.deferred.remove(parent).unwrap_or_default()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.values().map(Vec::len).sum()
    }

    /// Highest capability held by `key`. The genesis key holds Admin.
    pub fn capability_of(&self, key: &PublicKey) -> Option<Capability> {
        if key == &self.genesis {
            return Some(Capability::Admin);
        }
        self.by_subject.get(key).copied()
    }

    pub fn is_authorized(&self, key: &PublicKey, required: Capability) -> bool {
        self.capability_of(key)
            .is_some_and(|held| held.covers(required))
    }

    pub fn get(&self, id: &CredentialId) -> Option<&AdmittedCredential> {
        self.admitted.get(id)
    }

    /// An admitted Admin credential naming `subject`, usable as a parent.
    pub fn admin_credential_for(&self, subject: &PublicKey) -> Option<CredentialId> {
        self.admitted
            .values()
            .filter(|c| &c.subject == subject && c.capability == Capability::Admin)
            .map(|c| c.id)
            .min()
    }

    pub fn admitted(&self) -> impl Iterator<Item = &AdmittedCredential> {
        self.admitted.values()
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}
