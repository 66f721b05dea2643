//! The key and credential manager for one device in one space.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use weft_core::{Capability, Credential, CredentialId, Keypair, PublicKey, Signature};

use crate::error::Result;
use crate::state::{Admission, AdmittedCredential, CredentialState};

/// Signs with the device key and decides which keys may write.
///
/// Admission is monotonic: once admitted, a credential stays admitted.
/// Every admission bumps a generation counter that callers can watch to
/// re-evaluate entries they held back.
pub struct KeyManager {
    device: Keypair,
    state: RwLock<CredentialState>,
    generation: watch::Sender<u64>,
}

impl KeyManager {
    pub fn new(device: Keypair, genesis: PublicKey) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            device,
            state: RwLock::new(CredentialState::new(genesis)),
            generation,
        }
    }

    pub fn device_key(&self) -> PublicKey {
        self.device.public_key()
    }

    pub fn device(&self) -> &Keypair {
        &self.device
    }

    pub fn genesis(&self) -> PublicKey {
        self.read().genesis()
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.device.sign(bytes)
    }

    pub fn verify(&self, key: &PublicKey, bytes: &[u8], signature: &Signature) -> bool {
        key.verify(bytes, signature).is_ok()
    }

    /// Issue a credential signed by this device.
    pub fn issue(
        &self,
        subject: PublicKey,
        capability: Capability,
        parent: Option<CredentialId>,
    ) -> Credential {
        Credential::issue(&self.device, subject, capability, parent)
    }

    /// An admitted Admin credential for this device, to cite as a parent.
    pub fn own_admin_credential(&self) -> Option<CredentialId> {
        self.read().admin_credential_for(&self.device.public_key())
    }

    /// Validate the credential's chain and record it.
    pub fn admit(&self, credential: &Credential) -> Result<Admission> {
        let admission = self.write().admit(credential)?;
        if let Admission::Admitted(ref admitted) = admission {
            self.announce(std::slice::from_ref(admitted));
        }
        Ok(admission)
    }

    /// Admit an ordered chain. Either every credential is admitted or none.
    ///
    /// Returns how many credentials were newly admitted.
    pub fn admit_chain(&self, credentials: &[Credential]) -> Result<usize> {
        let mut state = self.write();
        let mut staged = state.clone();

        let mut admitted = Vec::new();
        for credential in credentials {
            if let Admission::Admitted(c) = staged.admit(credential)? {
                admitted.push(c);
            }
        }

        *state = staged;
        drop(state);

        self.announce(&admitted);
        Ok(admitted.len())
    }

    /// Admit a credential, or hold it until its parent is admitted.
    ///
    /// Returns every credential admitted as a result, including ones that
    /// were waiting on this one. An unknown parent is not an error.
    pub fn admit_or_defer(&self, credential: &Credential) -> Result<Vec<AdmittedCredential>> {
        let mut state = self.write();

        let first = match state.admit(credential) {
            Ok(Admission::Admitted(c)) => c,
            Ok(Admission::AlreadyAdmitted(_)) => return Ok(Vec::new()),
            Err(e) if e.is_deferrable() => {
                if let Some(parent) = credential.parent {
                    tracing::debug!(parent = %parent, subject = %credential.subject, "credential deferred");
                    state.defer(parent, credential.clone());
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut admitted = vec![first];
        let mut next = 0;
        while next < admitted.len() {
            let parent = admitted[next].id;
            next += 1;
            for waiting in state.take_deferred(&parent) {
                match state.admit(&waiting) {
                    Ok(Admission::Admitted(c)) => admitted.push(c),
                    Ok(Admission::AlreadyAdmitted(_)) => {}
                    Err(e) => {
                        tracing::warn!(subject = %waiting.subject, error = %e, "deferred credential rejected");
                    }
                }
            }
        }
        drop(state);

        self.announce(&admitted);
        Ok(admitted)
    }

    pub fn is_authorized(&self, key: &PublicKey, capability: Capability) -> bool {
        self.read().is_authorized(key, capability)
    }

    pub fn capability_of(&self, key: &PublicKey) -> Option<Capability> {
        self.read().capability_of(key)
    }

    pub fn admitted(&self) -> Vec<AdmittedCredential> {
        self.read().admitted().cloned().collect()
    }

    pub fn deferred_len(&self) -> usize {
        self.read().deferred_len()
    }

    /// Number of admissions so far, updated on each admission.
    pub fn watch_admissions(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn announce(&self, admitted: &[AdmittedCredential]) {
        if admitted.is_empty() {
            return;
        }
        for c in admitted {
            tracing::info!(
                subject = %c.subject,
                capability = ?c.capability,
                credential = %c.id,
                "credential admitted"
            );
        }
        let count = admitted.len() as u64;
        self.generation.send_modify(|g| *g += count);
    }

    // Admission mutates only after every check passes, so poisoned state is
    // still consistent.
    fn read(&self) -> RwLockReadGuard<'_, CredentialState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CredentialState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("device", &self.device.public_key())
            .field("admitted", &self.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PermsError;

    fn setup() -> (Keypair, KeyManager) {
        let genesis = Keypair::from_seed(&[0xAA; 32]);
        let device = Keypair::from_seed(&[0x01; 32]);
        let km = KeyManager::new(device, genesis.public_key());
        (genesis, km)
    }

    #[test]
    fn test_sign_verify() {
        let (_, km) = setup();
        let sig = km.sign(b"message");
        assert!(km.verify(&km.device_key(), b"message", &sig));
        assert!(!km.verify(&km.device_key(), b"other", &sig));
    }

    #[test]
    fn test_admit_chain_all_or_nothing() {
        let (genesis, km) = setup();
        let admin = Keypair::generate();
        let writer = Keypair::generate();

        let admin_cred = Credential::issue(&genesis, admin.public_key(), Capability::Admin, None);
        let writer_cred =
            Credential::issue(&admin, writer.public_key(), Capability::Write, Some(admin_cred.id()));
        let mut broken = writer_cred.clone();
        broken.signature = Signature::ZERO;

        let err = km
            .admit_chain(&[admin_cred.clone(), broken])
            .unwrap_err();
        assert!(matches!(err, PermsError::Verification(_)));
        assert!(!km.is_authorized(&admin.public_key(), Capability::Admin));

        assert_eq!(km.admit_chain(&[admin_cred, writer_cred]).unwrap(), 2);
        assert!(km.is_authorized(&writer.public_key(), Capability::Write));
    }

    #[test]
    fn test_admit_or_defer_cascades() {
        let (genesis, km) = setup();
        let admin = Keypair::generate();
        let sub_admin = Keypair::generate();
        let writer = Keypair::generate();

        let a = Credential::issue(&genesis, admin.public_key(), Capability::Admin, None);
        let b = Credential::issue(&admin, sub_admin.public_key(), Capability::Admin, Some(a.id()));
        let c = Credential::issue(&sub_admin, writer.public_key(), Capability::Write, Some(b.id()));

        // Arrive leaf first.
        assert!(km.admit_or_defer(&c).unwrap().is_empty());
        assert!(km.admit_or_defer(&b).unwrap().is_empty());
        assert_eq!(km.deferred_len(), 2);

        let admitted = km.admit_or_defer(&a).unwrap();
        assert_eq!(admitted.len(), 3);
        assert!(km.is_authorized(&writer.public_key(), Capability::Write));
        assert_eq!(km.deferred_len(), 0);
    }

    #[test]
    fn test_generation_advances() {
        let (genesis, km) = setup();
        let rx = km.watch_admissions();
        assert_eq!(*rx.borrow(), 0);

        let cred = Credential::issue(&genesis, km.device_key(), Capability::Admin, None);
        km.admit(&cred).unwrap();
        assert_eq!(*rx.borrow(), 1);

        // Readmission does not bump.
        km.admit(&cred).unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(km.own_admin_credential(), Some(cred.id()));
    }

    #[test]
    fn test_non_admin_issuer_rejected() {
        let (_, km) = setup();
        let rogue = Keypair::generate();
        let cred = km.issue(rogue.public_key(), Capability::Write, None);
        // The device is not genesis, so its root credential is invalid.
        assert!(matches!(
            km.admit_or_defer(&cred),
            Err(PermsError::NotGenesis { .. })
        ));
        assert!(!km.is_authorized(&rogue.public_key(), Capability::Read));
    }
}
