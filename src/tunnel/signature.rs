//! Tunnel configuration fingerprint

use std::fmt;

use sha2::{Digest, Sha256};

use super::TunnelOptions;
use crate::ssh::SshAuth;

/// SHA-256 over every field that affects where and how a tunnel connects.
///
/// Used only to decide whether a registered tunnel still matches the
/// requested options. Fields are length-prefixed so that different splits of
/// the same bytes never produce the same digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelSignature([u8; 32]);

impl TunnelSignature {
    pub fn of(options: &TunnelOptions) -> Self {
        let mut hasher = Sha256::new();
        let ssh = &options.ssh;

        put(&mut hasher, ssh.auth.method_name().as_bytes());
        put(&mut hasher, ssh.host.as_bytes());
        put(&mut hasher, &ssh.port.to_be_bytes());
        put(&mut hasher, ssh.username.as_bytes());
        match &ssh.auth {
            SshAuth::Password { password } => put(&mut hasher, password.as_bytes()),
            SshAuth::PrivateKey {
                private_key_path,
                passphrase,
            } => {
                put(&mut hasher, private_key_path.to_string_lossy().as_bytes());
                match passphrase {
                    Some(pass) => {
                        put(&mut hasher, &[1]);
                        put(&mut hasher, pass.as_bytes());
                    }
                    None => put(&mut hasher, &[0]),
                }
            }
        }
        put(&mut hasher, options.dest_host.as_bytes());
        put(&mut hasher, &options.dest_port.to_be_bytes());

        Self(hasher.finalize().into())
    }
}

fn put(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Display for TunnelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TunnelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelSignature({})", self)
    }
}
