//! Client identities and allow-list membership keys.
//!
//! An identity is the SSH user name, a 36-character UUID provisioned by the
//! operator. The allow-list stores `identity::credential` strings, where the
//! credential is the client's public key in authorized-keys form.

/// Exact length of a well-formed identity (a hyphenated UUID).
pub const IDENTITY_LEN: usize = 36;

/// Separator between identity and credential in a membership key.
pub const MEMBERSHIP_SEPARATOR: &str = "::";

/// Whether `identity` has the shape of a UUID identity.
pub fn is_valid_identity(identity: &str) -> bool {
    identity.len() == IDENTITY_LEN
}

/// Build the allow-list key for an identity and its presented credential.
///
/// Surrounding whitespace (including `\n`, `\t` and `\r`) on the credential
/// text is dropped so keys provisioned from `authorized_keys` lines match.
pub fn membership_key(identity: &str, credential: &str) -> String {
    format!(
        "{identity}{MEMBERSHIP_SEPARATOR}{}",
        normalize_credential(credential)
    )
}

fn normalize_credential(credential: &str) -> &str {
    credential.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn test_identity_length() {
        assert!(is_valid_identity(ID));
        assert!(!is_valid_identity("alice"));
        assert!(!is_valid_identity(""));
        assert!(!is_valid_identity(&format!("{ID}0")));
    }

    #[test]
    fn test_membership_key_trims_trailing_whitespace() {
        let stored = format!("{ID}::ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGx");
        let presented = membership_key(ID, "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGx\n\t");
        assert_eq!(presented, stored);
    }

    #[test]
    fn test_membership_key_trims_leading_whitespace() {
        let key = membership_key(ID, "\r\n ssh-rsa AAAA");
        assert_eq!(key, format!("{ID}::ssh-rsa AAAA"));
    }

    #[test]
    fn test_membership_key_keeps_inner_spaces() {
        let key = membership_key(ID, "ssh-ed25519 AAAA comment here\n");
        assert!(key.ends_with("ssh-ed25519 AAAA comment here"));
    }
}
