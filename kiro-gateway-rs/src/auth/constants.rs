//! Auth constants: User-Agent strings, fingerprint generation.

use sha2::{Digest, Sha256};

/// Generate a per-credential fingerprint.
///
/// Unlike a machine-wide fingerprint, each pooled credential gets its own
/// stable identity derived only from its own fields, so two credentials on
/// the same proxy host never collide and a credential's fingerprint follows
/// it across process restarts.
pub fn credential_fingerprint(uuid: &str, profile_arn: &str, client_id: &str) -> String {
    let input = format!("{}{}{}kiro-gateway", uuid, profile_arn, client_id);
    let hash = Sha256::digest(input.as_bytes());
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Kiro IDE version string used in User-Agent.
pub const KIRO_IDE_VERSION: &str = "KiroIDE-0.7.45";

/// AWS SDK version string used in User-Agent.
pub const AWS_SDK_VERSION: &str = "aws-sdk-js/1.0.27";

/// Build the User-Agent header value.
pub fn user_agent(fingerprint: &str) -> String {
    format!(
        "{} ua/2.1 os/win32#10.0.19044 lang/js md/nodejs#22.21.1 api/codewhispererstreaming#1.0.27 m/E {}-{}",
        AWS_SDK_VERSION, KIRO_IDE_VERSION, fingerprint
    )
}

/// Build the x-amz-user-agent header value.
pub fn amz_user_agent(fingerprint: &str) -> String {
    format!("{} {}-{}", AWS_SDK_VERSION, KIRO_IDE_VERSION, fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_per_credential() {
        let a = credential_fingerprint("uuid-1", "arn:aws:profile/1", "client-1");
        let b = credential_fingerprint("uuid-1", "arn:aws:profile/1", "client-1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_across_credentials() {
        let a = credential_fingerprint("uuid-1", "arn:aws:profile/1", "client-1");
        let b = credential_fingerprint("uuid-2", "arn:aws:profile/1", "client-1");
        assert_ne!(a, b);
    }
}
