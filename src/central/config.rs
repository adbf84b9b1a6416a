use bon::Builder;
use serde::Serialize;
use strum_macros::{Display, EnumString};

use crate::hw::ScanSettings;

/// When a notification subscription reports success.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, EnumString, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum NotificationSuccessPolicy {
    /// Succeeds as soon as local registration is accepted; the descriptor
    /// write outcome is recorded but not awaited.
    #[default]
    Optimistic,
    /// Succeeds only after the configuration descriptor write is acknowledged.
    AwaitDescriptorWrite,
}

/// Behaviour switches for a [`super::BleCentral`].
#[derive(Debug, Clone, Copy, Default, Builder, Serialize)]
pub struct CentralConfig {
    #[builder(default)]
    notification_policy: NotificationSuccessPolicy,
    /// Settings used when a scan request does not carry its own.
    #[builder(default)]
    scan_settings: ScanSettings,
}

impl CentralConfig {
    #[must_use]
    pub fn notification_policy(&self) -> NotificationSuccessPolicy {
        self.notification_policy
    }

    #[must_use]
    pub fn scan_settings(&self) -> ScanSettings {
        self.scan_settings
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("optimistic", NotificationSuccessPolicy::Optimistic)]
    #[case("await-descriptor-write", NotificationSuccessPolicy::AwaitDescriptorWrite)]
    fn notification_policy_parses_kebab_case(
        #[case] raw: &str,
        #[case] expected: NotificationSuccessPolicy,
    ) {
        let parsed: NotificationSuccessPolicy = raw.parse().expect("policy name should parse");
        assert_eq!(expected, parsed);
        assert_eq!(raw, parsed.to_string());
    }

    #[test]
    fn default_config_is_optimistic() {
        assert_eq!(
            NotificationSuccessPolicy::Optimistic,
            CentralConfig::default().notification_policy()
        );
    }
}
