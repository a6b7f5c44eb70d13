// Service instance identifiers (spec §3, §4.8): the tuples service discovery
// binds to unicast addresses, and the wildcard matching rule a required
// instance id uses against a provided one.

use std::fmt;

/// A concrete `(service_id, instance_id, major_version, minor_version)`
/// identifying one endpoint a provider actually offers. No wildcards: every
/// field is a specific value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProvidedServiceInstanceId {
    pub service_id: u16,
    pub instance_id: u16,
    pub major_version: u8,
    pub minor_version: u32,
}

impl ProvidedServiceInstanceId {
    pub fn new(service_id: u16, instance_id: u16, major_version: u8, minor_version: u32) -> Self {
        Self {
            service_id,
            instance_id,
            major_version,
            minor_version,
        }
    }
}

impl fmt::Display for ProvidedServiceInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}.{}",
            self.service_id, self.instance_id, self.major_version, self.minor_version
        )
    }
}

/// `instance_id` as named by a required-service-instance: either a specific
/// instance, or the wildcard `ALL` matching any provided instance id (spec
/// §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceIdSelector {
    Specific(u16),
    All,
}

/// `minor_version` as named by a required-service-instance: either a
/// specific version, or the wildcard `ANY` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinorVersionSelector {
    Specific(u32),
    Any,
}

/// A `(service_id, instance_id, major_version, minor_version)` tuple as
/// named by a service *consumer*: `instance_id` may be the wildcard `ALL`
/// and `minor_version` may be the wildcard `ANY` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredServiceInstanceId {
    pub service_id: u16,
    pub instance_id: InstanceIdSelector,
    pub major_version: u8,
    pub minor_version: MinorVersionSelector,
}

impl RequiredServiceInstanceId {
    pub fn new(
        service_id: u16,
        instance_id: InstanceIdSelector,
        major_version: u8,
        minor_version: MinorVersionSelector,
    ) -> Self {
        Self {
            service_id,
            instance_id,
            major_version,
            minor_version,
        }
    }

    /// `Matches(provided)` (spec §3): true iff every non-wildcard field
    /// equals the provided id's corresponding field, and every wildcard
    /// field matches anything.
    pub fn matches(&self, provided: &ProvidedServiceInstanceId) -> bool {
        if self.service_id != provided.service_id {
            return false;
        }
        if self.major_version != provided.major_version {
            return false;
        }
        let instance_matches = match self.instance_id {
            InstanceIdSelector::All => true,
            InstanceIdSelector::Specific(id) => id == provided.instance_id,
        };
        if !instance_matches {
            return false;
        }
        match self.minor_version {
            MinorVersionSelector::Any => true,
            MinorVersionSelector::Specific(v) => v == provided.minor_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_instance_and_version_match_anything() {
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::All,
            1,
            MinorVersionSelector::Any,
        );
        assert!(required.matches(&ProvidedServiceInstanceId::new(7, 1, 1, 0)));
        assert!(required.matches(&ProvidedServiceInstanceId::new(7, 99, 1, 42)));
    }

    #[test]
    fn non_wildcard_fields_must_equal() {
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::Specific(3),
            1,
            MinorVersionSelector::Specific(2),
        );
        assert!(required.matches(&ProvidedServiceInstanceId::new(7, 3, 1, 2)));
        assert!(!required.matches(&ProvidedServiceInstanceId::new(7, 4, 1, 2)));
        assert!(!required.matches(&ProvidedServiceInstanceId::new(7, 3, 1, 3)));
    }

    #[test]
    fn service_id_and_major_version_are_never_wildcarded() {
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::All,
            1,
            MinorVersionSelector::Any,
        );
        assert!(!required.matches(&ProvidedServiceInstanceId::new(8, 1, 1, 0)));
        assert!(!required.matches(&ProvidedServiceInstanceId::new(7, 1, 2, 0)));
    }
}

// Property-based test for spec.md §8's universal invariant 7
// ("Required-ID matching"): `Matches` is true for all instance-ids and
// minor-versions once both selectors are wildcarded, and non-wildcard
// fields must equal exactly, for any generated tuple.
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn all_any_matches_every_instance_and_minor_version(
            service_id: u16,
            major_version: u8,
            instance_id: u16,
            minor_version: u32,
        ) {
            let required = RequiredServiceInstanceId::new(
                service_id,
                InstanceIdSelector::All,
                major_version,
                MinorVersionSelector::Any,
            );
            let provided = ProvidedServiceInstanceId::new(
                service_id,
                instance_id,
                major_version,
                minor_version,
            );
            prop_assert!(required.matches(&provided));
        }

        /// Non-wildcard fields (`service_id`, `major_version`, and a
        /// specific `instance_id`/`minor_version` when not wildcarded) must
        /// equal exactly: any single mismatch fails the whole match.
        #[test]
        fn non_wildcard_mismatch_never_matches(
            service_id: u16,
            major_version: u8,
            instance_id: u16,
            minor_version: u32,
            bad_service_id: u16,
        ) {
            prop_assume!(bad_service_id != service_id);
            let required = RequiredServiceInstanceId::new(
                service_id,
                InstanceIdSelector::Specific(instance_id),
                major_version,
                MinorVersionSelector::Specific(minor_version),
            );
            let provided = ProvidedServiceInstanceId::new(
                bad_service_id,
                instance_id,
                major_version,
                minor_version,
            );
            prop_assert!(!required.matches(&provided));
        }
    }
}
