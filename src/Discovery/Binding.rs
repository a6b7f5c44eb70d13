// ServiceDiscoveryBinding (spec §4.8): translates required-instance-ids into
// provided-instance endpoints, dispatching up/down notifications to the
// per-connection listeners registered against them. This is the seam that
// hands the connection layer the `(domain, port)` + `IntegrityLevel` it
// needs to start a handshake (spec §1, "only insofar as it binds
// required-to-provided service instances to unicast addresses").

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::Connection::Address::{IntegrityLevel, IpcUnicastAddress};
use crate::Discovery::Ids::{ProvidedServiceInstanceId, RequiredServiceInstanceId};

/// Receiver of up/down events for one required-service-instance
/// registration. Held by weak reference so a listener's owner (typically a
/// proxy) can be dropped without the binding needing to know (spec §4.8,
/// "held by weak reference; iteration skips expired listeners").
pub trait ProvidedServiceInstanceListener: Send + Sync {
    fn on_service_instance_up(&self, address: IpcUnicastAddress);
    fn on_service_instance_down(&self);
}

struct Registration {
    required: RequiredServiceInstanceId,
    listener: Weak<dyn ProvidedServiceInstanceListener>,
}

/// Binds `RequiredServiceInstanceId`s to the provided instances the
/// underlying service-discovery component reports, and fans out
/// up/down events to every still-live listener whose required id matches.
#[derive(Default)]
pub struct ServiceDiscoveryBinding {
    registrations: Mutex<Vec<Registration>>,
}

impl ServiceDiscoveryBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` against `required`. Multiple listeners (e.g. one
    /// per proxy instance) may register against the same required id.
    pub fn register_listener(
        &self,
        required: RequiredServiceInstanceId,
        listener: &Arc<dyn ProvidedServiceInstanceListener>,
    ) {
        self.registrations.lock().push(Registration {
            required,
            listener: Arc::downgrade(listener),
        });
    }

    /// Drop every registration whose listener has already been dropped.
    /// Not required for correctness (dispatch already skips dead weak refs)
    /// but keeps the registration list from growing unboundedly across many
    /// connect/disconnect cycles.
    pub fn prune_expired(&self) {
        self.registrations.lock().retain(|r| r.listener.strong_count() > 0);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().len()
    }

    /// Called by the underlying service-discovery component when
    /// `provided` becomes available at `address` with the given
    /// `integrity_level`. Every registered listener whose required id
    /// matches `provided` (spec §3 `Matches`) receives `OnServiceInstanceUp`.
    pub fn on_provided_instance_up(
        &self,
        provided: ProvidedServiceInstanceId,
        address: IpcUnicastAddress,
        integrity_level: IntegrityLevel,
    ) {
        trace!(%provided, %address, ?integrity_level, "provided service instance up");
        for listener in self.live_matching_listeners(&provided) {
            listener.on_service_instance_up(address);
        }
    }

    /// Called when `provided` disappears. Every registered listener whose
    /// required id matches receives `OnServiceInstanceDown`.
    pub fn on_provided_instance_down(&self, provided: ProvidedServiceInstanceId) {
        debug!(%provided, "provided service instance down");
        for listener in self.live_matching_listeners(&provided) {
            listener.on_service_instance_down();
        }
    }

    fn live_matching_listeners(
        &self,
        provided: &ProvidedServiceInstanceId,
    ) -> Vec<Arc<dyn ProvidedServiceInstanceListener>> {
        self.registrations
            .lock()
            .iter()
            .filter(|r| r.required.matches(provided))
            .filter_map(|r| r.listener.upgrade())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Discovery::Ids::{InstanceIdSelector, MinorVersionSelector};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingListener {
        ups: AtomicU32,
        downs: AtomicU32,
    }

    impl CountingListener {
        fn new() -> Self {
            Self {
                ups: AtomicU32::new(0),
                downs: AtomicU32::new(0),
            }
        }
    }

    impl ProvidedServiceInstanceListener for CountingListener {
        fn on_service_instance_up(&self, _address: IpcUnicastAddress) {
            self.ups.fetch_add(1, Ordering::SeqCst);
        }

        fn on_service_instance_down(&self) {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn addr(port: u32) -> IpcUnicastAddress {
        IpcUnicastAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn wildcard_required_id_receives_up_and_down() {
        let binding = ServiceDiscoveryBinding::new();
        let listener = Arc::new(CountingListener::new());
        let as_trait: Arc<dyn ProvidedServiceInstanceListener> = listener.clone();
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::All,
            1,
            MinorVersionSelector::Any,
        );
        binding.register_listener(required, &as_trait);

        let provided = ProvidedServiceInstanceId::new(7, 3, 1, 0);
        binding.on_provided_instance_up(provided, addr(1), IntegrityLevel::Qm);
        binding.on_provided_instance_down(provided);

        assert_eq!(listener.ups.load(Ordering::SeqCst), 1);
        assert_eq!(listener.downs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_matching_required_id_is_not_notified() {
        let binding = ServiceDiscoveryBinding::new();
        let listener = Arc::new(CountingListener::new());
        let as_trait: Arc<dyn ProvidedServiceInstanceListener> = listener.clone();
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::Specific(3),
            1,
            MinorVersionSelector::Any,
        );
        binding.register_listener(required, &as_trait);

        binding.on_provided_instance_up(
            ProvidedServiceInstanceId::new(7, 4, 1, 0),
            addr(1),
            IntegrityLevel::Qm,
        );
        assert_eq!(listener.ups.load(Ordering::SeqCst), 0);

        binding.on_provided_instance_up(
            ProvidedServiceInstanceId::new(7, 3, 1, 0),
            addr(1),
            IntegrityLevel::Qm,
        );
        assert_eq!(listener.ups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_listener_is_skipped_and_pruned() {
        let binding = ServiceDiscoveryBinding::new();
        let required = RequiredServiceInstanceId::new(
            7,
            InstanceIdSelector::All,
            1,
            MinorVersionSelector::Any,
        );
        {
            let listener: Arc<dyn ProvidedServiceInstanceListener> =
                Arc::new(CountingListener::new());
            binding.register_listener(required, &listener);
        }
        assert_eq!(binding.registration_count(), 1);

        binding.on_provided_instance_up(
            ProvidedServiceInstanceId::new(7, 1, 1, 0),
            addr(1),
            IntegrityLevel::Qm,
        );

        binding.prune_expired();
        assert_eq!(binding.registration_count(), 0);
    }
}
