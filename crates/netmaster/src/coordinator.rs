//! Global coordinator
//!
//! Owns the three global records (settings, pool config, operational leases)
//! and serializes every mutation of them behind one async mutex. Inputs are
//! validated before the lock is taken; a rejected request never touches the
//! store. Writes are not transactional across records, so a store failure
//! mid-sequence can leave earlier writes in place.

use std::sync::Arc;

use netmaster_common::{
    clear_record, probe_record, write_record, RangeParser, StateStore, TagKind, TagRanges,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{MasterError, MasterResult};
use crate::flags::RuntimeFlags;
use crate::pool::{LeaseTracker, OperationalLeases};
use crate::records::{GlobalConfigDelta, GlobalSettings, InfraMode, ResourcePoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Create,
    Update,
}

impl Mutation {
    fn as_str(self) -> &'static str {
        match self {
            Mutation::Create => "create",
            Mutation::Update => "update",
        }
    }
}

/// Delta after validation
struct ValidatedDelta<'a> {
    infra_mode: Option<InfraMode>,
    ranges: Vec<(TagKind, &'a str, TagRanges)>,
}

/// Global configuration coordinator
pub struct GlobalCoordinator {
    store: Arc<dyn StateStore>,
    parser: Arc<dyn RangeParser>,
    flags: Arc<RuntimeFlags>,
    lock: Mutex<()>,
}

impl GlobalCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        parser: Arc<dyn RangeParser>,
        flags: Arc<RuntimeFlags>,
    ) -> Self {
        Self {
            store,
            parser,
            flags,
            lock: Mutex::new(()),
        }
    }

    pub fn flags(&self) -> &Arc<RuntimeFlags> {
        &self.flags
    }

    fn tracker(&self) -> LeaseTracker<'_> {
        LeaseTracker::new(self.store.as_ref(), self.parser.as_ref())
    }

    fn validate<'a>(&self, delta: &'a GlobalConfigDelta) -> MasterResult<ValidatedDelta<'a>> {
        let infra_mode = delta.parsed_infra_mode()?;

        let mut ranges = Vec::with_capacity(TagKind::ALL.len());
        for kind in TagKind::ALL {
            let Some(spec) = delta.range_spec(kind) else {
                continue;
            };
            let parsed = self
                .parser
                .parse(spec, kind)
                .map_err(|source| MasterError::InvalidRange {
                    kind,
                    spec: spec.to_string(),
                    source,
                })?;
            ranges.push((kind, spec, parsed));
        }

        Ok(ValidatedDelta { infra_mode, ranges })
    }

    /// Apply a first-time global configuration.
    ///
    /// Missing records start from defaults. Each supplied range initializes
    /// its pool, or resizes it when a lease record already exists.
    pub async fn create_global(&self, delta: &GlobalConfigDelta) -> MasterResult<()> {
        self.apply(Mutation::Create, delta).await
    }

    /// Update the global configuration.
    ///
    /// A new range must still contain every leased tag of its kind.
    pub async fn update_global(&self, delta: &GlobalConfigDelta) -> MasterResult<()> {
        self.apply(Mutation::Update, delta).await
    }

    async fn apply(&self, mutation: Mutation, delta: &GlobalConfigDelta) -> MasterResult<()> {
        info!(
            op = mutation.as_str(),
            cluster_mode = %self.flags.cluster_mode(),
            infra_mode = ?delta.infra_mode,
            vlans = ?delta.vlans,
            vxlans = ?delta.vxlans,
            "global config request"
        );

        let validated = self.validate(delta).inspect_err(|err| {
            warn!(op = mutation.as_str(), error = %err, "rejected global config");
        })?;

        let _guard = self.lock.lock().await;
        let tracker = self.tracker();
        let store = self.store.as_ref();

        let mut settings = probe_record::<GlobalSettings>(store)
            .await?
            .unwrap_or_default();
        let mut pools = probe_record::<ResourcePoolConfig>(store)
            .await?
            .unwrap_or_default();
        let leases = tracker.load().await?;

        if let Some(leases) = &leases {
            check_containment(leases, &validated)?;
        }

        let result = async {
            for (kind, spec, _) in &validated.ranges {
                match (&leases, mutation) {
                    (Some(_), _) => tracker.resize(*kind, spec).await?,
                    (None, Mutation::Create) => tracker.initialize(*kind, spec).await?,
                    (None, Mutation::Update) => {}
                }
                pools.set_spec(*kind, spec);
            }

            if !validated.ranges.is_empty() {
                write_record(store, &pools).await?;
            }

            settings.apply(validated.infra_mode, delta);
            write_record(store, &settings).await?;
            Ok::<_, MasterError>(())
        }
        .await;

        match &result {
            Ok(()) => info!(
                op = mutation.as_str(),
                infra_mode = %settings.infra_mode,
                vlans = %pools.vlans,
                vxlans = %pools.vxlans,
                "global config applied"
            ),
            Err(err) => error!(op = mutation.as_str(), error = %err, "global config partially applied"),
        }
        result
    }

    /// Tear down every global record.
    ///
    /// Missing records are not an error, so the call is idempotent.
    pub async fn delete_global(&self) -> MasterResult<()> {
        info!(cluster_mode = %self.flags.cluster_mode(), "global config delete request");
        let _guard = self.lock.lock().await;
        let tracker = self.tracker();
        let store = self.store.as_ref();

        for kind in TagKind::ALL {
            ignore_not_found(tracker.release_all(kind).await.map(|_| ()))?;
        }
        ignore_not_found(clear_record::<ResourcePoolConfig>(store).await.map_err(Into::into))?;
        ignore_not_found(clear_record::<OperationalLeases>(store).await.map_err(Into::into))?;
        ignore_not_found(clear_record::<GlobalSettings>(store).await.map_err(Into::into))?;

        info!("global config deleted");
        Ok(())
    }

    /// True when the fabric runs ACI-integrated
    pub async fn is_fabric_mode_aci(&self) -> MasterResult<bool> {
        let settings = probe_record::<GlobalSettings>(self.store.as_ref()).await?;
        Ok(settings.is_some_and(|s| s.infra_mode == InfraMode::Aci))
    }

    pub async fn global_settings(&self) -> MasterResult<Option<GlobalSettings>> {
        Ok(probe_record(self.store.as_ref()).await?)
    }

    pub async fn pool_config(&self) -> MasterResult<Option<ResourcePoolConfig>> {
        Ok(probe_record(self.store.as_ref()).await?)
    }

    /// Leased tags of `kind`, ascending
    pub async fn tags_in_use(&self, kind: TagKind) -> MasterResult<Vec<u32>> {
        let leases = self.tracker().load().await?;
        Ok(leases.map(|l| l.in_use(kind)).unwrap_or_default())
    }

    /// Lease `requested`, or the lowest free tag of `kind`
    pub async fn allocate_tag(&self, kind: TagKind, requested: Option<u32>) -> MasterResult<u32> {
        let _guard = self.lock.lock().await;
        self.tracker()
            .allocate(kind, requested)
            .await
            .inspect_err(|err| warn!(%kind, ?requested, error = %err, "tag allocation failed"))
    }

    /// Free a leased tag; releasing an unleased tag is a no-op
    pub async fn release_tag(&self, kind: TagKind, tag: u32) -> MasterResult<()> {
        let _guard = self.lock.lock().await;
        self.tracker().release(kind, tag).await?;
        Ok(())
    }
}

fn check_containment(leases: &OperationalLeases, delta: &ValidatedDelta<'_>) -> MasterResult<()> {
    for (kind, spec, ranges) in &delta.ranges {
        let in_use = leases.conflicts(*kind, ranges);
        if !in_use.is_empty() {
            warn!(%kind, spec, ?in_use, "range excludes leased tags");
            return Err(MasterError::RangeConflict { kind: *kind, in_use });
        }
    }
    Ok(())
}

fn ignore_not_found(result: MasterResult<()>) -> MasterResult<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ClusterMode;
    use async_trait::async_trait;
    use netmaster_common::{InMemoryStateStore, StateError, StateRecord, StateResult, TagRangeParser};
    use parking_lot::Mutex as SyncMutex;
    use tokio_test::{assert_err, assert_ok};

    fn coordinator(store: Arc<dyn StateStore>) -> GlobalCoordinator {
        GlobalCoordinator::new(
            store,
            Arc::new(TagRangeParser::new()),
            Arc::new(RuntimeFlags::new(ClusterMode::Test, false)),
        )
    }

    fn setup() -> (Arc<InMemoryStateStore>, GlobalCoordinator) {
        let store = Arc::new(InMemoryStateStore::new());
        let coord = coordinator(store.clone());
        (store, coord)
    }

    /// Store that fails chosen operations
    #[derive(Default)]
    struct FaultyStore {
        inner: InMemoryStateStore,
        fail_read: SyncMutex<Option<&'static str>>,
        fail_write: SyncMutex<Option<&'static str>>,
    }

    #[async_trait]
    impl StateStore for FaultyStore {
        async fn read(&self, key: &str) -> StateResult<Vec<u8>> {
            if *self.fail_read.lock() == Some(key) {
                return Err(StateError::Backend("read timeout".into()));
            }
            self.inner.read(key).await
        }

        async fn write(&self, key: &str, value: Vec<u8>) -> StateResult<()> {
            if *self.fail_write.lock() == Some(key) {
                return Err(StateError::Backend("write rejected".into()));
            }
            self.inner.write(key, value).await
        }

        async fn clear(&self, key: &str) -> StateResult<()> {
            self.inner.clear(key).await
        }
    }

    #[tokio::test]
    async fn test_infra_modes_persist() {
        for mode in ["default", "aci", "aci-opflex"] {
            let (_, coord) = setup();
            assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_infra_mode(mode)).await);

            let settings = coord.global_settings().await.unwrap().unwrap();
            assert_eq!(settings.infra_mode.as_str(), mode);
            assert_eq!(coord.is_fabric_mode_aci().await.unwrap(), mode == "aci");
        }
    }

    #[tokio::test]
    async fn test_invalid_infra_mode_leaves_state() {
        let (store, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("1-100")).await);
        let before = store.snapshot();

        let err = assert_err!(
            coord
                .update_global(&GlobalConfigDelta::default().with_infra_mode("bogus").with_vlans("1-50"))
                .await
        );
        assert!(matches!(err, MasterError::InvalidConfig(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_invalid_range_writes_nothing() {
        let (store, coord) = setup();

        let delta = GlobalConfigDelta::default()
            .with_vxlans("1-1000")
            .with_vlans("100-abc");
        let err = assert_err!(coord.create_global(&delta).await);

        assert!(matches!(err, MasterError::InvalidRange { kind: TagKind::Vlan, .. }));
        assert!(err.is_validation());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_range_on_update_leaves_state() {
        let (store, coord) = setup();
        assert_ok!(
            coord
                .create_global(&GlobalConfigDelta::default().with_vlans("100-200").with_vxlans("1-1000"))
                .await
        );
        assert_ok!(coord.allocate_tag(TagKind::Vxlan, Some(5)).await);
        let before = store.snapshot();

        for delta in [
            GlobalConfigDelta::default().with_vlans("300-x").with_vxlans("1-2000"),
            GlobalConfigDelta::default().with_vlans("1-4094").with_vxlans("1-10,20-30"),
            GlobalConfigDelta::default().with_vlans("5000"),
        ] {
            let err = assert_err!(coord.update_global(&delta).await);
            assert!(matches!(err, MasterError::InvalidRange { .. }), "{err}");
            assert_eq!(store.snapshot(), before);
        }
    }

    #[tokio::test]
    async fn test_infra_modes_persist_on_update() {
        let (store, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("1-100")).await);
        assert_eq!(coord.flags().cluster_mode(), ClusterMode::Test);

        for mode in ["aci", "aci-opflex", "default"] {
            assert_ok!(coord.update_global(&GlobalConfigDelta::default().with_infra_mode(mode)).await);

            let settings = coord.global_settings().await.unwrap().unwrap();
            assert_eq!(settings.infra_mode.as_str(), mode);
            assert_eq!(settings.fwd_mode, "bridge");
            assert_eq!(coord.is_fabric_mode_aci().await.unwrap(), mode == "aci");
        }

        let before = store.snapshot();
        let err = assert_err!(coord.update_global(&GlobalConfigDelta::default().with_infra_mode("opflex")).await);
        assert!(matches!(err, MasterError::InvalidConfig(_)));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_create_defaults_and_pools() {
        let (_, coord) = setup();
        let delta = GlobalConfigDelta::default()
            .with_vlans("100-200")
            .with_vxlans("10000-20000");
        assert_ok!(coord.create_global(&delta).await);

        assert_eq!(coord.global_settings().await.unwrap(), Some(GlobalSettings::default()));
        let pools = coord.pool_config().await.unwrap().unwrap();
        assert_eq!(pools.vlans, "100-200");
        assert_eq!(pools.vxlans, "10000-20000");

        assert_eq!(coord.allocate_tag(TagKind::Vxlan, None).await.unwrap(), 10000);
        assert_eq!(coord.tags_in_use(TagKind::Vxlan).await.unwrap(), vec![10000]);
    }

    #[tokio::test]
    async fn test_create_then_delete_empties_store() {
        let (store, coord) = setup();
        let delta = GlobalConfigDelta::default()
            .with_infra_mode("aci")
            .with_vlans("1-4094")
            .with_fwd_mode("routing");
        assert_ok!(coord.create_global(&delta).await);
        assert_eq!(store.len(), 3);

        assert_ok!(coord.delete_global().await);
        assert!(store.is_empty());

        // idempotent
        assert_ok!(coord.delete_global().await);
        assert!(!coord.is_fabric_mode_aci().await.unwrap());
    }

    #[tokio::test]
    async fn test_update_conflict_keeps_range() {
        let (store, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("100-200")).await);
        assert_eq!(coord.allocate_tag(TagKind::Vlan, Some(120)).await.unwrap(), 120);
        let before = store.snapshot();

        let err = assert_err!(coord.update_global(&GlobalConfigDelta::default().with_vlans("150-160")).await);

        assert!(matches!(
            err,
            MasterError::RangeConflict { kind: TagKind::Vlan, ref in_use } if in_use == &vec![120]
        ));
        assert_eq!(store.snapshot(), before);
        assert_eq!(coord.pool_config().await.unwrap().unwrap().vlans, "100-200");
    }

    #[tokio::test]
    async fn test_update_conflict_on_one_kind_blocks_both() {
        let (store, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("100-200")).await);
        assert_ok!(coord.allocate_tag(TagKind::Vlan, Some(199)).await);
        let before = store.snapshot();

        let delta = GlobalConfigDelta::default()
            .with_vxlans("1-500")
            .with_vlans("100-150");
        assert_err!(coord.update_global(&delta).await);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_update_resizes_around_leases() {
        let (_, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("100-200")).await);
        assert_ok!(coord.allocate_tag(TagKind::Vlan, Some(120)).await);

        assert_ok!(coord.update_global(&GlobalConfigDelta::default().with_vlans("110-130,300-310")).await);

        assert_eq!(coord.pool_config().await.unwrap().unwrap().vlans, "110-130,300-310");
        assert_eq!(coord.tags_in_use(TagKind::Vlan).await.unwrap(), vec![120]);
        assert!(matches!(
            coord.allocate_tag(TagKind::Vlan, Some(200)).await,
            Err(MasterError::TagOutOfRange { tag: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_update_without_leases_writes_config_only() {
        let (store, coord) = setup();

        assert_ok!(coord.update_global(&GlobalConfigDelta::default().with_vlans("1-10").with_arp_mode("flood")).await);

        assert_eq!(coord.pool_config().await.unwrap().unwrap().vlans, "1-10");
        assert_eq!(coord.global_settings().await.unwrap().unwrap().arp_mode, "flood");
        assert!(!store.keys().contains(&OperationalLeases::KEY.to_string()));
        assert!(matches!(
            coord.allocate_tag(TagKind::Vlan, None).await,
            Err(MasterError::PoolNotConfigured(TagKind::Vlan))
        ));
    }

    #[tokio::test]
    async fn test_release_tag() {
        let (_, coord) = setup();
        assert_ok!(coord.create_global(&GlobalConfigDelta::default().with_vlans("5-6")).await);

        assert_eq!(coord.allocate_tag(TagKind::Vlan, None).await.unwrap(), 5);
        assert_eq!(coord.allocate_tag(TagKind::Vlan, None).await.unwrap(), 6);
        assert!(matches!(
            coord.allocate_tag(TagKind::Vlan, None).await,
            Err(MasterError::PoolExhausted(TagKind::Vlan))
        ));

        assert_ok!(coord.release_tag(TagKind::Vlan, 5).await);
        assert_ok!(coord.release_tag(TagKind::Vlan, 5).await);
        assert_eq!(coord.tags_in_use(TagKind::Vlan).await.unwrap(), vec![6]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_disjoint_updates() {
        let (_, coord) = setup();
        let coord = Arc::new(coord);
        assert_ok!(
            coord
                .create_global(&GlobalConfigDelta::default().with_vlans("1-10").with_vxlans("1-10"))
                .await
        );

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let coord = coord.clone();
            handles.push(tokio::spawn(async move {
                let spec = format!("1-{}", 100 + i);
                let delta = if i % 2 == 0 {
                    GlobalConfigDelta::default().with_vlans(&spec)
                } else {
                    GlobalConfigDelta::default().with_vxlans(&spec)
                };
                coord.update_global(&delta).await
            }));
        }
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let pools = coord.pool_config().await.unwrap().unwrap();
        assert!(pools.vlans.starts_with("1-1"), "{}", pools.vlans);
        assert_ne!(pools.vlans, "1-10");
        assert_ne!(pools.vxlans, "1-10");

        let leases = coord.tracker().load().await.unwrap().unwrap();
        assert_eq!(leases.pool(TagKind::Vlan).unwrap().spec(), pools.vlans);
        assert_eq!(leases.pool(TagKind::Vxlan).unwrap().spec(), pools.vxlans);
    }

    #[tokio::test]
    async fn test_aci_probe_surfaces_backend_errors() {
        let store = Arc::new(FaultyStore::default());
        let coord = coordinator(store.clone());

        assert!(!coord.is_fabric_mode_aci().await.unwrap());

        *store.fail_read.lock() = Some(GlobalSettings::KEY);
        let err = assert_err!(coord.is_fabric_mode_aci().await);
        assert!(matches!(err, MasterError::StateStore(StateError::Backend(_))));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_without_rollback() {
        let store = Arc::new(FaultyStore::default());
        let coord = coordinator(store.clone());
        *store.fail_write.lock() = Some(GlobalSettings::KEY);

        let err = assert_err!(coord.create_global(&GlobalConfigDelta::default().with_vlans("1-100")).await);
        assert!(matches!(err, MasterError::StateStore(_)));

        let keys = store.inner.keys();
        assert!(keys.contains(&ResourcePoolConfig::KEY.to_string()));
        assert!(!keys.contains(&GlobalSettings::KEY.to_string()));
    }
}
