//! Operational lease tracking
//!
//! [`OperationalLeases`] is the ground truth of which tags are bound to live
//! networks. Each kind has a [`TagPool`] holding the accepted range and the
//! sorted set of leased tags. Invariant: every leased tag lies inside the
//! pool's range; [`TagPool::resize`] refuses any range that breaks it.

use std::collections::BTreeSet;

use netmaster_common::{
    probe_record, read_record, write_record, RangeParser, StateRecord, StateStore, TagKind,
    TagRanges,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MasterError, MasterResult};

/// Lease pool for one tag kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPool {
    kind: TagKind,
    spec: String,
    ranges: TagRanges,
    in_use: BTreeSet<u32>,
}

impl TagPool {
    /// Empty pool over `ranges`
    pub fn new(kind: TagKind, spec: &str, ranges: TagRanges) -> Self {
        Self {
            kind,
            spec: spec.to_string(),
            ranges,
            in_use: BTreeSet::new(),
        }
    }

    /// Range spec the pool was last sized to
    pub fn spec(&self) -> &str {
        &self.spec
    }

    pub fn ranges(&self) -> &TagRanges {
        &self.ranges
    }

    pub fn in_use(&self) -> &BTreeSet<u32> {
        &self.in_use
    }

    pub fn is_leased(&self, tag: u32) -> bool {
        self.in_use.contains(&tag)
    }

    /// Number of unleased tags
    pub fn free_count(&self) -> u64 {
        self.ranges.len().saturating_sub(self.in_use.len() as u64)
    }

    /// Leased tags that `ranges` would orphan
    pub fn conflicts(&self, ranges: &TagRanges) -> Vec<u32> {
        ranges.outside(&self.in_use)
    }

    /// Replace the addressable range, keeping every lease
    pub fn resize(&mut self, spec: &str, ranges: TagRanges) -> MasterResult<()> {
        let orphaned = self.conflicts(&ranges);
        if !orphaned.is_empty() {
            return Err(MasterError::RangeConflict {
                kind: self.kind,
                in_use: orphaned,
            });
        }
        self.spec = spec.to_string();
        self.ranges = ranges;
        Ok(())
    }

    /// Lease `requested`, or the lowest free tag when `None`
    pub fn allocate(&mut self, requested: Option<u32>) -> MasterResult<u32> {
        let tag = match requested {
            Some(tag) => {
                if !self.ranges.contains(tag) {
                    return Err(MasterError::TagOutOfRange {
                        kind: self.kind,
                        tag,
                    });
                }
                if self.in_use.contains(&tag) {
                    return Err(MasterError::TagInUse {
                        kind: self.kind,
                        tag,
                    });
                }
                tag
            }
            None => self
                .ranges
                .tags()
                .find(|tag| !self.in_use.contains(tag))
                .ok_or(MasterError::PoolExhausted(self.kind))?,
        };
        self.in_use.insert(tag);
        Ok(tag)
    }

    /// Free a leased tag; false if it was not leased
    pub fn release(&mut self, tag: u32) -> bool {
        self.in_use.remove(&tag)
    }

    /// Drop every lease, returning how many were held
    pub fn release_all(&mut self) -> usize {
        let count = self.in_use.len();
        self.in_use.clear();
        count
    }
}

/// Operational lease record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalLeases {
    pub vlan: Option<TagPool>,
    pub vxlan: Option<TagPool>,
}

impl StateRecord for OperationalLeases {
    const KEY: &'static str = "global/oper/global";
}

impl OperationalLeases {
    pub fn pool(&self, kind: TagKind) -> Option<&TagPool> {
        match kind {
            TagKind::Vlan => self.vlan.as_ref(),
            TagKind::Vxlan => self.vxlan.as_ref(),
        }
    }

    pub fn pool_mut(&mut self, kind: TagKind) -> Option<&mut TagPool> {
        match kind {
            TagKind::Vlan => self.vlan.as_mut(),
            TagKind::Vxlan => self.vxlan.as_mut(),
        }
    }

    fn slot(&mut self, kind: TagKind) -> &mut Option<TagPool> {
        match kind {
            TagKind::Vlan => &mut self.vlan,
            TagKind::Vxlan => &mut self.vxlan,
        }
    }

    /// Tags currently leased for `kind`, ascending
    pub fn in_use(&self, kind: TagKind) -> Vec<u32> {
        self.pool(kind)
            .map(|p| p.in_use().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Leased tags of `kind` that `ranges` would orphan
    pub fn conflicts(&self, kind: TagKind, ranges: &TagRanges) -> Vec<u32> {
        self.pool(kind)
            .map(|p| p.conflicts(ranges))
            .unwrap_or_default()
    }
}

/// Pool procedures over the persisted lease record.
///
/// Callers must hold the coordinator's critical section.
pub(crate) struct LeaseTracker<'a> {
    store: &'a dyn StateStore,
    parser: &'a dyn RangeParser,
}

impl<'a> LeaseTracker<'a> {
    pub fn new(store: &'a dyn StateStore, parser: &'a dyn RangeParser) -> Self {
        Self { store, parser }
    }

    /// Existing lease record, if any
    pub async fn load(&self) -> MasterResult<Option<OperationalLeases>> {
        Ok(probe_record::<OperationalLeases>(self.store).await?)
    }

    fn parse(&self, kind: TagKind, spec: &str) -> MasterResult<TagRanges> {
        self.parser
            .parse(spec, kind)
            .map_err(|source| MasterError::InvalidRange {
                kind,
                spec: spec.to_string(),
                source,
            })
    }

    /// First-time setup of an empty pool for `kind`
    pub async fn initialize(&self, kind: TagKind, spec: &str) -> MasterResult<()> {
        let ranges = self.parse(kind, spec)?;
        let mut leases = self.load().await?.unwrap_or_default();

        info!(%kind, spec, tags = ranges.len(), "initializing tag pool");
        *leases.slot(kind) = Some(TagPool::new(kind, spec, ranges));
        write_record(self.store, &leases).await?;
        Ok(())
    }

    /// Re-size the pool for `kind`, preserving leases
    pub async fn resize(&self, kind: TagKind, spec: &str) -> MasterResult<()> {
        let ranges = self.parse(kind, spec)?;
        let mut leases = read_record::<OperationalLeases>(self.store).await?;

        let slot = leases.slot(kind);
        if let Some(pool) = slot.as_mut() {
            info!(
                %kind,
                from = pool.spec(),
                to = spec,
                leased = pool.in_use().len(),
                "resizing tag pool"
            );
            pool.resize(spec, ranges)?;
        } else {
            debug!(%kind, spec, "no existing pool, creating one during resize");
            *slot = Some(TagPool::new(kind, spec, ranges));
        }
        write_record(self.store, &leases).await?;
        Ok(())
    }

    /// Drop every lease of `kind`, returning how many were held
    pub async fn release_all(&self, kind: TagKind) -> MasterResult<usize> {
        let mut leases = read_record::<OperationalLeases>(self.store).await?;
        let released = leases
            .pool_mut(kind)
            .map(TagPool::release_all)
            .unwrap_or_default();
        write_record(self.store, &leases).await?;
        if released > 0 {
            info!(%kind, released, "released leases");
        }
        Ok(released)
    }

    /// Lease a tag and persist
    pub async fn allocate(&self, kind: TagKind, requested: Option<u32>) -> MasterResult<u32> {
        let mut leases = self.load().await?.unwrap_or_default();
        let pool = leases
            .pool_mut(kind)
            .ok_or(MasterError::PoolNotConfigured(kind))?;
        let tag = pool.allocate(requested)?;
        write_record(self.store, &leases).await?;
        debug!(%kind, tag, "leased tag");
        Ok(tag)
    }

    /// Release a tag and persist; false if it was not leased
    pub async fn release(&self, kind: TagKind, tag: u32) -> MasterResult<bool> {
        let Some(mut leases) = self.load().await? else {
            return Ok(false);
        };
        let released = leases.pool_mut(kind).is_some_and(|p| p.release(tag));
        if released {
            write_record(self.store, &leases).await?;
            debug!(%kind, tag, "released tag");
        }
        Ok(released)
    }
}
