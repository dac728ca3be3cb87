pub const GIGABYTE: u64 = 1024 * 1024 * 1024;
pub const MIN_CACHE_GIGABYTES: u64 = 2;
pub const MAX_CACHE_GIGABYTES: u64 = 200;

/// What the policy needs to know about one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView {
    pub key: String,
    pub size_bytes: u64,
    pub last_access: u64,
    pub pinned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionSelection {
    /// Keys to evict, least recently used first.
    pub victims: Vec<String>,
    /// An entry left in place although it alone exceeds the ceiling.
    pub oversized_kept: Option<String>,
}

/// Least-recently-used eviction under a byte ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_size_bytes: u64,
}

impl EvictionPolicy {
    pub fn new(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }

    /// Ceiling in whole gigabytes, clamped to the supported range.
    pub fn from_gigabytes(gigabytes: u64) -> Self {
        let clamped = gigabytes.clamp(MIN_CACHE_GIGABYTES, MAX_CACHE_GIGABYTES);
        Self::new(clamped * GIGABYTE)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub fn needs_eviction(&self, total_bytes: u64) -> bool {
        total_bytes > self.max_size_bytes
    }

    /// Pick least recently accessed, unpinned entries until the total fits.
    ///
    /// The sole remaining occupant is never evicted, even when it alone
    /// exceeds the ceiling; it is reported as `oversized_kept` instead.
    pub fn select_victims(&self, entries: &[EntryView]) -> EvictionSelection {
        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        let mut selection = EvictionSelection::default();
        if !self.needs_eviction(total) {
            return selection;
        }

        let mut candidates: Vec<&EntryView> = entries.iter().filter(|e| !e.pinned).collect();
        candidates.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| a.key.cmp(&b.key))
        });

        let mut remaining = entries.len();
        for candidate in candidates {
            if !self.needs_eviction(total) {
                break;
            }
            if remaining == 1 {
                selection.oversized_kept = Some(candidate.key.clone());
                break;
            }
            selection.victims.push(candidate.key.clone());
            total = total.saturating_sub(candidate.size_bytes);
            remaining -= 1;
        }
        selection
    }
}
