//! Home-app capability.
//!
//! Answers "is this package a launcher". The answer only decorates overlay
//! status; it never affects mode resolution.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Capability for recognizing launcher/home packages.
pub trait HomeAppCheck: Send + Sync {
    fn is_home_app(&self, package_id: &str) -> bool;
}

/// Type alias for shared home-app check reference.
pub type HomeAppCheckRef = Arc<dyn HomeAppCheck>;

/// Reports no package as a home app.
pub struct NoHomeApps;

impl HomeAppCheck for NoHomeApps {
    fn is_home_app(&self, _package_id: &str) -> bool {
        false
    }
}

/// Fixed list of launcher packages.
#[derive(Debug, Clone, Default)]
pub struct StaticHomeApps {
    packages: HashSet<String>,
}

impl StaticHomeApps {
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }
}

impl HomeAppCheck for StaticHomeApps {
    fn is_home_app(&self, package_id: &str) -> bool {
        self.packages.contains(package_id)
    }
}

/// Caches positive answers of a slower check (e.g. a package-manager query).
///
/// Negative answers are not cached: a launcher installed later is still
/// recognized.
pub struct MemoizedHomeApps<C> {
    inner: C,
    known: Mutex<HashSet<String>>,
}

impl<C: HomeAppCheck> MemoizedHomeApps<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            known: Mutex::new(HashSet::new()),
        }
    }

    /// Number of cached home packages.
    pub fn cached(&self) -> usize {
        self.known.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<C: HomeAppCheck> HomeAppCheck for MemoizedHomeApps<C> {
    fn is_home_app(&self, package_id: &str) -> bool {
        if self
            .known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(package_id)
        {
            return true;
        }

        let is_home = self.inner.is_home_app(package_id);
        if is_home {
            self.known
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(package_id.to_string());
        }
        is_home
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCheck {
        calls: AtomicUsize,
        homes: StaticHomeApps,
    }

    impl HomeAppCheck for CountingCheck {
        fn is_home_app(&self, package_id: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.homes.is_home_app(package_id)
        }
    }

    #[test]
    fn test_static_home_apps() {
        let check = StaticHomeApps::new(["com.android.launcher3"]);
        assert!(check.is_home_app("com.android.launcher3"));
        assert!(!check.is_home_app("com.a"));
        assert!(!NoHomeApps.is_home_app("com.android.launcher3"));
    }

    #[test]
    fn test_memoizes_positive_answers() {
        let memo = MemoizedHomeApps::new(CountingCheck {
            calls: AtomicUsize::new(0),
            homes: StaticHomeApps::new(["com.miui.home"]),
        });

        for _ in 0..3 {
            assert!(memo.is_home_app("com.miui.home"));
        }
        assert_eq!(memo.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(memo.cached(), 1);

        for _ in 0..2 {
            assert!(!memo.is_home_app("com.a"));
        }
        assert_eq!(memo.inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(memo.cached(), 1);
    }
}
