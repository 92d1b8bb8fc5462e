//! Feature-specific logging macros
//!
//! Each engine component logs under its own target so that levels can be set
//! per component through [`LogConfig`](super::config::LogConfig).

/// Feature categories for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFeature {
    Registry,
    Sync,
    Relation,
    Sort,
    View,
    Storage,
    Metadata,
}

impl LogFeature {
    pub const ALL: [LogFeature; 7] = [
        LogFeature::Registry,
        LogFeature::Sync,
        LogFeature::Relation,
        LogFeature::Sort,
        LogFeature::View,
        LogFeature::Storage,
        LogFeature::Metadata,
    ];

    /// Get the target string for this feature
    pub fn target(&self) -> &'static str {
        match self {
            LogFeature::Registry => "collection_sync::registry",
            LogFeature::Sync => "collection_sync::sync",
            LogFeature::Relation => "collection_sync::relation",
            LogFeature::Sort => "collection_sync::sort",
            LogFeature::View => "collection_sync::view",
            LogFeature::Storage => "collection_sync::storage",
            LogFeature::Metadata => "collection_sync::metadata",
        }
    }

    /// Key used for this feature in the `[features]` config table
    pub fn key(&self) -> &'static str {
        match self {
            LogFeature::Registry => "registry",
            LogFeature::Sync => "sync",
            LogFeature::Relation => "relation",
            LogFeature::Sort => "sort",
            LogFeature::View => "view",
            LogFeature::Storage => "storage",
            LogFeature::Metadata => "metadata",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }
}

// Registry logging macros
#[macro_export]
macro_rules! log_registry_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::registry", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_registry_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::registry", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_registry_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::registry", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_registry_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::registry", $($arg)*)
    };
}

// Sync logging macros
#[macro_export]
macro_rules! log_sync_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::sync", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sync_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::sync", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sync_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::sync", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sync_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::sync", $($arg)*)
    };
}

// Relation logging macros
#[macro_export]
macro_rules! log_relation_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::relation", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_relation_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::relation", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_relation_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::relation", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_relation_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::relation", $($arg)*)
    };
}

// Sort logging macros
#[macro_export]
macro_rules! log_sort_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::sort", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sort_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::sort", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sort_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::sort", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_sort_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::sort", $($arg)*)
    };
}

// View logging macros
#[macro_export]
macro_rules! log_view_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::view", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_view_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::view", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_view_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::view", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_view_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::view", $($arg)*)
    };
}

// Storage logging macros
#[macro_export]
macro_rules! log_storage_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::storage", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_storage_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::storage", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_storage_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::storage", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_storage_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::storage", $($arg)*)
    };
}

// Metadata logging macros
#[macro_export]
macro_rules! log_metadata_debug {
    ($($arg:tt)*) => {
        log::debug!(target: "collection_sync::metadata", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_metadata_info {
    ($($arg:tt)*) => {
        log::info!(target: "collection_sync::metadata", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_metadata_warn {
    ($($arg:tt)*) => {
        log::warn!(target: "collection_sync::metadata", $($arg)*)
    };
}

#[macro_export]
macro_rules! log_metadata_error {
    ($($arg:tt)*) => {
        log::error!(target: "collection_sync::metadata", $($arg)*)
    };
}

// Timing helper for long-running schema operations
pub struct PerformanceTimer {
    start: std::time::Instant,
    feature: LogFeature,
    operation: String,
}

impl PerformanceTimer {
    pub fn new(feature: LogFeature, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        log::debug!(target: feature.target(), "Starting timed operation: {}", operation);
        Self {
            start: std::time::Instant::now(),
            feature,
            operation,
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        log::debug!(
            target: self.feature.target(),
            "Operation '{}' completed in {:?}",
            self.operation,
            duration
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_keys_round_trip() {
        for feature in LogFeature::ALL {
            assert_eq!(LogFeature::from_key(feature.key()), Some(feature));
            assert!(feature.target().ends_with(feature.key()));
        }
        assert_eq!(LogFeature::from_key("network"), None);
    }
}
